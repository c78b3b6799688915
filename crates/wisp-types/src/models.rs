use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who may read a story. Closed set; unknown values are rejected at the
/// boundary and never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    #[serde(rename = "PUBLIC")]
    Public,
    #[serde(rename = "FRIENDS")]
    Friends,
    #[serde(rename = "PRIVATE")]
    Private,
}

impl Visibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Public => "PUBLIC",
            Visibility::Friends => "FRIENDS",
            Visibility::Private => "PRIVATE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PUBLIC" => Some(Visibility::Public),
            "FRIENDS" => Some(Visibility::Friends),
            "PRIVATE" => Some(Visibility::Private),
            _ => None,
        }
    }
}

/// The six permitted reaction emojis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reaction {
    #[serde(rename = "👍")]
    ThumbsUp,
    #[serde(rename = "❤️")]
    Heart,
    #[serde(rename = "😂")]
    Joy,
    #[serde(rename = "😮")]
    Wow,
    #[serde(rename = "😢")]
    Sad,
    #[serde(rename = "🔥")]
    Fire,
}

impl Reaction {
    pub const ALL: [Reaction; 6] = [
        Reaction::ThumbsUp,
        Reaction::Heart,
        Reaction::Joy,
        Reaction::Wow,
        Reaction::Sad,
        Reaction::Fire,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Reaction::ThumbsUp => "👍",
            Reaction::Heart => "❤️",
            Reaction::Joy => "😂",
            Reaction::Wow => "😮",
            Reaction::Sad => "😢",
            Reaction::Fire => "🔥",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|r| r.as_str() == s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Story {
    pub id: String,
    pub author_id: String,
    pub text: Option<String>,
    pub media_key: Option<String>,
    pub visibility: Visibility,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Story {
    /// A story is readable only while unexpired and not soft-deleted.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.deleted_at.is_none() && self.expires_at > now
    }
}

/// A feed entry with everything the client renders: author identity,
/// counters, reaction breakdown, and the viewer's own interaction flags.
/// Assembled in one statement; see the feed query in wisp-db.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryWithMeta {
    #[serde(flatten)]
    pub story: Story,
    pub author_email: String,
    pub view_count: i64,
    pub reaction_count: i64,
    pub reaction_breakdown: HashMap<Reaction, i64>,
    pub user_has_viewed: bool,
    pub user_reaction: Option<Reaction>,
}

/// Per-author activity over the trailing 7 days.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserStats {
    pub posted: i64,
    pub views: i64,
    pub unique_viewers: i64,
    pub reaction_counts: HashMap<Reaction, i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaUpload {
    pub object_key: String,
    pub content_type: String,
    pub uploaded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reaction_round_trips_as_emoji() {
        for r in Reaction::ALL {
            let json = serde_json::to_string(&r).unwrap();
            assert_eq!(json, format!("\"{}\"", r.as_str()));
            let back: Reaction = serde_json::from_str(&json).unwrap();
            assert_eq!(back, r);
            assert_eq!(Reaction::parse(r.as_str()), Some(r));
        }
    }

    #[test]
    fn unknown_reaction_is_rejected() {
        assert!(serde_json::from_str::<Reaction>("\"🙃\"").is_err());
        assert_eq!(Reaction::parse("thumbs_up"), None);
        assert_eq!(Reaction::parse(""), None);
    }

    #[test]
    fn visibility_parse_is_exact() {
        assert_eq!(Visibility::parse("PUBLIC"), Some(Visibility::Public));
        assert_eq!(Visibility::parse("public"), None);
        assert_eq!(Visibility::parse("PUBLIC "), None);
        for v in [Visibility::Public, Visibility::Friends, Visibility::Private] {
            assert_eq!(Visibility::parse(v.as_str()), Some(v));
        }
    }

    #[test]
    fn reaction_map_keys_serialize_as_emoji() {
        let mut counts = HashMap::new();
        counts.insert(Reaction::Fire, 3i64);
        let json = serde_json::to_string(&counts).unwrap();
        assert_eq!(json, "{\"🔥\":3}");
    }
}
