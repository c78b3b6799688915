use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Reaction;

/// Notifications pushed to story authors over the hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventPayload {
    #[serde(rename = "story.viewed")]
    StoryViewed {
        story_id: String,
        viewer_id: String,
        viewed_at: DateTime<Utc>,
    },
    #[serde(rename = "story.reacted")]
    StoryReacted {
        story_id: String,
        user_id: String,
        emoji: Reaction,
        reacted_at: DateTime<Utc>,
    },
}

/// Wire envelope: `{"type": ..., "data": ..., "timestamp": ...}`,
/// timestamps ISO-8601 UTC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(flatten)]
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            payload,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewed_event_wire_shape() {
        let ev = Event {
            payload: EventPayload::StoryViewed {
                story_id: "s1".into(),
                viewer_id: "u2".into(),
                viewed_at: "2024-05-01T12:00:00Z".parse().unwrap(),
            },
            timestamp: "2024-05-01T12:00:00Z".parse().unwrap(),
        };
        let json: serde_json::Value = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "story.viewed");
        assert_eq!(json["data"]["story_id"], "s1");
        assert_eq!(json["data"]["viewer_id"], "u2");
        assert_eq!(json["timestamp"], "2024-05-01T12:00:00Z");
    }

    #[test]
    fn reacted_event_carries_emoji() {
        let ev = Event {
            payload: EventPayload::StoryReacted {
                story_id: "s1".into(),
                user_id: "u2".into(),
                emoji: Reaction::Heart,
                reacted_at: "2024-05-01T12:00:00Z".parse().unwrap(),
            },
            timestamp: "2024-05-01T12:00:00Z".parse().unwrap(),
        };
        let json: serde_json::Value = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "story.reacted");
        assert_eq!(json["data"]["emoji"], "❤️");
    }
}
