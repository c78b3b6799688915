//! The feed query engine: one statement per feed read, no secondary fetches.
//!
//! Eligibility for viewer `v`: a story is readable when it is neither
//! expired nor soft-deleted AND (it is PUBLIC, or `v` is the author, or `v`
//! is in the story's explicit audience). FRIENDS and PRIVATE both grant
//! through the audience table; PUBLIC stories carry no audience rows.

use std::collections::HashMap;

use rusqlite::{Connection, Row};

use wisp_types::models::{Reaction, Story, StoryWithMeta, Visibility};

use crate::{from_unix, StoreError, FEED_LIMIT};

/// Shared eligibility predicate; `?1` = viewer id, `?2` = now (unix seconds).
const ELIGIBLE: &str = "
    s.deleted_at IS NULL
    AND s.expires_at > ?2
    AND (
        s.visibility = 'PUBLIC'
        OR s.author_id = ?1
        OR EXISTS (
            SELECT 1 FROM story_audience sa
            WHERE sa.story_id = s.id AND sa.user_id = ?1
        )
    )";

pub(crate) fn stories_for_viewer(
    conn: &Connection,
    viewer_id: &str,
    now: i64,
) -> Result<Vec<Story>, StoreError> {
    let sql = format!(
        "SELECT s.id, s.author_id, s.text, s.media_key, s.visibility,
                s.created_at, s.expires_at, s.deleted_at
         FROM stories s
         WHERE {ELIGIBLE}
         ORDER BY s.created_at DESC, s.id DESC
         LIMIT {FEED_LIMIT}"
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params![viewer_id, now], story_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// The aggregated feed: two derived tables (`user_stories` for eligibility,
/// `story_stats` for counters), then one projection joining author identity
/// and the viewer's own flags. Mirrors the plain feed's ordering and limit.
pub(crate) fn feed_with_meta(
    conn: &Connection,
    viewer_id: &str,
    now: i64,
) -> Result<Vec<StoryWithMeta>, StoreError> {
    let sql = format!(
        "WITH user_stories AS (
            SELECT s.id, s.author_id, s.text, s.media_key, s.visibility,
                   s.created_at, s.expires_at, s.deleted_at
            FROM stories s
            WHERE {ELIGIBLE}
        ),
        story_stats AS (
            SELECT us.id AS story_id,
                   (SELECT COUNT(DISTINCT sv.viewer_id)
                    FROM story_views sv WHERE sv.story_id = us.id) AS view_count,
                   (SELECT COUNT(DISTINCT r.user_id)
                    FROM reactions r WHERE r.story_id = us.id) AS reaction_count,
                   COALESCE(
                       (SELECT json_group_object(rt.reaction_type, rt.cnt)
                        FROM (SELECT reaction_type, COUNT(*) AS cnt
                              FROM reactions
                              WHERE story_id = us.id
                              GROUP BY reaction_type) rt),
                       '{{}}'
                   ) AS reaction_breakdown
            FROM user_stories us
        )
        SELECT us.id, us.author_id, us.text, us.media_key, us.visibility,
               us.created_at, us.expires_at, us.deleted_at,
               u.email AS author_email,
               ss.view_count,
               ss.reaction_count,
               ss.reaction_breakdown,
               EXISTS (SELECT 1 FROM story_views sv2
                       WHERE sv2.story_id = us.id AND sv2.viewer_id = ?1)
                   AS user_has_viewed,
               (SELECT r2.reaction_type FROM reactions r2
                WHERE r2.story_id = us.id AND r2.user_id = ?1)
                   AS user_reaction
        FROM user_stories us
        JOIN users u ON u.id = us.author_id
        JOIN story_stats ss ON ss.story_id = us.id
        ORDER BY us.created_at DESC, us.id DESC
        LIMIT {FEED_LIMIT}"
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params![viewer_id, now], |row| {
            let story = story_from_row(row)?;
            let breakdown_json: String = row.get("reaction_breakdown")?;
            let user_reaction: Option<String> = row.get("user_reaction")?;
            Ok(StoryWithMeta {
                story,
                author_email: row.get("author_email")?,
                view_count: row.get("view_count")?,
                reaction_count: row.get("reaction_count")?,
                reaction_breakdown: parse_breakdown(&breakdown_json),
                user_has_viewed: row.get("user_has_viewed")?,
                user_reaction: user_reaction.as_deref().and_then(Reaction::parse),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Maps the common story column prefix (indexes 0..=7).
pub(crate) fn story_from_row(row: &Row<'_>) -> rusqlite::Result<Story> {
    let vis: String = row.get(4)?;
    let visibility = Visibility::parse(&vis).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown visibility {vis:?}").into(),
        )
    })?;

    let deleted_at: Option<i64> = row.get(7)?;
    Ok(Story {
        id: row.get(0)?,
        author_id: row.get(1)?,
        text: row.get(2)?,
        media_key: row.get(3)?,
        visibility,
        created_at: from_unix(row.get(5)?),
        expires_at: from_unix(row.get(6)?),
        deleted_at: deleted_at.map(from_unix),
    })
}

/// Breakdown arrives as a JSON object `{"👍": 2, ...}` from
/// `json_group_object`. Unknown keys are skipped rather than failing the row.
fn parse_breakdown(json: &str) -> HashMap<Reaction, i64> {
    let raw: HashMap<String, i64> = serde_json::from_str(json).unwrap_or_default();
    raw.into_iter()
        .filter_map(|(k, v)| Reaction::parse(&k).map(|r| (r, v)))
        .collect()
}
