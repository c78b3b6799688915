use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use wisp_types::models::{MediaUpload, Reaction, Story, StoryWithMeta, UserStats, Visibility};

use crate::feed;
use crate::{from_unix, to_unix, Database, Store, StoreError, STORY_LIFETIME};

const STATS_WINDOW_SECS: i64 = 7 * 24 * 60 * 60;

impl Store for Database {
    fn create_user(&self, email: &str, password_hash: &str) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        let now = to_unix(Utc::now());

        self.with_conn_mut(|conn| {
            match conn.execute(
                "INSERT INTO users (id, email, password, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id, email, password_hash, now],
            ) {
                Ok(_) => Ok(id.clone()),
                Err(e) if is_unique_violation(&e, "users.email") => Err(StoreError::DuplicateEmail),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn get_user_by_email(&self, email: &str) -> Result<(String, String), StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, password FROM users WHERE email = ?1",
                [email],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .ok_or(StoreError::NotFound)
        })
    }

    fn create_story(
        &self,
        author_id: &str,
        text: Option<&str>,
        media_key: Option<&str>,
        visibility: Visibility,
        audience: &[String],
    ) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let created_at = to_unix(now);
        let expires_at = to_unix(now + STORY_LIFETIME);

        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO stories
                     (id, author_id, text, media_key, visibility, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    id,
                    author_id,
                    text,
                    media_key,
                    visibility.as_str(),
                    created_at,
                    expires_at
                ],
            )?;

            // Audience rows only exist for non-PUBLIC stories; a PUBLIC
            // story's audience list is ignored.
            if visibility != Visibility::Public {
                for user_id in audience {
                    tx.execute(
                        "INSERT OR IGNORE INTO story_audience (story_id, user_id)
                         VALUES (?1, ?2)",
                        rusqlite::params![id, user_id],
                    )?;
                }
            }

            tx.commit()?;
            Ok(id.clone())
        })
    }

    fn get_story(&self, story_id: &str) -> Result<Story, StoreError> {
        let now = to_unix(Utc::now());
        self.with_conn(|conn| live_story(conn, story_id, now))
    }

    fn get_stories_for_viewer(&self, viewer_id: &str) -> Result<Vec<Story>, StoreError> {
        let now = to_unix(Utc::now());
        self.with_conn(|conn| feed::stories_for_viewer(conn, viewer_id, now))
    }

    fn get_feed_with_meta(&self, viewer_id: &str) -> Result<Vec<StoryWithMeta>, StoreError> {
        let now = to_unix(Utc::now());
        self.with_conn(|conn| feed::feed_with_meta(conn, viewer_id, now))
    }

    fn can_view(&self, story_id: &str, viewer_id: &str) -> Result<bool, StoreError> {
        let now = to_unix(Utc::now());
        self.with_conn(|conn| {
            let story = live_story(conn, story_id, now)?;
            if story.visibility == Visibility::Public || story.author_id == viewer_id {
                return Ok(true);
            }
            let granted: bool = conn.query_row(
                "SELECT EXISTS (SELECT 1 FROM story_audience
                                WHERE story_id = ?1 AND user_id = ?2)",
                rusqlite::params![story_id, viewer_id],
                |row| row.get(0),
            )?;
            Ok(granted)
        })
    }

    fn record_view(&self, story_id: &str, viewer_id: &str) -> Result<bool, StoreError> {
        let now = to_unix(Utc::now());
        self.with_conn_mut(|conn| {
            live_story(conn, story_id, now)?;
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO story_views (story_id, viewer_id, viewed_at)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![story_id, viewer_id, now],
            )?;
            Ok(inserted > 0)
        })
    }

    fn upsert_reaction(
        &self,
        story_id: &str,
        user_id: &str,
        emoji: Reaction,
    ) -> Result<(), StoreError> {
        let now = to_unix(Utc::now());
        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;
            live_story(&tx, story_id, now)?;
            tx.execute(
                "DELETE FROM reactions WHERE story_id = ?1 AND user_id = ?2",
                rusqlite::params![story_id, user_id],
            )?;
            tx.execute(
                "INSERT INTO reactions (story_id, user_id, reaction_type, reacted_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![story_id, user_id, emoji.as_str(), now],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    fn follow(&self, follower_id: &str, followed_id: &str) -> Result<(), StoreError> {
        if follower_id == followed_id {
            return Err(StoreError::SelfFollow);
        }
        let now = to_unix(Utc::now());
        self.with_conn_mut(|conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS (SELECT 1 FROM users WHERE id = ?1)",
                [followed_id],
                |row| row.get(0),
            )?;
            if !exists {
                return Err(StoreError::NotFound);
            }
            conn.execute(
                "INSERT OR IGNORE INTO follows (follower_id, followed_id, created_at)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![follower_id, followed_id, now],
            )?;
            Ok(())
        })
    }

    fn unfollow(&self, follower_id: &str, followed_id: &str) -> Result<(), StoreError> {
        self.with_conn_mut(|conn| {
            let deleted = conn.execute(
                "DELETE FROM follows WHERE follower_id = ?1 AND followed_id = ?2",
                rusqlite::params![follower_id, followed_id],
            )?;
            if deleted == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
    }

    fn get_followees(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT followed_id FROM follows WHERE follower_id = ?1 ORDER BY created_at",
            )?;
            let ids = stmt
                .query_map([user_id], |row| row.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    fn get_followers(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT follower_id FROM follows WHERE followed_id = ?1 ORDER BY created_at",
            )?;
            let ids = stmt
                .query_map([user_id], |row| row.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    fn get_user_stats(&self, user_id: &str) -> Result<UserStats, StoreError> {
        let since = to_unix(Utc::now()) - STATS_WINDOW_SECS;
        self.with_conn(|conn| {
            let (posted, views, unique_viewers) = conn.query_row(
                "SELECT
                    (SELECT COUNT(*) FROM stories
                     WHERE author_id = ?1 AND created_at >= ?2),
                    (SELECT COUNT(*) FROM story_views sv
                     JOIN stories s ON s.id = sv.story_id
                     WHERE s.author_id = ?1 AND sv.viewed_at >= ?2),
                    (SELECT COUNT(DISTINCT sv.viewer_id) FROM story_views sv
                     JOIN stories s ON s.id = sv.story_id
                     WHERE s.author_id = ?1 AND sv.viewed_at >= ?2)",
                rusqlite::params![user_id, since],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;

            let mut stmt = conn.prepare(
                "SELECT r.reaction_type, COUNT(*) FROM reactions r
                 JOIN stories s ON s.id = r.story_id
                 WHERE s.author_id = ?1 AND r.reacted_at >= ?2
                 GROUP BY r.reaction_type",
            )?;
            let reaction_counts = stmt
                .query_map(rusqlite::params![user_id, since], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .filter_map(|(k, v)| Reaction::parse(&k).map(|r| (r, v)))
                .collect();

            Ok(UserStats {
                posted,
                views,
                unique_viewers,
                reaction_counts,
            })
        })
    }

    fn soft_delete_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let now = to_unix(now);
        self.with_conn_mut(|conn| {
            let rows = conn.execute(
                "UPDATE stories SET deleted_at = ?1
                 WHERE expires_at < ?1 AND deleted_at IS NULL",
                [now],
            )?;
            Ok(rows)
        })
    }

    fn record_media_upload(
        &self,
        user_id: &str,
        object_key: &str,
        content_type: &str,
    ) -> Result<(), StoreError> {
        let id = Uuid::new_v4().to_string();
        let now = to_unix(Utc::now());
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO media_uploads (id, user_id, object_key, content_type, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, user_id, object_key, content_type, now],
            )?;
            Ok(())
        })
    }

    fn list_media(&self, user_id: &str) -> Result<Vec<MediaUpload>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT object_key, content_type, created_at
                 FROM media_uploads WHERE user_id = ?1
                 ORDER BY created_at DESC",
            )?;
            let uploads = stmt
                .query_map([user_id], |row| {
                    Ok(MediaUpload {
                        object_key: row.get(0)?,
                        content_type: row.get(1)?,
                        uploaded_at: from_unix(row.get(2)?),
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(uploads)
        })
    }

    fn delete_media(&self, user_id: &str, object_key: &str) -> Result<(), StoreError> {
        self.with_conn_mut(|conn| {
            let deleted = conn.execute(
                "DELETE FROM media_uploads WHERE user_id = ?1 AND object_key = ?2",
                rusqlite::params![user_id, object_key],
            )?;
            if deleted == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
    }
}

/// Fetches a story that is still readable: present, unexpired, not
/// soft-deleted. Everything else is `NotFound`.
fn live_story(conn: &Connection, story_id: &str, now: i64) -> Result<Story, StoreError> {
    conn.query_row(
        "SELECT id, author_id, text, media_key, visibility,
                created_at, expires_at, deleted_at
         FROM stories
         WHERE id = ?1 AND deleted_at IS NULL AND expires_at > ?2",
        rusqlite::params![story_id, now],
        feed::story_from_row,
    )
    .optional()?
    .ok_or(StoreError::NotFound)
}

fn is_unique_violation(err: &rusqlite::Error, column: &str) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, Some(msg))
            if e.code == rusqlite::ErrorCode::ConstraintViolation && msg.contains(column)
    )
}
