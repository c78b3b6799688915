pub mod feed;
pub mod migrations;
pub mod queries;

use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use thiserror::Error;
use tracing::info;

use wisp_types::models::{MediaUpload, Reaction, Story, StoryWithMeta, UserStats, Visibility};

/// Every story lives exactly this long before the expiration worker reaps it.
pub const STORY_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Feeds are capped at this many entries.
pub const FEED_LIMIT: u32 = 50;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("email already registered")]
    DuplicateEmail,
    #[error("not found")]
    NotFound,
    #[error("cannot follow yourself")]
    SelfFollow,
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// The durable store's capability set. The cache layer implements the same
/// trait as a read-through decorator, so callers cannot tell them apart.
pub trait Store: Send + Sync {
    fn create_user(&self, email: &str, password_hash: &str) -> Result<String, StoreError>;
    fn get_user_by_email(&self, email: &str) -> Result<(String, String), StoreError>;

    fn create_story(
        &self,
        author_id: &str,
        text: Option<&str>,
        media_key: Option<&str>,
        visibility: Visibility,
        audience: &[String],
    ) -> Result<String, StoreError>;
    fn get_story(&self, story_id: &str) -> Result<Story, StoreError>;
    fn get_stories_for_viewer(&self, viewer_id: &str) -> Result<Vec<Story>, StoreError>;
    fn get_feed_with_meta(&self, viewer_id: &str) -> Result<Vec<StoryWithMeta>, StoreError>;
    fn can_view(&self, story_id: &str, viewer_id: &str) -> Result<bool, StoreError>;

    /// Returns true if this was the viewer's first view of the story.
    fn record_view(&self, story_id: &str, viewer_id: &str) -> Result<bool, StoreError>;
    fn upsert_reaction(
        &self,
        story_id: &str,
        user_id: &str,
        emoji: Reaction,
    ) -> Result<(), StoreError>;

    fn follow(&self, follower_id: &str, followed_id: &str) -> Result<(), StoreError>;
    fn unfollow(&self, follower_id: &str, followed_id: &str) -> Result<(), StoreError>;
    fn get_followees(&self, user_id: &str) -> Result<Vec<String>, StoreError>;
    fn get_followers(&self, user_id: &str) -> Result<Vec<String>, StoreError>;

    fn get_user_stats(&self, user_id: &str) -> Result<UserStats, StoreError>;
    fn soft_delete_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;

    fn record_media_upload(
        &self,
        user_id: &str,
        object_key: &str,
        content_type: &str,
    ) -> Result<(), StoreError>;
    fn list_media(&self, user_id: &str) -> Result<Vec<MediaUpload>, StoreError>;
    fn delete_media(&self, user_id: &str, object_key: &str) -> Result<(), StoreError>;
}

/// Single-connection SQLite wrapper.
///
/// Uses `Mutex` because `rusqlite::Connection` is `Send` but not `Sync`.
/// WAL mode is set for crash safety; callers run store operations on the
/// blocking thread pool.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::init(conn, Some(path))
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, None)
    }

    fn init(conn: Connection, path: Option<&Path>) -> Result<Self, StoreError> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run(&conn)?;

        if let Some(path) = path {
            info!("database opened at {}", path.display());
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection for read-only queries (SELECT).
    /// Semantically distinct from `with_conn_mut` to ease a future move to
    /// a reader/writer pool.
    pub(crate) fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        // A poisoned lock only means another thread panicked mid-query;
        // the connection itself is still usable.
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        f(&conn)
    }

    /// Acquire the connection for write queries (INSERT/UPDATE/DELETE).
    /// Currently identical to `with_conn` but will use a dedicated writer
    /// connection once a pool is introduced.
    pub(crate) fn with_conn_mut<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        f(&conn)
    }
}

pub(crate) fn to_unix(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

pub(crate) fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::UNIX_EPOCH)
}
