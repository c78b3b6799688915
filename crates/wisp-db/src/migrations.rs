use rusqlite::Connection;
use tracing::info;

use crate::StoreError;

/// Current schema version. Bump this and append a migration function to
/// `MIGRATIONS` when the schema changes.
const CURRENT_VERSION: u32 = 2;

type MigrationFn = fn(&Connection) -> Result<(), StoreError>;

/// Ordered list of migrations. Index 0 = version 1, index 1 = version 2, etc.
const MIGRATIONS: &[MigrationFn] = &[migrate_v1, migrate_v2];

pub fn run(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version     INTEGER NOT NULL,
            applied_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    if current >= CURRENT_VERSION {
        return Ok(());
    }

    // Each migration plus its version bump runs in one immediate transaction
    // so concurrent writers cannot interleave.
    for version in (current + 1)..=CURRENT_VERSION {
        let idx = (version - 1) as usize;
        info!("applying schema migration v{}", version);

        conn.execute_batch("BEGIN IMMEDIATE")?;
        match MIGRATIONS[idx](conn) {
            Ok(()) => {
                conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
                conn.execute_batch("COMMIT")?;
            }
            Err(e) => {
                conn.execute_batch("ROLLBACK").ok();
                return Err(e);
            }
        }
    }

    info!("schema migrations complete (now at v{})", CURRENT_VERSION);
    Ok(())
}

/// Version 1: users, stories, audience, views, reactions, follows.
fn migrate_v1(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            email       TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            created_at  INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS stories (
            id          TEXT PRIMARY KEY,
            author_id   TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            text        TEXT,
            media_key   TEXT,
            visibility  TEXT NOT NULL
                        CHECK (visibility IN ('PUBLIC', 'FRIENDS', 'PRIVATE')),
            created_at  INTEGER NOT NULL,
            expires_at  INTEGER NOT NULL,
            deleted_at  INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_stories_author
            ON stories(author_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_stories_expiry
            ON stories(expires_at) WHERE deleted_at IS NULL;

        CREATE TABLE IF NOT EXISTS story_audience (
            story_id    TEXT NOT NULL REFERENCES stories(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            PRIMARY KEY (story_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS story_views (
            story_id    TEXT NOT NULL REFERENCES stories(id) ON DELETE CASCADE,
            viewer_id   TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            viewed_at   INTEGER NOT NULL,
            UNIQUE (story_id, viewer_id)
        );

        CREATE TABLE IF NOT EXISTS reactions (
            story_id      TEXT NOT NULL REFERENCES stories(id) ON DELETE CASCADE,
            user_id       TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            reaction_type TEXT NOT NULL,
            reacted_at    INTEGER NOT NULL,
            UNIQUE (story_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_reactions_story
            ON reactions(story_id);

        CREATE TABLE IF NOT EXISTS follows (
            follower_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            followed_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            created_at  INTEGER NOT NULL,
            PRIMARY KEY (follower_id, followed_id)
        );

        CREATE INDEX IF NOT EXISTS idx_follows_followed
            ON follows(followed_id);
        ",
    )?;
    Ok(())
}

/// Version 2: media upload ledger backing GET /media.
fn migrate_v2(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS media_uploads (
            id           TEXT PRIMARY KEY,
            user_id      TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            object_key   TEXT NOT NULL UNIQUE,
            content_type TEXT NOT NULL,
            created_at   INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_media_user
            ON media_uploads(user_id, created_at);
        ",
    )?;
    Ok(())
}
