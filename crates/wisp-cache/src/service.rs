use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use wisp_db::{Store, StoreError};
use wisp_types::models::{MediaUpload, Reaction, Story, StoryWithMeta, UserStats, Visibility};

// Cache durations per key family.
pub const FOLLOWEES_TTL: Duration = Duration::from_secs(5 * 60);
pub const FEED_TTL: Duration = Duration::from_secs(45);
pub const STORY_TTL: Duration = Duration::from_secs(10 * 60);
pub const STATS_TTL: Duration = Duration::from_secs(2 * 60);

fn followees_key(user_id: &str) -> String {
    format!("user:followees:{user_id}")
}

fn feed_key(user_id: &str) -> String {
    format!("feed:user:{user_id}")
}

fn story_key(story_id: &str) -> String {
    format!("story:{story_id}")
}

fn stats_key(user_id: &str) -> String {
    format!("user:stats:{user_id}")
}

/// Read-through cache over any [`Store`]. Shares the store's interface so
/// callers cannot tell the two apart; a cache miss (including a value that
/// fails to deserialize) falls back to the inner store and repopulates the
/// key. Writes go to the inner store first, then fan invalidations out
/// best-effort.
pub struct CachedStore<S> {
    inner: S,
    kv: Arc<crate::KvStore>,
}

impl<S: Store> CachedStore<S> {
    pub fn new(inner: S, kv: Arc<crate::KvStore>) -> Self {
        Self { inner, kv }
    }

    fn read_through<T, F>(&self, key: &str, ttl: Duration, fetch: F) -> Result<T, StoreError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, StoreError>,
    {
        if let Some(raw) = self.kv.get(key) {
            match serde_json::from_str(&raw) {
                Ok(value) => return Ok(value),
                Err(e) => debug!(key, "dropping undecodable cache entry: {e}"),
            }
        }

        let value = fetch()?;
        match serde_json::to_string(&value) {
            Ok(raw) => self.kv.set(key, raw, ttl),
            Err(e) => warn!(key, "failed to encode cache entry: {e}"),
        }
        Ok(value)
    }

    /// Clears everything keyed on one user: their feed, stats, and followee
    /// list.
    fn invalidate_user(&self, user_id: &str) {
        self.kv.del_many([
            feed_key(user_id),
            stats_key(user_id),
            followees_key(user_id),
        ]);
    }

    fn invalidate_feeds(&self, user_ids: &[String]) {
        self.kv.del_many(user_ids.iter().map(|u| feed_key(u)));
    }

    /// Best-effort stats invalidation for a story's author, used after views
    /// and reactions. Counters may stay stale up to the feed TTL; feeds are
    /// deliberately not touched.
    fn invalidate_author_stats(&self, story_id: &str) {
        match self.get_story(story_id) {
            Ok(story) => self.kv.del(&stats_key(&story.author_id)),
            Err(e) => debug!(story_id, "skipping stats invalidation: {e}"),
        }
    }
}

impl<S: Store> Store for CachedStore<S> {
    fn create_user(&self, email: &str, password_hash: &str) -> Result<String, StoreError> {
        self.inner.create_user(email, password_hash)
    }

    fn get_user_by_email(&self, email: &str) -> Result<(String, String), StoreError> {
        self.inner.get_user_by_email(email)
    }

    fn create_story(
        &self,
        author_id: &str,
        text: Option<&str>,
        media_key: Option<&str>,
        visibility: Visibility,
        audience: &[String],
    ) -> Result<String, StoreError> {
        let story_id = self
            .inner
            .create_story(author_id, text, media_key, visibility, audience)?;

        // The author observes their own write immediately (their feed key is
        // purged before this call returns); affected viewers converge within
        // the feed TTL.
        self.invalidate_user(author_id);
        match visibility {
            Visibility::Public | Visibility::Friends => match self.inner.get_followers(author_id) {
                Ok(followers) => self.invalidate_feeds(&followers),
                Err(e) => warn!(author_id, "follower fan-out skipped: {e}"),
            },
            Visibility::Private => self.invalidate_feeds(audience),
        }

        Ok(story_id)
    }

    fn get_story(&self, story_id: &str) -> Result<Story, StoreError> {
        let story = self.read_through(&story_key(story_id), STORY_TTL, || {
            self.inner.get_story(story_id)
        })?;
        // A story can expire or be soft-deleted while cached; never serve it.
        if !story.is_live(Utc::now()) {
            self.kv.del(&story_key(story_id));
            return Err(StoreError::NotFound);
        }
        Ok(story)
    }

    fn get_stories_for_viewer(&self, viewer_id: &str) -> Result<Vec<Story>, StoreError> {
        let stories: Vec<Story> = self.read_through(&feed_key(viewer_id), FEED_TTL, || {
            self.inner.get_stories_for_viewer(viewer_id)
        })?;
        let now = Utc::now();
        Ok(stories.into_iter().filter(|s| s.is_live(now)).collect())
    }

    fn get_feed_with_meta(&self, viewer_id: &str) -> Result<Vec<StoryWithMeta>, StoreError> {
        // Counters and per-viewer flags would go stale under a cached copy;
        // the aggregate query is a single statement, so it goes straight
        // through.
        self.inner.get_feed_with_meta(viewer_id)
    }

    fn can_view(&self, story_id: &str, viewer_id: &str) -> Result<bool, StoreError> {
        self.inner.can_view(story_id, viewer_id)
    }

    fn record_view(&self, story_id: &str, viewer_id: &str) -> Result<bool, StoreError> {
        let first_view = self.inner.record_view(story_id, viewer_id)?;
        if first_view {
            self.invalidate_author_stats(story_id);
        }
        Ok(first_view)
    }

    fn upsert_reaction(
        &self,
        story_id: &str,
        user_id: &str,
        emoji: Reaction,
    ) -> Result<(), StoreError> {
        self.inner.upsert_reaction(story_id, user_id, emoji)?;
        self.invalidate_author_stats(story_id);
        Ok(())
    }

    fn follow(&self, follower_id: &str, followed_id: &str) -> Result<(), StoreError> {
        self.inner.follow(follower_id, followed_id)?;
        self.invalidate_user(follower_id);
        self.invalidate_user(followed_id);
        Ok(())
    }

    fn unfollow(&self, follower_id: &str, followed_id: &str) -> Result<(), StoreError> {
        self.inner.unfollow(follower_id, followed_id)?;
        self.invalidate_user(follower_id);
        self.invalidate_user(followed_id);
        Ok(())
    }

    fn get_followees(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        self.read_through(&followees_key(user_id), FOLLOWEES_TTL, || {
            self.inner.get_followees(user_id)
        })
    }

    fn get_followers(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        // Read only on the fan-out path; not worth a key family.
        self.inner.get_followers(user_id)
    }

    fn get_user_stats(&self, user_id: &str) -> Result<UserStats, StoreError> {
        self.read_through(&stats_key(user_id), STATS_TTL, || {
            self.inner.get_user_stats(user_id)
        })
    }

    fn soft_delete_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        self.inner.soft_delete_expired(now)
    }

    fn record_media_upload(
        &self,
        user_id: &str,
        object_key: &str,
        content_type: &str,
    ) -> Result<(), StoreError> {
        self.inner
            .record_media_upload(user_id, object_key, content_type)
    }

    fn list_media(&self, user_id: &str) -> Result<Vec<MediaUpload>, StoreError> {
        self.inner.list_media(user_id)
    }

    fn delete_media(&self, user_id: &str, object_key: &str) -> Result<(), StoreError> {
        self.inner.delete_media(user_id, object_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wisp_db::Database;

    fn cached() -> CachedStore<Database> {
        CachedStore::new(
            Database::open_in_memory().unwrap(),
            Arc::new(crate::KvStore::new()),
        )
    }

    fn user(store: &CachedStore<Database>, email: &str) -> String {
        store.create_user(email, "hash").unwrap()
    }

    #[test]
    fn author_sees_own_story_immediately() {
        let store = cached();
        let a = user(&store, "a@example.com");

        // Prime the author's (empty) feed cache.
        assert!(store.get_stories_for_viewer(&a).unwrap().is_empty());

        let s = store
            .create_story(&a, Some("hi"), None, Visibility::Public, &[])
            .unwrap();

        let feed = store.get_stories_for_viewer(&a).unwrap();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].id, s);
    }

    #[test]
    fn follower_feed_is_invalidated_on_create() {
        let store = cached();
        let a = user(&store, "a@example.com");
        let b = user(&store, "b@example.com");
        store.follow(&b, &a).unwrap();

        assert!(store.get_stories_for_viewer(&b).unwrap().is_empty());

        store
            .create_story(&a, Some("hi"), None, Visibility::Public, &[])
            .unwrap();

        assert_eq!(store.get_stories_for_viewer(&b).unwrap().len(), 1);
    }

    #[test]
    fn private_story_invalidates_audience_feeds() {
        let store = cached();
        let a = user(&store, "a@example.com");
        let b = user(&store, "b@example.com");

        assert!(store.get_stories_for_viewer(&b).unwrap().is_empty());

        store
            .create_story(
                &a,
                Some("secret"),
                None,
                Visibility::Private,
                std::slice::from_ref(&b),
            )
            .unwrap();

        assert_eq!(store.get_stories_for_viewer(&b).unwrap().len(), 1);
    }

    #[test]
    fn stale_feed_is_served_until_ttl() {
        let store = cached();
        let a = user(&store, "a@example.com");
        let b = user(&store, "b@example.com");
        // B does not follow A, so B's feed key never gets invalidated.
        assert!(store.get_stories_for_viewer(&b).unwrap().is_empty());

        store
            .create_story(&a, Some("hi"), None, Visibility::Public, &[])
            .unwrap();

        // Cached copy still empty; that is the documented staleness bound.
        assert!(store.get_stories_for_viewer(&b).unwrap().is_empty());
    }

    #[test]
    fn undecodable_cache_entry_falls_back_to_store() {
        let kv = Arc::new(crate::KvStore::new());
        let store = CachedStore::new(Database::open_in_memory().unwrap(), kv.clone());
        let a = user(&store, "a@example.com");
        store
            .create_story(&a, Some("hi"), None, Visibility::Public, &[])
            .unwrap();

        kv.set(&feed_key(&a), "{not json".into(), FEED_TTL);
        assert_eq!(store.get_stories_for_viewer(&a).unwrap().len(), 1);
    }

    #[test]
    fn followees_are_cached_and_purged_on_unfollow() {
        let store = cached();
        let a = user(&store, "a@example.com");
        let b = user(&store, "b@example.com");

        store.follow(&a, &b).unwrap();
        assert_eq!(store.get_followees(&a).unwrap(), vec![b.clone()]);

        store.unfollow(&a, &b).unwrap();
        assert!(store.get_followees(&a).unwrap().is_empty());
    }
}
