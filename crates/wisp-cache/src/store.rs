use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// In-process TTL'd key/value store.
///
/// Holds only derivable state: every entry can be dropped at any time and
/// repopulated from the durable store. Expired entries are dropped lazily on
/// read; every 512th operation does a full sweep so keys that are never read
/// again cannot accumulate.
///
/// `update` runs its closure under the single lock, which makes
/// read-modify-write sequences (the rate limiter's bucket mutation) atomic
/// in one round trip.
pub struct KvStore {
    entries: Mutex<HashMap<String, Entry>>,
    op_count: AtomicU64,
}

struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

const SWEEP_EVERY: u64 = 512;

impl KvStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            op_count: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let mut map = self.lock();
        self.maybe_sweep(&mut map, now);

        match map.get(key) {
            Some(entry) if entry.live(now) => Some(entry.value.clone()),
            Some(_) => {
                map.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn set(&self, key: &str, value: String, ttl: Duration) {
        let now = Instant::now();
        let mut map = self.lock();
        self.maybe_sweep(&mut map, now);
        map.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + ttl,
            },
        );
    }

    pub fn del(&self, key: &str) {
        self.lock().remove(key);
    }

    pub fn del_many<I, K>(&self, keys: I)
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let mut map = self.lock();
        for key in keys {
            map.remove(key.as_ref());
        }
    }

    /// Atomic read-modify-write: `f` sees the current live value and returns
    /// the new value with its TTL (or `None` to remove the entry) plus a
    /// result passed back to the caller. One lock acquisition, no interleaving.
    pub fn update<T>(
        &self,
        key: &str,
        f: impl FnOnce(Option<&str>) -> (Option<(String, Duration)>, T),
    ) -> T {
        let now = Instant::now();
        let mut map = self.lock();

        let current = map
            .get(key)
            .filter(|entry| entry.live(now))
            .map(|entry| entry.value.clone());

        let (next, result) = f(current.as_deref());
        match next {
            Some((value, ttl)) => {
                map.insert(
                    key.to_string(),
                    Entry {
                        value,
                        expires_at: now + ttl,
                    },
                );
            }
            None => {
                map.remove(key);
            }
        }
        result
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn maybe_sweep(&self, map: &mut HashMap<String, Entry>, now: Instant) {
        let count = self.op_count.fetch_add(1, Ordering::Relaxed);
        if count % SWEEP_EVERY == 0 {
            map.retain(|_, entry| entry.live(now));
        }
    }
}

impl Default for KvStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_del() {
        let kv = KvStore::new();
        kv.set("k", "v".into(), Duration::from_secs(60));
        assert_eq!(kv.get("k"), Some("v".into()));
        kv.del("k");
        assert_eq!(kv.get("k"), None);
    }

    #[test]
    fn expired_entries_read_as_absent() {
        let kv = KvStore::new();
        kv.set("k", "v".into(), Duration::from_millis(0));
        assert_eq!(kv.get("k"), None);
    }

    #[test]
    fn update_sees_current_and_persists_next() {
        let kv = KvStore::new();
        let seen = kv.update("k", |cur| {
            assert!(cur.is_none());
            (Some(("1".into(), Duration::from_secs(60))), "first")
        });
        assert_eq!(seen, "first");

        let seen = kv.update("k", |cur| {
            assert_eq!(cur, Some("1"));
            (None, "second")
        });
        assert_eq!(seen, "second");
        assert_eq!(kv.get("k"), None);
    }

    #[test]
    fn del_many_clears_all_named_keys() {
        let kv = KvStore::new();
        for k in ["a", "b", "c"] {
            kv.set(k, "v".into(), Duration::from_secs(60));
        }
        kv.del_many(["a", "c"]);
        assert_eq!(kv.get("a"), None);
        assert_eq!(kv.get("b"), Some("v".into()));
        assert_eq!(kv.get("c"), None);
    }
}
