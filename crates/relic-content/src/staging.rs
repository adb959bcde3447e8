//! Bounded, time-expiring cache of staging sessions.
//!
//! Sessions are not durable. An entry is dropped when the cache is full
//! (least recently used first) or when it has not been touched for the
//! configured TTL. A background thread evicts expired entries until
//! [`StagingCache::close`] is called.

use std::num::NonZeroUsize;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use lru::LruCache;
use tracing::{debug, trace};
use uuid::Uuid;

use relic_crypto::Digest;
use relic_types::Hash;

/// Sizing and expiry of the staging cache.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StagingConfig {
    /// Maximum number of cached sessions.
    pub capacity: usize,
    /// Idle time after which a session expires.
    pub ttl: Duration,
    /// Period of the background eviction pass.
    pub cleanup_interval: Duration,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            ttl: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(30),
        }
    }
}

/// Progress of a resumable upload.
///
/// `session_id` is `None` once the session has been released; the digest
/// is kept so the next session resumes without re-reading staged bytes.
#[derive(Clone, Debug)]
pub struct StagingSession {
    pub session_id: Option<Uuid>,
    pub digest: Digest,
}

impl StagingSession {
    /// Returns `true` if a client currently owns this session.
    pub fn is_live(&self) -> bool {
        self.session_id.is_some()
    }

    /// Number of bytes staged so far.
    pub fn length(&self) -> u64 {
        self.digest.length()
    }
}

struct Entry {
    session: StagingSession,
    touched: Instant,
}

struct Shared {
    entries: Mutex<LruCache<Hash, Entry>>,
    ttl: Duration,
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl Shared {
    fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("lock poisoned");
        let expired: Vec<Hash> = entries
            .iter()
            .filter(|(_, e)| now.duration_since(e.touched) >= self.ttl)
            .map(|(h, _)| *h)
            .collect();
        for hash in &expired {
            entries.pop(hash);
        }
        expired.len()
    }
}

pub struct StagingCache {
    shared: Arc<Shared>,
    cleaner: Mutex<Option<JoinHandle<()>>>,
}

impl StagingCache {
    /// Create the cache and start its eviction thread.
    pub fn new(config: &StagingConfig) -> std::io::Result<Self> {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
        let shared = Arc::new(Shared {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl: config.ttl,
            stopped: Mutex::new(false),
            wake: Condvar::new(),
        });

        let interval = config.cleanup_interval;
        let worker = Arc::clone(&shared);
        let cleaner = thread::Builder::new()
            .name("relic-staging-cleanup".into())
            .spawn(move || run_cleanup(&worker, interval))?;

        Ok(Self {
            shared,
            cleaner: Mutex::new(Some(cleaner)),
        })
    }

    /// The session of `hash`, unless absent or expired.
    pub fn get(&self, hash: &Hash) -> Option<StagingSession> {
        let mut entries = self.shared.entries.lock().expect("lock poisoned");
        let expired = match entries.get_mut(hash) {
            None => return None,
            Some(entry) if entry.touched.elapsed() >= self.shared.ttl => true,
            Some(entry) => {
                entry.touched = Instant::now();
                return Some(entry.session.clone());
            }
        };
        if expired {
            entries.pop(hash);
        }
        None
    }

    pub fn put(&self, hash: Hash, session: StagingSession) {
        let entry = Entry {
            session,
            touched: Instant::now(),
        };
        let mut entries = self.shared.entries.lock().expect("lock poisoned");
        if let Some((evicted, _)) = entries.push(hash, entry) {
            if evicted != hash {
                debug!(content = %evicted.short_hex(), "staging cache full, evicted session");
            }
        }
    }

    pub fn remove(&self, hash: &Hash) -> Option<StagingSession> {
        let mut entries = self.shared.entries.lock().expect("lock poisoned");
        entries.pop(hash).map(|e| e.session)
    }

    /// Drop every expired entry now. Returns how many were dropped.
    pub fn evict_expired(&self) -> usize {
        self.shared.evict_expired()
    }

    pub fn len(&self) -> usize {
        self.shared.entries.lock().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop the eviction thread and drop every session.
    pub fn close(&self) {
        *self.shared.stopped.lock().expect("lock poisoned") = true;
        self.shared.wake.notify_all();
        let handle = self.cleaner.lock().expect("lock poisoned").take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                debug!("staging cleanup thread panicked");
            }
        }
        self.shared.entries.lock().expect("lock poisoned").clear();
    }
}

impl Drop for StagingCache {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for StagingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingCache")
            .field("sessions", &self.len())
            .field("ttl", &self.shared.ttl)
            .finish()
    }
}

fn run_cleanup(shared: &Shared, interval: Duration) {
    loop {
        {
            let stopped = shared.stopped.lock().expect("lock poisoned");
            let (stopped, _) = shared
                .wake
                .wait_timeout_while(stopped, interval, |stopped| !*stopped)
                .expect("lock poisoned");
            if *stopped {
                break;
            }
        }
        let evicted = shared.evict_expired();
        if evicted > 0 {
            trace!(evicted, "evicted expired staging sessions");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(ttl_ms: u64) -> StagingConfig {
        StagingConfig {
            capacity: 2,
            ttl: Duration::from_millis(ttl_ms),
            cleanup_interval: Duration::from_millis(10),
        }
    }

    fn session(data: &[u8]) -> StagingSession {
        StagingSession {
            session_id: Some(Uuid::now_v7()),
            digest: Digest::of(data),
        }
    }

    #[test]
    fn put_get_remove() {
        let cache = StagingCache::new(&config(60_000)).unwrap();
        let hash = Hash::of(b"a");
        cache.put(hash, session(b"a"));
        let found = cache.get(&hash).unwrap();
        assert!(found.is_live());
        assert_eq!(found.length(), 1);
        assert!(cache.remove(&hash).is_some());
        assert!(cache.get(&hash).is_none());
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let cache = StagingCache::new(&config(60_000)).unwrap();
        let (a, b, c) = (Hash::of(b"a"), Hash::of(b"b"), Hash::of(b"c"));
        cache.put(a, session(b"a"));
        cache.put(b, session(b"b"));
        cache.get(&a);
        cache.put(c, session(b"c"));
        assert!(cache.get(&a).is_some());
        assert!(cache.get(&b).is_none());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn expired_entries_are_not_returned() {
        let cache = StagingCache::new(&StagingConfig {
            cleanup_interval: Duration::from_secs(3600),
            ..config(20)
        })
        .unwrap();
        let hash = Hash::of(b"a");
        cache.put(hash, session(b"a"));
        thread::sleep(Duration::from_millis(40));
        assert!(cache.get(&hash).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn background_thread_evicts() {
        let cache = StagingCache::new(&config(20)).unwrap();
        cache.put(Hash::of(b"a"), session(b"a"));
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cache.is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(cache.is_empty());
    }

    #[test]
    fn close_stops_thread_and_clears() {
        let cache = StagingCache::new(&config(60_000)).unwrap();
        cache.put(Hash::of(b"a"), session(b"a"));
        cache.close();
        assert!(cache.is_empty());
        assert!(cache.cleaner.lock().unwrap().is_none());
        // Closing twice is harmless.
        cache.close();
    }
}
