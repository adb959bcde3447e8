//! Per-hash shared/exclusive locks.
//!
//! A single monitor (one mutex, two condition variables) guards the set of
//! write-locked hashes and the reader count of each hash. Waiters are woken
//! with `notify_all` and recheck their own predicate, so there is no
//! fairness guarantee. Closing the manager wakes every waiter; from then on
//! every lock attempt fails with [`LockError::Closed`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex};

use tracing::debug;

use relic_types::Hash;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LockError {
    #[error("lock manager is closed")]
    Closed,
}

#[derive(Default)]
struct LockState {
    closed: bool,
    write_locked: HashSet<Hash>,
    readers: HashMap<Hash, usize>,
}

#[derive(Default)]
struct Monitor {
    state: Mutex<LockState>,
    readable: Condvar,
    writable: Condvar,
}

/// Shared handle to a set of per-hash reader/writer locks.
#[derive(Clone, Default)]
pub struct LockManager {
    monitor: Arc<Monitor>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `hash` has neither a writer nor readers, then take it
    /// exclusively.
    pub fn write_lock(&self, hash: Hash) -> Result<WriteGuard, LockError> {
        let mut state = self.monitor.state.lock().expect("lock poisoned");
        loop {
            if state.closed {
                return Err(LockError::Closed);
            }
            if !state.write_locked.contains(&hash) && !state.readers.contains_key(&hash) {
                break;
            }
            state = self.monitor.writable.wait(state).expect("lock poisoned");
        }
        state.write_locked.insert(hash);
        Ok(WriteGuard {
            manager: self.clone(),
            hash,
        })
    }

    /// Block until `hash` has no writer, then take it shared.
    pub fn read_lock(&self, hash: Hash) -> Result<ReadGuard, LockError> {
        let mut state = self.monitor.state.lock().expect("lock poisoned");
        loop {
            if state.closed {
                return Err(LockError::Closed);
            }
            if !state.write_locked.contains(&hash) {
                break;
            }
            state = self.monitor.readable.wait(state).expect("lock poisoned");
        }
        *state.readers.entry(hash).or_insert(0) += 1;
        Ok(ReadGuard {
            manager: self.clone(),
            hash,
        })
    }

    fn write_unlock(&self, hash: &Hash) {
        let mut state = self.monitor.state.lock().expect("lock poisoned");
        state.write_locked.remove(hash);
        drop(state);
        // Writers of other hashes share the condition variable.
        self.monitor.writable.notify_all();
        self.monitor.readable.notify_all();
    }

    fn read_unlock(&self, hash: &Hash) {
        let mut state = self.monitor.state.lock().expect("lock poisoned");
        if let Some(count) = state.readers.get_mut(hash) {
            *count -= 1;
            if *count == 0 {
                state.readers.remove(hash);
            }
        }
        drop(state);
        self.monitor.writable.notify_all();
    }

    /// Release every lock and fail all current and future lock attempts.
    pub fn close(&self) {
        let mut state = self.monitor.state.lock().expect("lock poisoned");
        if state.closed {
            return;
        }
        state.closed = true;
        state.write_locked.clear();
        state.readers.clear();
        drop(state);
        self.monitor.writable.notify_all();
        self.monitor.readable.notify_all();
        debug!("lock manager closed");
    }

    pub fn is_closed(&self) -> bool {
        self.monitor.state.lock().expect("lock poisoned").closed
    }

    /// Current number of readers of `hash`.
    pub fn readers(&self, hash: &Hash) -> usize {
        let state = self.monitor.state.lock().expect("lock poisoned");
        state.readers.get(hash).copied().unwrap_or(0)
    }

    /// Returns `true` if `hash` is write-locked.
    pub fn is_write_locked(&self, hash: &Hash) -> bool {
        let state = self.monitor.state.lock().expect("lock poisoned");
        state.write_locked.contains(hash)
    }
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.monitor.state.lock().expect("lock poisoned");
        f.debug_struct("LockManager")
            .field("closed", &state.closed)
            .field("write_locked", &state.write_locked.len())
            .field("read_locked", &state.readers.len())
            .finish()
    }
}

/// Exclusive lock on one hash, released on drop.
#[derive(Debug)]
pub struct WriteGuard {
    manager: LockManager,
    hash: Hash,
}

impl WriteGuard {
    pub fn hash(&self) -> Hash {
        self.hash
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        self.manager.write_unlock(&self.hash);
    }
}

/// Shared lock on one hash, released on drop.
#[derive(Debug)]
pub struct ReadGuard {
    manager: LockManager,
    hash: Hash,
}

impl ReadGuard {
    pub fn hash(&self) -> Hash {
        self.hash
    }
}

impl Drop for ReadGuard {
    fn drop(&mut self) {
        self.manager.read_unlock(&self.hash);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    use super::*;

    fn hash(n: u8) -> Hash {
        Hash::of(&[n])
    }

    #[test]
    fn readers_share_a_hash() {
        let locks = LockManager::new();
        let barrier = Arc::new(Barrier::new(4));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let locks = locks.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let _guard = locks.read_lock(hash(1)).unwrap();
                    // Every reader holds the lock at the same time.
                    barrier.wait();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(locks.readers(&hash(1)), 0);
    }

    #[test]
    fn writer_waits_for_every_reader() {
        let locks = LockManager::new();
        let first = locks.read_lock(hash(1)).unwrap();
        let second = locks.read_lock(hash(1)).unwrap();

        let (tx, rx) = mpsc::channel();
        let writer = {
            let locks = locks.clone();
            thread::spawn(move || {
                let _guard = locks.write_lock(hash(1)).unwrap();
                tx.send(()).unwrap();
            })
        };

        drop(first);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        drop(second);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        writer.join().unwrap();
        assert!(!locks.is_write_locked(&hash(1)));
    }

    #[test]
    fn reader_waits_for_writer() {
        let locks = LockManager::new();
        let guard = locks.write_lock(hash(1)).unwrap();

        let (tx, rx) = mpsc::channel();
        let reader = {
            let locks = locks.clone();
            thread::spawn(move || {
                let _guard = locks.read_lock(hash(1)).unwrap();
                tx.send(()).unwrap();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        drop(guard);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        reader.join().unwrap();
    }

    #[test]
    fn distinct_hashes_do_not_block() {
        let locks = LockManager::new();
        let _a = locks.write_lock(hash(1)).unwrap();
        let _b = locks.write_lock(hash(2)).unwrap();
        let _c = locks.read_lock(hash(3)).unwrap();
        assert!(locks.is_write_locked(&hash(2)));
    }

    #[test]
    fn close_fails_blocked_and_new_attempts() {
        let locks = LockManager::new();
        let _held = locks.write_lock(hash(1)).unwrap();

        let blocked: Vec<_> = (0..3)
            .map(|i| {
                let locks = locks.clone();
                thread::spawn(move || {
                    if i % 2 == 0 {
                        locks.write_lock(hash(1)).map(|_| ())
                    } else {
                        locks.read_lock(hash(1)).map(|_| ())
                    }
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        locks.close();
        for handle in blocked {
            assert_eq!(handle.join().unwrap(), Err(LockError::Closed));
        }
        assert!(locks.is_closed());
        assert_eq!(locks.read_lock(hash(9)).unwrap_err(), LockError::Closed);
        assert_eq!(locks.write_lock(hash(9)).unwrap_err(), LockError::Closed);
    }
}
