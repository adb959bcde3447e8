use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Take};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use relic_types::Hash;

use crate::locks::ReadGuard;

/// Open content streams, so shutdown can force-close them.
#[derive(Debug, Default)]
pub(crate) struct ReaderRegistry {
    next_id: AtomicU64,
    open: Mutex<HashMap<u64, Arc<AtomicBool>>>,
}

impl ReaderRegistry {
    fn register(&self) -> (u64, Arc<AtomicBool>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let closed = Arc::new(AtomicBool::new(false));
        self.open
            .lock()
            .expect("lock poisoned")
            .insert(id, Arc::clone(&closed));
        (id, closed)
    }

    fn unregister(&self, id: u64) {
        self.open.lock().expect("lock poisoned").remove(&id);
    }

    /// Mark every open stream closed. Returns how many were open.
    pub(crate) fn close_all(&self) -> usize {
        let mut open = self.open.lock().expect("lock poisoned");
        for closed in open.values() {
            closed.store(true, Ordering::SeqCst);
        }
        let count = open.len();
        open.clear();
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.open.lock().expect("lock poisoned").len()
    }
}

/// A stream over committed content bytes.
///
/// Holds a read lock on the content until dropped, so the bytes cannot be
/// deleted or replaced while the stream is open.
#[derive(Debug)]
pub struct ContentReader {
    content: Hash,
    file: Take<File>,
    id: u64,
    closed: Arc<AtomicBool>,
    registry: Arc<ReaderRegistry>,
    _guard: ReadGuard,
}

impl ContentReader {
    pub(crate) fn new(
        content: Hash,
        file: Take<File>,
        guard: ReadGuard,
        registry: Arc<ReaderRegistry>,
    ) -> Self {
        let (id, closed) = registry.register();
        Self {
            content,
            file,
            id,
            closed,
            registry,
            _guard: guard,
        }
    }

    pub fn content(&self) -> Hash {
        self.content
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> u64 {
        self.file.limit()
    }

    /// Read the rest of the stream into a buffer.
    pub fn read_all(mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl Read for ContentReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "content manager closed",
            ));
        }
        self.file.read(buf)
    }
}

impl Drop for ContentReader {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}
