use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use uuid::Uuid;

use relic_crypto::Digest;
use relic_types::Hash;

use crate::error::{ContentError, ContentResult};
use crate::locks::{LockManager, WriteGuard};
use crate::reader::{ContentReader, ReaderRegistry};
use crate::staging::{StagingCache, StagingConfig, StagingSession};

/// Hex characters of the hash used to shard committed content.
const SHARD_PREFIX_LEN: usize = 2;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Where the bytes of a content currently stand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentState {
    /// No bytes at all.
    Absent,
    /// Some bytes are staged but they do not hash to the content.
    Partial,
    /// A client holds a live staging session.
    Staging,
    /// Staged bytes hash exactly to the content.
    Staged,
    /// Committed to permanent storage.
    Present,
}

/// Staged uploads and committed content bytes under one root directory.
///
/// Staging files live in `staging/<hex>`; committed content lives in
/// `content/<prefix>/<hex>`. Every operation on a hash's files holds the
/// hash's lock from the [`LockManager`].
pub struct ContentManager {
    staging_dir: PathBuf,
    content_dir: PathBuf,
    locks: LockManager,
    staging: StagingCache,
    readers: Arc<ReaderRegistry>,
    closed: AtomicBool,
}

impl ContentManager {
    /// Open (creating if needed) the content directories under `root`.
    pub fn open(root: &Path, config: &StagingConfig) -> ContentResult<Self> {
        let staging_dir = root.join("staging");
        let content_dir = root.join("content");
        fs::create_dir_all(&staging_dir)?;
        fs::create_dir_all(&content_dir)?;
        debug!(root = %root.display(), "content manager opened");
        Ok(Self {
            staging_dir,
            content_dir,
            locks: LockManager::new(),
            staging: StagingCache::new(config)?,
            readers: Arc::new(ReaderRegistry::default()),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> ContentResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ContentError::Closed);
        }
        Ok(())
    }

    fn staging_path(&self, hash: &Hash) -> PathBuf {
        self.staging_dir.join(hash.to_hex())
    }

    fn content_path(&self, hash: &Hash) -> PathBuf {
        self.content_dir
            .join(hash.hex_prefix(SHARD_PREFIX_LEN))
            .join(hash.to_hex())
    }

    /// Digest of whatever is in the staging file of `hash`.
    fn digest_staged(&self, hash: &Hash) -> ContentResult<Digest> {
        match File::open(self.staging_path(hash)) {
            Ok(file) => Ok(Digest::replay(file, u64::MAX)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Digest::new()),
            Err(e) => Err(e.into()),
        }
    }

    // ---------------------------------------------------------------
    // Staging
    // ---------------------------------------------------------------

    /// Open a staging session for `hash`, resuming any staged bytes.
    pub fn stage(&self, hash: &Hash) -> ContentResult<StagingSession> {
        self.ensure_open()?;
        let _guard = self.locks.write_lock(*hash)?;

        if self.content_path(hash).exists() {
            return Err(ContentError::StagingCompleted(*hash));
        }
        let digest = match self.staging.get(hash) {
            Some(session) if session.is_live() => {
                return Err(ContentError::PendingStagingSession(*hash));
            }
            Some(session) => session.digest,
            None => {
                let digest = self.digest_staged(hash)?;
                if !digest.is_empty() {
                    warn!(
                        content = %hash.short_hex(),
                        length = digest.length(),
                        "resuming stale staging file"
                    );
                }
                digest
            }
        };

        if digest.matches(hash) {
            self.staging.put(
                *hash,
                StagingSession {
                    session_id: None,
                    digest,
                },
            );
            return Err(ContentError::StagingCompleted(*hash));
        }

        let session = StagingSession {
            session_id: Some(Uuid::now_v7()),
            digest,
        };
        self.staging.put(*hash, session.clone());
        debug!(
            content = %hash.short_hex(),
            staged = session.length(),
            "staging session opened"
        );
        Ok(session)
    }

    /// Write `source` into the staging file of `hash` at `position`.
    ///
    /// Bytes from `position` on are overwritten in place. A position before
    /// the staged length rewinds the digest by replaying `[0, position)`;
    /// bytes left beyond the end of the write are folded back in, so the
    /// digest always covers the whole staging file. If the write fails
    /// partway, the file is cut back to `position` and the session resumes
    /// from there.
    pub fn write<R: Read>(
        &self,
        hash: &Hash,
        session_id: Uuid,
        mut source: R,
        position: u64,
    ) -> ContentResult<StagingSession> {
        self.ensure_open()?;
        let _guard = self.locks.write_lock(*hash)?;

        let session = self
            .staging
            .get(hash)
            .filter(|s| s.session_id == Some(session_id))
            .ok_or(ContentError::StagingSessionNotFound(*hash))?;
        let staged = session.length();
        if position > staged {
            return Err(ContentError::InvalidPosition {
                position,
                length: staged,
            });
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.staging_path(hash))?;

        let prefix = if position == staged {
            session.digest
        } else {
            file.seek(SeekFrom::Start(0))?;
            Digest::replay(&mut file, position)?
        };

        let (digest, written) = match write_at(&mut file, &mut source, prefix.clone(), position, staged) {
            Ok(done) => done,
            Err(err) => {
                self.roll_back(hash, session_id, &file, prefix);
                return Err(err.into());
            }
        };

        let session = StagingSession {
            session_id: Some(session_id),
            digest,
        };
        self.staging.put(*hash, session.clone());
        debug!(
            content = %hash.short_hex(),
            position,
            written,
            staged = session.length(),
            "staged bytes"
        );
        Ok(session)
    }

    /// Cut the staging file of `hash` back to what `prefix` covers after a
    /// failed write. The session stays live and resumes at the new end. If
    /// the file cannot be cut, the session is dropped so the next `stage`
    /// re-digests the file.
    fn roll_back(&self, hash: &Hash, session_id: Uuid, file: &File, prefix: Digest) {
        match file.set_len(prefix.length()) {
            Ok(()) => {
                warn!(
                    content = %hash.short_hex(),
                    staged = prefix.length(),
                    "staging write failed, rolled back"
                );
                self.staging.put(
                    *hash,
                    StagingSession {
                        session_id: Some(session_id),
                        digest: prefix,
                    },
                );
            }
            Err(err) => {
                warn!(content = %hash.short_hex(), error = %err, "staging write failed, session dropped");
                self.staging.remove(hash);
            }
        }
    }

    /// Release the session of `hash`, keeping its digest for resumption.
    pub fn unstage(&self, hash: &Hash, session_id: Uuid) -> ContentResult<StagingSession> {
        self.ensure_open()?;
        let _guard = self.locks.write_lock(*hash)?;

        let session = self
            .staging
            .get(hash)
            .filter(|s| s.session_id == Some(session_id))
            .ok_or(ContentError::StagingSessionNotFound(*hash))?;
        let released = StagingSession {
            session_id: None,
            digest: session.digest,
        };
        self.staging.put(*hash, released.clone());
        debug!(content = %hash.short_hex(), staged = released.length(), "staging session released");
        Ok(released)
    }

    // ---------------------------------------------------------------
    // Commit
    // ---------------------------------------------------------------

    /// Take the exclusive lock of `hash` for a sequence of commit and
    /// delete operations. Callers that pair those with a store transaction
    /// take this lock first, so no transaction ever waits on a content lock.
    pub fn lock(&self, hash: &Hash) -> ContentResult<ContentLock<'_>> {
        self.ensure_open()?;
        let guard = self.locks.write_lock(*hash)?;
        Ok(ContentLock {
            manager: self,
            hash: *hash,
            _guard: guard,
        })
    }

    /// Commit the staged bytes of `hash` to permanent storage.
    ///
    /// Already committed content is left as is.
    pub fn add(&self, hash: &Hash) -> ContentResult<()> {
        self.lock(hash)?.add()
    }

    /// Commit `source` directly, without a staging session.
    pub fn add_from<R: Read>(&self, hash: &Hash, source: R) -> ContentResult<()> {
        let lock = self.lock(hash)?;
        if lock.exists() {
            return Ok(());
        }
        let prepared = self.prepare(hash, source)?;
        lock.commit(prepared)
    }

    /// Copy `source` into a temporary file and verify it hashes to `hash`.
    ///
    /// Takes no lock: the bytes only become visible through
    /// [`ContentLock::commit`]. A failed check deletes the temporary file.
    pub fn prepare<R: Read>(&self, hash: &Hash, mut source: R) -> ContentResult<PreparedContent> {
        self.ensure_open()?;
        let mut temp = NamedTempFile::new_in(&self.staging_dir)?;
        let mut digest = Digest::new();
        copy_digesting(&mut source, temp.as_file_mut(), &mut digest)?;
        if !digest.matches(hash) {
            return Err(ContentError::IntegrityCheckFailed {
                expected: *hash,
                actual: digest.hash(),
            });
        }
        Ok(PreparedContent {
            hash: *hash,
            length: digest.length(),
            temp,
        })
    }

    /// Remove committed and staged bytes of `hash`.
    /// Returns `true` if committed content existed.
    pub fn delete(&self, hash: &Hash) -> ContentResult<bool> {
        self.lock(hash)?.delete()
    }

    fn add_locked(&self, hash: &Hash) -> ContentResult<()> {
        self.ensure_open()?;
        let target = self.content_path(hash);
        if target.exists() {
            return Ok(());
        }
        let staged_len = match fs::metadata(self.staging_path(hash)) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ContentError::UnknownContent(*hash));
            }
            Err(e) => return Err(e.into()),
        };
        // A cached digest that no longer covers the whole file is replaced
        // by a digest of the file itself.
        let digest = match self.staging.get(hash) {
            Some(session) if session.length() == staged_len => session.digest,
            Some(session) => {
                warn!(
                    content = %hash.short_hex(),
                    cached = session.length(),
                    staged = staged_len,
                    "cached digest is stale"
                );
                self.digest_staged(hash)?
            }
            None => self.digest_staged(hash)?,
        };
        if digest.is_empty() {
            return Err(ContentError::UnknownContent(*hash));
        }
        if !digest.matches(hash) {
            return Err(ContentError::IntegrityCheckFailed {
                expected: *hash,
                actual: digest.hash(),
            });
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(self.staging_path(hash), &target)?;
        self.staging.remove(hash);
        info!(content = %hash.short_hex(), length = digest.length(), "content committed");
        Ok(())
    }

    fn commit_locked(&self, hash: &Hash, prepared: PreparedContent) -> ContentResult<()> {
        self.ensure_open()?;
        if prepared.hash != *hash {
            return Err(ContentError::IntegrityCheckFailed {
                expected: *hash,
                actual: prepared.hash,
            });
        }
        let target = self.content_path(hash);
        if target.exists() {
            return Ok(());
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        prepared.temp.persist(&target).map_err(|e| e.error)?;
        self.staging.remove(hash);
        remove_if_exists(&self.staging_path(hash))?;
        info!(content = %hash.short_hex(), length = prepared.length, "content committed");
        Ok(())
    }

    fn delete_locked(&self, hash: &Hash) -> ContentResult<bool> {
        self.ensure_open()?;
        self.staging.remove(hash);
        remove_if_exists(&self.staging_path(hash))?;
        let existed = remove_if_exists(&self.content_path(hash))?;
        if existed {
            info!(content = %hash.short_hex(), "content deleted");
        }
        Ok(existed)
    }

    // ---------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------

    /// Stream `length` bytes of `hash` starting at `offset`.
    ///
    /// The returned reader holds a read lock on `hash` until dropped.
    pub fn get(&self, hash: &Hash, offset: u64, length: u64) -> ContentResult<ContentReader> {
        self.ensure_open()?;
        let guard = self.locks.read_lock(*hash)?;

        let mut file = match File::open(self.content_path(hash)) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ContentError::UnknownContent(*hash));
            }
            Err(e) => return Err(e.into()),
        };
        file.seek(SeekFrom::Start(offset))?;
        Ok(ContentReader::new(
            *hash,
            file.take(length),
            guard,
            Arc::clone(&self.readers),
        ))
    }

    pub fn exists(&self, hash: &Hash) -> bool {
        self.content_path(hash).exists()
    }

    /// Length of committed content.
    pub fn length(&self, hash: &Hash) -> ContentResult<u64> {
        match fs::metadata(self.content_path(hash)) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(ContentError::UnknownContent(*hash)),
            Err(e) => Err(e.into()),
        }
    }

    pub fn state(&self, hash: &Hash) -> ContentResult<ContentState> {
        self.ensure_open()?;
        let _guard = self.locks.read_lock(*hash)?;

        if self.content_path(hash).exists() {
            return Ok(ContentState::Present);
        }
        let digest = match self.staging.get(hash) {
            Some(session) if session.is_live() => return Ok(ContentState::Staging),
            Some(session) => session.digest,
            None => self.digest_staged(hash)?,
        };
        Ok(if digest.matches(hash) {
            ContentState::Staged
        } else if digest.is_empty() {
            ContentState::Absent
        } else {
            ContentState::Partial
        })
    }

    /// Number of open content streams.
    pub fn open_readers(&self) -> usize {
        self.readers.len()
    }

    // ---------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------

    /// Force-close open streams, release every lock and stop eviction.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let streams = self.readers.close_all();
        self.locks.close();
        self.staging.close();
        info!(streams, "content manager closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ContentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentManager")
            .field("content_dir", &self.content_dir)
            .field("staging", &self.staging)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Exclusive hold on the files of one content, released on drop.
pub struct ContentLock<'a> {
    manager: &'a ContentManager,
    hash: Hash,
    _guard: WriteGuard,
}

impl ContentLock<'_> {
    pub fn hash(&self) -> Hash {
        self.hash
    }

    /// Returns `true` if the content is committed.
    pub fn exists(&self) -> bool {
        self.manager.exists(&self.hash)
    }

    /// Commit the staged bytes.
    pub fn add(&self) -> ContentResult<()> {
        self.manager.add_locked(&self.hash)
    }

    /// Move verified bytes into permanent storage.
    pub fn commit(&self, prepared: PreparedContent) -> ContentResult<()> {
        self.manager.commit_locked(&self.hash, prepared)
    }

    /// Remove committed and staged bytes.
    pub fn delete(&self) -> ContentResult<bool> {
        self.manager.delete_locked(&self.hash)
    }
}

impl std::fmt::Debug for ContentLock<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentLock").field("hash", &self.hash).finish()
    }
}

/// Bytes copied aside and verified against their hash, waiting to be
/// committed. Dropping it deletes the temporary file.
#[derive(Debug)]
pub struct PreparedContent {
    hash: Hash,
    length: u64,
    temp: NamedTempFile,
}

impl PreparedContent {
    pub fn hash(&self) -> Hash {
        self.hash
    }

    pub fn length(&self) -> u64 {
        self.length
    }
}

fn copy_digesting<R: Read + ?Sized, W: Write + ?Sized>(
    source: &mut R,
    sink: &mut W,
    digest: &mut Digest,
) -> io::Result<u64> {
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        sink.write_all(&buf[..n])?;
        digest.update(&buf[..n]);
        total += n as u64;
    }
    Ok(total)
}

/// Write `source` at `position`, extending `digest` (which covers
/// `[0, position)`) so it covers the whole file. Returns the new digest and
/// the number of bytes written.
fn write_at<R: Read>(
    file: &mut File,
    source: &mut R,
    mut digest: Digest,
    position: u64,
    staged: u64,
) -> io::Result<(Digest, u64)> {
    file.seek(SeekFrom::Start(position))?;
    let written = copy_digesting(source, file, &mut digest)?;
    let end = position + written;
    if end < staged {
        file.seek(SeekFrom::Start(end))?;
        digest.consume(file)?;
    }
    file.flush()?;
    Ok((digest, written))
}

fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use proptest::prelude::*;
    use tempfile::TempDir;

    use super::*;

    fn open() -> (TempDir, ContentManager) {
        let dir = TempDir::new().unwrap();
        let manager = ContentManager::open(dir.path(), &StagingConfig::default()).unwrap();
        (dir, manager)
    }

    fn staged_bytes(manager: &ContentManager, hash: &Hash) -> Vec<u8> {
        fs::read(manager.staging_path(hash)).unwrap()
    }

    fn session_id(session: &StagingSession) -> Uuid {
        session.session_id.unwrap()
    }

    // ---------------------------------------------------------------
    // Staging
    // ---------------------------------------------------------------

    #[test]
    fn overwrite_in_the_middle_rewinds_digest() {
        let (_dir, manager) = open();
        let hash = Hash::of(b"aZc");
        let session = manager.stage(&hash).unwrap();
        let id = session_id(&session);

        manager.write(&hash, id, &b"abc"[..], 0).unwrap();
        let session = manager.write(&hash, id, &b"Z"[..], 1).unwrap();

        assert_eq!(staged_bytes(&manager, &hash), b"aZc");
        assert_eq!(session.digest.hash(), Hash::of(b"aZc"));
        assert_eq!(session.length(), 3);
        assert!(session.digest.matches(&hash));
    }

    /// Yields `data`, then fails as a dropped connection would.
    struct BrokenReader {
        data: &'static [u8],
    }

    impl Read for BrokenReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.data.is_empty() {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer went away"));
            }
            let n = self.data.len().min(buf.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    #[test]
    fn failed_write_rolls_back_to_its_position() {
        let (_dir, manager) = open();
        let hash = Hash::of(b"abcdef");
        let id = session_id(&manager.stage(&hash).unwrap());
        manager.write(&hash, id, &b"abc"[..], 0).unwrap();

        let err = manager
            .write(&hash, id, BrokenReader { data: b"XYZW" }, 3)
            .unwrap_err();
        assert!(matches!(err, ContentError::Io(_)));
        assert_eq!(staged_bytes(&manager, &hash), b"abc");
        assert_eq!(manager.state(&hash).unwrap(), ContentState::Staging);

        let session = manager.write(&hash, id, &b"def"[..], 3).unwrap();
        assert!(session.digest.matches(&hash));
        manager.add(&hash).unwrap();
        assert_eq!(manager.get(&hash, 0, u64::MAX).unwrap().read_all().unwrap(), b"abcdef");
    }

    #[test]
    fn failed_overwrite_drops_the_tail() {
        let (_dir, manager) = open();
        let hash = Hash::of(b"abcdef");
        let id = session_id(&manager.stage(&hash).unwrap());
        manager.write(&hash, id, &b"abcxyz"[..], 0).unwrap();

        manager
            .write(&hash, id, BrokenReader { data: b"Q" }, 2)
            .unwrap_err();
        assert_eq!(staged_bytes(&manager, &hash), b"ab");

        manager.unstage(&hash, id).unwrap();
        let resumed = manager.stage(&hash).unwrap();
        assert_eq!(resumed.length(), 2);
        assert_eq!(resumed.digest.hash(), Hash::of(b"ab"));
    }

    #[test]
    fn add_redigests_a_staging_file_the_cache_does_not_cover() {
        let (_dir, manager) = open();
        let hash = Hash::of(b"abc");
        let id = session_id(&manager.stage(&hash).unwrap());
        manager.write(&hash, id, &b"abc"[..], 0).unwrap();

        // Bytes appended behind the session's back.
        let mut file = OpenOptions::new()
            .append(true)
            .open(manager.staging_path(&hash))
            .unwrap();
        file.write_all(b"W").unwrap();
        drop(file);

        let err = manager.add(&hash).unwrap_err();
        assert!(matches!(err, ContentError::IntegrityCheckFailed { actual, .. } if actual == Hash::of(b"abcW")));
        assert!(!manager.exists(&hash));
    }

    #[test]
    fn writes_past_staged_length_are_rejected() {
        let (_dir, manager) = open();
        let hash = Hash::of(b"data");
        let id = session_id(&manager.stage(&hash).unwrap());
        manager.write(&hash, id, &b"da"[..], 0).unwrap();
        let err = manager.write(&hash, id, &b"ta"[..], 3).unwrap_err();
        assert!(matches!(err, ContentError::InvalidPosition { position: 3, length: 2 }));
    }

    #[test]
    fn unknown_session_is_rejected() {
        let (_dir, manager) = open();
        let hash = Hash::of(b"data");
        manager.stage(&hash).unwrap();
        let err = manager.write(&hash, Uuid::now_v7(), &b"x"[..], 0).unwrap_err();
        assert!(matches!(err, ContentError::StagingSessionNotFound(_)));
    }

    #[test]
    fn second_stage_is_pending_until_released() {
        let (_dir, manager) = open();
        let hash = Hash::of(b"hello world");
        let id = session_id(&manager.stage(&hash).unwrap());
        manager.write(&hash, id, &b"hello "[..], 0).unwrap();

        assert!(matches!(
            manager.stage(&hash),
            Err(ContentError::PendingStagingSession(_))
        ));
        assert_eq!(manager.state(&hash).unwrap(), ContentState::Staging);

        let released = manager.unstage(&hash, id).unwrap();
        assert_eq!(released.length(), 6);
        assert_eq!(manager.state(&hash).unwrap(), ContentState::Partial);

        let resumed = manager.stage(&hash).unwrap();
        assert_eq!(resumed.length(), 6);
        assert_ne!(resumed.session_id, Some(id));
        manager
            .write(&hash, session_id(&resumed), &b"world"[..], 6)
            .unwrap();
        manager.unstage(&hash, session_id(&resumed)).unwrap();
        assert_eq!(manager.state(&hash).unwrap(), ContentState::Staged);
        assert!(matches!(
            manager.stage(&hash),
            Err(ContentError::StagingCompleted(_))
        ));
    }

    #[test]
    fn stage_resumes_from_file_after_cache_loss() {
        let dir = TempDir::new().unwrap();
        let hash = Hash::of(b"abcdef");
        {
            let manager = ContentManager::open(dir.path(), &StagingConfig::default()).unwrap();
            let id = session_id(&manager.stage(&hash).unwrap());
            manager.write(&hash, id, &b"abc"[..], 0).unwrap();
            manager.close();
        }
        let manager = ContentManager::open(dir.path(), &StagingConfig::default()).unwrap();
        let session = manager.stage(&hash).unwrap();
        assert_eq!(session.length(), 3);
        assert_eq!(session.digest.hash(), Hash::of(b"abc"));
    }

    // ---------------------------------------------------------------
    // Commit and read
    // ---------------------------------------------------------------

    #[test]
    fn stage_add_get_round_trips() {
        let (_dir, manager) = open();
        let data = b"the quick brown fox".to_vec();
        let hash = Hash::of(&data);

        let id = session_id(&manager.stage(&hash).unwrap());
        manager.write(&hash, id, &data[..10], 0).unwrap();
        manager.write(&hash, id, &data[10..], 10).unwrap();
        manager.add(&hash).unwrap();

        assert_eq!(manager.state(&hash).unwrap(), ContentState::Present);
        assert_eq!(manager.length(&hash).unwrap(), data.len() as u64);
        assert!(!manager.staging_path(&hash).exists());
        assert_eq!(
            manager.get(&hash, 0, u64::MAX).unwrap().read_all().unwrap(),
            data
        );
        assert_eq!(manager.get(&hash, 4, 5).unwrap().read_all().unwrap(), b"quick");
        assert!(matches!(
            manager.stage(&hash),
            Err(ContentError::StagingCompleted(_))
        ));
    }

    #[test]
    fn add_without_bytes_is_unknown_content() {
        let (_dir, manager) = open();
        let err = manager.add(&Hash::of(b"nothing")).unwrap_err();
        assert!(matches!(err, ContentError::UnknownContent(_)));
        assert_eq!(err.kind().code(), 40402);
    }

    #[test]
    fn add_with_wrong_bytes_fails_integrity() {
        let (_dir, manager) = open();
        let hash = Hash::of(b"expected");
        let id = session_id(&manager.stage(&hash).unwrap());
        manager.write(&hash, id, &b"unexpected"[..], 0).unwrap();
        let err = manager.add(&hash).unwrap_err();
        assert!(matches!(err, ContentError::IntegrityCheckFailed { .. }));
        assert!(!manager.exists(&hash));
    }

    #[test]
    fn direct_add_verifies_and_cleans_up() {
        let (dir, manager) = open();
        let hash = Hash::of(b"direct");
        assert!(matches!(
            manager.add_from(&hash, &b"corrupt"[..]),
            Err(ContentError::IntegrityCheckFailed { .. })
        ));
        assert_eq!(fs::read_dir(dir.path().join("staging")).unwrap().count(), 0);

        manager.add_from(&hash, &b"direct"[..]).unwrap();
        assert_eq!(manager.get(&hash, 0, 100).unwrap().read_all().unwrap(), b"direct");
    }

    #[test]
    fn delete_removes_bytes() {
        let (_dir, manager) = open();
        let hash = Hash::of(b"gone");
        manager.add_from(&hash, &b"gone"[..]).unwrap();
        assert!(manager.delete(&hash).unwrap());
        assert!(!manager.exists(&hash));
        assert!(!manager.delete(&hash).unwrap());
        assert!(matches!(
            manager.get(&hash, 0, 1),
            Err(ContentError::UnknownContent(_))
        ));
    }

    #[test]
    fn prepared_bytes_commit_under_a_held_lock() {
        let (dir, manager) = open();
        let hash = Hash::of(b"prepared");
        assert!(matches!(
            manager.prepare(&hash, &b"other"[..]),
            Err(ContentError::IntegrityCheckFailed { .. })
        ));
        let prepared = manager.prepare(&hash, &b"prepared"[..]).unwrap();
        assert_eq!(prepared.length(), 8);
        assert!(!manager.exists(&hash));

        let lock = manager.lock(&hash).unwrap();
        assert!(!lock.exists());
        lock.commit(prepared).unwrap();
        assert!(lock.exists());
        drop(lock);

        assert_eq!(fs::read_dir(dir.path().join("staging")).unwrap().count(), 0);
        assert_eq!(manager.get(&hash, 0, 100).unwrap().read_all().unwrap(), b"prepared");

        let elsewhere = manager.prepare(&hash, &b"prepared"[..]).unwrap();
        let other = Hash::of(b"different");
        assert!(matches!(
            manager.lock(&other).unwrap().commit(elsewhere),
            Err(ContentError::IntegrityCheckFailed { .. })
        ));
    }

    #[test]
    fn held_lock_blocks_readers_of_that_hash_only() {
        let (_dir, manager) = open();
        let manager = Arc::new(manager);
        let (busy, idle) = (Hash::of(b"busy"), Hash::of(b"idle"));
        manager.add_from(&busy, &b"busy"[..]).unwrap();
        manager.add_from(&idle, &b"idle"[..]).unwrap();

        let lock = manager.lock(&busy).unwrap();
        assert_eq!(manager.get(&idle, 0, 4).unwrap().read_all().unwrap(), b"idle");

        let (tx, rx) = mpsc::channel();
        let reader = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                tx.send(manager.get(&busy, 0, 4).unwrap().read_all().unwrap()).unwrap();
            })
        };
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        drop(lock);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), b"busy");
        reader.join().unwrap();
    }

    #[test]
    fn open_stream_blocks_delete_until_dropped() {
        let (_dir, manager) = open();
        let manager = Arc::new(manager);
        let hash = Hash::of(b"busy");
        manager.add_from(&hash, &b"busy"[..]).unwrap();
        let reader = manager.get(&hash, 0, 4).unwrap();
        assert_eq!(manager.open_readers(), 1);

        let (tx, rx) = mpsc::channel();
        let deleter = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                tx.send(manager.delete(&hash).unwrap()).unwrap();
            })
        };
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        drop(reader);
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        deleter.join().unwrap();
        assert_eq!(manager.open_readers(), 0);
    }

    #[test]
    fn close_force_closes_streams() {
        let (_dir, manager) = open();
        let hash = Hash::of(b"stream");
        manager.add_from(&hash, &b"stream"[..]).unwrap();
        let mut reader = manager.get(&hash, 0, 6).unwrap();
        manager.close();

        let mut buf = [0u8; 6];
        assert!(reader.read(&mut buf).is_err());
        assert!(matches!(manager.stage(&hash), Err(ContentError::Closed)));
        assert!(matches!(manager.get(&hash, 0, 1), Err(ContentError::Closed)));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn digest_tracks_file_after_any_rewrite(
            initial in proptest::collection::vec(any::<u8>(), 1..256),
            patch in proptest::collection::vec(any::<u8>(), 0..64),
            at in any::<prop::sample::Index>(),
        ) {
            let (_dir, manager) = open();
            let hash = Hash::of(b"target that is never reached");
            let id = session_id(&manager.stage(&hash).unwrap());
            manager.write(&hash, id, &initial[..], 0).unwrap();

            let position = at.index(initial.len() + 1) as u64;
            let session = manager.write(&hash, id, &patch[..], position).unwrap();

            let on_disk = staged_bytes(&manager, &hash);
            prop_assert_eq!(session.digest.hash(), Hash::of(&on_disk));
            prop_assert_eq!(session.length(), on_disk.len() as u64);
        }
    }
}
