//! Content storage for relic.
//!
//! Content bytes reach permanent storage through resumable staging
//! sessions: a client opens a session with [`ContentManager::stage`], writes
//! bytes at arbitrary (already staged) positions, and the content is only
//! committed once the running [`Digest`](relic_crypto::Digest) matches its
//! hash. Every file operation on a hash happens under that hash's lock from
//! the [`LockManager`].
//!
//! # Key Types
//!
//! - [`ContentManager`]: staging, commit, streaming reads and deletion
//! - [`ContentLock`] / [`PreparedContent`]: a held content lock, and
//!   verified bytes waiting for it, for commits paired with a transaction
//! - [`LockManager`]: per-hash shared/exclusive locks with RAII guards
//! - [`StagingCache`] / [`StagingSession`]: bounded, expiring session cache
//! - [`ContentReader`]: a locked stream over committed bytes

pub mod error;
pub mod locks;
pub mod manager;
pub mod reader;
pub mod staging;

pub use error::{ContentError, ContentResult};
pub use locks::{LockError, LockManager, ReadGuard, WriteGuard};
pub use manager::{ContentLock, ContentManager, ContentState, PreparedContent};
pub use reader::ContentReader;
pub use staging::{StagingCache, StagingConfig, StagingSession};
