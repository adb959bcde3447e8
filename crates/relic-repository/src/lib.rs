//! Repository orchestration for relic.
//!
//! A [`Repository`] ties together the revision store, content storage and
//! the event log of one named repository, and runs the background agents
//! that consume that log:
//!
//! - an indexing agent keeping an [`Index`] current
//! - a statistics agent maintaining [`Statistics`]
//! - any number of [`Replications`] into other repositories
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::path::Path;
//!
//! use relic_dag::Revision;
//! use relic_repository::{Repository, RepositoryConfig};
//! use relic_types::Hash;
//!
//! let repo = Repository::open_in_memory("docs", Path::new("/tmp/docs"), RepositoryConfig::default())?;
//! let data = b"hello";
//! let revision = Revision::builder()
//!     .with("title", "greeting")
//!     .build(Hash::of(data), data.len() as u64);
//! repo.add_revision_with(revision, &data[..])?;
//! # Ok::<(), relic_repository::RepositoryError>(())
//! ```

pub mod bus;
pub mod config;
pub mod error;
pub mod index;
mod indexer;
pub mod replication;
pub mod repository;
pub mod stats;

pub use bus::{LocalBus, MessageBus, NullBus};
pub use config::RepositoryConfig;
pub use error::{RepositoryError, RepositoryResult};
pub use index::{Index, IndexMatch, MemoryIndex};
pub use replication::{replication_key, ReplicationInfo, Replications};
pub use repository::{Repository, RepositoryInfo, INDEX_AGENT, STATS_AGENT};
pub use stats::Statistics;
