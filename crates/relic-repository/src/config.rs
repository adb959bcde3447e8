//! Repository configuration.
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration:
//!
//! ```toml
//! staging_capacity = 1000
//! staging_ttl_secs = 60
//! staging_cleanup_interval_secs = 30
//! agent_batch_size = 100
//! history_page_size = 20
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use relic_content::StagingConfig;

use crate::error::RepositoryResult;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Maximum number of cached staging sessions.
    pub staging_capacity: usize,
    /// Idle seconds after which a staging session expires.
    pub staging_ttl_secs: u64,
    /// Seconds between background eviction passes.
    pub staging_cleanup_interval_secs: u64,
    /// Events fetched per agent batch.
    pub agent_batch_size: usize,
    /// Events returned by a history call that does not specify a count.
    pub history_page_size: usize,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            staging_capacity: 1000,
            staging_ttl_secs: 60,
            staging_cleanup_interval_secs: 30,
            agent_batch_size: 100,
            history_page_size: 20,
        }
    }
}

impl RepositoryConfig {
    pub fn from_toml_str(s: &str) -> RepositoryResult<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: &Path) -> RepositoryResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn staging(&self) -> StagingConfig {
        StagingConfig {
            capacity: self.staging_capacity,
            ttl: Duration::from_secs(self.staging_ttl_secs),
            cleanup_interval: Duration::from_secs(self.staging_cleanup_interval_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_default() {
        assert_eq!(
            RepositoryConfig::from_toml_str("").unwrap(),
            RepositoryConfig::default()
        );
    }

    #[test]
    fn partial_document_keeps_other_defaults() {
        let config = RepositoryConfig::from_toml_str("agent_batch_size = 5\nstaging_ttl_secs = 2\n")
            .unwrap();
        assert_eq!(config.agent_batch_size, 5);
        assert_eq!(config.staging().ttl, Duration::from_secs(2));
        assert_eq!(config.staging_capacity, 1000);
    }

    #[test]
    fn malformed_document_is_rejected() {
        let err = RepositoryConfig::from_toml_str("agent_batch_size = \"many\"").unwrap_err();
        assert_eq!(err.kind(), relic_types::ErrorKind::InvalidRequest);
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("relic.toml");
        std::fs::write(&path, "history_page_size = 7\n").unwrap();
        assert_eq!(RepositoryConfig::load(&path).unwrap().history_page_size, 7);
    }
}
