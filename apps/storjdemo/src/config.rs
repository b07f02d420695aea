//! Node configuration.
//!
//! Read from an optional JSON file. Every field falls back to its default
//! when missing, so `{}` is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use storjdemo_heartbeat::DEFAULT_CHUNK_SIZE;
use storjdemo_session::SessionConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Where the farmer stores received files.
    pub download_dir: PathBuf,

    /// Where the uploader writes generated tags.
    pub work_dir: PathBuf,

    /// Seconds between two challenge cycles.
    pub challenge_interval_secs: u64,

    /// Seconds before the first challenge cycle.
    pub initial_delay_secs: u64,

    /// How long the farmer waits for both files to arrive.
    pub transfer_timeout_secs: u64,

    /// Host the farmer reports for its channel and transport endpoints.
    pub advertise_host: String,

    /// Transport port (0 = auto-assign).
    pub transport_port: u16,

    /// Chunk size of the proof scheme, in bytes.
    pub chunk_size: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            download_dir: session.download_dir,
            work_dir: session.work_dir,
            challenge_interval_secs: session.challenge_interval.as_secs(),
            initial_delay_secs: session.initial_delay.as_secs(),
            transfer_timeout_secs: session.transfer_timeout.as_secs(),
            advertise_host: session.advertise_host,
            transport_port: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl NodeConfig {
    /// Loads `path`, or the defaults when no file is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
        let config: NodeConfig = serde_json::from_str(&content)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            download_dir: self.download_dir.clone(),
            work_dir: self.work_dir.clone(),
            challenge_interval: Duration::from_secs(self.challenge_interval_secs),
            initial_delay: Duration::from_secs(self.initial_delay_secs),
            transfer_timeout: Duration::from_secs(self.transfer_timeout_secs),
            advertise_host: self.advertise_host.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file() {
        let config = NodeConfig::load(None).unwrap();
        assert_eq!(config, NodeConfig::default());
        assert_eq!(config.download_dir, PathBuf::from("./download/"));
        assert_eq!(config.challenge_interval_secs, 30);
        assert_eq!(config.chunk_size, 1024);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.json");
        std::fs::write(
            &path,
            r#"{"challenge_interval_secs": 5, "advertise_host": "10.0.0.7"}"#,
        )
        .unwrap();

        let config = NodeConfig::load(Some(&path)).unwrap();
        assert_eq!(config.challenge_interval_secs, 5);
        assert_eq!(config.advertise_host, "10.0.0.7");
        assert_eq!(config.transfer_timeout_secs, 120);

        let session = config.session();
        assert_eq!(session.challenge_interval, Duration::from_secs(5));
        assert_eq!(session.advertise_host, "10.0.0.7");
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(NodeConfig::load(Some(&dir.path().join("nope.json"))).is_err());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(NodeConfig::load(Some(&path)).is_err());
    }
}
