//! Node configuration
//!
//! Loaded once from a JSON file, immutable afterwards. Every field that is
//! not identity has a serde default so a minimal file is just:
//!
//! ```json
//! { "node_name": "node-A", "data_dir": "/var/keystage/node-A" }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cli::{CliError, CliResult};

/// Bounds on best-effort peer synchronization.
///
/// The default is a 5 second bound per attempt with no retry: a peer that
/// does not answer in time is logged and skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSyncPolicy {
    /// Per-attempt bound in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Extra attempts after the first one fails
    #[serde(default)]
    pub max_retries: u32,

    /// Pause between attempts in milliseconds
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_retry_backoff_ms() -> u64 {
    200
}

impl Default for PeerSyncPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_retries: 0,
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl PeerSyncPolicy {
    /// Per-attempt timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Pause between attempts.
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Total attempts including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Upper bound on the time one synchronization may take.
    pub fn worst_case(&self) -> Duration {
        self.timeout() * self.max_attempts() + self.retry_backoff() * self.max_retries
    }
}

/// Configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingConfig {
    /// Identity of this node (required)
    pub node_name: String,

    /// Directory holding the local key database (required)
    pub data_dir: PathBuf,

    /// Data directory of the paired peer node; peer sync is skipped when absent
    #[serde(default)]
    pub partner_data_dir: Option<PathBuf>,

    /// Name reported for the peer in logs
    #[serde(default = "default_partner_name")]
    pub partner_name: String,

    /// External key manager endpoint, e.g. "kmip.example.com:5696"
    #[serde(default)]
    pub key_manager: Option<String>,

    /// Peer synchronization bounds
    #[serde(default)]
    pub peer_sync: PeerSyncPolicy,
}

fn default_partner_name() -> String {
    "partner".to_string()
}

impl StagingConfig {
    /// Configuration for `node_name` with every optional field defaulted.
    pub fn new(node_name: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            node_name: node_name.into(),
            data_dir: data_dir.into(),
            partner_data_dir: None,
            partner_name: default_partner_name(),
            key_manager: None,
            peer_sync: PeerSyncPolicy::default(),
        }
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> CliResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| CliError::config_error(format!("Failed to read config: {}", e)))?;

        let config: StagingConfig = serde_json::from_str(&content)
            .map_err(|e| CliError::config_error(format!("Invalid config JSON: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Reject configurations that cannot run.
    pub fn validate(&self) -> CliResult<()> {
        if self.node_name.trim().is_empty() {
            return Err(CliError::config_error("node_name must not be empty"));
        }

        if self.data_dir.as_os_str().is_empty() {
            return Err(CliError::config_error("data_dir must not be empty"));
        }

        if self.peer_sync.timeout_ms == 0 {
            return Err(CliError::config_error(
                "peer_sync.timeout_ms must be > 0; peer sync may not block indefinitely",
            ));
        }

        if let Some(partner) = &self.partner_data_dir {
            if partner == &self.data_dir {
                return Err(CliError::config_error(
                    "partner_data_dir must differ from data_dir",
                ));
            }
        }

        Ok(())
    }
}
