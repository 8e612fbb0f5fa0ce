//! Configuration schema for the sidebar orchestrator.
//!
//! Every field has a serde default, so an empty file, a missing file and a
//! file written by an older version all load into a usable config:
//!
//! ```toml
//! log_level = "info"
//!
//! [discovery]
//! retry_interval_ms = 250
//! timeout_ms = 20000
//!
//! [guests]
//! default_source_id = "main"
//! ```
//!
//! Reading and writing the file lives in
//! `infrastructure::storage::config`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level sidebar configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FrameSyncConfig {
    /// `tracing` level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub guests: GuestsConfig,
}

/// Port discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Interval between re-broadcasts of an unanswered request.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    /// Give up on the host after this long.  Absent means wait indefinitely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// Guest frame bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GuestsConfig {
    /// Key used for a guest whose offer carries no `sourceId`.
    #[serde(default = "default_source_id")]
    pub default_source_id: String,
}

impl DiscoveryConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_retry_interval_ms() -> u64 {
    250
}
fn default_source_id() -> String {
    "main".to_string()
}

impl Default for FrameSyncConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            discovery: DiscoveryConfig::default(),
            guests: GuestsConfig::default(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: default_retry_interval_ms(),
            timeout_ms: None,
        }
    }
}

impl Default for GuestsConfig {
    fn default() -> Self {
        Self {
            default_source_id: default_source_id(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
