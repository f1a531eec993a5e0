//! The YAML configuration document.
//!
//! # Design
//! - Every section and field is optional in the file; absent values take their defaults.
//! - `session` and `policy` reuse the domain types directly so the file and the engine
//!   never drift apart.

use std::path::PathBuf;

use rivulet_telemetry::{DEFAULT_LOG_LEVEL, LogFormat, LoggingConfig};
use rivulet_torrent_core::{PolicySnapshot, SessionSettings};
use serde::{Deserialize, Serialize};

/// Whole configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// On-disk locations owned by the session.
    pub storage: StorageConfig,
    /// Engine-wide tunables.
    pub session: SessionSettings,
    /// Behaviour flags consulted by the coordinator.
    pub policy: PolicySnapshot,
    /// Logging output.
    pub logging: LogSection,
}

/// Directories used by the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Root for torrent records, resume data and stored metainfo.
    pub data_dir: PathBuf,
    /// Default destination for downloads when the policy names none.
    pub download_dir: PathBuf,
    /// Scratch space purged whenever the engine stops.
    pub temp_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            download_dir: PathBuf::from("downloads"),
            temp_dir: PathBuf::from("data/tmp"),
        }
    }
}

impl StorageConfig {
    /// Directory holding `.torrent` files for admitted torrents.
    #[must_use]
    pub fn metadata_dir(&self) -> PathBuf {
        self.data_dir.join("metadata")
    }

    /// Directory holding the file-backed torrent repository.
    #[must_use]
    pub fn repository_dir(&self) -> PathBuf {
        self.data_dir.join("torrents")
    }
}

/// Logging options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogSection {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Output format; inferred from the build profile when absent.
    pub format: Option<LogFormat>,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            format: None,
        }
    }
}

impl LogSection {
    /// Borrow as the telemetry crate's logging configuration.
    #[must_use]
    pub fn logging_config(&self) -> LoggingConfig<'_> {
        LoggingConfig {
            level: &self.level,
            format: self.format.unwrap_or_else(LogFormat::infer),
            ..LoggingConfig::default()
        }
    }
}
