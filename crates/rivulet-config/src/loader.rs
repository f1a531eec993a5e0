//! Locating, reading and parsing the configuration file.
//!
//! # Design
//! - A missing file is not an error; the session runs on defaults.
//! - Parsing is followed by hard validation and then guard-rail normalisation, whose
//!   warnings are returned to the caller for logging.

use std::env;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::model::AppConfig;
use crate::validate::{normalize_settings, validate_config};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "RIVULET_CONFIG";
/// File used when [`CONFIG_ENV`] is unset.
pub const DEFAULT_CONFIG_PATH: &str = "rivulet.yaml";

/// Validated configuration along with any adjustments made while normalising it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedConfig {
    /// Effective configuration.
    pub config: AppConfig,
    /// Human-readable notes for every value that was clamped or replaced.
    pub warnings: Vec<String>,
}

/// Configuration path from the environment, falling back to [`DEFAULT_CONFIG_PATH`].
#[must_use]
pub fn config_path() -> PathBuf {
    env::var_os(CONFIG_ENV)
        .filter(|value| !value.is_empty())
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
}

/// Load the configuration at `path`.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when the file exists but cannot be read, and the errors of
/// [`parse`] otherwise.
pub fn load(path: &Path) -> ConfigResult<LoadedConfig> {
    match std::fs::read_to_string(path) {
        Ok(raw) => parse(&raw, path),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "configuration file absent; using defaults");
            finish(AppConfig::default())
        }
        Err(source) => Err(ConfigError::Io {
            operation: "config.read",
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Parse a configuration document; `path` is only used for error context.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] for malformed YAML or unknown sections, and
/// [`ConfigError::InvalidField`] when validation rejects a value.
pub fn parse(raw: &str, path: &Path) -> ConfigResult<LoadedConfig> {
    let config = if raw.trim().is_empty() {
        AppConfig::default()
    } else {
        serde_yaml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?
    };
    finish(config)
}

fn finish(mut config: AppConfig) -> ConfigResult<LoadedConfig> {
    if config.policy.save_torrents_in.as_os_str().is_empty() {
        config
            .policy
            .save_torrents_in
            .clone_from(&config.storage.download_dir);
    }
    validate_config(&config)?;
    let (session, warnings) = normalize_settings(&config.session);
    config.session = session;
    Ok(LoadedConfig { config, warnings })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_documents_yield_defaults() -> ConfigResult<()> {
        let loaded = parse("  \n", Path::new("inline.yaml"))?;
        assert_eq!(loaded.config.session, AppConfig::default().session);
        assert!(loaded.warnings.is_empty());
        Ok(())
    }

    #[test]
    fn blank_save_directory_falls_back_to_the_download_dir() -> ConfigResult<()> {
        let raw = "storage:\n  download_dir: /srv/downloads\npolicy:\n  save_torrents_in: ''\n";
        let loaded = parse(raw, Path::new("inline.yaml"))?;
        assert_eq!(
            loaded.config.policy.save_torrents_in,
            PathBuf::from("/srv/downloads")
        );
        Ok(())
    }

    #[test]
    fn unknown_sections_are_rejected() {
        let err = parse("telemetry:\n  enabled: true\n", Path::new("bad.yaml"))
            .expect_err("unknown section");
        assert!(matches!(err, ConfigError::Parse { path, .. } if path == Path::new("bad.yaml")));
    }
}
