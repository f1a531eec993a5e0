//! # Design
//!
//! - Centralize bootstrap errors for the binary.
//! - Keep error messages constant while carrying context fields for debugging.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration could not be loaded.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: rivulet_config::ConfigError,
    },
    /// Logging or metrics could not be initialised.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: rivulet_telemetry::TelemetryError,
    },
    /// A session command failed.
    #[error("torrent operation failed")]
    Torrent {
        /// Operation identifier.
        operation: &'static str,
        /// Source torrent error.
        source: rivulet_torrent_core::TorrentError,
    },
    /// A session collaborator could not be built.
    #[error("session wiring failed")]
    Wiring {
        /// Operation identifier.
        operation: &'static str,
        /// Directory involved, when the failure concerns one.
        path: Option<PathBuf>,
        /// Rendered source error.
        message: String,
    },
    /// Waiting for the shutdown signal failed.
    #[error("signal handling failed")]
    Signal {
        /// Source IO error.
        source: std::io::Error,
    },
}

impl AppError {
    pub(crate) const fn config(
        operation: &'static str,
        source: rivulet_config::ConfigError,
    ) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: rivulet_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) const fn torrent(
        operation: &'static str,
        source: rivulet_torrent_core::TorrentError,
    ) -> Self {
        Self::Torrent { operation, source }
    }

    pub(crate) fn wiring(
        operation: &'static str,
        path: Option<PathBuf>,
        source: &impl std::fmt::Display,
    ) -> Self {
        Self::Wiring {
            operation,
            path,
            message: format!("{source:#}"),
        }
    }
}
