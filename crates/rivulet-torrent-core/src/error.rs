//! Error types returned synchronously to command callers.
//!
//! Background failures never use these; they surface as bus events instead.

use std::path::PathBuf;

use rivulet_events::TorrentId;
use thiserror::Error;

/// Failure of a single coordinator command.
#[derive(Debug, Error)]
pub enum TorrentError {
    /// A torrent with the same info-hash is already registered.
    #[error("torrent already exists")]
    TorrentAlreadyExists {
        /// Identifier of the existing torrent.
        torrent_id: TorrentId,
    },
    /// Torrent or metadata bytes could not be decoded.
    #[error("failed to decode torrent data")]
    Decode {
        /// Description of the malformed input.
        reason: String,
    },
    /// The destination lacks space for the payload.
    #[error("not enough free space")]
    FreeSpace {
        /// Bytes the torrent needs.
        required: u64,
        /// Bytes available at the destination.
        available: u64,
    },
    /// File system access failed.
    #[error("io operation failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Path involved in the failure, when known.
        path: Option<PathBuf>,
        /// Underlying failure.
        #[source]
        source: anyhow::Error,
    },
    /// Fetching a remote `.torrent` or magnet metadata failed.
    #[error("failed to fetch torrent link")]
    FetchLink {
        /// Link that was being fetched.
        url: String,
        /// Description of the failure.
        reason: String,
    },
    /// Every file in the torrent was deselected.
    #[error("no files selected")]
    NoFilesSelected,
    /// The URI scheme is not supported.
    #[error("unknown uri")]
    UnknownUri {
        /// Rejected URI.
        uri: String,
    },
    /// The native engine rejected the call.
    #[error("session operation failed")]
    Session {
        /// Operation identifier.
        operation: &'static str,
        /// Engine-provided detail.
        message: String,
    },
    /// The engine is not running.
    #[error("engine not running")]
    EngineNotRunning,
    /// A magnet fetch was cancelled before metadata arrived.
    #[error("magnet fetch cancelled")]
    FetchCancelled {
        /// Info-hash of the cancelled fetch.
        info_hash: TorrentId,
    },
}

impl TorrentError {
    /// Build a [`TorrentError::Session`] from a collaborator failure.
    #[must_use]
    pub fn session(operation: &'static str, err: &anyhow::Error) -> Self {
        Self::Session {
            operation,
            message: format!("{err:#}"),
        }
    }

    /// Build a [`TorrentError::Io`] from a collaborator failure.
    #[must_use]
    pub fn io(operation: &'static str, path: Option<PathBuf>, source: anyhow::Error) -> Self {
        Self::Io {
            operation,
            path,
            source,
        }
    }

    /// Build a [`TorrentError::Decode`].
    #[must_use]
    pub fn decode(reason: impl Into<String>) -> Self {
        Self::Decode {
            reason: reason.into(),
        }
    }
}

impl Clone for TorrentError {
    fn clone(&self) -> Self {
        match self {
            Self::TorrentAlreadyExists { torrent_id } => Self::TorrentAlreadyExists {
                torrent_id: torrent_id.clone(),
            },
            Self::Decode { reason } => Self::Decode {
                reason: reason.clone(),
            },
            Self::FreeSpace {
                required,
                available,
            } => Self::FreeSpace {
                required: *required,
                available: *available,
            },
            Self::Io {
                operation,
                path,
                source,
            } => Self::Io {
                operation,
                path: path.clone(),
                source: anyhow::anyhow!("{source:#}"),
            },
            Self::FetchLink { url, reason } => Self::FetchLink {
                url: url.clone(),
                reason: reason.clone(),
            },
            Self::NoFilesSelected => Self::NoFilesSelected,
            Self::UnknownUri { uri } => Self::UnknownUri { uri: uri.clone() },
            Self::Session { operation, message } => Self::Session {
                operation,
                message: message.clone(),
            },
            Self::EngineNotRunning => Self::EngineNotRunning,
            Self::FetchCancelled { info_hash } => Self::FetchCancelled {
                info_hash: info_hash.clone(),
            },
        }
    }
}

/// Convenience alias for command results.
pub type TorrentResult<T> = Result<T, TorrentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_stay_constant_while_context_travels_in_fields() {
        let err = TorrentError::FreeSpace {
            required: 10,
            available: 2,
        };
        assert_eq!(err.to_string(), "not enough free space");

        let err = TorrentError::session("add_torrent", &anyhow::anyhow!("native refused"));
        match err {
            TorrentError::Session { operation, message } => {
                assert_eq!(operation, "add_torrent");
                assert_eq!(message, "native refused");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn cloned_io_error_keeps_source_text() {
        let err = TorrentError::io(
            "read_torrent_file",
            Some(PathBuf::from("/tmp/a.torrent")),
            anyhow::anyhow!("permission denied"),
        );
        let cloned = err.clone();
        match cloned {
            TorrentError::Io { source, path, .. } => {
                assert_eq!(source.to_string(), "permission denied");
                assert_eq!(path, Some(PathBuf::from("/tmp/a.torrent")));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
