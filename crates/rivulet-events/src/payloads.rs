//! Event payload types carried across the session layer.

use std::fmt::{self, Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::topics::EventKind;

/// Identifier assigned to each dispatched event.
pub type EventId = u64;

/// Opaque torrent identity derived from the info-hash.
///
/// Stored as lowercase hex so two spellings of the same hash compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TorrentId(String);

impl TorrentId {
    /// Wrap a hash string, normalising it to lowercase.
    #[must_use]
    pub fn new(hash: impl AsRef<str>) -> Self {
        Self(hash.as_ref().trim().to_ascii_lowercase())
    }

    /// Borrow the underlying hash string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TorrentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TorrentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TorrentId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Engine-reported state of a single torrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TorrentStateCode {
    /// State could not be determined.
    #[default]
    Unknown,
    /// The torrent recorded an error.
    Error,
    /// Payload is being downloaded.
    Downloading,
    /// Download finished and data is being served to peers.
    Seeding,
    /// Paused by the user or by policy.
    Paused,
    /// Not loaded into a running engine.
    Stopped,
    /// Existing data is being verified.
    Checking,
    /// Waiting for metadata from peers.
    DownloadingMetadata,
    /// Download finished and the torrent is not seeding.
    Finished,
    /// Storage is being allocated.
    Allocating,
}

impl TorrentStateCode {
    /// Whether the state represents an inactive torrent.
    #[must_use]
    pub const fn is_inactive(self) -> bool {
        matches!(self, Self::Paused | Self::Stopped | Self::Error)
    }
}

/// Engine-wide counters reported periodically while the session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionStats {
    /// Nodes in the DHT routing table.
    pub dht_nodes: u64,
    /// Bytes received since the session started.
    pub total_download: u64,
    /// Bytes sent since the session started.
    pub total_upload: u64,
    /// Current download rate in bytes per second.
    pub download_speed: u64,
    /// Current upload rate in bytes per second.
    pub upload_speed: u64,
    /// Port the session listens on, zero when unknown.
    pub listen_port: u16,
}

/// Typed events emitted by the session coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// The native session started and accepts commands.
    SessionStarted,
    /// The native session stopped and the registry was cleared.
    SessionStopped,
    /// The engine reported a failure that has no synchronous caller.
    SessionError {
        /// Human-readable failure detail.
        message: String,
    },
    /// Port mapping failed; advisory only.
    NatError {
        /// Human-readable failure detail.
        message: String,
    },
    /// A torrent was added by an explicit command.
    TorrentAdded {
        /// Identifier for the torrent that was added.
        torrent_id: TorrentId,
    },
    /// A persisted torrent was restored into the running session.
    TorrentLoaded {
        /// Identifier for the torrent that was restored.
        torrent_id: TorrentId,
    },
    /// The engine moved a torrent between states.
    TorrentStateChanged {
        /// Identifier for the torrent whose state changed.
        torrent_id: TorrentId,
        /// State before the transition.
        previous: TorrentStateCode,
        /// State after the transition.
        current: TorrentStateCode,
    },
    /// All wanted pieces were downloaded.
    TorrentFinished {
        /// Identifier for the finished torrent.
        torrent_id: TorrentId,
    },
    /// A torrent was removed from the session and the repository.
    TorrentRemoved {
        /// Identifier for the removed torrent.
        torrent_id: TorrentId,
    },
    /// A torrent was paused.
    TorrentPaused {
        /// Identifier for the paused torrent.
        torrent_id: TorrentId,
    },
    /// A torrent was resumed.
    TorrentResumed {
        /// Identifier for the resumed torrent.
        torrent_id: TorrentId,
    },
    /// A single torrent failed; recorded on its persisted record.
    TorrentError {
        /// Identifier for the failing torrent.
        torrent_id: TorrentId,
        /// Human-readable failure detail.
        message: String,
    },
    /// Metadata for a torrent became available or failed to load.
    TorrentMetadataLoaded {
        /// Identifier for the torrent whose metadata loaded.
        torrent_id: TorrentId,
        /// Failure detail when the metadata could not be used.
        error: Option<String>,
    },
    /// Metadata for a pending magnet fetch arrived from peers.
    MagnetMetadataReceived {
        /// Info-hash of the fetched magnet.
        info_hash: TorrentId,
    },
    /// Restoring a persisted torrent at session start failed.
    RestoreSessionError {
        /// Identifier for the torrent that could not be restored.
        torrent_id: TorrentId,
    },
    /// A storage move was started.
    TorrentMoving {
        /// Identifier for the torrent being moved.
        torrent_id: TorrentId,
    },
    /// A storage move completed.
    TorrentMoved {
        /// Identifier for the moved torrent.
        torrent_id: TorrentId,
        /// Whether the move succeeded.
        success: bool,
    },
    /// An IP filter file was parsed and applied.
    IpFilterParsed {
        /// Number of rules applied; zero when parsing failed.
        rule_count: usize,
    },
    /// Periodic session statistics.
    SessionStats {
        /// Latest counters.
        stats: SessionStats,
    },
    /// The engine accepted a new settings value.
    SessionSettingsApplied,
}

impl Event {
    /// Kind discriminator used for filtering and metrics labels.
    #[must_use]
    pub const fn event_kind(&self) -> EventKind {
        match self {
            Self::SessionStarted => EventKind::SessionStarted,
            Self::SessionStopped => EventKind::SessionStopped,
            Self::SessionError { .. } => EventKind::SessionError,
            Self::NatError { .. } => EventKind::NatError,
            Self::TorrentAdded { .. } => EventKind::TorrentAdded,
            Self::TorrentLoaded { .. } => EventKind::TorrentLoaded,
            Self::TorrentStateChanged { .. } => EventKind::TorrentStateChanged,
            Self::TorrentFinished { .. } => EventKind::TorrentFinished,
            Self::TorrentRemoved { .. } => EventKind::TorrentRemoved,
            Self::TorrentPaused { .. } => EventKind::TorrentPaused,
            Self::TorrentResumed { .. } => EventKind::TorrentResumed,
            Self::TorrentError { .. } => EventKind::TorrentError,
            Self::TorrentMetadataLoaded { .. } => EventKind::TorrentMetadataLoaded,
            Self::MagnetMetadataReceived { .. } => EventKind::MagnetMetadataReceived,
            Self::RestoreSessionError { .. } => EventKind::RestoreSessionError,
            Self::TorrentMoving { .. } => EventKind::TorrentMoving,
            Self::TorrentMoved { .. } => EventKind::TorrentMoved,
            Self::IpFilterParsed { .. } => EventKind::IpFilterParsed,
            Self::SessionStats { .. } => EventKind::SessionStats,
            Self::SessionSettingsApplied => EventKind::SessionSettingsApplied,
        }
    }

    /// Machine-friendly discriminator for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        self.event_kind().as_str()
    }

    /// Torrent the event refers to, if any.
    #[must_use]
    pub const fn torrent_id(&self) -> Option<&TorrentId> {
        match self {
            Self::TorrentAdded { torrent_id }
            | Self::TorrentLoaded { torrent_id }
            | Self::TorrentStateChanged { torrent_id, .. }
            | Self::TorrentFinished { torrent_id }
            | Self::TorrentRemoved { torrent_id }
            | Self::TorrentPaused { torrent_id }
            | Self::TorrentResumed { torrent_id }
            | Self::TorrentError { torrent_id, .. }
            | Self::TorrentMetadataLoaded { torrent_id, .. }
            | Self::RestoreSessionError { torrent_id }
            | Self::TorrentMoving { torrent_id }
            | Self::TorrentMoved { torrent_id, .. } => Some(torrent_id),
            Self::MagnetMetadataReceived { info_hash } => Some(info_hash),
            Self::SessionStarted
            | Self::SessionStopped
            | Self::SessionError { .. }
            | Self::NatError { .. }
            | Self::IpFilterParsed { .. }
            | Self::SessionStats { .. }
            | Self::SessionSettingsApplied => None,
        }
    }
}

/// Metadata wrapper around events. Each envelope tracks the event id and dispatch timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Monotonic identifier assigned at dispatch.
    pub id: EventId,
    /// Timestamp recording when the envelope was produced.
    pub timestamp: DateTime<Utc>,
    /// Wrapped event payload.
    pub event: Event,
}
