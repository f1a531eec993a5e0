use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rivulet_events::TorrentId;
use serde::{Deserialize, Serialize};

use super::metainfo::{MagnetInfo, TorrentMetaInfo};

/// Download priority for a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// File is not downloaded.
    Ignore,
    /// Lowest non-zero priority.
    Low,
    /// Engine default.
    #[default]
    Default,
    /// Preferred over default files.
    High,
    /// Downloaded before everything else.
    Top,
}

impl Priority {
    /// Numeric level understood by libtorrent-style engines (0..=7).
    #[must_use]
    pub const fn level(self) -> u8 {
        match self {
            Self::Ignore => 0,
            Self::Low => 1,
            Self::Default => 4,
            Self::High => 6,
            Self::Top => 7,
        }
    }

    /// Map an engine level back onto the closest priority.
    #[must_use]
    pub const fn from_level(level: u8) -> Self {
        match level {
            0 => Self::Ignore,
            1..=3 => Self::Low,
            4 => Self::Default,
            5 | 6 => Self::High,
            _ => Self::Top,
        }
    }
}

/// Direction of a transfer rate limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedDirection {
    /// Incoming payload.
    Download,
    /// Outgoing payload.
    Upload,
}

/// Where the torrent's metadata comes from.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TorrentSource {
    /// Bencoded metainfo bytes.
    Metainfo {
        /// Raw `.torrent` contents.
        #[serde(with = "serde_bytes")]
        bytes: Vec<u8>,
    },
    /// Magnet URI whose metadata is fetched from peers.
    Magnet {
        /// Original URI.
        uri: String,
    },
}

impl TorrentSource {
    /// Whether metadata still has to be fetched.
    #[must_use]
    pub const fn is_magnet(&self) -> bool {
        matches!(self, Self::Magnet { .. })
    }
}

impl std::fmt::Debug for TorrentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Metainfo { bytes } => f
                .debug_struct("Metainfo")
                .field("len", &bytes.len())
                .finish(),
            Self::Magnet { uri } => f.debug_struct("Magnet").field("uri", uri).finish(),
        }
    }
}

/// Parameters accepted by the add-torrent command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddTorrentParams {
    /// Info-hash identity.
    pub torrent_id: TorrentId,
    /// Display name.
    pub name: String,
    /// Metadata source.
    pub source: TorrentSource,
    /// Per-file priorities; empty means engine default for every file.
    pub file_priorities: Vec<Priority>,
    /// Destination directory.
    pub download_path: PathBuf,
    /// Download pieces in order.
    pub sequential_download: bool,
    /// Register the torrent in the paused state.
    pub add_paused: bool,
    /// Skip the free-space check.
    pub ignore_free_space: bool,
    /// Tags associated with the torrent.
    pub tags: Vec<String>,
}

impl AddTorrentParams {
    /// Parameters for decoded metainfo, every file at default priority.
    #[must_use]
    pub fn from_metainfo(info: &TorrentMetaInfo, download_path: PathBuf) -> Self {
        Self {
            torrent_id: info.info_hash.clone(),
            name: info.name.clone(),
            source: TorrentSource::Metainfo {
                bytes: info.bencode.clone(),
            },
            file_priorities: vec![Priority::Default; info.files.len()],
            download_path,
            sequential_download: false,
            add_paused: false,
            ignore_free_space: false,
            tags: Vec::new(),
        }
    }

    /// Parameters for a magnet link; BEP53 selections carry over.
    #[must_use]
    pub fn from_magnet(info: &MagnetInfo, download_path: PathBuf) -> Self {
        Self {
            torrent_id: info.info_hash.clone(),
            name: info.name.clone(),
            source: TorrentSource::Magnet {
                uri: info.uri.clone(),
            },
            file_priorities: info.file_priorities.clone(),
            download_path,
            sequential_download: false,
            add_paused: false,
            ignore_free_space: false,
            tags: Vec::new(),
        }
    }

    /// Builder-style toggle for [`Self::add_paused`].
    #[must_use]
    pub const fn paused(mut self, paused: bool) -> Self {
        self.add_paused = paused;
        self
    }

    /// Whether an explicit selection deselects every file.
    #[must_use]
    pub fn selects_nothing(&self) -> bool {
        !self.file_priorities.is_empty()
            && self
                .file_priorities
                .iter()
                .all(|priority| *priority == Priority::Ignore)
    }
}

/// Persisted torrent record owned by the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Torrent {
    /// Info-hash identity.
    pub id: TorrentId,
    /// Display name.
    pub name: String,
    /// Destination directory.
    pub download_path: PathBuf,
    /// When the torrent was first added.
    pub date_added: DateTime<Utc>,
    /// Last error reported for this torrent.
    pub error: Option<String>,
    /// Paused explicitly by the user; policy never resumes it.
    pub manually_paused: bool,
    /// Metadata has not been received yet.
    pub downloading_metadata: bool,
}

impl Torrent {
    /// Record for freshly submitted parameters.
    #[must_use]
    pub fn from_params(params: &AddTorrentParams) -> Self {
        Self {
            id: params.torrent_id.clone(),
            name: params.name.clone(),
            download_path: params.download_path.clone(),
            date_added: Utc::now(),
            error: None,
            manually_paused: params.add_paused,
            downloading_metadata: params.source.is_magnet(),
        }
    }
}
