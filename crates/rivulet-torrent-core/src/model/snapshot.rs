//! Immutable read-side snapshots compared by value before they reach observers.

use std::net::SocketAddr;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rivulet_events::{TorrentId, TorrentStateCode};
use serde::{Deserialize, Serialize};

use super::torrent::{Priority, Torrent};

/// Per-torrent progress summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorrentInfo {
    /// Torrent identifier.
    pub torrent_id: TorrentId,
    /// Display name.
    pub name: String,
    /// Current state.
    pub state: TorrentStateCode,
    /// Completion percentage (0..=100).
    pub progress: u8,
    /// Payload bytes received.
    pub received_bytes: u64,
    /// Payload bytes uploaded.
    pub uploaded_bytes: u64,
    /// Total wanted bytes.
    pub total_bytes: u64,
    /// Download rate in bytes/s.
    pub download_speed: u64,
    /// Upload rate in bytes/s.
    pub upload_speed: u64,
    /// Seconds until completion, `-1` when unknown.
    pub eta_secs: i64,
    /// Connected peers.
    pub peers: u32,
    /// Connected seeds.
    pub seeds: u32,
    /// Destination directory.
    pub download_path: PathBuf,
    /// When the torrent was added.
    pub date_added: DateTime<Utc>,
    /// Last error message.
    pub error: Option<String>,
    /// Sequential download enabled.
    pub sequential_download: bool,
    /// Per-file priorities.
    pub file_priorities: Vec<Priority>,
    /// Associated tags, sorted.
    pub tags: Vec<String>,
}

impl TorrentInfo {
    /// Snapshot for a persisted record with no live task behind it.
    #[must_use]
    pub fn unavailable(record: &Torrent, tags: Vec<String>) -> Self {
        let state = if record.error.is_some() {
            TorrentStateCode::Error
        } else {
            TorrentStateCode::Stopped
        };
        Self {
            torrent_id: record.id.clone(),
            name: record.name.clone(),
            state,
            progress: 0,
            received_bytes: 0,
            uploaded_bytes: 0,
            total_bytes: 0,
            download_speed: 0,
            upload_speed: 0,
            eta_secs: -1,
            peers: 0,
            seeds: 0,
            download_path: record.download_path.clone(),
            date_added: record.date_added,
            error: record.error.clone(),
            sequential_download: false,
            file_priorities: Vec::new(),
            tags,
        }
    }
}

/// Tracker announce outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerStatus {
    /// Last announce succeeded.
    Working,
    /// Announce in progress.
    Updating,
    /// Announce has not happened yet.
    NotContacted,
    /// Last announce failed.
    NotWorking,
}

/// One tracker attached to a torrent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerInfo {
    /// Announce URL.
    pub url: String,
    /// Tier.
    pub tier: u8,
    /// Outcome of the most recent announce.
    pub status: TrackerStatus,
    /// Tracker-provided message.
    pub message: Option<String>,
}

/// One connected peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Remote endpoint.
    pub address: SocketAddr,
    /// Peer client name.
    pub client: String,
    /// Share of pieces the peer has, in permille.
    pub progress_permille: u16,
    /// Rate we download from this peer.
    pub download_speed: u64,
    /// Rate we upload to this peer.
    pub upload_speed: u64,
}

/// Detail view fields polled at the slower cadence.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AdvancedTorrentInfo {
    /// Total seeds in the swarm.
    pub total_seeds: u32,
    /// Total peers in the swarm.
    pub total_peers: u32,
    /// Pieces we have.
    pub downloaded_pieces: u32,
    /// Upload to download ratio, in permille.
    pub share_ratio_permille: u32,
    /// Seconds spent active.
    pub active_secs: u64,
    /// Seconds spent seeding.
    pub seeding_secs: u64,
    /// Distributed copies of the torrent across the swarm, in permille.
    pub availability_permille: u32,
    /// Per-file completion, in permille.
    pub files_progress_permille: Vec<u16>,
}
