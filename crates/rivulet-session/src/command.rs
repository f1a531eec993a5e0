#![allow(clippy::redundant_pub_crate)]

use std::path::PathBuf;

use rivulet_torrent_core::{
    AddTorrentParams, MagnetInfo, Priority, SessionSettings, SpeedDirection, Torrent, TorrentId,
    TorrentMetaInfo, TorrentResult,
};
use tokio::sync::oneshot;

/// Reply channel carried by every worker command.
pub(crate) type Reply<T> = oneshot::Sender<TorrentResult<T>>;

/// Resolves once metadata for a magnet arrives or the fetch is cancelled.
pub(crate) type MetadataReceiver = oneshot::Receiver<TorrentResult<TorrentMetaInfo>>;

/// Mutating operations serialised onto the coordinator worker.
#[derive(Debug)]
pub(crate) enum SessionCommand {
    /// Bring the engine up.
    Start,
    /// Take the engine down; `force` bypasses keep-alive.
    Stop { force: bool },
    /// Admit one torrent.
    AddTorrent {
        params: Box<AddTorrentParams>,
        respond_to: Reply<Torrent>,
    },
    /// Remove torrents with or without their data.
    DeleteTorrents {
        ids: Vec<TorrentId>,
        with_files: bool,
        respond_to: Reply<()>,
    },
    /// Toggle between paused and resumed.
    PauseResume {
        id: TorrentId,
        respond_to: Reply<()>,
    },
    /// Pause every live torrent by user request.
    PauseAll {
        respond_to: Reply<()>,
    },
    /// Resume every live torrent by user request.
    ResumeAll {
        respond_to: Reply<()>,
    },
    /// Re-verify data on disk.
    ForceRecheck {
        ids: Vec<TorrentId>,
        respond_to: Reply<()>,
    },
    /// Announce to trackers now.
    ForceAnnounce {
        ids: Vec<TorrentId>,
        respond_to: Reply<()>,
    },
    /// Toggle in-order piece picking.
    SetSequential {
        id: TorrentId,
        sequential: bool,
        respond_to: Reply<()>,
    },
    /// Replace per-file priorities.
    PrioritizeFiles {
        id: TorrentId,
        priorities: Vec<Priority>,
        respond_to: Reply<()>,
    },
    /// Set a per-torrent rate limit.
    SetSpeedLimit {
        id: TorrentId,
        direction: SpeedDirection,
        limit: i64,
        respond_to: Reply<()>,
    },
    /// Replace every tracker.
    ReplaceTrackers {
        id: TorrentId,
        urls: Vec<String>,
        respond_to: Reply<()>,
    },
    /// Append trackers.
    AddTrackers {
        id: TorrentId,
        urls: Vec<String>,
        respond_to: Reply<()>,
    },
    /// Remove the listed trackers.
    DeleteTrackers {
        id: TorrentId,
        urls: Vec<String>,
        respond_to: Reply<()>,
    },
    /// Rename a torrent.
    SetTorrentName {
        id: TorrentId,
        name: String,
        respond_to: Reply<()>,
    },
    /// Move downloaded data.
    SetDownloadPath {
        ids: Vec<TorrentId>,
        path: PathBuf,
        respond_to: Reply<()>,
    },
    /// Replace the tag set.
    SetTags {
        id: TorrentId,
        tags: Vec<String>,
        respond_to: Reply<()>,
    },
    /// Re-evaluate policy for every live torrent.
    Reschedule {
        respond_to: Reply<()>,
    },
    /// Replace the engine settings wholesale.
    ApplySettings {
        settings: Box<SessionSettings>,
        respond_to: Reply<()>,
    },
    /// Start or join a magnet metadata fetch.
    FetchMagnet {
        magnet: Box<MagnetInfo>,
        respond_to: Reply<MetadataReceiver>,
    },
    /// Abandon a magnet metadata fetch.
    CancelFetch {
        info_hash: TorrentId,
        respond_to: Reply<()>,
    },
}

impl SessionCommand {
    /// Stable label used for logs and metrics.
    pub(crate) const fn label(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop { .. } => "stop",
            Self::AddTorrent { .. } => "add_torrent",
            Self::DeleteTorrents { .. } => "delete_torrents",
            Self::PauseResume { .. } => "pause_resume",
            Self::PauseAll { .. } => "pause_all",
            Self::ResumeAll { .. } => "resume_all",
            Self::ForceRecheck { .. } => "force_recheck",
            Self::ForceAnnounce { .. } => "force_announce",
            Self::SetSequential { .. } => "set_sequential",
            Self::PrioritizeFiles { .. } => "prioritize_files",
            Self::SetSpeedLimit { .. } => "set_speed_limit",
            Self::ReplaceTrackers { .. } => "replace_trackers",
            Self::AddTrackers { .. } => "add_trackers",
            Self::DeleteTrackers { .. } => "delete_trackers",
            Self::SetTorrentName { .. } => "set_torrent_name",
            Self::SetDownloadPath { .. } => "set_download_path",
            Self::SetTags { .. } => "set_tags",
            Self::Reschedule { .. } => "reschedule",
            Self::ApplySettings { .. } => "apply_settings",
            Self::FetchMagnet { .. } => "fetch_magnet",
            Self::CancelFetch { .. } => "cancel_fetch",
        }
    }
}
