//! Collaborator traits consumed by the session coordinator.
//!
//! # Design
//! - `NativeSession` is owned by exactly one worker task, so methods take `&mut self`.
//! - Repository, file system, and policy calls are synchronous and cheap; they are issued
//!   from the worker or from caller tasks without extra hops.
//! - Failures are `anyhow` errors; the coordinator maps them into `TorrentError` or bus
//!   events depending on whether a caller is waiting.

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use async_trait::async_trait;
use rivulet_events::{SessionStats, TorrentId, TorrentStateCode};
use tokio::sync::broadcast;

use crate::ipfilter::IpFilter;
use crate::model::{
    AdvancedTorrentInfo, BatteryStatus, MagnetInfo, NetworkStatus, PeerInfo, PolicySignal,
    PolicySnapshot, Priority, SessionSettings, SpeedDirection, Torrent, TorrentSource,
    TrackerInfo,
};

/// Everything the engine needs to admit one torrent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentDescriptor {
    /// Info-hash identity.
    pub torrent_id: TorrentId,
    /// Display name.
    pub name: String,
    /// Metainfo bytes or magnet URI.
    pub source: TorrentSource,
    /// Destination directory.
    pub download_path: PathBuf,
    /// Per-file priorities; empty keeps engine defaults.
    pub file_priorities: Vec<Priority>,
    /// Download pieces in order.
    pub sequential: bool,
    /// Admit in the paused state.
    pub paused: bool,
    /// Opaque fast-resume blob from a previous run.
    pub fast_resume: Option<Vec<u8>>,
}

/// Point-in-time status of one torrent as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NativeTorrentStatus {
    /// Engine state.
    pub state: TorrentStateCode,
    /// Torrent is paused.
    pub paused: bool,
    /// Every wanted piece is present.
    pub finished: bool,
    /// Completion in permille.
    pub progress_permille: u16,
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
    /// Last engine error.
    pub error: Option<String>,
    /// Sequential download enabled.
    pub sequential: bool,
    /// Per-file priorities.
    pub file_priorities: Vec<Priority>,
    /// Download limit in bytes/s, `0` means unlimited.
    pub download_limit: i64,
    /// Upload limit in bytes/s, `0` means unlimited.
    pub upload_limit: i64,
    /// Current save path.
    pub save_path: PathBuf,
    /// Attached trackers.
    pub trackers: Vec<TrackerInfo>,
    /// Connected peers.
    pub peer_list: Vec<PeerInfo>,
    /// Piece bitmap.
    pub pieces: Vec<bool>,
    /// Detail counters.
    pub advanced: AdvancedTorrentInfo,
}

/// Asynchronous notification raised by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeAlert {
    /// A torrent moved between states.
    StateChanged {
        /// Affected torrent.
        torrent_id: TorrentId,
        /// State before the transition.
        previous: TorrentStateCode,
        /// State after the transition.
        current: TorrentStateCode,
    },
    /// All wanted pieces are downloaded.
    TorrentFinished {
        /// Affected torrent.
        torrent_id: TorrentId,
    },
    /// The torrent was paused.
    TorrentPaused {
        /// Affected torrent.
        torrent_id: TorrentId,
    },
    /// The torrent was resumed.
    TorrentResumed {
        /// Affected torrent.
        torrent_id: TorrentId,
    },
    /// The torrent left the session.
    TorrentRemoved {
        /// Affected torrent.
        torrent_id: TorrentId,
    },
    /// A torrent-scoped failure such as a disk write error.
    TorrentError {
        /// Affected torrent.
        torrent_id: TorrentId,
        /// Engine-provided detail.
        message: String,
    },
    /// Metadata for a magnet fetch or magnet torrent arrived.
    MetadataReceived {
        /// Info-hash of the metadata.
        info_hash: TorrentId,
        /// Complete bencoded `.torrent` contents.
        bencode: Vec<u8>,
    },
    /// A storage move finished.
    StorageMoved {
        /// Affected torrent.
        torrent_id: TorrentId,
        /// Whether the move succeeded.
        success: bool,
    },
    /// The session could not bind its listen socket.
    ListenFailed {
        /// Engine-provided detail.
        message: String,
    },
    /// `UPnP` or NAT-PMP port mapping failed.
    PortmapError {
        /// Engine-provided detail.
        message: String,
    },
    /// Any other session-wide failure.
    SessionError {
        /// Engine-provided detail.
        message: String,
    },
}

/// The embeddable torrent engine wrapped by the coordinator.
#[async_trait]
pub trait NativeSession: Send {
    /// Bring the session up with the given settings and previously saved state.
    async fn start(&mut self, settings: &SessionSettings, saved_state: Option<&[u8]>)
    -> Result<()>;

    /// Tear the session down.
    async fn stop(&mut self) -> Result<()>;

    /// Serialise session-wide state (DHT table and similar) for the next start.
    async fn save_state(&mut self) -> Result<Vec<u8>>;

    /// Push a complete settings value to the engine.
    async fn apply_settings(&mut self, settings: &SessionSettings) -> Result<()>;

    /// Admit one torrent. Fails when the info-hash is already present.
    async fn add_torrent(&mut self, descriptor: &TorrentDescriptor) -> Result<()>;

    /// Remove a torrent, optionally deleting downloaded data.
    async fn remove_torrent(&mut self, id: &TorrentId, with_files: bool) -> Result<()>;

    /// Pause a torrent.
    async fn pause_torrent(&mut self, id: &TorrentId) -> Result<()>;

    /// Resume a torrent.
    async fn resume_torrent(&mut self, id: &TorrentId) -> Result<()>;

    /// Toggle in-order piece picking.
    async fn set_sequential(&mut self, id: &TorrentId, sequential: bool) -> Result<()>;

    /// Replace per-file priorities.
    async fn prioritize_files(&mut self, id: &TorrentId, priorities: &[Priority]) -> Result<()>;

    /// Set a per-torrent rate limit; `0` or negative means unlimited.
    async fn set_rate_limit(
        &mut self,
        id: &TorrentId,
        direction: SpeedDirection,
        limit: i64,
    ) -> Result<()>;

    /// Replace every tracker of a torrent.
    async fn replace_trackers(&mut self, id: &TorrentId, urls: &[String]) -> Result<()>;

    /// Append trackers to a torrent.
    async fn add_trackers(&mut self, id: &TorrentId, urls: &[String]) -> Result<()>;

    /// Re-verify on-disk data.
    async fn force_recheck(&mut self, id: &TorrentId) -> Result<()>;

    /// Announce to every tracker now.
    async fn force_announce(&mut self, id: &TorrentId) -> Result<()>;

    /// Move downloaded data; completion arrives as [`NativeAlert::StorageMoved`].
    async fn move_storage(&mut self, id: &TorrentId, target: &Path) -> Result<()> {
        let _ = (id, target);
        bail!("storage moves not supported by this engine");
    }

    /// Produce a fast-resume blob, `None` when the torrent has nothing worth saving.
    async fn save_resume_data(&mut self, id: &TorrentId) -> Result<Option<Vec<u8>>>;

    /// Start fetching metadata for a magnet; completion arrives as
    /// [`NativeAlert::MetadataReceived`].
    async fn fetch_magnet(&mut self, magnet: &MagnetInfo) -> Result<()>;

    /// Abandon a metadata fetch.
    async fn cancel_fetch(&mut self, info_hash: &TorrentId) -> Result<()>;

    /// Install an IP filter.
    async fn set_ip_filter(&mut self, filter: &IpFilter) -> Result<()> {
        let _ = filter;
        bail!("ip filtering not supported by this engine");
    }

    /// Remove any installed IP filter.
    async fn clear_ip_filter(&mut self) -> Result<()> {
        Ok(())
    }

    /// Current status of one torrent, `None` when unknown to the engine.
    async fn torrent_status(&mut self, id: &TorrentId) -> Result<Option<NativeTorrentStatus>>;

    /// Session-wide counters.
    async fn session_stats(&mut self) -> Result<SessionStats>;

    /// Drain alerts raised since the previous call, in emission order.
    async fn poll_alerts(&mut self) -> Result<Vec<NativeAlert>>;
}

/// Persistence for torrent records, fast-resume blobs, tags, and session state.
pub trait TorrentRepository: Send + Sync {
    /// Insert a record.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store rejects the write.
    fn add_torrent(&self, torrent: &Torrent) -> Result<()>;

    /// Overwrite a record.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store rejects the write.
    fn update_torrent(&self, torrent: &Torrent) -> Result<()>;

    /// Remove a record with its fast-resume blob and tags. Absent ids are not an error.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store rejects the delete.
    fn delete_torrent(&self, id: &TorrentId) -> Result<()>;

    /// Look up a record.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store cannot be read.
    fn get_torrent_by_id(&self, id: &TorrentId) -> Result<Option<Torrent>>;

    /// Every record.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store cannot be read.
    fn get_all_torrents(&self) -> Result<Vec<Torrent>>;

    /// Store the fast-resume blob for a torrent.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store rejects the write.
    fn add_fast_resume(&self, id: &TorrentId, data: &[u8]) -> Result<()>;

    /// Load the fast-resume blob for a torrent.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store cannot be read.
    fn get_fast_resume_by_id(&self, id: &TorrentId) -> Result<Option<Vec<u8>>>;

    /// Replace the tag set of a torrent.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store rejects the write.
    fn set_tags(&self, id: &TorrentId, tags: &[String]) -> Result<()>;

    /// Tags of a torrent, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store cannot be read.
    fn tags_for(&self, id: &TorrentId) -> Result<Vec<String>>;

    /// Persist the session-state blob written at shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store rejects the write.
    fn save_session_state(&self, data: &[u8]) -> Result<()>;

    /// Load the session-state blob, if one was saved.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store cannot be read.
    fn load_session_state(&self) -> Result<Option<Vec<u8>>>;
}

/// File system access used for metainfo files, free-space checks, and temp cleanup.
pub trait FileSystem: Send + Sync {
    /// Free bytes on the volume holding `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error when the volume cannot be queried.
    fn available_bytes(&self, dir: &Path) -> Result<u64>;

    /// Write a file, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be written.
    fn write_file(&self, path: &Path, contents: &[u8]) -> Result<()>;

    /// Read a whole file.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read.
    fn read_file(&self, path: &Path) -> Result<Vec<u8>>;

    /// Delete a file; a missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error when an existing file cannot be removed.
    fn delete_file(&self, path: &Path) -> Result<()>;

    /// Regular files in `dir` with the given extension, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory cannot be listed.
    fn list_files(&self, dir: &Path, extension: &str) -> Result<Vec<PathBuf>>;

    /// Purge the temporary directory.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory cannot be cleaned.
    fn clean_temp(&self) -> Result<()>;
}

/// Settings repository and device-condition source.
pub trait PolicySource: Send + Sync {
    /// Current behaviour flags.
    fn policy(&self) -> PolicySnapshot;

    /// Current engine settings as configured.
    fn session_settings(&self) -> SessionSettings;

    /// Current network conditions.
    fn network(&self) -> NetworkStatus;

    /// Current power conditions.
    fn battery(&self) -> BatteryStatus;

    /// Change notifications.
    fn subscribe(&self) -> broadcast::Receiver<PolicySignal>;
}
