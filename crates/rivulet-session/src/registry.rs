//! Authoritative map from torrent identifier to live task.
//!
//! # Design
//! - Reads are lock-shared and callable from any thread; callers get clones, never guards.
//! - Mutation is `pub(crate)` and only the coordinator worker calls it, so writes are
//!   serialised by construction.
//! - An absent entry means "no live task": the engine is stopped or the id is unknown.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use rivulet_torrent_core::{
    NativeTorrentStatus, Torrent, TorrentId, TorrentInfo, TorrentStateCode,
};

/// User intent that overrides policy-driven scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ManualOverride {
    /// Scheduling follows policy.
    #[default]
    None,
    /// The user paused the torrent; policy never resumes it.
    Paused,
    /// The user resumed the torrent; policy never pauses it.
    Resumed,
}

/// In-memory handle bound to one live native torrent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentTask {
    /// Info-hash identity.
    pub id: TorrentId,
    /// Display name.
    pub name: String,
    /// Destination directory.
    pub download_path: PathBuf,
    /// When the torrent was first added.
    pub date_added: DateTime<Utc>,
    /// Last status read from the engine.
    pub status: NativeTorrentStatus,
    /// Manual scheduling override.
    pub manual: ManualOverride,
    /// Tag set, sorted.
    pub tags: Vec<String>,
    /// Recorded torrent-scoped error.
    pub error: Option<String>,
    /// Metadata is still being fetched for a magnet.
    pub downloading_metadata: bool,
    /// Target of an in-flight storage move.
    pub pending_move: Option<PathBuf>,
}

impl TorrentTask {
    /// Task for a persisted record, before the first status refresh.
    #[must_use]
    pub fn from_record(record: &Torrent, tags: Vec<String>) -> Self {
        let manual = if record.manually_paused {
            ManualOverride::Paused
        } else {
            ManualOverride::None
        };
        Self {
            id: record.id.clone(),
            name: record.name.clone(),
            download_path: record.download_path.clone(),
            date_added: record.date_added,
            status: NativeTorrentStatus {
                eta_secs: -1,
                ..NativeTorrentStatus::default()
            },
            manual,
            tags,
            error: record.error.clone(),
            downloading_metadata: record.downloading_metadata,
            pending_move: None,
        }
    }

    /// Whether the torrent is paused by the engine.
    #[must_use]
    pub const fn is_paused(&self) -> bool {
        self.status.paused
    }

    /// Whether every wanted piece is present.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.status.finished
    }

    /// Effective state, letting a recorded error win over the engine state.
    #[must_use]
    pub const fn state(&self) -> TorrentStateCode {
        if self.error.is_some() {
            TorrentStateCode::Error
        } else if self.downloading_metadata {
            TorrentStateCode::DownloadingMetadata
        } else {
            self.status.state
        }
    }

    /// Read-side snapshot of this task.
    #[must_use]
    pub fn info(&self) -> TorrentInfo {
        let progress = u8::try_from(self.status.progress_permille.min(1000) / 10).unwrap_or(100);
        TorrentInfo {
            torrent_id: self.id.clone(),
            name: self.name.clone(),
            state: self.state(),
            progress,
            received_bytes: self.status.received_bytes,
            uploaded_bytes: self.status.uploaded_bytes,
            total_bytes: self.status.total_bytes,
            download_speed: self.status.download_speed,
            upload_speed: self.status.upload_speed,
            eta_secs: self.status.eta_secs,
            peers: self.status.peers,
            seeds: self.status.seeds,
            download_path: self.download_path.clone(),
            date_added: self.date_added,
            error: self.error.clone(),
            sequential_download: self.status.sequential,
            file_priorities: self.status.file_priorities.clone(),
            tags: self.tags.clone(),
        }
    }
}

/// Shared, cloneable view of the live task map.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<RwLock<HashMap<TorrentId, TorrentTask>>>,
}

impl TaskRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clone of the task for `id`, `None` when no live task exists.
    #[must_use]
    pub fn get(&self, id: &TorrentId) -> Option<TorrentTask> {
        self.read().get(id).cloned()
    }

    /// Whether a live task exists for `id`.
    #[must_use]
    pub fn contains(&self, id: &TorrentId) -> bool {
        self.read().contains_key(id)
    }

    /// Identifiers of every live task, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<TorrentId> {
        let mut ids: Vec<_> = self.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of live tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether no task is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Clones of every live task, sorted by id.
    #[must_use]
    pub fn snapshot(&self) -> Vec<TorrentTask> {
        let mut tasks: Vec<_> = self.read().values().cloned().collect();
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        tasks
    }

    pub(crate) fn insert(&self, task: TorrentTask) -> Option<TorrentTask> {
        self.write().insert(task.id.clone(), task)
    }

    pub(crate) fn remove(&self, id: &TorrentId) -> Option<TorrentTask> {
        self.write().remove(id)
    }

    pub(crate) fn clear(&self) -> usize {
        let mut tasks = self.write();
        let count = tasks.len();
        tasks.clear();
        count
    }

    /// Apply `f` to the task for `id`; returns `None` when absent.
    pub(crate) fn update<R>(
        &self,
        id: &TorrentId,
        f: impl FnOnce(&mut TorrentTask) -> R,
    ) -> Option<R> {
        self.write().get_mut(id).map(f)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<TorrentId, TorrentTask>> {
        self.tasks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<TorrentId, TorrentTask>> {
        self.tasks.write().unwrap_or_else(PoisonError::into_inner)
    }
}
