//! In-process engine used by tests and headless runs.
//!
//! [`MemoryProbe`] shares the engine's state so callers can script alerts, failures and
//! progress. Resume data is a JSON blob carrying progress and the per-torrent options.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use rivulet_torrent_core::{
    IpFilter, MagnetInfo, NativeAlert, NativeSession, NativeTorrentStatus, Priority,
    SessionSettings, SessionStats, SpeedDirection, TorrentDescriptor, TorrentId, TorrentSource,
    TorrentStateCode, TrackerInfo, TrackerStatus, decode_metainfo,
};
use serde::{Deserialize, Serialize};

/// In-process engine that models torrent state without any networking.
///
/// Every instance shares its state with the [`MemoryProbe`] it was built from, so tests
/// can count native calls, inject failures, and drive downloads to completion.
pub struct MemorySession {
    probe: MemoryProbe,
}

impl MemorySession {
    /// Engine paired with a fresh probe.
    #[must_use]
    pub fn new() -> (Self, MemoryProbe) {
        let probe = MemoryProbe::default();
        (
            Self {
                probe: probe.clone(),
            },
            probe,
        )
    }

    fn call(&self, operation: &'static str) -> Result<MutexGuard<'_, EngineModel>> {
        let mut state = self.probe.lock();
        *state.calls.entry(operation).or_default() += 1;
        if let Some(message) = state.failures.get(operation) {
            bail!("{message}");
        }
        Ok(state)
    }
}

/// Handle onto the state behind a [`MemorySession`].
#[derive(Clone, Default)]
pub struct MemoryProbe {
    state: Arc<Mutex<EngineModel>>,
}

#[derive(Default)]
struct EngineModel {
    calls: HashMap<&'static str, usize>,
    failures: HashMap<&'static str, String>,
    started: bool,
    settings: SessionSettings,
    torrents: HashMap<TorrentId, NativeTorrentStatus>,
    magnets: HashSet<TorrentId>,
    fetches: HashSet<TorrentId>,
    metadata: HashMap<TorrentId, Vec<u8>>,
    ip_filter_rules: Option<usize>,
    alerts: Vec<NativeAlert>,
}

#[derive(Serialize, Deserialize)]
struct SavedState {
    listen_port: u16,
    torrents: usize,
}

#[derive(Serialize, Deserialize)]
struct ResumeBlob {
    progress_permille: u16,
    finished: bool,
    #[serde(default)]
    file_priorities: Vec<Priority>,
    #[serde(default)]
    sequential: bool,
    #[serde(default)]
    download_limit: i64,
    #[serde(default)]
    upload_limit: i64,
}

impl ResumeBlob {
    fn capture(status: &NativeTorrentStatus) -> Self {
        Self {
            progress_permille: status.progress_permille,
            finished: status.finished,
            file_priorities: status.file_priorities.clone(),
            sequential: status.sequential,
            download_limit: status.download_limit,
            upload_limit: status.upload_limit,
        }
    }

    fn restore_options(&self, status: &mut NativeTorrentStatus) {
        if !self.file_priorities.is_empty() {
            status.file_priorities.clone_from(&self.file_priorities);
        }
        status.sequential |= self.sequential;
        status.download_limit = self.download_limit;
        status.upload_limit = self.upload_limit;
    }
}

impl EngineModel {
    fn alert_state(&mut self, id: &TorrentId, current: TorrentStateCode) {
        let Some(status) = self.torrents.get_mut(id) else {
            return;
        };
        let previous = status.state;
        if previous == current {
            return;
        }
        status.state = current;
        self.alerts.push(NativeAlert::StateChanged {
            torrent_id: id.clone(),
            previous,
            current,
        });
    }

    fn deliver_metadata(&mut self, id: &TorrentId) {
        let Some(bencode) = self.metadata.get(id).cloned() else {
            return;
        };
        let is_torrent = self.magnets.remove(id);
        if !is_torrent && !self.fetches.remove(id) {
            return;
        }
        self.alerts.push(NativeAlert::MetadataReceived {
            info_hash: id.clone(),
            bencode: bencode.clone(),
        });
        if is_torrent {
            if let Ok(meta) = decode_metainfo(&bencode)
                && let Some(status) = self.torrents.get_mut(id)
            {
                status.total_bytes = meta.total_size;
                status.pieces = vec![false; meta.num_pieces];
                if status.file_priorities.is_empty() {
                    status.file_priorities = vec![Priority::Default; meta.files.len()];
                }
            }
            let paused = self.torrents.get(id).is_some_and(|status| status.paused);
            if !paused {
                self.alert_state(id, TorrentStateCode::Downloading);
            }
        }
    }

    fn torrent_mut(&mut self, id: &TorrentId) -> Result<&mut NativeTorrentStatus> {
        self.torrents
            .get_mut(id)
            .ok_or_else(|| anyhow!("unknown torrent {id}"))
    }
}

fn tracker(url: &str, tier: usize) -> TrackerInfo {
    TrackerInfo {
        url: url.to_string(),
        tier: u8::try_from(tier).unwrap_or(u8::MAX),
        status: TrackerStatus::NotContacted,
        message: None,
    }
}

impl MemoryProbe {
    fn lock(&self) -> MutexGuard<'_, EngineModel> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of times `operation` reached the engine.
    #[must_use]
    pub fn calls(&self, operation: &str) -> usize {
        self.lock().calls.get(operation).copied().unwrap_or(0)
    }

    /// Make every later `operation` call fail with `message`.
    pub fn fail(&self, operation: &'static str, message: impl Into<String>) {
        self.lock().failures.insert(operation, message.into());
    }

    /// Stop injecting failures into `operation`.
    pub fn recover(&self, operation: &str) {
        self.lock().failures.remove(operation);
    }

    /// Whether the engine is started.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.lock().started
    }

    /// Settings most recently pushed to the engine.
    #[must_use]
    pub fn settings(&self) -> SessionSettings {
        self.lock().settings.clone()
    }

    /// Torrents currently admitted, sorted.
    #[must_use]
    pub fn torrent_ids(&self) -> Vec<TorrentId> {
        let mut ids: Vec<_> = self.lock().torrents.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Native status of one torrent.
    #[must_use]
    pub fn status(&self, id: &TorrentId) -> Option<NativeTorrentStatus> {
        self.lock().torrents.get(id).cloned()
    }

    /// Rules in the installed IP filter, `None` when no filter is set.
    #[must_use]
    pub fn ip_filter_rules(&self) -> Option<usize> {
        self.lock().ip_filter_rules
    }

    /// Make metadata for `info_hash` available; pending fetches and magnet torrents
    /// receive it on the next alert poll.
    pub fn provide_metadata(&self, info_hash: &TorrentId, bencode: Vec<u8>) {
        let mut state = self.lock();
        state.metadata.insert(info_hash.clone(), bencode);
        state.deliver_metadata(info_hash);
    }

    /// Finish the download of `id`.
    pub fn complete(&self, id: &TorrentId) {
        let mut state = self.lock();
        let Some(status) = state.torrents.get_mut(id) else {
            return;
        };
        status.finished = true;
        status.progress_permille = 1000;
        status.received_bytes = status.total_bytes;
        status.pieces.iter_mut().for_each(|piece| *piece = true);
        status.download_speed = 0;
        status.eta_secs = 0;
        let paused = status.paused;
        if !paused {
            state.alert_state(id, TorrentStateCode::Seeding);
        }
        state.alerts.push(NativeAlert::TorrentFinished {
            torrent_id: id.clone(),
        });
    }

    /// Raise a torrent-scoped error such as a failed disk write.
    pub fn raise_error(&self, id: &TorrentId, message: impl Into<String>) {
        let message = message.into();
        let mut state = self.lock();
        if let Some(status) = state.torrents.get_mut(id) {
            status.error = Some(message.clone());
            state.alerts.push(NativeAlert::TorrentError {
                torrent_id: id.clone(),
                message,
            });
        }
    }

    /// Mutate the status of `id` without raising alerts.
    pub fn update_status(&self, id: &TorrentId, f: impl FnOnce(&mut NativeTorrentStatus)) {
        if let Some(status) = self.lock().torrents.get_mut(id) {
            f(status);
        }
    }

    /// Queue an arbitrary alert for the next poll.
    pub fn push_alert(&self, alert: NativeAlert) {
        self.lock().alerts.push(alert);
    }
}

#[async_trait]
impl NativeSession for MemorySession {
    async fn start(
        &mut self,
        settings: &SessionSettings,
        saved_state: Option<&[u8]>,
    ) -> Result<()> {
        let mut state = self.call("start")?;
        if let Some(bytes) = saved_state {
            let _: SavedState = serde_json::from_slice(bytes)?;
        }
        state.started = true;
        state.settings = settings.clone();
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        let mut state = self.call("stop")?;
        state.started = false;
        state.torrents.clear();
        state.magnets.clear();
        state.fetches.clear();
        state.alerts.clear();
        state.ip_filter_rules = None;
        Ok(())
    }

    async fn save_state(&mut self) -> Result<Vec<u8>> {
        let state = self.call("save_state")?;
        let saved = SavedState {
            listen_port: state.settings.port_range_first,
            torrents: state.torrents.len(),
        };
        Ok(serde_json::to_vec(&saved)?)
    }

    async fn apply_settings(&mut self, settings: &SessionSettings) -> Result<()> {
        let mut state = self.call("apply_settings")?;
        state.settings = settings.clone();
        Ok(())
    }

    async fn add_torrent(&mut self, descriptor: &TorrentDescriptor) -> Result<()> {
        let mut state = self.call("add_torrent")?;
        if !state.started {
            bail!("session not started");
        }
        let id = descriptor.torrent_id.clone();
        if state.torrents.contains_key(&id) {
            bail!("torrent {id} already present");
        }
        let mut status = NativeTorrentStatus {
            paused: descriptor.paused,
            eta_secs: -1,
            sequential: descriptor.sequential,
            file_priorities: descriptor.file_priorities.clone(),
            save_path: descriptor.download_path.clone(),
            ..NativeTorrentStatus::default()
        };
        let resume = descriptor
            .fast_resume
            .as_deref()
            .and_then(|bytes| serde_json::from_slice::<ResumeBlob>(bytes).ok());
        if let Some(resume) = &resume {
            resume.restore_options(&mut status);
        }
        let running_state = match &descriptor.source {
            TorrentSource::Metainfo { bytes } => {
                let meta = decode_metainfo(bytes)?;
                status.total_bytes = meta.total_size;
                status.pieces = vec![false; meta.num_pieces];
                status.trackers = meta
                    .trackers
                    .iter()
                    .enumerate()
                    .map(|(tier, url)| tracker(url, tier))
                    .collect();
                if let Some(resume) = &resume {
                    status.progress_permille = resume.progress_permille;
                    status.finished = resume.finished;
                }
                if status.finished {
                    status.received_bytes = status.total_bytes;
                    status.pieces.iter_mut().for_each(|piece| *piece = true);
                    TorrentStateCode::Seeding
                } else {
                    TorrentStateCode::Downloading
                }
            }
            TorrentSource::Magnet { .. } => {
                state.magnets.insert(id.clone());
                TorrentStateCode::DownloadingMetadata
            }
        };
        let current = if descriptor.paused {
            TorrentStateCode::Paused
        } else {
            running_state
        };
        state.torrents.insert(id.clone(), status);
        state.alert_state(&id, current);
        state.deliver_metadata(&id);
        Ok(())
    }

    async fn remove_torrent(&mut self, id: &TorrentId, _with_files: bool) -> Result<()> {
        let mut state = self.call("remove_torrent")?;
        if state.torrents.remove(id).is_none() {
            bail!("unknown torrent {id}");
        }
        state.magnets.remove(id);
        state.alerts.push(NativeAlert::TorrentRemoved {
            torrent_id: id.clone(),
        });
        Ok(())
    }

    async fn pause_torrent(&mut self, id: &TorrentId) -> Result<()> {
        let mut state = self.call("pause_torrent")?;
        let status = state.torrent_mut(id)?;
        if status.paused {
            return Ok(());
        }
        status.paused = true;
        status.download_speed = 0;
        status.upload_speed = 0;
        state.alert_state(id, TorrentStateCode::Paused);
        state.alerts.push(NativeAlert::TorrentPaused {
            torrent_id: id.clone(),
        });
        Ok(())
    }

    async fn resume_torrent(&mut self, id: &TorrentId) -> Result<()> {
        let mut state = self.call("resume_torrent")?;
        let awaiting_metadata = state.magnets.contains(id);
        let status = state.torrent_mut(id)?;
        if !status.paused {
            return Ok(());
        }
        status.paused = false;
        let next = if awaiting_metadata {
            TorrentStateCode::DownloadingMetadata
        } else if status.finished {
            TorrentStateCode::Seeding
        } else {
            TorrentStateCode::Downloading
        };
        state.alert_state(id, next);
        state.alerts.push(NativeAlert::TorrentResumed {
            torrent_id: id.clone(),
        });
        Ok(())
    }

    async fn set_sequential(&mut self, id: &TorrentId, sequential: bool) -> Result<()> {
        let mut state = self.call("set_sequential")?;
        state.torrent_mut(id)?.sequential = sequential;
        Ok(())
    }

    async fn prioritize_files(&mut self, id: &TorrentId, priorities: &[Priority]) -> Result<()> {
        let mut state = self.call("prioritize_files")?;
        state.torrent_mut(id)?.file_priorities = priorities.to_vec();
        Ok(())
    }

    async fn set_rate_limit(
        &mut self,
        id: &TorrentId,
        direction: SpeedDirection,
        limit: i64,
    ) -> Result<()> {
        let mut state = self.call("set_rate_limit")?;
        let status = state.torrent_mut(id)?;
        let limit = limit.max(0);
        match direction {
            SpeedDirection::Download => status.download_limit = limit,
            SpeedDirection::Upload => status.upload_limit = limit,
        }
        Ok(())
    }

    async fn replace_trackers(&mut self, id: &TorrentId, urls: &[String]) -> Result<()> {
        let mut state = self.call("replace_trackers")?;
        state.torrent_mut(id)?.trackers = urls
            .iter()
            .enumerate()
            .map(|(tier, url)| tracker(url, tier))
            .collect();
        Ok(())
    }

    async fn add_trackers(&mut self, id: &TorrentId, urls: &[String]) -> Result<()> {
        let mut state = self.call("add_trackers")?;
        let status = state.torrent_mut(id)?;
        for url in urls {
            if !status.trackers.iter().any(|existing| &existing.url == url) {
                let tier = status.trackers.len();
                status.trackers.push(tracker(url, tier));
            }
        }
        Ok(())
    }

    async fn force_recheck(&mut self, id: &TorrentId) -> Result<()> {
        let mut state = self.call("force_recheck")?;
        let previous = state.torrent_mut(id)?.state;
        state.alert_state(id, TorrentStateCode::Checking);
        state.alert_state(id, previous);
        Ok(())
    }

    async fn force_announce(&mut self, id: &TorrentId) -> Result<()> {
        let mut state = self.call("force_announce")?;
        for tracker in &mut state.torrent_mut(id)?.trackers {
            tracker.status = TrackerStatus::Working;
        }
        Ok(())
    }

    async fn move_storage(&mut self, id: &TorrentId, target: &Path) -> Result<()> {
        let mut state = self.call("move_storage")?;
        state.torrent_mut(id)?.save_path = target.to_path_buf();
        state.alerts.push(NativeAlert::StorageMoved {
            torrent_id: id.clone(),
            success: true,
        });
        Ok(())
    }

    async fn save_resume_data(&mut self, id: &TorrentId) -> Result<Option<Vec<u8>>> {
        let mut state = self.call("save_resume_data")?;
        let blob = ResumeBlob::capture(state.torrent_mut(id)?);
        Ok(Some(serde_json::to_vec(&blob)?))
    }

    async fn fetch_magnet(&mut self, magnet: &MagnetInfo) -> Result<()> {
        let mut state = self.call("fetch_magnet")?;
        if !state.started {
            bail!("session not started");
        }
        state.fetches.insert(magnet.info_hash.clone());
        state.deliver_metadata(&magnet.info_hash);
        Ok(())
    }

    async fn cancel_fetch(&mut self, info_hash: &TorrentId) -> Result<()> {
        let mut state = self.call("cancel_fetch")?;
        state.fetches.remove(info_hash);
        Ok(())
    }

    async fn set_ip_filter(&mut self, filter: &IpFilter) -> Result<()> {
        let mut state = self.call("set_ip_filter")?;
        state.ip_filter_rules = Some(filter.len());
        Ok(())
    }

    async fn clear_ip_filter(&mut self) -> Result<()> {
        let mut state = self.call("clear_ip_filter")?;
        state.ip_filter_rules = None;
        Ok(())
    }

    async fn torrent_status(&mut self, id: &TorrentId) -> Result<Option<NativeTorrentStatus>> {
        let state = self.call("torrent_status")?;
        Ok(state.torrents.get(id).cloned())
    }

    async fn session_stats(&mut self) -> Result<SessionStats> {
        let state = self.call("session_stats")?;
        let (download_speed, upload_speed, total_download, total_upload) = state
            .torrents
            .values()
            .fold((0, 0, 0, 0), |(down, up, received, sent), status| {
                (
                    down + status.download_speed,
                    up + status.upload_speed,
                    received + status.received_bytes,
                    sent + status.uploaded_bytes,
                )
            });
        Ok(SessionStats {
            dht_nodes: 0,
            total_download,
            total_upload,
            download_speed,
            upload_speed,
            listen_port: if state.started {
                state.settings.port_range_first
            } else {
                0
            },
        })
    }

    async fn poll_alerts(&mut self) -> Result<Vec<NativeAlert>> {
        let mut state = self.call("poll_alerts")?;
        Ok(std::mem::take(&mut state.alerts))
    }
}
