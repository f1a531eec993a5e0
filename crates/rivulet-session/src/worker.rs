//! The session worker: sole owner of the native session.
//!
//! Layout: command dispatch, lifecycle (start/stop/restore), torrent commands, settings
//! and policy, alert translation, and the background services it starts with the engine.
//!
//! # Design
//! - Commands are handled one at a time, so no native call overlaps another.
//! - On stop the lifecycle leaves `Running` before resume data is saved and the registry
//!   is cleared.
//! - Services (directory watch, streaming listener) follow the policy only while running.
#![allow(clippy::redundant_pub_crate)]

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use rivulet_events::Event;
use rivulet_torrent_core::{
    AddTorrentParams, IpFilter, MagnetInfo, NativeAlert, NativeSession, NativeTorrentStatus,
    PolicySignal, Priority, SessionSettings, SessionStats, SettingKey, SpeedDirection, Torrent,
    TorrentDescriptor, TorrentError, TorrentId, TorrentMetaInfo, TorrentResult, TorrentSource,
    decode_metainfo, make_magnet, should_pause_torrents,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::command::{MetadataReceiver, Reply, SessionCommand};
use crate::coordinator::{Shared, WeakCoordinator};
use crate::registry::{ManualOverride, TorrentTask};
use crate::settings::{SettingHandler, SettingsDispatch};
use crate::stream::StreamService;
use crate::watch::WatchService;

type MetadataWaiter = oneshot::Sender<TorrentResult<TorrentMetaInfo>>;

pub(crate) fn spawn(
    coordinator: WeakCoordinator,
    mut commands: mpsc::Receiver<SessionCommand>,
    signals: broadcast::Receiver<PolicySignal>,
    session: Box<dyn NativeSession>,
) {
    tokio::spawn(async move {
        let config = coordinator.shared().config.clone();
        let mut worker = Worker::new(coordinator, session);
        let mut signals = Some(signals);
        let mut alerts = tokio::time::interval(config.alert_poll_interval);
        alerts.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut status = tokio::time::interval_at(
            Instant::now() + config.status_interval,
            config.status_interval,
        );
        status.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(command) => worker.handle(command).await,
                        None => break,
                    }
                }
                signal = next_signal(&mut signals) => {
                    match signal {
                        Ok(signal) => worker.on_policy_signal(signal).await,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "policy signals lagged; resynchronising");
                            worker.resync_policy().await;
                        }
                        Err(RecvError::Closed) => {
                            debug!("policy source closed");
                            signals = None;
                        }
                    }
                }
                _ = alerts.tick() => worker.flush_alerts().await,
                _ = status.tick() => worker.refresh_status().await,
            }
        }
        worker.stop(true).await;
        debug!("session worker exited");
    });
}

async fn next_signal(
    signals: &mut Option<broadcast::Receiver<PolicySignal>>,
) -> Result<PolicySignal, RecvError> {
    match signals {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn reply<T>(respond_to: Reply<T>, result: TorrentResult<T>) {
    if respond_to.send(result).is_err() {
        debug!("command caller went away before the reply");
    }
}

fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut tags: Vec<String> = tags
        .iter()
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect();
    tags.sort();
    tags.dedup();
    tags
}

struct Worker {
    coordinator: WeakCoordinator,
    shared: Arc<Shared>,
    session: Box<dyn NativeSession>,
    dispatch: SettingsDispatch,
    fetches: HashMap<TorrentId, Vec<MetadataWaiter>>,
    watch: Option<WatchService>,
    stream: Option<StreamService>,
    health: BTreeSet<String>,
    last_stats: Option<SessionStats>,
    listener_failures_seen: u64,
}

impl Worker {
    fn new(coordinator: WeakCoordinator, session: Box<dyn NativeSession>) -> Self {
        let shared = Arc::clone(coordinator.shared());
        Self {
            coordinator,
            shared,
            session,
            dispatch: SettingsDispatch::standard(),
            fetches: HashMap::new(),
            watch: None,
            stream: None,
            health: BTreeSet::new(),
            last_stats: None,
            listener_failures_seen: 0,
        }
    }

    async fn handle(&mut self, command: SessionCommand) {
        let label = command.label();
        debug!(command = label, "handling session command");
        if let Some(metrics) = &self.shared.metrics {
            metrics.inc_command(label);
        }
        match command {
            SessionCommand::Start => self.start().await,
            SessionCommand::Stop { force } => self.stop(force).await,
            SessionCommand::AddTorrent { params, respond_to } => {
                reply(respond_to, self.add_torrent(*params).await);
            }
            SessionCommand::DeleteTorrents {
                ids,
                with_files,
                respond_to,
            } => reply(respond_to, self.delete_torrents(ids, with_files).await),
            SessionCommand::PauseResume { id, respond_to } => {
                reply(respond_to, self.pause_resume(&id).await);
            }
            SessionCommand::PauseAll { respond_to } => {
                reply(respond_to, self.set_all_paused(true).await);
            }
            SessionCommand::ResumeAll { respond_to } => {
                reply(respond_to, self.set_all_paused(false).await);
            }
            SessionCommand::ForceRecheck { ids, respond_to } => {
                reply(respond_to, self.force_recheck(&ids).await);
            }
            SessionCommand::ForceAnnounce { ids, respond_to } => {
                reply(respond_to, self.force_announce(&ids).await);
            }
            SessionCommand::SetSequential {
                id,
                sequential,
                respond_to,
            } => reply(respond_to, self.set_sequential(&id, sequential).await),
            SessionCommand::PrioritizeFiles {
                id,
                priorities,
                respond_to,
            } => reply(respond_to, self.prioritize_files(&id, &priorities).await),
            SessionCommand::SetSpeedLimit {
                id,
                direction,
                limit,
                respond_to,
            } => reply(respond_to, self.set_speed_limit(&id, direction, limit).await),
            SessionCommand::ReplaceTrackers {
                id,
                urls,
                respond_to,
            } => reply(respond_to, self.replace_trackers(&id, &urls).await),
            SessionCommand::AddTrackers {
                id,
                urls,
                respond_to,
            } => reply(respond_to, self.add_trackers(&id, &urls).await),
            SessionCommand::DeleteTrackers {
                id,
                urls,
                respond_to,
            } => reply(respond_to, self.delete_trackers(&id, &urls).await),
            SessionCommand::SetTorrentName {
                id,
                name,
                respond_to,
            } => reply(respond_to, self.set_torrent_name(&id, name)),
            SessionCommand::SetDownloadPath {
                ids,
                path,
                respond_to,
            } => reply(respond_to, self.set_download_path(&ids, &path).await),
            SessionCommand::SetTags {
                id,
                tags,
                respond_to,
            } => reply(respond_to, self.set_tags(&id, &tags)),
            SessionCommand::Reschedule { respond_to } => {
                self.reschedule().await;
                reply(respond_to, Ok(()));
            }
            SessionCommand::ApplySettings {
                settings,
                respond_to,
            } => reply(respond_to, self.apply_settings(*settings).await),
            SessionCommand::FetchMagnet { magnet, respond_to } => {
                reply(respond_to, self.fetch_magnet(&magnet).await);
            }
            SessionCommand::CancelFetch {
                info_hash,
                respond_to,
            } => {
                self.cancel_fetch(&info_hash).await;
                reply(respond_to, Ok(()));
            }
        }
        self.flush_alerts().await;
    }

    fn emit(&self, event: Event) {
        if let Some(metrics) = &self.shared.metrics {
            metrics.inc_event(event.kind());
        }
        let _ = self.shared.events.dispatch(event);
    }

    fn running(&self) -> bool {
        self.shared.lifecycle.is_running()
    }

    fn should_pause(&self) -> bool {
        let policy = &self.shared.policy;
        should_pause_torrents(&policy.policy(), policy.network(), policy.battery())
    }

    fn sync_active_torrents(&self) {
        if let Some(metrics) = &self.shared.metrics {
            metrics.set_active_torrents(self.shared.registry.len());
        }
    }

    // Lifecycle.

    async fn start(&mut self) {
        if !self.shared.lifecycle.begin_start() {
            debug!(state = %self.shared.lifecycle.state(), "start ignored");
            return;
        }
        let saved_state = match self.shared.repository.load_session_state() {
            Ok(state) => state,
            Err(err) => {
                warn!(error = %err, "failed to load saved session state");
                None
            }
        };
        let settings = self.shared.settings.load();
        if let Err(err) = self.session.start(&settings, saved_state.as_deref()).await {
            warn!(error = %err, "native session failed to start");
            self.shared.lifecycle.abort_start();
            self.emit(Event::SessionError {
                message: format!("{err:#}"),
            });
            return;
        }
        self.shared.lifecycle.finish_start();
        if let Some(metrics) = &self.shared.metrics {
            metrics.set_engine_running(true);
        }
        self.emit(Event::SessionStarted);

        if self.shared.policy.policy().ip_filtering {
            self.load_ip_filter().await;
        }
        self.sync_watch_service();
        self.sync_stream_service().await;
        self.restore_torrents().await;
    }

    async fn stop(&mut self, force: bool) {
        if !self.running() {
            debug!(state = %self.shared.lifecycle.state(), "stop ignored");
            return;
        }
        if !force && self.shared.policy.policy().keep_alive {
            debug!("stop request ignored while keep-alive is set");
            return;
        }
        self.shared.lifecycle.begin_stop();
        self.stop_services();
        self.save_resume_data().await;
        self.shared.registry.clear();
        self.sync_active_torrents();
        for (info_hash, waiters) in self.fetches.drain() {
            for waiter in waiters {
                let _ = waiter.send(Err(TorrentError::FetchCancelled {
                    info_hash: info_hash.clone(),
                }));
            }
        }

        if let Err(err) = self.session.stop().await {
            warn!(error = %err, "native session failed to stop cleanly");
            self.emit(Event::SessionError {
                message: format!("{err:#}"),
            });
        }
        if let Err(err) = self.shared.fs.clean_temp() {
            warn!(error = %err, "failed to purge temp directory");
        }
        self.last_stats = None;
        self.shared.lifecycle.finish_stop();
        if let Some(metrics) = &self.shared.metrics {
            metrics.set_engine_running(false);
        }
        self.emit(Event::SessionStopped);
    }

    async fn save_resume_data(&mut self) {
        for id in self.shared.registry.ids() {
            match self.session.save_resume_data(&id).await {
                Ok(Some(blob)) => {
                    if let Err(err) = self.shared.repository.add_fast_resume(&id, &blob) {
                        warn!(torrent_id = %id, error = %err, "failed to persist fast-resume data");
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(torrent_id = %id, error = %err, "engine could not produce fast-resume data");
                }
            }
        }
        match self.session.save_state().await {
            Ok(state) => {
                if let Err(err) = self.shared.repository.save_session_state(&state) {
                    warn!(error = %err, "failed to persist session state");
                }
            }
            Err(err) => warn!(error = %err, "engine could not produce session state"),
        }
    }

    async fn restore_torrents(&mut self) {
        let records = match self.shared.repository.get_all_torrents() {
            Ok(records) => records,
            Err(err) => {
                warn!(error = %err, "failed to list torrents to restore");
                self.emit(Event::SessionError {
                    message: format!("{err:#}"),
                });
                return;
            }
        };
        let pause = self.should_pause();
        for mut record in records {
            let id = record.id.clone();
            match self.restore_one(&record, pause).await {
                Ok(task) => {
                    self.shared.registry.insert(task);
                    if record.error.take().is_some() {
                        self.persist_record(&record);
                    }
                    self.emit(Event::TorrentLoaded { torrent_id: id });
                }
                Err(err) => {
                    warn!(torrent_id = %id, error = %err, "failed to restore torrent");
                    record.error = Some(format!("{err:#}"));
                    self.persist_record(&record);
                    self.emit(Event::RestoreSessionError { torrent_id: id });
                }
            }
        }
        self.sync_active_torrents();
        info!(torrents = self.shared.registry.len(), "restored torrents");
    }

    async fn restore_one(&mut self, record: &Torrent, pause: bool) -> anyhow::Result<TorrentTask> {
        let source = if record.downloading_metadata {
            TorrentSource::Magnet {
                uri: make_magnet(&record.id, &record.name, &[], None),
            }
        } else {
            let path = self.shared.metainfo_path(&record.id);
            TorrentSource::Metainfo {
                bytes: self.shared.fs.read_file(&path)?,
            }
        };
        let fast_resume = self.shared.repository.get_fast_resume_by_id(&record.id)?;
        let descriptor = TorrentDescriptor {
            torrent_id: record.id.clone(),
            name: record.name.clone(),
            source,
            download_path: record.download_path.clone(),
            file_priorities: Vec::new(),
            sequential: false,
            paused: record.manually_paused || pause,
            fast_resume,
        };
        self.session.add_torrent(&descriptor).await?;
        let tags = self.shared.repository.tags_for(&record.id).unwrap_or_default();
        let mut task = TorrentTask::from_record(record, tags);
        task.error = None;
        if let Some(status) = self.status_of(&record.id).await {
            task.status = status;
        }
        Ok(task)
    }

    // Torrent admission and removal.

    async fn add_torrent(&mut self, params: AddTorrentParams) -> TorrentResult<Torrent> {
        if !self.running() {
            return Err(TorrentError::EngineNotRunning);
        }
        let id = params.torrent_id.clone();
        if self.shared.registry.contains(&id) || self.record(&id)?.is_some() {
            return Err(TorrentError::TorrentAlreadyExists { torrent_id: id });
        }

        let metainfo_path = self.shared.metainfo_path(&id);
        if let TorrentSource::Metainfo { bytes } = &params.source {
            self.shared
                .fs
                .write_file(&metainfo_path, bytes)
                .map_err(|err| TorrentError::io("write_metainfo", Some(metainfo_path), err))?;
        }
        let torrent = Torrent::from_params(&params);
        if let Err(err) = self.shared.repository.add_torrent(&torrent) {
            self.discard_metainfo(&id);
            return Err(TorrentError::io("add_torrent_record", None, err));
        }
        let tags = normalize_tags(&params.tags);
        if !tags.is_empty()
            && let Err(err) = self.shared.repository.set_tags(&id, &tags)
        {
            warn!(torrent_id = %id, error = %err, "failed to persist torrent tags");
        }

        let descriptor = TorrentDescriptor {
            torrent_id: id.clone(),
            name: params.name.clone(),
            source: params.source.clone(),
            download_path: params.download_path.clone(),
            file_priorities: params.file_priorities.clone(),
            sequential: params.sequential_download,
            paused: params.add_paused || self.should_pause(),
            fast_resume: None,
        };
        if let Err(err) = self.session.add_torrent(&descriptor).await {
            if let Err(rollback) = self.shared.repository.delete_torrent(&id) {
                warn!(torrent_id = %id, error = %rollback, "failed to roll back torrent record");
            }
            self.discard_metainfo(&id);
            return Err(TorrentError::session("add_torrent", &err));
        }

        let mut task = TorrentTask::from_record(&torrent, tags);
        if let Some(status) = self.status_of(&id).await {
            task.status = status;
        }
        self.shared.registry.insert(task);
        self.sync_active_torrents();
        info!(torrent_id = %id, name = %torrent.name, "torrent added");
        self.emit(Event::TorrentAdded { torrent_id: id });
        Ok(torrent)
    }

    async fn delete_torrents(&mut self, ids: Vec<TorrentId>, with_files: bool) -> TorrentResult<()> {
        for id in ids {
            let live = self.shared.registry.contains(&id);
            if live && self.running() {
                self.session
                    .remove_torrent(&id, with_files)
                    .await
                    .map_err(|err| TorrentError::session("remove_torrent", &err))?;
            }
            let removed = self.shared.registry.remove(&id).is_some();
            let recorded = self.record(&id)?.is_some();
            if recorded {
                self.shared
                    .repository
                    .delete_torrent(&id)
                    .map_err(|err| TorrentError::io("delete_torrent_record", None, err))?;
            }
            self.discard_metainfo(&id);
            if removed || recorded {
                info!(torrent_id = %id, with_files, "torrent removed");
                self.emit(Event::TorrentRemoved { torrent_id: id });
            }
        }
        self.sync_active_torrents();
        Ok(())
    }

    fn discard_metainfo(&self, id: &TorrentId) {
        let path = self.shared.metainfo_path(id);
        if let Err(err) = self.shared.fs.delete_file(&path) {
            warn!(torrent_id = %id, error = %err, "failed to remove stored metainfo");
        }
    }

    fn record(&self, id: &TorrentId) -> TorrentResult<Option<Torrent>> {
        self.shared
            .repository
            .get_torrent_by_id(id)
            .map_err(|err| TorrentError::io("get_torrent_record", None, err))
    }

    fn update_record(
        &self,
        id: &TorrentId,
        apply: impl FnOnce(&mut Torrent),
    ) -> TorrentResult<()> {
        if let Some(mut record) = self.record(id)? {
            apply(&mut record);
            self.shared
                .repository
                .update_torrent(&record)
                .map_err(|err| TorrentError::io("update_torrent_record", None, err))?;
        }
        Ok(())
    }

    fn persist_record(&self, record: &Torrent) {
        if let Err(err) = self.shared.repository.update_torrent(record) {
            warn!(torrent_id = %record.id, error = %err, "failed to update torrent record");
        }
    }

    // Scheduling.

    async fn pause_resume(&mut self, id: &TorrentId) -> TorrentResult<()> {
        let Some(task) = self.shared.registry.get(id) else {
            return Ok(());
        };
        let pause = !task.is_paused();
        let manual = if pause {
            ManualOverride::Paused
        } else {
            ManualOverride::Resumed
        };
        self.set_paused(id, pause, Some(manual)).await
    }

    async fn set_all_paused(&mut self, pause: bool) -> TorrentResult<()> {
        let manual = if pause {
            ManualOverride::Paused
        } else {
            ManualOverride::Resumed
        };
        for id in self.shared.registry.ids() {
            self.set_paused(&id, pause, Some(manual)).await?;
        }
        Ok(())
    }

    async fn set_paused(
        &mut self,
        id: &TorrentId,
        pause: bool,
        manual: Option<ManualOverride>,
    ) -> TorrentResult<()> {
        let Some(task) = self.shared.registry.get(id) else {
            return Ok(());
        };
        if task.is_paused() != pause {
            let result = if pause {
                self.session.pause_torrent(id).await
            } else {
                self.session.resume_torrent(id).await
            };
            result.map_err(|err| {
                TorrentError::session(if pause { "pause_torrent" } else { "resume_torrent" }, &err)
            })?;
        }
        self.shared.registry.update(id, |task| {
            task.status.paused = pause;
            if let Some(manual) = manual {
                task.manual = manual;
            }
        });
        if let Some(manual) = manual {
            let manually_paused = manual == ManualOverride::Paused;
            self.update_record(id, |record| record.manually_paused = manually_paused)?;
        }
        Ok(())
    }

    async fn reschedule(&mut self) {
        if !self.running() {
            return;
        }
        let pause = self.should_pause();
        debug!(pause, "rescheduling torrents");
        for task in self.shared.registry.snapshot() {
            let change = if pause {
                task.manual != ManualOverride::Resumed && !task.is_paused()
            } else {
                task.manual != ManualOverride::Paused && task.is_paused()
            };
            if change && let Err(err) = self.set_paused(&task.id, pause, None).await {
                warn!(torrent_id = %task.id, error = %err, "failed to reschedule torrent");
            }
        }
    }

    // Per-torrent engine calls. Unknown ids are no-ops.

    async fn force_recheck(&mut self, ids: &[TorrentId]) -> TorrentResult<()> {
        for id in ids {
            if self.shared.registry.contains(id) {
                self.session
                    .force_recheck(id)
                    .await
                    .map_err(|err| TorrentError::session("force_recheck", &err))?;
            }
        }
        Ok(())
    }

    async fn force_announce(&mut self, ids: &[TorrentId]) -> TorrentResult<()> {
        for id in ids {
            if self.shared.registry.contains(id) {
                self.session
                    .force_announce(id)
                    .await
                    .map_err(|err| TorrentError::session("force_announce", &err))?;
            }
        }
        Ok(())
    }

    async fn set_sequential(&mut self, id: &TorrentId, sequential: bool) -> TorrentResult<()> {
        if !self.shared.registry.contains(id) {
            return Ok(());
        }
        self.session
            .set_sequential(id, sequential)
            .await
            .map_err(|err| TorrentError::session("set_sequential", &err))?;
        self.shared
            .registry
            .update(id, |task| task.status.sequential = sequential);
        Ok(())
    }

    async fn prioritize_files(&mut self, id: &TorrentId, priorities: &[Priority]) -> TorrentResult<()> {
        if !self.shared.registry.contains(id) {
            return Ok(());
        }
        self.session
            .prioritize_files(id, priorities)
            .await
            .map_err(|err| TorrentError::session("prioritize_files", &err))?;
        self.shared
            .registry
            .update(id, |task| task.status.file_priorities = priorities.to_vec());
        Ok(())
    }

    async fn set_speed_limit(
        &mut self,
        id: &TorrentId,
        direction: SpeedDirection,
        limit: i64,
    ) -> TorrentResult<()> {
        if !self.shared.registry.contains(id) {
            return Ok(());
        }
        let limit = limit.max(0);
        self.session
            .set_rate_limit(id, direction, limit)
            .await
            .map_err(|err| TorrentError::session("set_rate_limit", &err))?;
        self.shared.registry.update(id, |task| match direction {
            SpeedDirection::Download => task.status.download_limit = limit,
            SpeedDirection::Upload => task.status.upload_limit = limit,
        });
        Ok(())
    }

    async fn replace_trackers(&mut self, id: &TorrentId, urls: &[String]) -> TorrentResult<()> {
        if !self.shared.registry.contains(id) {
            return Ok(());
        }
        self.session
            .replace_trackers(id, urls)
            .await
            .map_err(|err| TorrentError::session("replace_trackers", &err))?;
        self.refresh_task(id).await;
        Ok(())
    }

    async fn add_trackers(&mut self, id: &TorrentId, urls: &[String]) -> TorrentResult<()> {
        if !self.shared.registry.contains(id) {
            return Ok(());
        }
        self.session
            .add_trackers(id, urls)
            .await
            .map_err(|err| TorrentError::session("add_trackers", &err))?;
        self.refresh_task(id).await;
        Ok(())
    }

    async fn delete_trackers(&mut self, id: &TorrentId, urls: &[String]) -> TorrentResult<()> {
        let Some(task) = self.shared.registry.get(id) else {
            return Ok(());
        };
        let remaining: Vec<String> = task
            .status
            .trackers
            .into_iter()
            .map(|tracker| tracker.url)
            .filter(|url| !urls.contains(url))
            .collect();
        self.replace_trackers(id, &remaining).await
    }

    fn set_torrent_name(&self, id: &TorrentId, name: String) -> TorrentResult<()> {
        if !self.shared.registry.contains(id) {
            return Ok(());
        }
        self.update_record(id, |record| record.name.clone_from(&name))?;
        self.shared.registry.update(id, |task| task.name = name);
        Ok(())
    }

    async fn set_download_path(
        &mut self,
        ids: &[TorrentId],
        path: &std::path::Path,
    ) -> TorrentResult<()> {
        for id in ids {
            if !self.shared.registry.contains(id) {
                continue;
            }
            self.emit(Event::TorrentMoving {
                torrent_id: id.clone(),
            });
            if let Err(err) = self.session.move_storage(id, path).await {
                self.emit(Event::TorrentMoved {
                    torrent_id: id.clone(),
                    success: false,
                });
                return Err(TorrentError::session("move_storage", &err));
            }
            self.shared
                .registry
                .update(id, |task| task.pending_move = Some(path.to_path_buf()));
        }
        Ok(())
    }

    fn set_tags(&self, id: &TorrentId, tags: &[String]) -> TorrentResult<()> {
        let tags = normalize_tags(tags);
        if self.record(id)?.is_some() {
            self.shared
                .repository
                .set_tags(id, &tags)
                .map_err(|err| TorrentError::io("set_tags", None, err))?;
        }
        self.shared.registry.update(id, |task| task.tags = tags);
        Ok(())
    }

    // Settings and policy.

    async fn apply_settings(&mut self, settings: SessionSettings) -> TorrentResult<()> {
        if *self.shared.settings.load() == settings {
            return Ok(());
        }
        let running = self.running();
        if running {
            self.session
                .apply_settings(&settings)
                .await
                .map_err(|err| TorrentError::session("apply_settings", &err))?;
        }
        self.shared.settings.store(settings);
        if running {
            info!("session settings applied");
            self.emit(Event::SessionSettingsApplied);
        }
        Ok(())
    }

    async fn on_policy_signal(&mut self, signal: PolicySignal) {
        match signal {
            PolicySignal::NetworkChanged(_) | PolicySignal::BatteryChanged(_) => {
                self.reschedule().await;
            }
            PolicySignal::SettingChanged(key) => self.on_setting_changed(key).await,
        }
        self.flush_alerts().await;
    }

    async fn on_setting_changed(&mut self, key: SettingKey) {
        match self.dispatch.handler(key) {
            SettingHandler::Reschedule => self.reschedule().await,
            SettingHandler::Patch(patch) => {
                let source = self.shared.policy.session_settings();
                let mut next = SessionSettings::clone(&self.shared.settings.load());
                patch(&mut next, &source);
                self.apply_background_settings(next).await;
            }
            SettingHandler::IpFilter => {
                if self.running() {
                    self.load_ip_filter().await;
                }
            }
            SettingHandler::WatchDirectory => {
                if self.running() {
                    self.sync_watch_service();
                }
            }
            SettingHandler::StreamingListener => {
                if self.running() {
                    self.sync_stream_service().await;
                }
            }
            SettingHandler::Ignore => debug!(?key, "setting change needs no action"),
        }
    }

    async fn resync_policy(&mut self) {
        let settings = self.shared.policy.session_settings();
        self.apply_background_settings(settings).await;
        if self.running() {
            self.load_ip_filter().await;
            self.sync_watch_service();
            self.sync_stream_service().await;
        }
        self.reschedule().await;
    }

    async fn apply_background_settings(&mut self, settings: SessionSettings) {
        if let Err(err) = self.apply_settings(settings).await {
            warn!(error = %err, "failed to apply changed session settings");
            self.emit(Event::SessionError {
                message: format!("{err:?}"),
            });
        }
    }

    async fn load_ip_filter(&mut self) {
        let policy = self.shared.policy.policy();
        if !policy.ip_filtering {
            if let Err(err) = self.session.clear_ip_filter().await {
                warn!(error = %err, "failed to clear ip filter");
            }
            return;
        }
        let path = policy.ip_filtering_file;
        let parsed = tokio::task::spawn_blocking(move || IpFilter::parse(&path)).await;
        let outcome = match parsed {
            Ok(Ok(filter)) => match self.session.set_ip_filter(&filter).await {
                Ok(()) => Ok(filter.len()),
                Err(err) => Err(format!("{err:#}")),
            },
            Ok(Err(err)) => Err(err.to_string()),
            Err(err) => Err(err.to_string()),
        };
        match outcome {
            Ok(rule_count) => {
                info!(rule_count, "ip filter applied");
                self.emit(Event::IpFilterParsed { rule_count });
            }
            Err(message) => {
                warn!(error = %message, "failed to apply ip filter");
                self.emit(Event::IpFilterParsed { rule_count: 0 });
                self.emit(Event::SessionError { message });
            }
        }
    }

    fn sync_watch_service(&mut self) {
        let policy = self.shared.policy.policy();
        let wanted = policy.watch_dir.then_some(policy.dir_to_watch);
        if let (Some(watch), Some(dir)) = (&self.watch, &wanted)
            && watch.dir() == dir
        {
            return;
        }
        if let Some(watch) = self.watch.take() {
            watch.stop();
        }
        if let Some(dir) = wanted {
            self.watch = Some(WatchService::spawn(
                self.coordinator.clone(),
                dir,
                self.shared.config.watch_interval,
            ));
        }
    }

    async fn sync_stream_service(&mut self) {
        let policy = self.shared.policy.policy();
        let wanted = policy
            .streaming_enabled
            .then_some((policy.streaming_hostname, policy.streaming_port));
        if let (Some(stream), Some((hostname, port))) = (&self.stream, &wanted)
            && stream.serves(hostname, *port)
        {
            return;
        }
        if let Some(stream) = self.stream.take() {
            stream.stop();
            self.shared.stream_addr.send_replace(None);
        }
        let Some((hostname, port)) = wanted else {
            return;
        };
        match StreamService::bind(Arc::clone(&self.shared), &hostname, port).await {
            Ok(stream) => {
                self.shared.stream_addr.send_replace(Some(stream.local_addr()));
                self.stream = Some(stream);
            }
            Err(err) => {
                warn!(hostname = %hostname, port, error = %err, "failed to start streaming listener");
                self.emit(Event::SessionError {
                    message: format!("streaming listener on {hostname}:{port}: {err}"),
                });
            }
        }
    }

    fn stop_services(&mut self) {
        if let Some(watch) = self.watch.take() {
            watch.stop();
        }
        if let Some(stream) = self.stream.take() {
            stream.stop();
            self.shared.stream_addr.send_replace(None);
        }
    }

    // Magnet metadata.

    async fn fetch_magnet(&mut self, magnet: &MagnetInfo) -> TorrentResult<MetadataReceiver> {
        if !self.running() {
            return Err(TorrentError::EngineNotRunning);
        }
        let (tx, rx) = oneshot::channel();
        if let Some(waiters) = self.fetches.get_mut(&magnet.info_hash) {
            debug!(info_hash = %magnet.info_hash, "joining outstanding metadata fetch");
            waiters.push(tx);
            return Ok(rx);
        }
        self.session
            .fetch_magnet(magnet)
            .await
            .map_err(|err| TorrentError::session("fetch_magnet", &err))?;
        self.fetches.insert(magnet.info_hash.clone(), vec![tx]);
        Ok(rx)
    }

    async fn cancel_fetch(&mut self, info_hash: &TorrentId) {
        let Some(waiters) = self.fetches.remove(info_hash) else {
            return;
        };
        for waiter in waiters {
            let _ = waiter.send(Err(TorrentError::FetchCancelled {
                info_hash: info_hash.clone(),
            }));
        }
        if let Err(err) = self.session.cancel_fetch(info_hash).await {
            warn!(info_hash = %info_hash, error = %err, "failed to cancel metadata fetch");
        }
    }

    // Alerts and status.

    async fn flush_alerts(&mut self) {
        if !self.running() {
            return;
        }
        match self.session.poll_alerts().await {
            Ok(alerts) => {
                self.mark_recovered("alerts");
                for alert in alerts {
                    self.on_alert(alert).await;
                    if !self.running() {
                        break;
                    }
                }
            }
            Err(err) => {
                let detail = format!("{err:#}");
                self.mark_degraded("alerts", &detail);
            }
        }
    }

    async fn on_alert(&mut self, alert: NativeAlert) {
        match alert {
            NativeAlert::StateChanged {
                torrent_id,
                previous,
                current,
            } => {
                if self.refresh_task(&torrent_id).await {
                    self.emit(Event::TorrentStateChanged {
                        torrent_id,
                        previous,
                        current,
                    });
                }
            }
            NativeAlert::TorrentPaused { torrent_id } => {
                if self.refresh_task(&torrent_id).await {
                    self.emit(Event::TorrentPaused { torrent_id });
                }
            }
            NativeAlert::TorrentResumed { torrent_id } => {
                if self.refresh_task(&torrent_id).await {
                    self.emit(Event::TorrentResumed { torrent_id });
                }
            }
            NativeAlert::TorrentFinished { torrent_id } => self.on_finished(torrent_id).await,
            NativeAlert::TorrentRemoved { torrent_id } => {
                if self.shared.registry.remove(&torrent_id).is_some() {
                    self.sync_active_torrents();
                    self.emit(Event::TorrentRemoved { torrent_id });
                }
            }
            NativeAlert::TorrentError {
                torrent_id,
                message,
            } => {
                let known = self
                    .shared
                    .registry
                    .update(&torrent_id, |task| task.error = Some(message.clone()))
                    .is_some();
                if known {
                    warn!(torrent_id = %torrent_id, error = %message, "torrent error");
                    if let Err(err) =
                        self.update_record(&torrent_id, |record| record.error = Some(message.clone()))
                    {
                        warn!(torrent_id = %torrent_id, error = %err, "failed to record torrent error");
                    }
                    self.emit(Event::TorrentError {
                        torrent_id,
                        message,
                    });
                }
            }
            NativeAlert::MetadataReceived { info_hash, bencode } => {
                self.on_metadata(info_hash, &bencode);
            }
            NativeAlert::StorageMoved {
                torrent_id,
                success,
            } => self.on_storage_moved(torrent_id, success),
            NativeAlert::ListenFailed { message } | NativeAlert::SessionError { message } => {
                warn!(error = %message, "session error");
                self.emit(Event::SessionError { message });
            }
            NativeAlert::PortmapError { message } => {
                debug!(error = %message, "port mapping failed");
                self.emit(Event::NatError { message });
            }
        }
    }

    async fn on_finished(&mut self, torrent_id: TorrentId) {
        if !self.refresh_task(&torrent_id).await {
            return;
        }
        info!(torrent_id = %torrent_id, "torrent finished");
        self.emit(Event::TorrentFinished {
            torrent_id: torrent_id.clone(),
        });

        let policy = self.shared.policy.policy();
        if policy.move_after_download
            && !policy.move_after_download_in.as_os_str().is_empty()
            && let Some(task) = self.shared.registry.get(&torrent_id)
            && task.download_path != policy.move_after_download_in
            && let Err(err) = self
                .set_download_path(&[torrent_id.clone()], &policy.move_after_download_in)
                .await
        {
            warn!(torrent_id = %torrent_id, error = %err, "failed to move finished torrent");
        }

        if policy.shutdown_downloads_complete
            && self
                .shared
                .registry
                .snapshot()
                .iter()
                .all(TorrentTask::is_finished)
        {
            info!("all downloads complete; requesting stop");
            self.stop(false).await;
        }
    }

    fn on_metadata(&mut self, info_hash: TorrentId, bencode: &[u8]) {
        let decoded = decode_metainfo(bencode);
        if let Some(waiters) = self.fetches.remove(&info_hash) {
            for waiter in waiters {
                let _ = waiter.send(decoded.clone());
            }
            if decoded.is_ok() {
                self.emit(Event::MagnetMetadataReceived {
                    info_hash: info_hash.clone(),
                });
            }
        }

        let Some(task) = self.shared.registry.get(&info_hash) else {
            return;
        };
        if !task.downloading_metadata {
            return;
        }
        let error = match &decoded {
            Ok(meta) => {
                let path = self.shared.metainfo_path(&info_hash);
                match self.shared.fs.write_file(&path, &meta.bencode) {
                    Ok(()) => {
                        let name = meta.name.clone();
                        self.shared.registry.update(&info_hash, |task| {
                            task.downloading_metadata = false;
                            task.name.clone_from(&name);
                        });
                        if let Err(err) = self.update_record(&info_hash, |record| {
                            record.downloading_metadata = false;
                            record.name = name;
                        }) {
                            warn!(torrent_id = %info_hash, error = %err, "failed to update torrent record");
                        }
                        None
                    }
                    Err(err) => Some(format!("{err:#}")),
                }
            }
            Err(err) => Some(err.to_string()),
        };
        if let Some(message) = &error {
            warn!(torrent_id = %info_hash, error = %message, "failed to load torrent metadata");
        }
        self.emit(Event::TorrentMetadataLoaded {
            torrent_id: info_hash,
            error,
        });
    }

    fn on_storage_moved(&self, torrent_id: TorrentId, success: bool) {
        let target = self
            .shared
            .registry
            .update(&torrent_id, |task| {
                let target = task.pending_move.take();
                if success && let Some(target) = &target {
                    task.download_path.clone_from(target);
                }
                target
            })
            .flatten();
        if success
            && let Some(target) = target
            && let Err(err) = self.update_record(&torrent_id, |record| record.download_path = target)
        {
            warn!(torrent_id = %torrent_id, error = %err, "failed to persist new download path");
        }
        self.emit(Event::TorrentMoved {
            torrent_id,
            success,
        });
    }

    async fn status_of(&mut self, id: &TorrentId) -> Option<NativeTorrentStatus> {
        match self.session.torrent_status(id).await {
            Ok(status) => {
                self.mark_recovered("status");
                status
            }
            Err(err) => {
                let detail = format!("{err:#}");
                self.mark_degraded("status", &detail);
                None
            }
        }
    }

    /// Refresh one task's status; returns whether the task is live.
    async fn refresh_task(&mut self, id: &TorrentId) -> bool {
        if !self.shared.registry.contains(id) {
            return false;
        }
        if let Some(status) = self.status_of(id).await {
            self.shared.registry.update(id, |task| task.status = status);
        }
        true
    }

    async fn refresh_status(&mut self) {
        if !self.running() {
            return;
        }
        for id in self.shared.registry.ids() {
            self.refresh_task(&id).await;
        }
        match self.session.session_stats().await {
            Ok(stats) => {
                self.mark_recovered("stats");
                if self.last_stats != Some(stats) {
                    self.last_stats = Some(stats);
                    self.shared.stats.send_replace(stats);
                    self.emit(Event::SessionStats { stats });
                }
            }
            Err(err) => {
                let detail = format!("{err:#}");
                self.mark_degraded("stats", &detail);
            }
        }
        let failures = self.shared.events.listener_failures();
        if failures > self.listener_failures_seen {
            if let Some(metrics) = &self.shared.metrics {
                metrics.add_listener_failures(failures - self.listener_failures_seen);
            }
            self.listener_failures_seen = failures;
        }
    }

    fn mark_degraded(&mut self, component: &str, detail: &str) {
        if self.health.insert(component.to_string()) {
            warn!(component, detail = %detail, "engine component degraded");
        } else {
            debug!(component, detail = %detail, "engine component still degraded");
        }
    }

    fn mark_recovered(&mut self, component: &str) {
        if self.health.remove(component) {
            info!(component, "engine component recovered");
        }
    }
}
