//! Public command surface of the torrent session.
//!
//! # Design
//! - Every mutating call becomes a [`SessionCommand`] on one bounded queue drained by a
//!   single worker task, which gives a total FIFO order over native engine calls.
//! - Slow preparation (reading files, HTTP fetches, decoding, free-space checks) happens
//!   on the caller's task before the command is enqueued.
//! - Queries read the registry, the settings cell, and the repository directly and never
//!   wait on the worker. Absent data yields an explicit "unavailable" value.
//! - The coordinator is an explicitly constructed handle; clones share one worker.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use rivulet_events::EventBus;
use rivulet_telemetry::Metrics;
use rivulet_torrent_core::{
    AddTorrentParams, AdvancedTorrentInfo, FileSystem, MagnetInfo, NativeSession, PeerInfo,
    PolicySource, Priority, SessionSettings, SessionStats, SpeedDirection, Torrent, TorrentError,
    TorrentId, TorrentInfo, TorrentMetaInfo, TorrentRepository, TorrentResult, TorrentSource,
    TorrentStateCode, TrackerInfo, decode_metainfo, make_magnet, parse_magnet,
};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};
use url::Url;

use crate::command::{MetadataReceiver, Reply, SessionCommand};
use crate::lifecycle::{EngineLifecycle, EngineState};
use crate::registry::{TaskRegistry, TorrentTask};
use crate::settings::SettingsCell;
use crate::stream::make_stream_url;
use crate::worker;

const COMMAND_BUFFER: usize = 128;
const ALERT_POLL_INTERVAL: Duration = Duration::from_millis(200);
const STATUS_INTERVAL: Duration = Duration::from_secs(1);
const WATCH_INTERVAL: Duration = Duration::from_secs(5);
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const METAINFO_EXTENSION: &str = "torrent";

/// Timing and storage knobs for the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Directory holding one `<id>.torrent` file per admitted torrent.
    pub metadata_dir: PathBuf,
    /// How often native alerts are drained.
    pub alert_poll_interval: Duration,
    /// How often torrent status and session statistics are refreshed.
    pub status_interval: Duration,
    /// How often the watch directory is rescanned.
    pub watch_interval: Duration,
}

impl CoordinatorConfig {
    /// Defaults with metainfo files stored under `metadata_dir`.
    #[must_use]
    pub fn new(metadata_dir: impl Into<PathBuf>) -> Self {
        Self {
            metadata_dir: metadata_dir.into(),
            alert_poll_interval: ALERT_POLL_INTERVAL,
            status_interval: STATUS_INTERVAL,
            watch_interval: WATCH_INTERVAL,
        }
    }
}

/// Collaborators handed to [`SessionCoordinator::new`].
pub struct SessionDeps {
    /// The wrapped torrent engine; owned by the worker from here on.
    pub session: Box<dyn NativeSession>,
    /// Record persistence.
    pub repository: Arc<dyn TorrentRepository>,
    /// File system access.
    pub file_system: Arc<dyn FileSystem>,
    /// Settings and device conditions.
    pub policy: Arc<dyn PolicySource>,
    /// Bus receiving every session event.
    pub events: EventBus,
    /// Optional metrics registry.
    pub metrics: Option<Metrics>,
}

/// State shared between the coordinator handles and the worker.
pub(crate) struct Shared {
    pub(crate) lifecycle: EngineLifecycle,
    pub(crate) registry: TaskRegistry,
    pub(crate) settings: SettingsCell,
    pub(crate) events: EventBus,
    pub(crate) repository: Arc<dyn TorrentRepository>,
    pub(crate) fs: Arc<dyn FileSystem>,
    pub(crate) policy: Arc<dyn PolicySource>,
    pub(crate) config: CoordinatorConfig,
    pub(crate) metrics: Option<Metrics>,
    pub(crate) stats: watch::Sender<SessionStats>,
    pub(crate) stream_addr: watch::Sender<Option<SocketAddr>>,
    http: reqwest::Client,
}

impl Shared {
    pub(crate) fn metainfo_path(&self, id: &TorrentId) -> PathBuf {
        self.config
            .metadata_dir
            .join(format!("{id}.{METAINFO_EXTENSION}"))
    }
}

/// Handle to the single session worker.
#[derive(Clone)]
pub struct SessionCoordinator {
    commands: mpsc::Sender<SessionCommand>,
    shared: Arc<Shared>,
}

/// Non-owning handle used by services the worker spawns itself.
#[derive(Clone)]
pub(crate) struct WeakCoordinator {
    commands: mpsc::WeakSender<SessionCommand>,
    shared: Arc<Shared>,
}

impl WeakCoordinator {
    pub(crate) const fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    pub(crate) fn upgrade(&self) -> Option<SessionCoordinator> {
        self.commands.upgrade().map(|commands| SessionCoordinator {
            commands,
            shared: Arc::clone(&self.shared),
        })
    }
}

/// Resolves to the metadata of a magnet once the engine receives it.
#[derive(Debug)]
pub struct PendingMetadata {
    info_hash: TorrentId,
    receiver: MetadataReceiver,
}

impl PendingMetadata {
    /// Info-hash being fetched.
    #[must_use]
    pub const fn info_hash(&self) -> &TorrentId {
        &self.info_hash
    }

    /// Wait for the metadata.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::Decode`] for malformed metadata and
    /// [`TorrentError::FetchCancelled`] when the fetch was cancelled or the engine stopped.
    pub async fn wait(self) -> TorrentResult<TorrentMetaInfo> {
        self.receiver
            .await
            .map_err(|_| TorrentError::FetchCancelled {
                info_hash: self.info_hash,
            })?
    }
}

impl SessionCoordinator {
    /// Build the coordinator and spawn its worker on the current runtime.
    ///
    /// The engine stays stopped until [`SessionCoordinator::start`] is called.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client used for `.torrent` links cannot be built.
    pub fn new(deps: SessionDeps, config: CoordinatorConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("failed to build http client")?;
        let (stats, _) = watch::channel(SessionStats::default());
        let (stream_addr, _) = watch::channel(None);
        let shared = Arc::new(Shared {
            lifecycle: EngineLifecycle::new(),
            registry: TaskRegistry::new(),
            settings: SettingsCell::new(deps.policy.session_settings()),
            events: deps.events,
            repository: deps.repository,
            fs: deps.file_system,
            policy: deps.policy,
            config,
            metrics: deps.metrics,
            stats,
            stream_addr,
            http,
        });
        let (commands, rx) = mpsc::channel(COMMAND_BUFFER);
        let signals = shared.policy.subscribe();
        worker::spawn(
            WeakCoordinator {
                commands: commands.downgrade(),
                shared: Arc::clone(&shared),
            },
            rx,
            signals,
            deps.session,
        );
        Ok(Self { commands, shared })
    }

    async fn enqueue(&self, command: SessionCommand) -> TorrentResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| TorrentError::Session {
                operation: "enqueue_command",
                message: "session worker has exited".to_string(),
            })
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> SessionCommand,
    ) -> TorrentResult<T> {
        let (respond_to, rx) = oneshot::channel();
        self.enqueue(build(respond_to)).await?;
        rx.await.map_err(|_| TorrentError::Session {
            operation: "await_reply",
            message: "session worker dropped the reply".to_string(),
        })?
    }

    // Lifecycle.

    /// Request the engine to start; returns once the request is queued.
    ///
    /// # Errors
    ///
    /// Fails only when the worker has exited.
    pub async fn start(&self) -> TorrentResult<()> {
        self.enqueue(SessionCommand::Start).await
    }

    /// Request the engine to stop regardless of keep-alive.
    ///
    /// # Errors
    ///
    /// Fails only when the worker has exited.
    pub async fn force_stop(&self) -> TorrentResult<()> {
        self.enqueue(SessionCommand::Stop { force: true }).await
    }

    /// Request the engine to stop unless the keep-alive policy is set.
    ///
    /// # Errors
    ///
    /// Fails only when the worker has exited.
    pub async fn request_stop(&self) -> TorrentResult<()> {
        self.enqueue(SessionCommand::Stop { force: false }).await
    }

    /// Lock-free check for a running engine.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.lifecycle.is_running()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn engine_state(&self) -> EngineState {
        self.shared.lifecycle.state()
    }

    /// Receiver observing every lifecycle transition.
    #[must_use]
    pub fn subscribe_engine_state(&self) -> watch::Receiver<EngineState> {
        self.shared.lifecycle.subscribe()
    }

    /// Wait until the lifecycle reaches `target`.
    pub async fn wait_for_state(&self, target: EngineState) {
        let mut rx = self.shared.lifecycle.subscribe();
        let _ = rx.wait_for(|state| *state == target).await;
    }

    /// Bus carrying every session event.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    /// Metrics registry, when one was supplied.
    #[must_use]
    pub fn metrics(&self) -> Option<&Metrics> {
        self.shared.metrics.as_ref()
    }

    pub(crate) fn file_system(&self) -> &Arc<dyn FileSystem> {
        &self.shared.fs
    }

    /// Live task registry.
    #[must_use]
    pub fn registry(&self) -> &TaskRegistry {
        &self.shared.registry
    }

    // Adding torrents.

    /// Admit a torrent described by `params`.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::NoFilesSelected`], [`TorrentError::FreeSpace`] (unless
    /// `ignore_free_space`), [`TorrentError::Decode`], [`TorrentError::TorrentAlreadyExists`],
    /// [`TorrentError::EngineNotRunning`], or the engine's own rejection.
    pub async fn add_torrent(&self, params: AddTorrentParams) -> TorrentResult<Torrent> {
        if params.selects_nothing() {
            return Err(TorrentError::NoFilesSelected);
        }
        self.check_free_space(&params)?;
        self.request(|respond_to| SessionCommand::AddTorrent {
            params: Box::new(params),
            respond_to,
        })
        .await
    }

    /// Decode a `.torrent` file and admit it, optionally deleting the source afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::Io`] when the file cannot be read, plus every error of
    /// [`SessionCoordinator::add_torrent`].
    pub async fn add_torrent_file(
        &self,
        path: &Path,
        download_path: Option<PathBuf>,
        remove_source: bool,
    ) -> TorrentResult<Torrent> {
        let bytes = self
            .shared
            .fs
            .read_file(path)
            .map_err(|err| TorrentError::io("read_torrent_file", Some(path.to_path_buf()), err))?;
        let meta = decode_metainfo(&bytes)?;
        let params = AddTorrentParams::from_metainfo(&meta, self.download_dir(download_path));
        let torrent = self.add_torrent(params).await?;
        if remove_source && let Err(err) = self.shared.fs.delete_file(path) {
            warn!(path = %path.display(), error = %err, "failed to remove added torrent file");
        }
        Ok(torrent)
    }

    /// Admit a torrent from a magnet URI, an `http(s)` link, a `file:` URI, or a path.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::UnknownUri`] for unsupported schemes,
    /// [`TorrentError::FetchLink`] when a link cannot be downloaded, plus every error of
    /// [`SessionCoordinator::add_torrent`].
    pub async fn add_torrent_uri(
        &self,
        uri: &str,
        download_path: Option<PathBuf>,
    ) -> TorrentResult<Torrent> {
        match Url::parse(uri) {
            Ok(url) => match url.scheme() {
                "magnet" => {
                    let magnet = parse_magnet(uri)?;
                    let params =
                        AddTorrentParams::from_magnet(&magnet, self.download_dir(download_path));
                    self.add_torrent(params).await
                }
                "http" | "https" => {
                    let bytes = self.fetch_link(uri).await?;
                    let meta = decode_metainfo(&bytes)?;
                    let params =
                        AddTorrentParams::from_metainfo(&meta, self.download_dir(download_path));
                    self.add_torrent(params).await
                }
                "file" => {
                    let path = url.to_file_path().map_err(|()| TorrentError::UnknownUri {
                        uri: uri.to_string(),
                    })?;
                    self.add_torrent_file(&path, download_path, false).await
                }
                _ => Err(TorrentError::UnknownUri {
                    uri: uri.to_string(),
                }),
            },
            Err(url::ParseError::RelativeUrlWithoutBase) if !uri.trim().is_empty() => {
                self.add_torrent_file(Path::new(uri), download_path, false)
                    .await
            }
            Err(_) => Err(TorrentError::UnknownUri {
                uri: uri.to_string(),
            }),
        }
    }

    async fn fetch_link(&self, url: &str) -> TorrentResult<Vec<u8>> {
        let fetch_error = |err: reqwest::Error| TorrentError::FetchLink {
            url: url.to_string(),
            reason: err.to_string(),
        };
        debug!(url, "fetching torrent link");
        let response = self
            .shared
            .http
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(fetch_error)?;
        let bytes = response.bytes().await.map_err(fetch_error)?;
        Ok(bytes.to_vec())
    }

    fn download_dir(&self, requested: Option<PathBuf>) -> PathBuf {
        requested.unwrap_or_else(|| self.shared.policy.policy().save_torrents_in)
    }

    fn check_free_space(&self, params: &AddTorrentParams) -> TorrentResult<()> {
        if params.ignore_free_space {
            return Ok(());
        }
        let TorrentSource::Metainfo { bytes } = &params.source else {
            return Ok(());
        };
        let meta = decode_metainfo(bytes)?;
        let required: u64 = meta
            .files
            .iter()
            .enumerate()
            .filter(|(index, _)| {
                params
                    .file_priorities
                    .get(*index)
                    .is_none_or(|priority| *priority != Priority::Ignore)
            })
            .map(|(_, file)| file.size)
            .sum();
        let available = self
            .shared
            .fs
            .available_bytes(&params.download_path)
            .map_err(|err| {
                TorrentError::io("available_bytes", Some(params.download_path.clone()), err)
            })?;
        if required > available {
            return Err(TorrentError::FreeSpace {
                required,
                available,
            });
        }
        Ok(())
    }

    // Magnet metadata.

    /// Start fetching metadata for a magnet, joining an outstanding fetch for the same
    /// info-hash.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::UnknownUri`] or [`TorrentError::Decode`] for a bad URI,
    /// [`TorrentError::EngineNotRunning`], or the engine's own rejection.
    pub async fn fetch_magnet(&self, uri: &str) -> TorrentResult<(MagnetInfo, PendingMetadata)> {
        let magnet = parse_magnet(uri)?;
        let receiver = self
            .request(|respond_to| SessionCommand::FetchMagnet {
                magnet: Box::new(magnet.clone()),
                respond_to,
            })
            .await?;
        let pending = PendingMetadata {
            info_hash: magnet.info_hash.clone(),
            receiver,
        };
        Ok((magnet, pending))
    }

    /// Cancel a metadata fetch; a no-op when nothing is pending.
    ///
    /// # Errors
    ///
    /// Fails only when the worker has exited.
    pub async fn cancel_fetch_magnet(&self, info_hash: &TorrentId) -> TorrentResult<()> {
        self.request(|respond_to| SessionCommand::CancelFetch {
            info_hash: info_hash.clone(),
            respond_to,
        })
        .await
    }

    // Per-torrent commands. Unknown ids are silent no-ops.

    /// Remove torrents and their records, optionally deleting downloaded data.
    ///
    /// # Errors
    ///
    /// Returns the first repository or engine failure.
    pub async fn delete_torrents(&self, ids: &[TorrentId], with_files: bool) -> TorrentResult<()> {
        self.request(|respond_to| SessionCommand::DeleteTorrents {
            ids: ids.to_vec(),
            with_files,
            respond_to,
        })
        .await
    }

    /// Pause a running torrent or resume a paused one.
    ///
    /// # Errors
    ///
    /// Returns the engine's rejection.
    pub async fn pause_resume_torrent(&self, id: &TorrentId) -> TorrentResult<()> {
        self.request(|respond_to| SessionCommand::PauseResume {
            id: id.clone(),
            respond_to,
        })
        .await
    }

    /// Pause every torrent by user request.
    ///
    /// # Errors
    ///
    /// Fails only when the worker has exited.
    pub async fn pause_all(&self) -> TorrentResult<()> {
        self.request(|respond_to| SessionCommand::PauseAll { respond_to })
            .await
    }

    /// Resume every torrent by user request.
    ///
    /// # Errors
    ///
    /// Fails only when the worker has exited.
    pub async fn resume_all(&self) -> TorrentResult<()> {
        self.request(|respond_to| SessionCommand::ResumeAll { respond_to })
            .await
    }

    /// Re-verify data of the given torrents.
    ///
    /// # Errors
    ///
    /// Returns the engine's rejection.
    pub async fn force_recheck(&self, ids: &[TorrentId]) -> TorrentResult<()> {
        self.request(|respond_to| SessionCommand::ForceRecheck {
            ids: ids.to_vec(),
            respond_to,
        })
        .await
    }

    /// Announce the given torrents to their trackers now.
    ///
    /// # Errors
    ///
    /// Returns the engine's rejection.
    pub async fn force_announce(&self, ids: &[TorrentId]) -> TorrentResult<()> {
        self.request(|respond_to| SessionCommand::ForceAnnounce {
            ids: ids.to_vec(),
            respond_to,
        })
        .await
    }

    /// Toggle in-order piece picking.
    ///
    /// # Errors
    ///
    /// Returns the engine's rejection.
    pub async fn set_sequential_download(
        &self,
        id: &TorrentId,
        sequential: bool,
    ) -> TorrentResult<()> {
        self.request(|respond_to| SessionCommand::SetSequential {
            id: id.clone(),
            sequential,
            respond_to,
        })
        .await
    }

    /// Replace per-file priorities.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::NoFilesSelected`] when every file is ignored, or the
    /// engine's rejection.
    pub async fn prioritize_files(
        &self,
        id: &TorrentId,
        priorities: Vec<Priority>,
    ) -> TorrentResult<()> {
        if !priorities.is_empty() && priorities.iter().all(|p| *p == Priority::Ignore) {
            return Err(TorrentError::NoFilesSelected);
        }
        self.request(|respond_to| SessionCommand::PrioritizeFiles {
            id: id.clone(),
            priorities,
            respond_to,
        })
        .await
    }

    /// Set a per-torrent rate limit in bytes/s; zero or negative removes the limit.
    ///
    /// # Errors
    ///
    /// Returns the engine's rejection.
    pub async fn set_speed_limit(
        &self,
        id: &TorrentId,
        direction: SpeedDirection,
        limit: i64,
    ) -> TorrentResult<()> {
        self.request(|respond_to| SessionCommand::SetSpeedLimit {
            id: id.clone(),
            direction,
            limit,
            respond_to,
        })
        .await
    }

    /// Set the download limit of a torrent.
    ///
    /// # Errors
    ///
    /// Returns the engine's rejection.
    pub async fn set_download_speed_limit(&self, id: &TorrentId, limit: i64) -> TorrentResult<()> {
        self.set_speed_limit(id, SpeedDirection::Download, limit)
            .await
    }

    /// Set the upload limit of a torrent.
    ///
    /// # Errors
    ///
    /// Returns the engine's rejection.
    pub async fn set_upload_speed_limit(&self, id: &TorrentId, limit: i64) -> TorrentResult<()> {
        self.set_speed_limit(id, SpeedDirection::Upload, limit)
            .await
    }

    /// Replace every tracker of a torrent.
    ///
    /// # Errors
    ///
    /// Returns the engine's rejection.
    pub async fn replace_trackers(&self, id: &TorrentId, urls: Vec<String>) -> TorrentResult<()> {
        self.request(|respond_to| SessionCommand::ReplaceTrackers {
            id: id.clone(),
            urls,
            respond_to,
        })
        .await
    }

    /// Append trackers to a torrent.
    ///
    /// # Errors
    ///
    /// Returns the engine's rejection.
    pub async fn add_trackers(&self, id: &TorrentId, urls: Vec<String>) -> TorrentResult<()> {
        self.request(|respond_to| SessionCommand::AddTrackers {
            id: id.clone(),
            urls,
            respond_to,
        })
        .await
    }

    /// Remove the listed trackers from a torrent.
    ///
    /// # Errors
    ///
    /// Returns the engine's rejection.
    pub async fn delete_trackers(&self, id: &TorrentId, urls: Vec<String>) -> TorrentResult<()> {
        self.request(|respond_to| SessionCommand::DeleteTrackers {
            id: id.clone(),
            urls,
            respond_to,
        })
        .await
    }

    /// Rename a torrent.
    ///
    /// # Errors
    ///
    /// Returns a repository failure.
    pub async fn set_torrent_name(&self, id: &TorrentId, name: &str) -> TorrentResult<()> {
        self.request(|respond_to| SessionCommand::SetTorrentName {
            id: id.clone(),
            name: name.to_string(),
            respond_to,
        })
        .await
    }

    /// Move the data of the given torrents to `path`.
    ///
    /// Completion arrives as a `TorrentMoved` event.
    ///
    /// # Errors
    ///
    /// Returns the engine's rejection.
    pub async fn set_download_path(&self, ids: &[TorrentId], path: PathBuf) -> TorrentResult<()> {
        self.request(|respond_to| SessionCommand::SetDownloadPath {
            ids: ids.to_vec(),
            path,
            respond_to,
        })
        .await
    }

    /// Replace the tag set of a torrent.
    ///
    /// # Errors
    ///
    /// Returns a repository failure.
    pub async fn set_tags(&self, id: &TorrentId, tags: Vec<String>) -> TorrentResult<()> {
        self.request(|respond_to| SessionCommand::SetTags {
            id: id.clone(),
            tags,
            respond_to,
        })
        .await
    }

    // Engine-wide commands.

    /// Re-evaluate the pause policy for every torrent.
    ///
    /// # Errors
    ///
    /// Fails only when the worker has exited.
    pub async fn reschedule_torrents(&self) -> TorrentResult<()> {
        self.request(|respond_to| SessionCommand::Reschedule { respond_to })
            .await
    }

    /// Replace the engine settings wholesale; unchanged values are a no-op.
    ///
    /// # Errors
    ///
    /// Returns the engine's rejection; the previous value stays in effect.
    pub async fn set_settings(&self, settings: SessionSettings) -> TorrentResult<()> {
        self.request(|respond_to| SessionCommand::ApplySettings {
            settings: Box::new(settings),
            respond_to,
        })
        .await
    }

    // Queries.

    /// Current engine settings.
    #[must_use]
    pub fn settings(&self) -> Arc<SessionSettings> {
        self.shared.settings.load()
    }

    /// Live task for `id`.
    #[must_use]
    pub fn task(&self, id: &TorrentId) -> Option<TorrentTask> {
        self.shared.registry.get(id)
    }

    /// Persisted record for `id`.
    ///
    /// # Errors
    ///
    /// Returns a repository failure.
    pub fn torrent(&self, id: &TorrentId) -> TorrentResult<Option<Torrent>> {
        self.shared
            .repository
            .get_torrent_by_id(id)
            .map_err(|err| TorrentError::io("get_torrent", None, err))
    }

    /// Snapshot of one torrent; stopped torrents are reported from their record.
    #[must_use]
    pub fn torrent_info(&self, id: &TorrentId) -> Option<TorrentInfo> {
        if let Some(task) = self.shared.registry.get(id) {
            return Some(task.info());
        }
        match self.shared.repository.get_torrent_by_id(id) {
            Ok(Some(record)) => Some(TorrentInfo::unavailable(&record, self.tags_of(id))),
            Ok(None) => None,
            Err(err) => {
                warn!(torrent_id = %id, error = %err, "failed to read torrent record");
                None
            }
        }
    }

    /// Snapshots of every known torrent, sorted by id.
    #[must_use]
    pub fn torrent_infos(&self) -> Vec<TorrentInfo> {
        let mut infos: Vec<TorrentInfo> = self
            .shared
            .registry
            .snapshot()
            .iter()
            .map(TorrentTask::info)
            .collect();
        match self.shared.repository.get_all_torrents() {
            Ok(records) => {
                for record in records {
                    if !self.shared.registry.contains(&record.id) {
                        let tags = self.tags_of(&record.id);
                        infos.push(TorrentInfo::unavailable(&record, tags));
                    }
                }
            }
            Err(err) => warn!(error = %err, "failed to list torrent records"),
        }
        infos.sort_by(|a, b| a.torrent_id.cmp(&b.torrent_id));
        infos
    }

    fn tags_of(&self, id: &TorrentId) -> Vec<String> {
        self.shared.repository.tags_for(id).unwrap_or_default()
    }

    /// Connected peers; empty when unavailable.
    #[must_use]
    pub fn peers(&self, id: &TorrentId) -> Vec<PeerInfo> {
        self.shared
            .registry
            .get(id)
            .map(|task| task.status.peer_list)
            .unwrap_or_default()
    }

    /// Attached trackers; empty when unavailable.
    #[must_use]
    pub fn trackers(&self, id: &TorrentId) -> Vec<TrackerInfo> {
        self.shared
            .registry
            .get(id)
            .map(|task| task.status.trackers)
            .unwrap_or_default()
    }

    /// Piece bitmap; empty when unavailable.
    #[must_use]
    pub fn pieces(&self, id: &TorrentId) -> Vec<bool> {
        self.shared
            .registry
            .get(id)
            .map(|task| task.status.pieces)
            .unwrap_or_default()
    }

    /// Detail counters; `None` when unavailable.
    #[must_use]
    pub fn advanced_info(&self, id: &TorrentId) -> Option<AdvancedTorrentInfo> {
        self.shared.registry.get(id).map(|task| task.status.advanced)
    }

    /// Download limit in bytes/s, `0` for unlimited, `-1` when unavailable.
    #[must_use]
    pub fn download_speed_limit(&self, id: &TorrentId) -> i64 {
        self.shared
            .registry
            .get(id)
            .map_or(-1, |task| task.status.download_limit)
    }

    /// Upload limit in bytes/s, `0` for unlimited, `-1` when unavailable.
    #[must_use]
    pub fn upload_speed_limit(&self, id: &TorrentId) -> i64 {
        self.shared
            .registry
            .get(id)
            .map_or(-1, |task| task.status.upload_limit)
    }

    /// Effective state; `Unknown` when no live task exists.
    #[must_use]
    pub fn torrent_state(&self, id: &TorrentId) -> TorrentStateCode {
        self.shared
            .registry
            .get(id)
            .map_or(TorrentStateCode::Unknown, |task| task.state())
    }

    /// Latest session statistics.
    #[must_use]
    pub fn session_stats(&self) -> SessionStats {
        *self.shared.stats.borrow()
    }

    /// Receiver of session statistics, updated only on change.
    #[must_use]
    pub fn subscribe_session_stats(&self) -> watch::Receiver<SessionStats> {
        self.shared.stats.subscribe()
    }

    /// Magnet URI for a known torrent, optionally carrying its file selection.
    #[must_use]
    pub fn make_magnet(&self, id: &TorrentId, include_priorities: bool) -> Option<String> {
        if let Some(task) = self.shared.registry.get(id) {
            let trackers: Vec<String> = task
                .status
                .trackers
                .iter()
                .map(|tracker| tracker.url.clone())
                .collect();
            let priorities =
                include_priorities.then_some(task.status.file_priorities.as_slice());
            return Some(make_magnet(id, &task.name, &trackers, priorities));
        }
        match self.shared.repository.get_torrent_by_id(id) {
            Ok(Some(record)) => Some(make_magnet(id, &record.name, &[], None)),
            _ => None,
        }
    }

    /// Address the streaming listener is bound to, `None` while it is not running.
    #[must_use]
    pub fn stream_address(&self) -> Option<SocketAddr> {
        *self.shared.stream_addr.borrow()
    }

    /// Streaming link for one file of a live torrent.
    #[must_use]
    pub fn stream_url(&self, id: &TorrentId, file_index: usize) -> Option<String> {
        let addr = self.stream_address()?;
        self.shared
            .registry
            .contains(id)
            .then(|| make_stream_url(addr, id, file_index))
    }

    /// Decoded metainfo stored for a torrent; `None` for magnets still awaiting metadata.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::Decode`] when the stored file is corrupt.
    pub fn torrent_meta_info(&self, id: &TorrentId) -> TorrentResult<Option<TorrentMetaInfo>> {
        let path = self.shared.metainfo_path(id);
        match self.shared.fs.read_file(&path) {
            Ok(bytes) => decode_metainfo(&bytes).map(Some),
            Err(err) => {
                debug!(torrent_id = %id, error = %err, "no stored metainfo");
                Ok(None)
            }
        }
    }
}
