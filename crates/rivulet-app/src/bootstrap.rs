//! Collaborator wiring and the process run loop.
//!
//! # Design
//! - Every collaborator is built here and handed to the coordinator explicitly; nothing
//!   below this module reaches for global state.
//! - `App::build` does not touch the global logger so tests can wire several instances
//!   in one process; `run_app` initialises logging first.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rivulet_config::{ConfigPolicySource, ConfigWatcher, LoadedConfig, config_path, load};
use rivulet_events::{Event, EventBus, EventEnvelope, ListenerError, RegistrationHandle};
use rivulet_session::{
    CoordinatorConfig, EngineState, FileRepository, LocalFileSystem, MemorySession,
    SessionCoordinator, SessionDeps,
};
use rivulet_telemetry::{Metrics, init_logging};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{AppError, AppResult};

/// Running composition of the session and its configuration watcher.
pub struct App {
    coordinator: SessionCoordinator,
    policy: ConfigPolicySource,
    metrics: Metrics,
    event_log: RegistrationHandle,
    cancel: CancellationToken,
    watcher: JoinHandle<()>,
}

impl App {
    /// Wire the session described by `loaded`, watching `path` for changes.
    ///
    /// The engine is left stopped; call [`App::start`].
    ///
    /// # Errors
    ///
    /// Returns an error when the repository cannot be opened, metrics cannot be
    /// registered, or no Tokio runtime is active.
    pub fn build(loaded: &LoadedConfig, path: PathBuf) -> AppResult<Self> {
        let config = &loaded.config;
        let storage = &config.storage;

        let repository_dir = storage.repository_dir();
        let repository = FileRepository::open(&repository_dir)
            .map_err(|err| AppError::wiring("repository.open", Some(repository_dir), &err))?;
        let metrics =
            Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;
        let events = EventBus::new();
        let event_log = events
            .register(log_event)
            .map_err(|err| AppError::wiring("event_bus.register", None, &err))?;
        let policy = ConfigPolicySource::new(config);

        let (session, _probe) = MemorySession::new();
        let coordinator = SessionCoordinator::new(
            SessionDeps {
                session: Box::new(session),
                repository: Arc::new(repository),
                file_system: Arc::new(LocalFileSystem::new(&storage.temp_dir)),
                policy: Arc::new(policy.clone()),
                events,
                metrics: Some(metrics.clone()),
            },
            CoordinatorConfig::new(storage.metadata_dir()),
        )
        .map_err(|err| AppError::wiring("coordinator.new", None, &err))?;

        let cancel = CancellationToken::new();
        let watcher = ConfigWatcher::new(path, policy.clone()).spawn(cancel.clone());
        debug!(data_dir = %storage.data_dir.display(), "session wired");

        Ok(Self {
            coordinator,
            policy,
            metrics,
            event_log,
            cancel,
            watcher,
        })
    }

    /// Session coordinator handle.
    #[must_use]
    pub const fn coordinator(&self) -> &SessionCoordinator {
        &self.coordinator
    }

    /// Policy source fed by the configuration file; hosts push device conditions here.
    #[must_use]
    pub const fn policy(&self) -> &ConfigPolicySource {
        &self.policy
    }

    /// Metrics registry updated by the coordinator.
    #[must_use]
    pub const fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Queue the engine start.
    ///
    /// # Errors
    ///
    /// Fails only when the session worker has exited.
    pub async fn start(&self) -> AppResult<()> {
        self.coordinator
            .start()
            .await
            .map_err(|err| AppError::torrent("session.start", err))
    }

    /// Stop the engine, persisting resume data, and tear down the watcher.
    ///
    /// # Errors
    ///
    /// Fails only when the session worker has exited.
    pub async fn shutdown(self) -> AppResult<()> {
        self.cancel.cancel();
        if let Err(err) = self.watcher.await {
            warn!(error = %err, "configuration watcher join failed");
        }
        self.coordinator
            .force_stop()
            .await
            .map_err(|err| AppError::torrent("session.force_stop", err))?;
        self.coordinator
            .wait_for_state(EngineState::Stopped)
            .await;
        self.coordinator.events().unregister(&self.event_log);
        if let Ok(rendered) = self.metrics.render() {
            debug!(metrics = %rendered, "final metrics");
        }
        info!("session shut down");
        Ok(())
    }
}

#[allow(clippy::unnecessary_wraps)]
fn log_event(envelope: &EventEnvelope) -> Result<(), ListenerError> {
    let event = &envelope.event;
    let torrent_id = event.torrent_id().map(ToString::to_string);
    match event {
        Event::SessionError { message } => {
            error!(event_id = envelope.id, error = %message, "session error");
        }
        Event::TorrentError { message, .. } => {
            warn!(event_id = envelope.id, torrent_id = ?torrent_id, error = %message, "torrent error");
        }
        Event::SessionStats { .. } => {}
        _ => {
            info!(event_id = envelope.id, event_kind = event.kind(), torrent_id = ?torrent_id, "session event");
        }
    }
    Ok(())
}

/// Entry point for the Rivulet boot sequence.
///
/// # Errors
///
/// Returns an error if configuration, logging, wiring, or signal handling fails.
pub async fn run_app() -> AppResult<()> {
    let path = config_path();
    run_app_at(&path).await
}

async fn run_app_at(path: &Path) -> AppResult<()> {
    let loaded = load(path).map_err(|err| AppError::config("config.load", err))?;
    init_logging(&loaded.config.logging.logging_config())
        .map_err(|err| AppError::telemetry("telemetry.init", err))?;
    info!(path = %path.display(), "Rivulet bootstrap starting");
    for warning in &loaded.warnings {
        warn!(warning = %warning, "configuration value adjusted");
    }

    let app = App::build(&loaded, path.to_path_buf())?;
    app.start().await?;

    let signal = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
    let shutdown = app.shutdown().await;
    signal.map_err(|source| AppError::Signal { source })?;
    shutdown
}
