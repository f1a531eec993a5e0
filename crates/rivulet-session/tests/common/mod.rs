#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use rivulet_events::{Event, EventBus, EventFilter, EventStream};
use rivulet_session::{
    CoordinatorConfig, EngineState, LocalFileSystem, MemoryProbe, MemorySession,
    SessionCoordinator, SessionDeps,
};
use rivulet_test_support::{ManualPolicy, MemoryRepository, TorrentFixture};
use rivulet_torrent_core::{AddTorrentParams, PolicySnapshot, Torrent, TorrentId};
use tempfile::TempDir;
use tokio::time::{sleep, timeout};
use tokio_stream::StreamExt;

pub const WAIT: Duration = Duration::from_secs(2);

pub struct Harness {
    pub coordinator: SessionCoordinator,
    pub probe: MemoryProbe,
    pub repository: MemoryRepository,
    pub policy: ManualPolicy,
    pub events: EventBus,
    pub dir: TempDir,
}

/// Policy tests start from: no keep-alive, downloads under the temp dir.
pub fn test_policy(dir: &TempDir) -> PolicySnapshot {
    PolicySnapshot {
        keep_alive: false,
        save_torrents_in: dir.path().join("downloads"),
        ..PolicySnapshot::default()
    }
}

impl Harness {
    pub fn new() -> Result<Self> {
        Self::with_policy(test_policy)
    }

    pub fn with_policy(policy: impl FnOnce(&TempDir) -> PolicySnapshot) -> Result<Self> {
        Self::with_repository(MemoryRepository::new(), policy)
    }

    pub fn with_repository(
        repository: MemoryRepository,
        policy: impl FnOnce(&TempDir) -> PolicySnapshot,
    ) -> Result<Self> {
        let dir = tempfile::tempdir().context("temp dir")?;
        let policy = ManualPolicy::new(policy(&dir));
        let (session, probe) = MemorySession::new();
        let events = EventBus::new();
        let mut config = CoordinatorConfig::new(dir.path().join("metadata"));
        config.alert_poll_interval = Duration::from_millis(10);
        config.status_interval = Duration::from_millis(25);
        config.watch_interval = Duration::from_millis(25);
        let coordinator = SessionCoordinator::new(
            SessionDeps {
                session: Box::new(session),
                repository: Arc::new(repository.clone()),
                file_system: Arc::new(LocalFileSystem::new(dir.path().join("tmp"))),
                policy: Arc::new(policy.clone()),
                events: events.clone(),
                metrics: None,
            },
            config,
        )?;
        Ok(Self {
            coordinator,
            probe,
            repository,
            policy,
            events,
            dir,
        })
    }

    pub fn subscribe(&self) -> EventStream {
        self.events.subscribe(EventFilter::All)
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub async fn start(&self) -> Result<()> {
        self.coordinator.start().await?;
        self.reach(EngineState::Running).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.coordinator.force_stop().await?;
        self.reach(EngineState::Stopped).await
    }

    pub async fn reach(&self, state: EngineState) -> Result<()> {
        timeout(WAIT, self.coordinator.wait_for_state(state))
            .await
            .with_context(|| format!("engine never reached {state}"))
    }

    pub fn params(&self, fixture: &TorrentFixture) -> Result<AddTorrentParams> {
        fixture.params(self.path("downloads"))
    }

    pub async fn add(&self, fixture: &TorrentFixture) -> Result<Torrent> {
        Ok(self.coordinator.add_torrent(self.params(fixture)?).await?)
    }

    /// Round-trip a command so everything queued before it has been handled.
    pub async fn settle(&self) -> Result<()> {
        self.coordinator.reschedule_torrents().await?;
        Ok(())
    }
}

/// Next event satisfying `accept`, skipping the rest.
pub async fn next_event(stream: &mut EventStream, accept: impl Fn(&Event) -> bool) -> Result<Event> {
    timeout(WAIT, async {
        while let Some(envelope) = stream.next().await {
            if accept(&envelope.event) {
                return Some(envelope.event);
            }
        }
        None
    })
    .await
    .context("timed out waiting for event")?
    .context("event stream closed")
}

/// Poll `check` until it holds.
pub async fn eventually(mut check: impl FnMut() -> bool) -> Result<()> {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return Ok(());
        }
        sleep(Duration::from_millis(5)).await;
    }
    bail!("condition never held")
}

pub fn is_for(id: &TorrentId) -> impl Fn(&Event) -> bool + '_ {
    move |event| event.torrent_id() == Some(id)
}
