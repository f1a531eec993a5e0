//! Configuration-backed policy source and its file watcher.
//!
//! # Design
//! - `ConfigPolicySource` holds the current policy and settings and publishes one
//!   `PolicySignal::SettingChanged` per key that differs after each reload.
//! - Device conditions are not part of the file; hosts push them through
//!   `set_network`/`set_battery`.
//! - `ConfigWatcher` polls the file's modification time. A reload that fails to parse or
//!   validate is logged and the previous values stay in force.

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, SystemTime};

use rivulet_torrent_core::{
    BatteryStatus, NetworkStatus, PolicySignal, PolicySnapshot, PolicySource, SessionSettings,
    SettingKey,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ConfigResult;
use crate::loader::load;
use crate::model::AppConfig;

/// Interval between modification-time checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

const SIGNAL_BUFFER: usize = 128;

struct Current {
    policy: PolicySnapshot,
    settings: SessionSettings,
    network: NetworkStatus,
    battery: BatteryStatus,
}

/// [`PolicySource`] fed from the configuration file; clones share state.
#[derive(Clone)]
pub struct ConfigPolicySource {
    current: Arc<RwLock<Current>>,
    signals: broadcast::Sender<PolicySignal>,
}

impl ConfigPolicySource {
    /// Source seeded from `config`, assuming an unmetered network and external power.
    #[must_use]
    pub fn new(config: &AppConfig) -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_BUFFER);
        Self {
            current: Arc::new(RwLock::new(Current {
                policy: config.policy.clone(),
                settings: config.session.clone(),
                network: NetworkStatus::default(),
                battery: BatteryStatus::default(),
            })),
            signals,
        }
    }

    /// Replace policy and settings with those of `config`, signalling each changed key.
    pub fn apply(&self, config: &AppConfig) -> Vec<SettingKey> {
        let changed = {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            let mut changed = current.settings.changed_keys(&config.session);
            changed.extend(current.policy.changed_keys(&config.policy));
            current.settings = config.session.clone();
            current.policy = config.policy.clone();
            changed
        };
        for key in &changed {
            let _ = self.signals.send(PolicySignal::SettingChanged(*key));
        }
        changed
    }

    /// Record new network conditions; unchanged values publish nothing.
    pub fn set_network(&self, network: NetworkStatus) {
        let previous = {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut current.network, network)
        };
        if previous != network {
            let _ = self.signals.send(PolicySignal::NetworkChanged(network));
        }
    }

    /// Record new power conditions; unchanged values publish nothing.
    pub fn set_battery(&self, battery: BatteryStatus) {
        let previous = {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut current.battery, battery)
        };
        if previous != battery {
            let _ = self.signals.send(PolicySignal::BatteryChanged(battery));
        }
    }
}

impl PolicySource for ConfigPolicySource {
    fn policy(&self) -> PolicySnapshot {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .policy
            .clone()
    }

    fn session_settings(&self) -> SessionSettings {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .settings
            .clone()
    }

    fn network(&self) -> NetworkStatus {
        self.current.read().unwrap_or_else(PoisonError::into_inner).network
    }

    fn battery(&self) -> BatteryStatus {
        self.current.read().unwrap_or_else(PoisonError::into_inner).battery
    }

    fn subscribe(&self) -> broadcast::Receiver<PolicySignal> {
        self.signals.subscribe()
    }
}

/// Reloads the configuration file into a [`ConfigPolicySource`] when it changes.
pub struct ConfigWatcher {
    path: PathBuf,
    source: ConfigPolicySource,
    interval: Duration,
    seen: Option<SystemTime>,
}

impl ConfigWatcher {
    /// Watcher for `path`; the file's current modification time counts as already applied.
    #[must_use]
    pub fn new(path: PathBuf, source: ConfigPolicySource) -> Self {
        let seen = modified(&path);
        Self {
            path,
            source,
            interval: DEFAULT_POLL_INTERVAL,
            seen,
        }
    }

    /// Override the polling interval.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Reload when the modification time moved, returning the keys that changed.
    ///
    /// # Errors
    ///
    /// Returns the load error when the changed file is unreadable or invalid; the source
    /// keeps its previous values.
    pub fn poll_once(&mut self) -> ConfigResult<Vec<SettingKey>> {
        let stamp = modified(&self.path);
        if stamp == self.seen {
            return Ok(Vec::new());
        }
        self.seen = stamp;
        let loaded = load(&self.path)?;
        for warning in &loaded.warnings {
            warn!(path = %self.path.display(), warning = %warning, "configuration value adjusted");
        }
        let changed = self.source.apply(&loaded.config);
        if !changed.is_empty() {
            info!(path = %self.path.display(), changed = changed.len(), "configuration reloaded");
        }
        Ok(changed)
    }

    /// Poll on a background task until `cancel` fires.
    #[must_use]
    pub fn spawn(mut self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            debug!(path = %self.path.display(), "watching configuration file");
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(self.interval) => {}
                }
                if let Err(err) = self.poll_once() {
                    warn!(path = %self.path.display(), error = %err, "configuration reload failed; keeping previous values");
                }
            }
            debug!(path = %self.path.display(), "configuration watcher exited");
        })
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|meta| meta.modified()).ok()
}
