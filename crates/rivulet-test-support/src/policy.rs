//! Policy source driven directly by tests.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rivulet_torrent_core::{
    BatteryStatus, NetworkStatus, PolicySignal, PolicySnapshot, PolicySource, SessionSettings,
};
use tokio::sync::broadcast;

const SIGNAL_BUFFER: usize = 64;

#[derive(Default)]
struct Conditions {
    policy: PolicySnapshot,
    settings: SessionSettings,
    network: NetworkStatus,
    battery: BatteryStatus,
}

/// [`PolicySource`] whose values change only when a test says so.
///
/// Every setter publishes the matching [`PolicySignal`]s; clones share state.
#[derive(Clone)]
pub struct ManualPolicy {
    conditions: Arc<Mutex<Conditions>>,
    signals: broadcast::Sender<PolicySignal>,
}

impl Default for ManualPolicy {
    fn default() -> Self {
        Self::new(PolicySnapshot::default())
    }
}

impl ManualPolicy {
    /// Source starting from `policy`, default settings, an unmetered network and a full
    /// charging battery.
    #[must_use]
    pub fn new(policy: PolicySnapshot) -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_BUFFER);
        Self {
            conditions: Arc::new(Mutex::new(Conditions {
                policy,
                ..Conditions::default()
            })),
            signals,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Conditions> {
        self.conditions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, signal: PolicySignal) {
        let _ = self.signals.send(signal);
    }

    /// Replace the policy, signalling every changed key.
    pub fn set_policy(&self, policy: PolicySnapshot) {
        let changed = {
            let mut conditions = self.lock();
            let changed = conditions.policy.changed_keys(&policy);
            conditions.policy = policy;
            changed
        };
        for key in changed {
            self.publish(PolicySignal::SettingChanged(key));
        }
    }

    /// Edit the policy in place, signalling every changed key.
    pub fn update_policy(&self, edit: impl FnOnce(&mut PolicySnapshot)) {
        let mut policy = self.policy();
        edit(&mut policy);
        self.set_policy(policy);
    }

    /// Replace the engine settings, signalling every changed key.
    pub fn set_settings(&self, settings: SessionSettings) {
        let changed = {
            let mut conditions = self.lock();
            let changed = conditions.settings.changed_keys(&settings);
            conditions.settings = settings;
            changed
        };
        for key in changed {
            self.publish(PolicySignal::SettingChanged(key));
        }
    }

    /// Report new network conditions.
    pub fn set_network(&self, network: NetworkStatus) {
        self.lock().network = network;
        self.publish(PolicySignal::NetworkChanged(network));
    }

    /// Report new power conditions.
    pub fn set_battery(&self, battery: BatteryStatus) {
        self.lock().battery = battery;
        self.publish(PolicySignal::BatteryChanged(battery));
    }
}

impl PolicySource for ManualPolicy {
    fn policy(&self) -> PolicySnapshot {
        self.lock().policy.clone()
    }

    fn session_settings(&self) -> SessionSettings {
        self.lock().settings.clone()
    }

    fn network(&self) -> NetworkStatus {
        self.lock().network
    }

    fn battery(&self) -> BatteryStatus {
        self.lock().battery
    }

    fn subscribe(&self) -> broadcast::Receiver<PolicySignal> {
        self.signals.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivulet_torrent_core::SettingKey;

    #[test]
    fn setters_publish_one_signal_per_changed_key() {
        let policy = ManualPolicy::default();
        let mut rx = policy.subscribe();
        policy.update_policy(|snapshot| {
            snapshot.keep_alive = !snapshot.keep_alive;
            snapshot.watch_dir = !snapshot.watch_dir;
        });
        assert_eq!(
            rx.try_recv().ok(),
            Some(PolicySignal::SettingChanged(SettingKey::KeepAlive))
        );
        assert_eq!(
            rx.try_recv().ok(),
            Some(PolicySignal::SettingChanged(SettingKey::WatchDir))
        );
        assert!(rx.try_recv().is_err());

        let metered = NetworkStatus {
            metered: true,
            roaming: false,
        };
        policy.set_network(metered);
        assert_eq!(rx.try_recv().ok(), Some(PolicySignal::NetworkChanged(metered)));
        assert_eq!(policy.network(), metered);
    }
}
