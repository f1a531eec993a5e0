//! Read-copy-update settings cell and the typed settings-change dispatch table.
//!
//! # Design
//! - Readers take an `Arc` snapshot; writers swap the whole value, so no reader ever sees
//!   a half-applied update.
//! - Each [`SettingKey`] maps to exactly one [`SettingHandler`] through a lookup table
//!   built once; the coordinator never branches on setting names.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use rivulet_torrent_core::{SessionSettings, SettingKey};

/// Shared read-mostly settings value.
#[derive(Debug, Clone, Default)]
pub struct SettingsCell {
    current: Arc<RwLock<Arc<SessionSettings>>>,
}

impl SettingsCell {
    /// Cell holding `settings`.
    #[must_use]
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(settings))),
        }
    }

    /// Consistent snapshot of the current value.
    #[must_use]
    pub fn load(&self) -> Arc<SessionSettings> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Replace the value; returns `false` when it was already equal.
    pub(crate) fn store(&self, settings: SessionSettings) -> bool {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if **guard == settings {
            return false;
        }
        *guard = Arc::new(settings);
        true
    }
}

/// Copies one field from the incoming settings into the value being built.
pub type SettingsPatch = fn(&mut SessionSettings, &SessionSettings);

/// What the coordinator does when one setting changes.
#[derive(Clone, Copy)]
pub enum SettingHandler {
    /// Re-evaluate policy and pause or resume torrents.
    Reschedule,
    /// Patch the engine settings and push the whole value to the engine.
    Patch(SettingsPatch),
    /// Reload or clear the IP filter.
    IpFilter,
    /// Restart or stop the watch-directory service.
    WatchDirectory,
    /// Rebind or stop the streaming listener.
    StreamingListener,
    /// Read on demand; nothing to apply.
    Ignore,
}

impl std::fmt::Debug for SettingHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Reschedule => "Reschedule",
            Self::Patch(_) => "Patch",
            Self::IpFilter => "IpFilter",
            Self::WatchDirectory => "WatchDirectory",
            Self::StreamingListener => "StreamingListener",
            Self::Ignore => "Ignore",
        })
    }
}

macro_rules! patches {
    ($table:ident, $($key:ident => $field:ident),+ $(,)?) => {
        $(
            $table.insert(
                SettingKey::$key,
                SettingHandler::Patch(|target, source| target.$field.clone_from(&source.$field)),
            );
        )+
    };
}

/// Lookup table from setting key to handler.
#[derive(Debug, Clone)]
pub struct SettingsDispatch {
    handlers: HashMap<SettingKey, SettingHandler>,
}

impl Default for SettingsDispatch {
    fn default() -> Self {
        Self::standard()
    }
}

impl SettingsDispatch {
    /// The table used by the coordinator.
    #[must_use]
    pub fn standard() -> Self {
        let mut handlers = HashMap::new();
        patches!(handlers,
            ActiveDownloads => active_downloads,
            ActiveSeeds => active_seeds,
            ActiveLimit => active_limit,
            MaxPeerListSize => max_peer_list_size,
            ConnectionsLimit => connections_limit,
            ConnectionsLimitPerTorrent => connections_limit_per_torrent,
            UploadsLimitPerTorrent => uploads_limit_per_torrent,
            DownloadRateLimit => download_rate_limit,
            UploadRateLimit => upload_rate_limit,
            DhtEnabled => dht_enabled,
            LsdEnabled => lsd_enabled,
            UtpEnabled => utp_enabled,
            UpnpEnabled => upnp_enabled,
            NatPmpEnabled => natpmp_enabled,
            EncryptMode => encrypt_mode,
            EncryptInConnections => encrypt_in_connections,
            EncryptOutConnections => encrypt_out_connections,
            PortRangeFirst => port_range_first,
            PortRangeSecond => port_range_second,
            UseRandomPort => use_random_port,
            ProxyType => proxy_type,
            ProxyAddress => proxy_address,
            ProxyPort => proxy_port,
            ProxyPeersToo => proxy_peers_too,
            ProxyRequiresAuth => proxy_requires_auth,
            ProxyLogin => proxy_login,
            ProxyPassword => proxy_password,
            AnonymousMode => anonymous_mode,
            SeedingOutgoingConnections => seeding_outgoing_connections,
            ValidateHttpsTrackers => validate_https_trackers,
        );
        for key in [
            SettingKey::BatteryControl,
            SettingKey::CustomBatteryControl,
            SettingKey::CustomBatteryControlValue,
            SettingKey::OnlyCharging,
            SettingKey::UnmeteredConnectionsOnly,
            SettingKey::PauseOnRoaming,
        ] {
            handlers.insert(key, SettingHandler::Reschedule);
        }
        handlers.insert(SettingKey::WatchDir, SettingHandler::WatchDirectory);
        handlers.insert(SettingKey::DirToWatch, SettingHandler::WatchDirectory);
        handlers.insert(SettingKey::IpFiltering, SettingHandler::IpFilter);
        handlers.insert(SettingKey::IpFilteringFile, SettingHandler::IpFilter);
        for key in [
            SettingKey::StreamingEnabled,
            SettingKey::StreamingHostname,
            SettingKey::StreamingPort,
        ] {
            handlers.insert(key, SettingHandler::StreamingListener);
        }
        Self { handlers }
    }

    /// Handler for `key`; unmapped keys are ignored.
    #[must_use]
    pub fn handler(&self, key: SettingKey) -> SettingHandler {
        self.handlers
            .get(&key)
            .copied()
            .unwrap_or(SettingHandler::Ignore)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_swaps_whole_value_and_reports_no_change() {
        let cell = SettingsCell::new(SessionSettings::default());
        let before = cell.load();
        assert!(!cell.store(SessionSettings::default()));

        let next = SessionSettings {
            dht_enabled: false,
            ..SessionSettings::default()
        };
        assert!(cell.store(next));
        assert!(before.dht_enabled);
        assert!(!cell.load().dht_enabled);
    }

    #[test]
    fn patch_copies_only_its_field() {
        let dispatch = SettingsDispatch::standard();
        let incoming = SessionSettings {
            port_range_first: 6881,
            proxy_address: "proxy.local".into(),
            ..SessionSettings::default()
        };
        let mut target = SessionSettings::default();
        let SettingHandler::Patch(patch) = dispatch.handler(SettingKey::PortRangeFirst) else {
            panic!("port range is a patch");
        };
        patch(&mut target, &incoming);
        assert_eq!(target.port_range_first, 6881);
        assert!(target.proxy_address.is_empty());
    }

    #[test]
    fn every_key_has_the_expected_handler_family() {
        let dispatch = SettingsDispatch::standard();
        assert!(matches!(
            dispatch.handler(SettingKey::UnmeteredConnectionsOnly),
            SettingHandler::Reschedule
        ));
        assert!(matches!(
            dispatch.handler(SettingKey::DirToWatch),
            SettingHandler::WatchDirectory
        ));
        assert!(matches!(
            dispatch.handler(SettingKey::IpFilteringFile),
            SettingHandler::IpFilter
        ));
        assert!(matches!(
            dispatch.handler(SettingKey::StreamingPort),
            SettingHandler::StreamingListener
        ));
        assert!(matches!(
            dispatch.handler(SettingKey::KeepAlive),
            SettingHandler::Ignore
        ));
        let changed = SessionSettings {
            anonymous_mode: true,
            ..SessionSettings::default()
        }
        .changed_keys(&SessionSettings::default());
        for key in changed {
            assert!(matches!(dispatch.handler(key), SettingHandler::Patch(_)));
        }
    }
}
