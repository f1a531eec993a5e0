//! External policy inputs and the single predicate that turns them into pause decisions.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::settings::SessionSettings;

/// Battery level at or below which the default battery guard pauses downloads.
pub const BATTERY_LOW_LEVEL: u8 = 15;

/// Address the streaming listener binds by default.
pub const DEFAULT_STREAMING_HOSTNAME: &str = "127.0.0.1";

/// Port the streaming listener binds by default.
pub const DEFAULT_STREAMING_PORT: u16 = 8800;

/// Behaviour flags read from the settings source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySnapshot {
    /// Pause when the battery runs low.
    pub battery_control: bool,
    /// Pause at [`Self::custom_battery_control_value`]; takes precedence over
    /// [`Self::battery_control`].
    pub custom_battery_control: bool,
    /// Custom battery threshold in percent.
    pub custom_battery_control_value: u8,
    /// Only download while charging.
    pub only_charging: bool,
    /// Only download on unmetered networks.
    pub unmetered_connections_only: bool,
    /// Pause while roaming.
    pub pause_on_roaming: bool,
    /// Ignore idle stop requests.
    pub keep_alive: bool,
    /// Request a stop once every download has finished.
    pub shutdown_downloads_complete: bool,
    /// Run the watch-directory service.
    pub watch_dir: bool,
    /// Directory scanned for new `.torrent` files.
    pub dir_to_watch: PathBuf,
    /// Move finished torrents to [`Self::move_after_download_in`].
    pub move_after_download: bool,
    /// Destination for finished torrents.
    pub move_after_download_in: PathBuf,
    /// Load an IP filter when the engine starts.
    pub ip_filtering: bool,
    /// eMule DAT or `PeerGuardian` P2P file.
    pub ip_filtering_file: PathBuf,
    /// Default download directory.
    pub save_torrents_in: PathBuf,
    /// Serve torrent files over HTTP while the engine runs.
    pub streaming_enabled: bool,
    /// Host the streaming listener binds.
    pub streaming_hostname: String,
    /// Port the streaming listener binds; `0` picks a free port.
    pub streaming_port: u16,
}

impl Default for PolicySnapshot {
    fn default() -> Self {
        Self {
            battery_control: false,
            custom_battery_control: false,
            custom_battery_control_value: BATTERY_LOW_LEVEL,
            only_charging: false,
            unmetered_connections_only: false,
            pause_on_roaming: false,
            keep_alive: true,
            shutdown_downloads_complete: false,
            watch_dir: false,
            dir_to_watch: PathBuf::new(),
            move_after_download: false,
            move_after_download_in: PathBuf::new(),
            ip_filtering: false,
            ip_filtering_file: PathBuf::new(),
            save_torrents_in: PathBuf::from("downloads"),
            streaming_enabled: false,
            streaming_hostname: DEFAULT_STREAMING_HOSTNAME.to_string(),
            streaming_port: DEFAULT_STREAMING_PORT,
        }
    }
}

/// Current network conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NetworkStatus {
    /// Connection is billed per byte.
    pub metered: bool,
    /// Device is roaming.
    pub roaming: bool,
}

/// Current power conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatteryStatus {
    /// Charge in percent.
    pub level: u8,
    /// External power is connected.
    pub charging: bool,
}

impl Default for BatteryStatus {
    fn default() -> Self {
        Self {
            level: 100,
            charging: true,
        }
    }
}

/// Identifies one setting whose value changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum SettingKey {
    ActiveDownloads,
    ActiveSeeds,
    ActiveLimit,
    MaxPeerListSize,
    ConnectionsLimit,
    ConnectionsLimitPerTorrent,
    UploadsLimitPerTorrent,
    DownloadRateLimit,
    UploadRateLimit,
    DhtEnabled,
    LsdEnabled,
    UtpEnabled,
    UpnpEnabled,
    NatPmpEnabled,
    EncryptMode,
    EncryptInConnections,
    EncryptOutConnections,
    PortRangeFirst,
    PortRangeSecond,
    UseRandomPort,
    ProxyType,
    ProxyAddress,
    ProxyPort,
    ProxyPeersToo,
    ProxyRequiresAuth,
    ProxyLogin,
    ProxyPassword,
    AnonymousMode,
    SeedingOutgoingConnections,
    ValidateHttpsTrackers,
    BatteryControl,
    CustomBatteryControl,
    CustomBatteryControlValue,
    OnlyCharging,
    UnmeteredConnectionsOnly,
    PauseOnRoaming,
    KeepAlive,
    ShutdownDownloadsComplete,
    WatchDir,
    DirToWatch,
    MoveAfterDownload,
    MoveAfterDownloadIn,
    IpFiltering,
    IpFilteringFile,
    SaveTorrentsIn,
    StreamingEnabled,
    StreamingHostname,
    StreamingPort,
}

macro_rules! changed_fields {
    ($old:expr, $new:expr, $($field:ident => $key:ident),+ $(,)?) => {{
        let mut keys = Vec::new();
        $(
            if $old.$field != $new.$field {
                keys.push(SettingKey::$key);
            }
        )+
        keys
    }};
}

impl SessionSettings {
    /// Keys whose values differ between `self` and `other`, in declaration order.
    #[must_use]
    pub fn changed_keys(&self, other: &Self) -> Vec<SettingKey> {
        changed_fields!(self, other,
            active_downloads => ActiveDownloads,
            active_seeds => ActiveSeeds,
            active_limit => ActiveLimit,
            max_peer_list_size => MaxPeerListSize,
            connections_limit => ConnectionsLimit,
            connections_limit_per_torrent => ConnectionsLimitPerTorrent,
            uploads_limit_per_torrent => UploadsLimitPerTorrent,
            download_rate_limit => DownloadRateLimit,
            upload_rate_limit => UploadRateLimit,
            dht_enabled => DhtEnabled,
            lsd_enabled => LsdEnabled,
            utp_enabled => UtpEnabled,
            upnp_enabled => UpnpEnabled,
            natpmp_enabled => NatPmpEnabled,
            encrypt_mode => EncryptMode,
            encrypt_in_connections => EncryptInConnections,
            encrypt_out_connections => EncryptOutConnections,
            port_range_first => PortRangeFirst,
            port_range_second => PortRangeSecond,
            use_random_port => UseRandomPort,
            proxy_type => ProxyType,
            proxy_address => ProxyAddress,
            proxy_port => ProxyPort,
            proxy_peers_too => ProxyPeersToo,
            proxy_requires_auth => ProxyRequiresAuth,
            proxy_login => ProxyLogin,
            proxy_password => ProxyPassword,
            anonymous_mode => AnonymousMode,
            seeding_outgoing_connections => SeedingOutgoingConnections,
            validate_https_trackers => ValidateHttpsTrackers,
        )
    }
}

impl PolicySnapshot {
    /// Keys whose values differ between `self` and `other`, in declaration order.
    #[must_use]
    pub fn changed_keys(&self, other: &Self) -> Vec<SettingKey> {
        changed_fields!(self, other,
            battery_control => BatteryControl,
            custom_battery_control => CustomBatteryControl,
            custom_battery_control_value => CustomBatteryControlValue,
            only_charging => OnlyCharging,
            unmetered_connections_only => UnmeteredConnectionsOnly,
            pause_on_roaming => PauseOnRoaming,
            keep_alive => KeepAlive,
            shutdown_downloads_complete => ShutdownDownloadsComplete,
            watch_dir => WatchDir,
            dir_to_watch => DirToWatch,
            move_after_download => MoveAfterDownload,
            move_after_download_in => MoveAfterDownloadIn,
            ip_filtering => IpFiltering,
            ip_filtering_file => IpFilteringFile,
            save_torrents_in => SaveTorrentsIn,
            streaming_enabled => StreamingEnabled,
            streaming_hostname => StreamingHostname,
            streaming_port => StreamingPort,
        )
    }
}

/// Notification published by a [`crate::PolicySource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicySignal {
    /// A configured value changed.
    SettingChanged(SettingKey),
    /// Network conditions changed.
    NetworkChanged(NetworkStatus),
    /// Power conditions changed.
    BatteryChanged(BatteryStatus),
}

/// Whether policy currently requires every non-manual torrent to be paused.
///
/// Each enabled guard is checked independently and any one of them is enough.
#[must_use]
pub const fn should_pause_torrents(
    policy: &PolicySnapshot,
    network: NetworkStatus,
    battery: BatteryStatus,
) -> bool {
    if policy.unmetered_connections_only && network.metered {
        return true;
    }
    if policy.pause_on_roaming && network.roaming {
        return true;
    }
    if policy.only_charging && !battery.charging {
        return true;
    }
    let threshold = if policy.custom_battery_control {
        Some(policy.custom_battery_control_value)
    } else if policy.battery_control {
        Some(BATTERY_LOW_LEVEL)
    } else {
        None
    };
    matches!(threshold, Some(threshold) if battery.level <= threshold)
}
