use serde::{Deserialize, Serialize};

/// Protocol encryption preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptMode {
    /// Plaintext only.
    Disabled,
    /// Encrypt when the peer supports it.
    #[default]
    Enabled,
    /// Refuse plaintext peers.
    Forced,
}

/// Proxy used for peer and tracker connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyType {
    /// Direct connections.
    #[default]
    None,
    /// SOCKS4.
    Socks4,
    /// SOCKS5.
    Socks5,
    /// HTTP CONNECT.
    Http,
}

/// Engine-wide tunables, replaced wholesale on every update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Maximum concurrently downloading torrents.
    pub active_downloads: i32,
    /// Maximum concurrently seeding torrents.
    pub active_seeds: i32,
    /// Maximum active torrents overall.
    pub active_limit: i32,
    /// Peers remembered per torrent.
    pub max_peer_list_size: i32,
    /// Global connection cap.
    pub connections_limit: i32,
    /// Connection cap per torrent.
    pub connections_limit_per_torrent: i32,
    /// Upload slots per torrent.
    pub uploads_limit_per_torrent: i32,
    /// Global download rate in bytes/s, `0` means unlimited.
    pub download_rate_limit: i64,
    /// Global upload rate in bytes/s, `0` means unlimited.
    pub upload_rate_limit: i64,
    /// Distributed hash table.
    pub dht_enabled: bool,
    /// Local service discovery.
    pub lsd_enabled: bool,
    /// Micro transport protocol.
    pub utp_enabled: bool,
    /// `UPnP` port mapping.
    pub upnp_enabled: bool,
    /// NAT-PMP port mapping.
    pub natpmp_enabled: bool,
    /// Encryption mode.
    pub encrypt_mode: EncryptMode,
    /// Apply encryption to incoming connections.
    pub encrypt_in_connections: bool,
    /// Apply encryption to outgoing connections.
    pub encrypt_out_connections: bool,
    /// First listen port.
    pub port_range_first: u16,
    /// Last listen port.
    pub port_range_second: u16,
    /// Pick a random port inside the range.
    pub use_random_port: bool,
    /// Proxy kind.
    pub proxy_type: ProxyType,
    /// Proxy host.
    pub proxy_address: String,
    /// Proxy port.
    pub proxy_port: u16,
    /// Send peer traffic through the proxy too.
    pub proxy_peers_too: bool,
    /// Proxy requires credentials.
    pub proxy_requires_auth: bool,
    /// Proxy login.
    pub proxy_login: String,
    /// Proxy password.
    pub proxy_password: String,
    /// Hide identifying information from peers and trackers.
    pub anonymous_mode: bool,
    /// Open outgoing connections for seeding torrents.
    pub seeding_outgoing_connections: bool,
    /// Validate HTTPS tracker certificates.
    pub validate_https_trackers: bool,
}

impl SessionSettings {
    /// Default first listen port.
    pub const DEFAULT_PORT_RANGE_FIRST: u16 = 37000;
    /// Default last listen port.
    pub const DEFAULT_PORT_RANGE_SECOND: u16 = 57010;
    /// Default proxy port.
    pub const DEFAULT_PROXY_PORT: u16 = 8080;
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            active_downloads: 4,
            active_seeds: 4,
            active_limit: 6,
            max_peer_list_size: 200,
            connections_limit: 200,
            connections_limit_per_torrent: 40,
            uploads_limit_per_torrent: 4,
            download_rate_limit: 0,
            upload_rate_limit: 0,
            dht_enabled: true,
            lsd_enabled: true,
            utp_enabled: true,
            upnp_enabled: true,
            natpmp_enabled: true,
            encrypt_mode: EncryptMode::Enabled,
            encrypt_in_connections: true,
            encrypt_out_connections: true,
            port_range_first: Self::DEFAULT_PORT_RANGE_FIRST,
            port_range_second: Self::DEFAULT_PORT_RANGE_SECOND,
            use_random_port: true,
            proxy_type: ProxyType::None,
            proxy_address: String::new(),
            proxy_port: Self::DEFAULT_PROXY_PORT,
            proxy_peers_too: false,
            proxy_requires_auth: false,
            proxy_login: String::new(),
            proxy_password: String::new(),
            anonymous_mode: false,
            seeding_outgoing_connections: true,
            validate_https_trackers: true,
        }
    }
}
