//! Domain records, command parameters, and read-only snapshots.

mod metainfo;
mod policy;
mod settings;
mod snapshot;
mod torrent;

pub use metainfo::{FileEntry, MagnetInfo, TorrentMetaInfo};
pub use policy::{
    BATTERY_LOW_LEVEL, BatteryStatus, DEFAULT_STREAMING_HOSTNAME, DEFAULT_STREAMING_PORT,
    NetworkStatus, PolicySignal, PolicySnapshot, SettingKey, should_pause_torrents,
};
pub use settings::{EncryptMode, ProxyType, SessionSettings};
pub use snapshot::{AdvancedTorrentInfo, PeerInfo, TorrentInfo, TrackerInfo, TrackerStatus};
pub use torrent::{AddTorrentParams, Priority, SpeedDirection, Torrent, TorrentSource};
