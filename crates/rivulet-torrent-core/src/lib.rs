#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Engine-agnostic torrent model, error taxonomy, and collaborator interfaces.
//!
//! Layout: `model/` (records, params, snapshots, settings, policy), `service/` (traits the
//! session coordinator consumes), `codec/` (metainfo and magnet parsing), `ipfilter.rs`
//! (eMule DAT and `PeerGuardian` P2P rule parsing), `error.rs` (per-command errors).

pub mod codec;
pub mod error;
pub mod ipfilter;
pub mod model;
pub mod service;

pub use codec::{decode_metainfo, make_magnet, parse_magnet};
pub use error::{TorrentError, TorrentResult};
pub use ipfilter::{IpFilter, IpFilterError, IpRange};
pub use model::{
    AddTorrentParams, AdvancedTorrentInfo, BATTERY_LOW_LEVEL, BatteryStatus,
    DEFAULT_STREAMING_HOSTNAME, DEFAULT_STREAMING_PORT, EncryptMode, FileEntry, MagnetInfo,
    NetworkStatus, PeerInfo, PolicySignal, PolicySnapshot, Priority, ProxyType, SessionSettings,
    SettingKey, SpeedDirection, Torrent, TorrentInfo, TorrentMetaInfo, TorrentSource, TrackerInfo,
    TrackerStatus, should_pause_torrents,
};
pub use rivulet_events::{SessionStats, TorrentId, TorrentStateCode};
pub use service::{
    FileSystem, NativeAlert, NativeSession, NativeTorrentStatus, PolicySource, TorrentDescriptor,
    TorrentRepository,
};
