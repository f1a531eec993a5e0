use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rivulet_events::TorrentId;
use serde::{Deserialize, Serialize};

use super::torrent::Priority;

/// One file listed in a torrent's metainfo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Path relative to the torrent root.
    pub path: PathBuf,
    /// Size in bytes.
    pub size: u64,
}

/// Decoded `.torrent` metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorrentMetaInfo {
    /// Lowercase hex SHA-1 of the bencoded `info` dictionary.
    pub info_hash: TorrentId,
    /// Suggested torrent name.
    pub name: String,
    /// Free-form comment.
    pub comment: Option<String>,
    /// Creating client.
    pub created_by: Option<String>,
    /// Creation timestamp.
    pub creation_date: Option<DateTime<Utc>>,
    /// Sum of all file sizes.
    pub total_size: u64,
    /// Bytes per piece.
    pub piece_length: u64,
    /// Number of pieces.
    pub num_pieces: usize,
    /// Files in metainfo order.
    pub files: Vec<FileEntry>,
    /// Deduplicated tracker URLs.
    pub trackers: Vec<String>,
    /// The original bencoded bytes.
    #[serde(with = "serde_bytes")]
    pub bencode: Vec<u8>,
}

/// Result of parsing a magnet URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MagnetInfo {
    /// The URI exactly as submitted.
    pub uri: String,
    /// Info-hash from the `xt` parameter.
    pub info_hash: TorrentId,
    /// `dn` parameter, or the hash when absent.
    pub name: String,
    /// `tr` parameters.
    pub trackers: Vec<String>,
    /// BEP53 selection; empty when the URI selects nothing explicitly.
    pub file_priorities: Vec<Priority>,
}
