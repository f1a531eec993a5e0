//! Synthetic `.torrent` files.

use std::path::PathBuf;

use anyhow::Result;
use rivulet_torrent_core::{
    AddTorrentParams, TorrentId, TorrentMetaInfo, decode_metainfo, make_magnet,
};
use serde::Serialize;

const PIECE_LENGTH: u64 = 16 * 1024;
const PIECE_HASH_LEN: usize = 20;
const MAX_PIECES: u64 = 64;

#[derive(Serialize)]
struct RawTorrent<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    announce: Option<&'a str>,
    #[serde(rename = "announce-list", skip_serializing_if = "Vec::is_empty")]
    announce_list: Vec<Vec<&'a str>>,
    #[serde(rename = "created by")]
    created_by: &'a str,
    info: RawInfo<'a>,
}

#[derive(Serialize)]
struct RawInfo<'a> {
    name: &'a str,
    #[serde(rename = "piece length")]
    piece_length: u64,
    #[serde(with = "serde_bytes")]
    pieces: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    length: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    files: Vec<RawFile<'a>>,
}

#[derive(Serialize)]
struct RawFile<'a> {
    length: u64,
    path: Vec<&'a str>,
}

/// Builder for valid bencoded metainfo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentFixture {
    name: String,
    files: Vec<(String, u64)>,
    single: bool,
    trackers: Vec<String>,
}

impl TorrentFixture {
    /// Single-file torrent of `size` bytes.
    #[must_use]
    pub fn single(name: &str, size: u64) -> Self {
        Self {
            name: name.to_string(),
            files: vec![(name.to_string(), size)],
            single: true,
            trackers: Vec::new(),
        }
    }

    /// Multi-file torrent; each entry is a `/`-separated path and a size.
    #[must_use]
    pub fn multi(name: &str, files: &[(&str, u64)]) -> Self {
        Self {
            name: name.to_string(),
            files: files
                .iter()
                .map(|(path, size)| ((*path).to_string(), *size))
                .collect(),
            single: false,
            trackers: Vec::new(),
        }
    }

    /// Add an announce URL.
    #[must_use]
    pub fn tracker(mut self, url: &str) -> Self {
        self.trackers.push(url.to_string());
        self
    }

    /// Total payload size.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|(_, size)| size).sum()
    }

    /// Bencoded `.torrent` contents.
    ///
    /// The piece table is capped, so very large payloads stay cheap to describe.
    ///
    /// # Errors
    ///
    /// Returns an error when serialisation fails.
    pub fn bytes(&self) -> Result<Vec<u8>> {
        let pieces = self.total_size().div_ceil(PIECE_LENGTH).clamp(1, MAX_PIECES);
        let pieces = usize::try_from(pieces)?;
        let files = if self.single {
            Vec::new()
        } else {
            self.files
                .iter()
                .map(|(path, size)| RawFile {
                    length: *size,
                    path: path.split('/').collect(),
                })
                .collect()
        };
        let raw = RawTorrent {
            announce: self.trackers.first().map(String::as_str),
            announce_list: self
                .trackers
                .iter()
                .map(|url| vec![url.as_str()])
                .collect(),
            created_by: "rivulet-test-support",
            info: RawInfo {
                name: &self.name,
                piece_length: PIECE_LENGTH,
                pieces: vec![0xab; pieces * PIECE_HASH_LEN],
                length: self.single.then(|| self.total_size()),
                files,
            },
        };
        Ok(serde_bencode::to_bytes(&raw)?)
    }

    /// Decoded metainfo.
    ///
    /// # Errors
    ///
    /// Returns an error when the generated bytes fail to decode.
    pub fn meta(&self) -> Result<TorrentMetaInfo> {
        Ok(decode_metainfo(&self.bytes()?)?)
    }

    /// Info-hash of the generated metainfo.
    ///
    /// # Errors
    ///
    /// Returns an error when the generated bytes fail to decode.
    pub fn info_hash(&self) -> Result<TorrentId> {
        Ok(self.meta()?.info_hash)
    }

    /// Add parameters targeting `download_path`.
    ///
    /// # Errors
    ///
    /// Returns an error when the generated bytes fail to decode.
    pub fn params(&self, download_path: impl Into<PathBuf>) -> Result<AddTorrentParams> {
        Ok(AddTorrentParams::from_metainfo(
            &self.meta()?,
            download_path.into(),
        ))
    }

    /// Magnet URI for the same info-hash.
    ///
    /// # Errors
    ///
    /// Returns an error when the generated bytes fail to decode.
    pub fn magnet(&self) -> Result<String> {
        Ok(make_magnet(
            &self.info_hash()?,
            &self.name,
            &self.trackers,
            None,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_bytes_decode_to_the_described_layout() -> Result<()> {
        let fixture = TorrentFixture::multi("album", &[("cd1/01.flac", 40_000), ("cover.jpg", 1_000)])
            .tracker("http://tracker.example/announce");
        let meta = fixture.meta()?;
        assert_eq!(meta.name, "album");
        assert_eq!(meta.files.len(), 2);
        assert_eq!(meta.total_size, 41_000);
        assert_eq!(meta.num_pieces, 3);
        assert_eq!(meta.trackers, vec!["http://tracker.example/announce".to_string()]);
        Ok(())
    }

    #[test]
    fn names_change_the_info_hash() -> Result<()> {
        let a = TorrentFixture::single("a.iso", 10).info_hash()?;
        let b = TorrentFixture::single("b.iso", 10).info_hash()?;
        assert_ne!(a, b);
        assert_eq!(a, TorrentFixture::single("a.iso", 10).info_hash()?);
        Ok(())
    }
}
