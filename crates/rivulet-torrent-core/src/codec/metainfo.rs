use std::path::PathBuf;

use chrono::DateTime;
use serde::Deserialize;
use serde_bencode::value::Value;
use sha1::{Digest, Sha1};

use crate::error::{TorrentError, TorrentResult};
use crate::model::{FileEntry, TorrentMetaInfo};
use rivulet_events::TorrentId;

const PIECE_HASH_LEN: usize = 20;

#[derive(Debug, Deserialize)]
struct RawTorrent {
    info: RawInfo,
    #[serde(default)]
    announce: Option<String>,
    #[serde(rename = "announce-list", default)]
    announce_list: Option<Vec<Vec<String>>>,
    #[serde(rename = "creation date", default)]
    creation_date: Option<i64>,
    #[serde(default)]
    comment: Option<String>,
    #[serde(rename = "created by", default)]
    created_by: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawInfo {
    name: String,
    #[serde(rename = "piece length")]
    piece_length: i64,
    #[serde(with = "serde_bytes")]
    pieces: Vec<u8>,
    #[serde(default)]
    length: Option<i64>,
    #[serde(default)]
    files: Vec<RawFile>,
}

#[derive(Debug, Deserialize)]
struct RawFile {
    length: i64,
    path: Vec<String>,
}

/// Decode `.torrent` bytes and derive the info-hash from the `info` dictionary.
///
/// # Errors
///
/// Returns [`TorrentError::Decode`] when the bytes are not bencode, the `info` dictionary
/// is missing, the name is empty, or the piece layout is inconsistent.
pub fn decode_metainfo(bytes: &[u8]) -> TorrentResult<TorrentMetaInfo> {
    let info_hash = info_hash_of(bytes)?;
    let raw: RawTorrent = serde_bencode::from_bytes(bytes)
        .map_err(|err| TorrentError::decode(format!("invalid metainfo: {err}")))?;

    let info = raw.info;
    if info.name.trim().is_empty() {
        return Err(TorrentError::decode("torrent name is empty"));
    }
    let piece_length = u64::try_from(info.piece_length)
        .ok()
        .filter(|len| *len > 0)
        .ok_or_else(|| TorrentError::decode("piece length must be positive"))?;
    if info.pieces.is_empty() || info.pieces.len() % PIECE_HASH_LEN != 0 {
        return Err(TorrentError::decode(
            "pieces must be a non-empty multiple of 20 bytes",
        ));
    }

    let files = if info.files.is_empty() {
        let length = info
            .length
            .ok_or_else(|| TorrentError::decode("single-file torrent without length"))?;
        vec![FileEntry {
            path: PathBuf::from(&info.name),
            size: non_negative(length)?,
        }]
    } else {
        info.files
            .iter()
            .map(|file| {
                let mut path = PathBuf::from(&info.name);
                path.extend(&file.path);
                Ok(FileEntry {
                    path,
                    size: non_negative(file.length)?,
                })
            })
            .collect::<TorrentResult<Vec<_>>>()?
    };
    let total_size = files.iter().map(|file| file.size).sum();

    let mut trackers: Vec<String> = Vec::new();
    let tiers = raw.announce_list.unwrap_or_default();
    for url in raw.announce.into_iter().chain(tiers.into_iter().flatten()) {
        if !url.is_empty() && !trackers.contains(&url) {
            trackers.push(url);
        }
    }

    Ok(TorrentMetaInfo {
        info_hash,
        name: info.name,
        comment: raw.comment.filter(|comment| !comment.is_empty()),
        created_by: raw.created_by.filter(|client| !client.is_empty()),
        creation_date: raw
            .creation_date
            .and_then(|secs| DateTime::from_timestamp(secs, 0)),
        total_size,
        piece_length,
        num_pieces: info.pieces.len() / PIECE_HASH_LEN,
        files,
        trackers,
        bencode: bytes.to_vec(),
    })
}

fn info_hash_of(bytes: &[u8]) -> TorrentResult<TorrentId> {
    let value: Value = serde_bencode::from_bytes(bytes)
        .map_err(|err| TorrentError::decode(format!("invalid bencode: {err}")))?;
    let Value::Dict(mut root) = value else {
        return Err(TorrentError::decode("metainfo root is not a dictionary"));
    };
    let info = root
        .remove(b"info".as_slice())
        .ok_or_else(|| TorrentError::decode("missing info dictionary"))?;
    let encoded = serde_bencode::to_bytes(&info)
        .map_err(|err| TorrentError::decode(format!("info dictionary: {err}")))?;
    Ok(TorrentId::new(hex::encode(Sha1::digest(&encoded))))
}

fn non_negative(length: i64) -> TorrentResult<u64> {
    u64::try_from(length).map_err(|_| TorrentError::decode("negative file length"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_file(name: &str) -> Vec<u8> {
        let info = format!(
            "d6:lengthi1024e4:name{}:{}12:piece lengthi512e6:pieces40:{}e",
            name.len(),
            name,
            "a".repeat(40)
        );
        format!(
            "d8:announce17:http://t.example/13:announce-listll17:http://t.example/el17:http://u.example/ee7:comment2:hi4:info{info}e"
        )
        .into_bytes()
    }

    #[test]
    fn decodes_single_file_torrent_and_hashes_info_dictionary() {
        let bytes = single_file("demo.bin");
        let meta = decode_metainfo(&bytes).expect("decode");
        assert_eq!(meta.name, "demo.bin");
        assert_eq!(meta.total_size, 1024);
        assert_eq!(meta.piece_length, 512);
        assert_eq!(meta.num_pieces, 2);
        assert_eq!(meta.files.len(), 1);
        assert_eq!(meta.comment.as_deref(), Some("hi"));
        assert_eq!(
            meta.trackers,
            vec![
                "http://t.example/".to_string(),
                "http://u.example/".to_string()
            ]
        );
        assert_eq!(meta.info_hash.as_str().len(), 40);
        assert_eq!(meta.bencode, bytes);

        let other = decode_metainfo(&single_file("other.bin")).expect("decode");
        assert_ne!(other.info_hash, meta.info_hash);
    }

    #[test]
    fn rejects_missing_info_and_bad_piece_layout() {
        assert!(matches!(
            decode_metainfo(b"d8:announce3:abce"),
            Err(TorrentError::Decode { .. })
        ));
        assert!(matches!(
            decode_metainfo(b"not bencode"),
            Err(TorrentError::Decode { .. })
        ));
        let broken = b"d4:infod6:lengthi1e4:name1:x12:piece lengthi16e6:pieces3:abcee";
        assert!(matches!(
            decode_metainfo(broken),
            Err(TorrentError::Decode { .. })
        ));
    }

    #[test]
    fn multi_file_paths_are_rooted_at_torrent_name() {
        let info = format!(
            "d5:filesld6:lengthi3e4:pathl1:a5:b.txteed6:lengthi4e4:pathl5:c.txteee4:name4:root12:piece lengthi16e6:pieces20:{}e",
            "p".repeat(20)
        );
        let bytes = format!("d4:info{info}e").into_bytes();
        let meta = decode_metainfo(&bytes).expect("decode");
        assert_eq!(meta.total_size, 7);
        assert_eq!(meta.files[0].path, PathBuf::from("root/a/b.txt"));
        assert_eq!(meta.files[1].path, PathBuf::from("root/c.txt"));
    }
}
