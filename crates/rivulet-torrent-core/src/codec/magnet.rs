use std::fmt::Write as _;

use data_encoding::BASE32;
use rivulet_events::TorrentId;
use url::Url;
use url::form_urlencoded::byte_serialize;

use crate::error::{TorrentError, TorrentResult};
use crate::model::{MagnetInfo, Priority};

const BTIH_PREFIX: &str = "urn:btih:";
const HEX_HASH_LEN: usize = 40;
const BASE32_HASH_LEN: usize = 32;
/// Highest file index accepted in a `so` selection.
const MAX_SELECTED_INDEX: usize = 1 << 20;

/// Parse a magnet URI into its hash, name, trackers, and BEP53 file selection.
///
/// # Errors
///
/// Returns [`TorrentError::UnknownUri`] for non-magnet input and [`TorrentError::Decode`]
/// when the info-hash or the `so` selection is malformed.
pub fn parse_magnet(uri: &str) -> TorrentResult<MagnetInfo> {
    let unknown = || TorrentError::UnknownUri {
        uri: uri.to_string(),
    };
    let parsed = Url::parse(uri).map_err(|_| unknown())?;
    if parsed.scheme() != "magnet" {
        return Err(unknown());
    }

    let mut info_hash = None;
    let mut name = None;
    let mut trackers = Vec::new();
    let mut selection = None;
    for (key, value) in parsed.query_pairs() {
        match key.as_ref() {
            "xt" => {
                if let Some(hash) = value.strip_prefix(BTIH_PREFIX) {
                    info_hash = Some(decode_hash(hash)?);
                }
            }
            "dn" => name = Some(value.into_owned()),
            "tr" => {
                let url = value.into_owned();
                if !trackers.contains(&url) {
                    trackers.push(url);
                }
            }
            "so" => selection = Some(parse_selection(&value)?),
            _ => {}
        }
    }

    let info_hash = info_hash.ok_or_else(|| TorrentError::decode("magnet has no btih hash"))?;
    Ok(MagnetInfo {
        uri: uri.to_string(),
        name: name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| info_hash.to_string()),
        info_hash,
        trackers,
        file_priorities: selection.unwrap_or_default(),
    })
}

/// Build a magnet URI; `priorities` adds a compressed `so` selection when it selects a
/// strict subset of files.
#[must_use]
pub fn make_magnet(
    info_hash: &TorrentId,
    name: &str,
    trackers: &[String],
    priorities: Option<&[Priority]>,
) -> String {
    let mut uri = format!("magnet:?xt={BTIH_PREFIX}{info_hash}");
    if !name.is_empty() {
        let _ = write!(uri, "&dn={}", encode(name));
    }
    for tracker in trackers {
        let _ = write!(uri, "&tr={}", encode(tracker));
    }
    if let Some(priorities) = priorities
        && let Some(selection) = compress_selection(priorities)
    {
        let _ = write!(uri, "&so={selection}");
    }
    uri
}

fn encode(value: &str) -> String {
    byte_serialize(value.as_bytes()).collect()
}

fn decode_hash(hash: &str) -> TorrentResult<TorrentId> {
    match hash.len() {
        HEX_HASH_LEN if hash.chars().all(|c| c.is_ascii_hexdigit()) => Ok(TorrentId::new(hash)),
        BASE32_HASH_LEN => BASE32
            .decode(hash.to_ascii_uppercase().as_bytes())
            .map(|raw| TorrentId::new(hex::encode(raw)))
            .map_err(|err| TorrentError::decode(format!("invalid base32 info-hash: {err}"))),
        len => Err(TorrentError::decode(format!(
            "invalid info-hash length {len}"
        ))),
    }
}

fn parse_selection(value: &str) -> TorrentResult<Vec<Priority>> {
    let invalid = || TorrentError::decode(format!("invalid file selection {value:?}"));
    let mut ranges = Vec::new();
    for item in value.split(',').map(str::trim).filter(|item| !item.is_empty()) {
        let (start, end) = match item.split_once('-') {
            Some((start, end)) => (start.parse::<usize>(), end.parse::<usize>()),
            None => (item.parse::<usize>(), item.parse::<usize>()),
        };
        let (Ok(start), Ok(end)) = (start, end) else {
            return Err(invalid());
        };
        if start > end {
            return Err(invalid());
        }
        if end >= MAX_SELECTED_INDEX {
            return Err(TorrentError::decode(format!(
                "file selection index {end} exceeds {MAX_SELECTED_INDEX}"
            )));
        }
        ranges.push((start, end));
    }
    let Some(len) = ranges
        .iter()
        .filter_map(|(_, end)| end.checked_add(1))
        .max()
    else {
        return Ok(Vec::new());
    };
    let mut priorities = vec![Priority::Ignore; len];
    for (start, end) in ranges {
        for slot in &mut priorities[start..=end] {
            *slot = Priority::Default;
        }
    }
    Ok(priorities)
}

fn compress_selection(priorities: &[Priority]) -> Option<String> {
    let selected: Vec<usize> = priorities
        .iter()
        .enumerate()
        .filter(|(_, priority)| **priority != Priority::Ignore)
        .map(|(index, _)| index)
        .collect();
    if selected.is_empty() || selected.len() == priorities.len() {
        return None;
    }

    let mut parts = Vec::new();
    let mut run_start = selected[0];
    let mut previous = selected[0];
    for &index in &selected[1..] {
        if index != previous + 1 {
            parts.push(format_run(run_start, previous));
            run_start = index;
        }
        previous = index;
    }
    parts.push(format_run(run_start, previous));
    Some(parts.join(","))
}

fn format_run(start: usize, end: usize) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{start}-{end}")
    }
}
