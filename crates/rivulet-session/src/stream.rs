//! HTTP listener that serves the files of live torrents.
//!
//! Layout: `GET /stream?torrent=<info-hash>&file=<index>` returns the file at that index
//! of the torrent's metainfo, read from its download directory.
//!
//! # Design
//! - Single byte ranges (`bytes=a-b`, `bytes=a-`) are answered with `206`; a start past
//!   the end of the file yields `416`.
//! - The entity tag identifies the torrent and file index; `If-None-Match` and `If-Range`
//!   are honoured against it.
//! - The listener only reads the registry and the stored metainfo. It never queues
//!   commands, so it cannot block the session worker.
#![allow(clippy::redundant_pub_crate)]

use std::io::SeekFrom;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use rivulet_torrent_core::{FileEntry, TorrentId, decode_metainfo};
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::coordinator::Shared;

const STREAM_PATH: &str = "/stream";
const OCTET_STREAM: &str = "application/octet-stream";
const DLNA_TRANSFER_MODE: &str = "Streaming";

/// Known media containers: extension, MIME type, DLNA content features.
const MEDIA_TYPES: &[(&str, &str, &str)] = &[
    (
        "mp4",
        "video/mp4",
        "DLNA.ORG_PN=AVC_MP4_BL_L3L_SD_AAC;DLNA.ORG_OP=01;DLNA.ORG_CI=0;DLNA.ORG_FLAGS=01700000000000000000000000000000",
    ),
    (
        "avi",
        "video/x-msvideo",
        "DLNA.ORG_PN=AVC_MP4_BL_L3L_SD_AAC;DLNA.ORG_OP=01;DLNA.ORG_CI=0;DLNA.ORG_FLAGS=01700000000000000000000000000000",
    ),
    (
        "mkv",
        "video/x-matroska",
        "DLNA.ORG_PN=AVC_MKV_MP_HD_AC3;DLNA.ORG_OP=01;DLNA.ORG_CI=0;DLNA.ORG_FLAGS=01700000000000000000000000000000",
    ),
];

/// Link to one file of a torrent on a streaming listener bound at `addr`.
#[must_use]
pub fn make_stream_url(addr: SocketAddr, torrent_id: &TorrentId, file_index: usize) -> String {
    format!("http://{addr}{STREAM_PATH}?file={file_index}&torrent={torrent_id}")
}

/// Running streaming listener.
pub(crate) struct StreamService {
    hostname: String,
    port: u16,
    local_addr: SocketAddr,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl StreamService {
    /// Bind `hostname:port` and start serving.
    pub(crate) async fn bind(
        shared: Arc<Shared>,
        hostname: &str,
        port: u16,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind((hostname, port)).await?;
        let local_addr = listener.local_addr()?;
        let router = Router::new()
            .route(STREAM_PATH, get(stream_file))
            .with_state(shared);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, router.into_make_service())
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(err) = served {
                warn!(error = %err, "streaming listener failed");
            }
            debug!(%local_addr, "streaming listener exited");
        });
        info!(%local_addr, "streaming listener started");
        Ok(Self {
            hostname: hostname.to_string(),
            port,
            local_addr,
            cancel,
            handle,
        })
    }

    /// Whether the listener was bound for `hostname:port`.
    pub(crate) fn serves(&self, hostname: &str, port: u16) -> bool {
        self.hostname == hostname && self.port == port
    }

    pub(crate) const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub(crate) fn stop(self) {
        self.cancel.cancel();
        self.handle.abort();
        info!(local_addr = %self.local_addr, "streaming listener stopped");
    }
}

#[derive(Debug, Deserialize)]
struct StreamQuery {
    torrent: String,
    file: usize,
}

/// Byte range selected for a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Selection {
    Full,
    Partial { start: u64, end: u64 },
    Unsatisfiable,
}

/// Resolve a `Range` header against a file of `size` bytes.
///
/// Malformed or unsupported ranges (suffix ranges, multiple ranges) select the whole file.
fn select_range(range: Option<&str>, size: u64) -> Selection {
    let Some(spec) = range.and_then(|value| value.trim().strip_prefix("bytes=")) else {
        return Selection::Full;
    };
    if spec.contains(',') {
        return Selection::Full;
    }
    let Some((start, end)) = spec.split_once('-') else {
        return Selection::Full;
    };
    let Ok(start) = start.trim().parse::<u64>() else {
        return Selection::Full;
    };
    if start >= size {
        return Selection::Unsatisfiable;
    }
    let last = size - 1;
    let end = match end.trim() {
        "" => last,
        end => match end.parse::<u64>() {
            Ok(end) if end >= start => end.min(last),
            _ => return Selection::Full,
        },
    };
    Selection::Partial { start, end }
}

fn header_str<'a>(headers: &'a HeaderMap, name: header::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn bare(status: StatusCode) -> Response {
    status.into_response()
}

async fn stream_file(
    State(shared): State<Arc<Shared>>,
    headers: HeaderMap,
    query: Result<Query<StreamQuery>, QueryRejection>,
) -> Response {
    let Ok(Query(query)) = query else {
        return bare(StatusCode::BAD_REQUEST);
    };
    let torrent_id = TorrentId::new(&query.torrent);
    let Some(task) = shared.registry.get(&torrent_id) else {
        return bare(StatusCode::NOT_FOUND);
    };
    let meta = match shared
        .fs
        .read_file(&shared.metainfo_path(&torrent_id))
        .map_err(|err| err.to_string())
        .and_then(|bytes| decode_metainfo(&bytes).map_err(|err| err.to_string()))
    {
        Ok(meta) => meta,
        Err(err) => {
            debug!(torrent_id = %torrent_id, error = %err, "no metainfo to stream from");
            return bare(StatusCode::NOT_FOUND);
        }
    };
    let Some(file) = meta.files.get(query.file) else {
        return bare(StatusCode::NOT_FOUND);
    };

    let etag = format!("\"{torrent_id}-{}\"", query.file);
    let range_allowed = header_str(&headers, header::IF_RANGE).is_none_or(|tag| tag == etag);
    let not_modified = header_str(&headers, header::IF_NONE_MATCH)
        .is_some_and(|tag| tag == "*" || tag == etag);
    let selection = if range_allowed {
        select_range(header_str(&headers, header::RANGE), file.size)
    } else {
        Selection::Full
    };

    let response = match selection {
        Selection::Unsatisfiable => Response::builder()
            .status(StatusCode::RANGE_NOT_SATISFIABLE)
            .header(header::CONTENT_RANGE, format!("bytes */{}", file.size))
            .header(header::ETAG, &etag)
            .body(Body::empty()),
        _ if not_modified => Response::builder()
            .status(StatusCode::NOT_MODIFIED)
            .header(header::ETAG, &etag)
            .body(Body::empty()),
        Selection::Full => {
            return file_response(&task.download_path, file, None, &etag).await;
        }
        Selection::Partial { start, end } => {
            return file_response(&task.download_path, file, Some((start, end)), &etag).await;
        }
    };
    response.unwrap_or_else(|err| {
        warn!(error = %err, "failed to build stream response");
        bare(StatusCode::INTERNAL_SERVER_ERROR)
    })
}

async fn file_response(
    download_path: &Path,
    file: &FileEntry,
    range: Option<(u64, u64)>,
    etag: &str,
) -> Response {
    let path = download_path.join(&file.path);
    let mut handle = match tokio::fs::File::open(&path).await {
        Ok(handle) => handle,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "stream file not readable");
            return bare(StatusCode::NOT_FOUND);
        }
    };
    let (status, start, len) = match range {
        Some((start, end)) => (StatusCode::PARTIAL_CONTENT, start, end - start + 1),
        None => (StatusCode::OK, 0, file.size),
    };
    if start > 0
        && let Err(err) = handle.seek(SeekFrom::Start(start)).await
    {
        warn!(path = %path.display(), error = %err, "failed to seek stream file");
        return bare(StatusCode::FORBIDDEN);
    }

    let name = file
        .path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = file
        .path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase());
    let media = extension.as_deref().and_then(|ext| {
        MEDIA_TYPES
            .iter()
            .find(|(known, _, _)| *known == ext)
            .map(|(_, mime, features)| (*mime, *features))
    });

    let mut builder = Response::builder()
        .status(status)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_LENGTH, len)
        .header(header::ETAG, etag)
        .header(
            header::CONTENT_TYPE,
            media.map_or(OCTET_STREAM, |(mime, _)| mime),
        );
    if let Ok(disposition) = HeaderValue::from_str(&format!("inline; filename=\"{name}\"")) {
        builder = builder.header(header::CONTENT_DISPOSITION, disposition);
    }
    if let Some((start, end)) = range {
        builder = builder.header(
            header::CONTENT_RANGE,
            format!("bytes {start}-{end}/{}", file.size),
        );
    }
    if let Some((_, features)) = media {
        builder = builder
            .header("contentfeatures.dlna.org", features)
            .header("transferMode.dlna.org", DLNA_TRANSFER_MODE);
    }
    let body = Body::from_stream(ReaderStream::new(handle.take(len)));
    builder.body(body).unwrap_or_else(|err| {
        warn!(error = %err, "failed to build stream response");
        bare(StatusCode::INTERNAL_SERVER_ERROR)
    })
}
