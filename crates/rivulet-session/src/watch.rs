//! Polling watch over the configured torrent directory.
//!
//! Each tick lists `*.torrent` files and adds new ones through the coordinator; files already
//! seen are skipped until they disappear.
#![allow(clippy::redundant_pub_crate)]

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::coordinator::WeakCoordinator;

const TORRENT_EXTENSION: &str = "torrent";

/// Polls a directory and adds every new `.torrent` file it finds.
pub(crate) struct WatchService {
    dir: PathBuf,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl WatchService {
    pub(crate) fn spawn(coordinator: WeakCoordinator, dir: PathBuf, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let watched = dir.clone();
        let handle = tokio::spawn(async move {
            info!(dir = %watched.display(), "watching directory for torrent files");
            let mut attempted: HashSet<PathBuf> = HashSet::new();
            loop {
                let Some(session) = coordinator.upgrade() else {
                    break;
                };
                let files = match session.file_system().list_files(&watched, TORRENT_EXTENSION) {
                    Ok(files) => files,
                    Err(err) => {
                        warn!(dir = %watched.display(), error = %err, "failed to scan watch directory");
                        Vec::new()
                    }
                };
                attempted.retain(|path| files.contains(path));
                for path in files {
                    if !attempted.insert(path.clone()) {
                        continue;
                    }
                    match session.add_torrent_file(&path, None, true).await {
                        Ok(torrent) => {
                            debug!(path = %path.display(), torrent_id = %torrent.id, "added torrent from watch directory");
                        }
                        Err(err) => {
                            warn!(path = %path.display(), error = %err, "failed to add torrent from watch directory");
                        }
                    }
                }
                drop(session);
                tokio::select! {
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(interval) => {}
                }
            }
            debug!(dir = %watched.display(), "watch directory service exited");
        });
        Self {
            dir,
            cancel,
            handle,
        }
    }

    pub(crate) fn dir(&self) -> &PathBuf {
        &self.dir
    }

    pub(crate) fn stop(self) {
        self.cancel.cancel();
        self.handle.abort();
        info!(dir = %self.dir.display(), "stopped watching directory");
    }
}
