//! Directory-backed [`TorrentRepository`].
//!
//! # Design
//! - Layout under the root: `torrents/<id>.json`, `resume/<id>.fastresume`,
//!   `tags/<id>.json`, and `session.state`.
//! - Every write goes to a sibling temp file which is synced and renamed into place, so a
//!   crash never leaves a torn record.
//! - Records are cached in memory after `open`; reads never touch the disk.
//! - The root is guarded by an exclusive lock file for the lifetime of the repository.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result, bail};
use fs2::FileExt;
use rivulet_torrent_core::{Torrent, TorrentId, TorrentRepository};
use tracing::{debug, warn};

const RECORDS_DIR: &str = "torrents";
const RESUME_DIR: &str = "resume";
const TAGS_DIR: &str = "tags";
const SESSION_STATE_FILE: &str = "session.state";
const LOCK_FILE: &str = "repository.lock";

/// Repository persisting records as JSON files under one directory.
pub struct FileRepository {
    root: PathBuf,
    records: Mutex<BTreeMap<TorrentId, Torrent>>,
    _lock: File,
}

impl FileRepository {
    /// Open (creating if needed) the repository rooted at `root`.
    ///
    /// Unreadable record files are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error when the directories cannot be created or another process holds
    /// the repository lock.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for dir in [RECORDS_DIR, RESUME_DIR, TAGS_DIR] {
            let path = root.join(dir);
            fs::create_dir_all(&path)
                .with_context(|| format!("failed to create repository directory {}", path.display()))?;
        }
        let lock_path = root.join(LOCK_FILE);
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("failed to open lock file {}", lock_path.display()))?;
        if lock.try_lock_exclusive().is_err() {
            bail!("repository {} is locked by another process", root.display());
        }

        let mut records = BTreeMap::new();
        let dir = root.join(RECORDS_DIR);
        let entries = fs::read_dir(&dir)
            .with_context(|| format!("failed to list records in {}", dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match load_record(&path) {
                Ok(record) => {
                    records.insert(record.id.clone(), record);
                }
                Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable torrent record"),
            }
        }
        debug!(root = %root.display(), records = records.len(), "opened torrent repository");
        Ok(Self {
            root,
            records: Mutex::new(records),
            _lock: lock,
        })
    }

    /// Root directory of the repository.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn records(&self) -> MutexGuard<'_, BTreeMap<TorrentId, Torrent>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_path(&self, id: &TorrentId) -> PathBuf {
        self.root.join(RECORDS_DIR).join(format!("{id}.json"))
    }

    fn resume_path(&self, id: &TorrentId) -> PathBuf {
        self.root.join(RESUME_DIR).join(format!("{id}.fastresume"))
    }

    fn tags_path(&self, id: &TorrentId) -> PathBuf {
        self.root.join(TAGS_DIR).join(format!("{id}.json"))
    }

    fn persist(&self, torrent: &Torrent) -> Result<()> {
        let serialised =
            serde_json::to_vec_pretty(torrent).context("failed to serialise torrent record")?;
        write_atomic(&self.record_path(&torrent.id), &serialised)
    }
}

impl TorrentRepository for FileRepository {
    fn add_torrent(&self, torrent: &Torrent) -> Result<()> {
        let mut records = self.records();
        if records.contains_key(&torrent.id) {
            bail!("torrent {} already recorded", torrent.id);
        }
        self.persist(torrent)?;
        records.insert(torrent.id.clone(), torrent.clone());
        Ok(())
    }

    fn update_torrent(&self, torrent: &Torrent) -> Result<()> {
        let mut records = self.records();
        self.persist(torrent)?;
        records.insert(torrent.id.clone(), torrent.clone());
        Ok(())
    }

    fn delete_torrent(&self, id: &TorrentId) -> Result<()> {
        let mut records = self.records();
        for path in [self.record_path(id), self.resume_path(id), self.tags_path(id)] {
            remove_if_present(&path)?;
        }
        records.remove(id);
        Ok(())
    }

    fn get_torrent_by_id(&self, id: &TorrentId) -> Result<Option<Torrent>> {
        Ok(self.records().get(id).cloned())
    }

    fn get_all_torrents(&self) -> Result<Vec<Torrent>> {
        Ok(self.records().values().cloned().collect())
    }

    fn add_fast_resume(&self, id: &TorrentId, data: &[u8]) -> Result<()> {
        write_atomic(&self.resume_path(id), data)
    }

    fn get_fast_resume_by_id(&self, id: &TorrentId) -> Result<Option<Vec<u8>>> {
        read_if_present(&self.resume_path(id))
    }

    fn set_tags(&self, id: &TorrentId, tags: &[String]) -> Result<()> {
        let mut tags = tags.to_vec();
        tags.sort();
        tags.dedup();
        let serialised = serde_json::to_vec(&tags).context("failed to serialise tags")?;
        write_atomic(&self.tags_path(id), &serialised)
    }

    fn tags_for(&self, id: &TorrentId) -> Result<Vec<String>> {
        let path = self.tags_path(id);
        match read_if_present(&path)? {
            Some(raw) => serde_json::from_slice(&raw)
                .with_context(|| format!("failed to parse tags at {}", path.display())),
            None => Ok(Vec::new()),
        }
    }

    fn save_session_state(&self, data: &[u8]) -> Result<()> {
        write_atomic(&self.root.join(SESSION_STATE_FILE), data)
    }

    fn load_session_state(&self) -> Result<Option<Vec<u8>>> {
        read_if_present(&self.root.join(SESSION_STATE_FILE))
    }
}

fn load_record(path: &Path) -> Result<Torrent> {
    let raw = fs::read(path)
        .with_context(|| format!("failed to read torrent record at {}", path.display()))?;
    serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse torrent record at {}", path.display()))
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&temp_path)
            .with_context(|| format!("failed to create temp file {}", temp_path.display()))?;
        file.write_all(contents)
            .with_context(|| format!("failed to write temp file {}", temp_path.display()))?;
        file.sync_all()
            .with_context(|| format!("failed to sync temp file {}", temp_path.display()))?;
    }
    fs::rename(&temp_path, path).with_context(|| {
        format!(
            "failed to move {} into place at {}",
            temp_path.display(),
            path.display()
        )
    })
}

fn read_if_present(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("failed to remove {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(hash: &str) -> Torrent {
        Torrent {
            id: TorrentId::new(hash),
            name: "ubuntu.iso".into(),
            download_path: PathBuf::from("/srv/downloads"),
            date_added: Utc::now(),
            error: None,
            manually_paused: false,
            downloading_metadata: false,
        }
    }

    #[test]
    fn records_survive_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        {
            let repo = FileRepository::open(dir.path())?;
            repo.add_torrent(&record("aa"))?;
            repo.add_fast_resume(&TorrentId::new("aa"), b"resume")?;
            repo.set_tags(&TorrentId::new("aa"), &["tv".into(), "hd".into(), "tv".into()])?;
            repo.save_session_state(b"dht")?;
            assert!(repo.add_torrent(&record("aa")).is_err());
        }
        let repo = FileRepository::open(dir.path())?;
        let id = TorrentId::new("aa");
        let loaded = repo.get_torrent_by_id(&id)?.expect("record");
        assert_eq!(loaded.name, "ubuntu.iso");
        assert_eq!(repo.get_fast_resume_by_id(&id)?, Some(b"resume".to_vec()));
        assert_eq!(repo.tags_for(&id)?, vec!["hd".to_string(), "tv".to_string()]);
        assert_eq!(repo.load_session_state()?, Some(b"dht".to_vec()));
        Ok(())
    }

    #[test]
    fn delete_removes_everything_and_tolerates_absent_ids() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let repo = FileRepository::open(dir.path())?;
        let id = TorrentId::new("bb");
        repo.delete_torrent(&id)?;
        repo.add_torrent(&record("bb"))?;
        repo.add_fast_resume(&id, b"x")?;
        repo.delete_torrent(&id)?;
        assert!(repo.get_torrent_by_id(&id)?.is_none());
        assert!(repo.get_fast_resume_by_id(&id)?.is_none());
        assert!(repo.get_all_torrents()?.is_empty());
        Ok(())
    }

    #[test]
    fn corrupt_records_are_skipped() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::create_dir_all(dir.path().join(RECORDS_DIR))?;
        fs::write(dir.path().join(RECORDS_DIR).join("cc.json"), b"{not json")?;
        let repo = FileRepository::open(dir.path())?;
        assert!(repo.get_all_torrents()?.is_empty());
        Ok(())
    }
}
