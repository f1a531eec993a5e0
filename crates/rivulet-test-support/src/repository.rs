//! In-memory [`TorrentRepository`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Result, bail};
use rivulet_torrent_core::{Torrent, TorrentId, TorrentRepository};

#[derive(Default)]
struct Tables {
    records: BTreeMap<TorrentId, Torrent>,
    resume: HashMap<TorrentId, Vec<u8>>,
    tags: HashMap<TorrentId, Vec<String>>,
    session_state: Option<Vec<u8>>,
    failing: HashSet<&'static str>,
}

/// Repository backed by maps; clones share the same tables.
#[derive(Clone, Default)]
pub struct MemoryRepository {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryRepository {
    /// Empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Repository seeded with `records`.
    #[must_use]
    pub fn with_records(records: impl IntoIterator<Item = Torrent>) -> Self {
        let repository = Self::new();
        {
            let mut tables = repository.lock();
            for record in records {
                tables.records.insert(record.id.clone(), record);
            }
        }
        repository
    }

    /// Make every later call to `operation` fail.
    pub fn fail(&self, operation: &'static str) {
        self.lock().failing.insert(operation);
    }

    /// Stored record, bypassing failure injection.
    #[must_use]
    pub fn record(&self, id: &TorrentId) -> Option<Torrent> {
        self.lock().records.get(id).cloned()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    /// Whether no record is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    /// Stored fast-resume blob, bypassing failure injection.
    #[must_use]
    pub fn fast_resume(&self, id: &TorrentId) -> Option<Vec<u8>> {
        self.lock().resume.get(id).cloned()
    }

    /// Stored session-state blob.
    #[must_use]
    pub fn session_state(&self) -> Option<Vec<u8>> {
        self.lock().session_state.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn call(&self, operation: &'static str) -> Result<MutexGuard<'_, Tables>> {
        let tables = self.lock();
        if tables.failing.contains(operation) {
            bail!("injected {operation} failure");
        }
        Ok(tables)
    }
}

impl TorrentRepository for MemoryRepository {
    fn add_torrent(&self, torrent: &Torrent) -> Result<()> {
        let mut tables = self.call("add_torrent")?;
        if tables.records.contains_key(&torrent.id) {
            bail!("torrent {} already recorded", torrent.id);
        }
        tables.records.insert(torrent.id.clone(), torrent.clone());
        Ok(())
    }

    fn update_torrent(&self, torrent: &Torrent) -> Result<()> {
        let mut tables = self.call("update_torrent")?;
        tables.records.insert(torrent.id.clone(), torrent.clone());
        Ok(())
    }

    fn delete_torrent(&self, id: &TorrentId) -> Result<()> {
        let mut tables = self.call("delete_torrent")?;
        tables.records.remove(id);
        tables.resume.remove(id);
        tables.tags.remove(id);
        Ok(())
    }

    fn get_torrent_by_id(&self, id: &TorrentId) -> Result<Option<Torrent>> {
        Ok(self.call("get_torrent_by_id")?.records.get(id).cloned())
    }

    fn get_all_torrents(&self) -> Result<Vec<Torrent>> {
        Ok(self
            .call("get_all_torrents")?
            .records
            .values()
            .cloned()
            .collect())
    }

    fn add_fast_resume(&self, id: &TorrentId, data: &[u8]) -> Result<()> {
        self.call("add_fast_resume")?
            .resume
            .insert(id.clone(), data.to_vec());
        Ok(())
    }

    fn get_fast_resume_by_id(&self, id: &TorrentId) -> Result<Option<Vec<u8>>> {
        Ok(self.call("get_fast_resume_by_id")?.resume.get(id).cloned())
    }

    fn set_tags(&self, id: &TorrentId, tags: &[String]) -> Result<()> {
        let mut tags = tags.to_vec();
        tags.sort();
        tags.dedup();
        self.call("set_tags")?.tags.insert(id.clone(), tags);
        Ok(())
    }

    fn tags_for(&self, id: &TorrentId) -> Result<Vec<String>> {
        Ok(self
            .call("tags_for")?
            .tags
            .get(id)
            .cloned()
            .unwrap_or_default())
    }

    fn save_session_state(&self, data: &[u8]) -> Result<()> {
        self.call("save_session_state")?.session_state = Some(data.to_vec());
        Ok(())
    }

    fn load_session_state(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.call("load_session_state")?.session_state.clone())
    }
}
