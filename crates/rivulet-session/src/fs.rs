//! [`FileSystem`] over the local disk.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rivulet_torrent_core::FileSystem;
use tracing::debug;

/// Local file system with a dedicated temporary directory.
#[derive(Debug, Clone)]
pub struct LocalFileSystem {
    temp_dir: PathBuf,
}

impl LocalFileSystem {
    /// File system whose temporary files live in `temp_dir`.
    #[must_use]
    pub fn new(temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
        }
    }

    /// Directory purged by [`FileSystem::clean_temp`].
    #[must_use]
    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }
}

impl FileSystem for LocalFileSystem {
    fn available_bytes(&self, dir: &Path) -> Result<u64> {
        // The destination may not exist yet; measure the closest existing ancestor.
        let probe = dir
            .ancestors()
            .find(|candidate| candidate.exists())
            .unwrap_or_else(|| Path::new("."));
        fs2::available_space(probe)
            .with_context(|| format!("failed to query free space for {}", probe.display()))
    }

    fn write_file(&self, path: &Path, contents: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
    }

    fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).with_context(|| format!("failed to read {}", path.display()))
    }

    fn delete_file(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("failed to delete {}", path.display())),
        }
    }

    fn list_files(&self, dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
        let entries =
            fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))?;
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| format!("failed to list {}", dir.display()))?;
            let path = entry.path();
            let matches = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(extension));
            if matches && entry.file_type().is_ok_and(|kind| kind.is_file()) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn clean_temp(&self) -> Result<()> {
        match fs::remove_dir_all(&self.temp_dir) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to purge temp directory {}", self.temp_dir.display())
                });
            }
        }
        fs::create_dir_all(&self.temp_dir).with_context(|| {
            format!("failed to recreate temp directory {}", self.temp_dir.display())
        })?;
        debug!(dir = %self.temp_dir.display(), "temp directory purged");
        Ok(())
    }
}
