//! File-system access for batch directories and batch files.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{StorageError, StorageResult};

/// A directory holding batch files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    path: PathBuf,
}

impl Directory {
    /// Use an existing directory path as-is.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Create the directory (and parents) if needed.
    pub fn create(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        fs::create_dir_all(&path).map_err(|e| StorageError::io(&path, e))?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-create the directory if something removed it.
    pub fn ensure_exists(&self) -> StorageResult<()> {
        fs::create_dir_all(&self.path).map_err(|e| StorageError::io(&self.path, e))
    }

    /// All regular files in the directory, in no particular order.
    pub fn files(&self) -> StorageResult<Vec<BatchFile>> {
        let entries = match fs::read_dir(&self.path) {
            Ok(entries) => entries,
            // An OS cache purge may remove the whole directory.
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&self.path, e)),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io(&self.path, e))?;
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                files.push(BatchFile::new(entry.path(), name.to_string()));
            }
        }
        Ok(files)
    }

    pub fn has_file(&self, name: &str) -> bool {
        self.path.join(name).is_file()
    }

    /// Handle to a file in this directory (existence is not checked).
    pub fn file(&self, name: &str) -> BatchFile {
        BatchFile::new(self.path.join(name), name.to_string())
    }

    /// Create an empty file. Fails with `AlreadyExists` instead of
    /// truncating a file someone else owns.
    pub fn create_file(&self, name: &str) -> StorageResult<BatchFile> {
        let path = self.path.join(name);
        let result = OpenOptions::new().write(true).create_new(true).open(&path);
        match result {
            Ok(_) => Ok(BatchFile::new(path, name.to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                // Directory vanished underneath us; recreate it once.
                self.ensure_exists()?;
                OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&path)
                    .map_err(|e| StorageError::io(&path, e))?;
                Ok(BatchFile::new(path, name.to_string()))
            }
            Err(e) => Err(StorageError::io(&path, e)),
        }
    }

    /// Sum of all file sizes.
    pub fn total_size(&self) -> StorageResult<u64> {
        let mut total = 0;
        for file in self.files()? {
            total += file.size()?;
        }
        Ok(total)
    }

    /// Move every file into `destination`, keeping names.
    ///
    /// A name already taken in `destination` is bumped by one (names are
    /// timestamps) so nothing there is overwritten. Returns the number of
    /// files moved. A file that fails to move is logged and left in place;
    /// the remaining files are still moved.
    pub fn move_all_files(&self, destination: &Directory) -> StorageResult<usize> {
        destination.ensure_exists()?;
        let mut moved = 0;
        for file in self.files()? {
            let Some(target) = destination.free_path_for(file.name()) else {
                warn!(file = %file.name(), "no free name in destination; batch left in place");
                continue;
            };
            match fs::rename(file.path(), &target) {
                Ok(()) => moved += 1,
                Err(e) => warn!(
                    file = %file.name(),
                    destination = %destination.path.display(),
                    error = %e,
                    "failed to move batch file"
                ),
            }
        }
        Ok(moved)
    }

    fn free_path_for(&self, name: &str) -> Option<PathBuf> {
        let path = self.path.join(name);
        if !path.exists() {
            return Some(path);
        }
        let base = name.parse::<u64>().ok()?;
        (1..=16u64)
            .map(|bump| self.path.join(base.saturating_add(bump).to_string()))
            .find(|candidate| !candidate.exists())
    }

    /// Delete every file. Returns the number of files deleted.
    pub fn delete_all_files(&self) -> StorageResult<usize> {
        let mut deleted = 0;
        for file in self.files()? {
            match file.delete() {
                Ok(()) => deleted += 1,
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!(file = %file.name(), error = %e, "failed to delete batch file"),
            }
        }
        Ok(deleted)
    }
}

/// One batch file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFile {
    path: PathBuf,
    name: String,
}

impl BatchFile {
    fn new(path: PathBuf, name: String) -> Self {
        Self { path, name }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn size(&self) -> StorageResult<u64> {
        fs::metadata(&self.path)
            .map(|m| m.len())
            .map_err(|e| StorageError::io(&self.path, e))
    }

    /// Append `data` with a single write so a partially failed append never
    /// interleaves with another writer's bytes.
    pub fn append(&self, data: &[u8]) -> StorageResult<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| StorageError::io(&self.path, e))?;
        file.write_all(data)
            .and_then(|_| file.flush())
            .map_err(|e| StorageError::io(&self.path, e))
    }

    pub fn open(&self) -> StorageResult<File> {
        File::open(&self.path).map_err(|e| StorageError::io(&self.path, e))
    }

    pub fn read_all(&self) -> StorageResult<Vec<u8>> {
        fs::read(&self.path).map_err(|e| StorageError::io(&self.path, e))
    }

    pub fn delete(&self) -> StorageResult<()> {
        fs::remove_file(&self.path).map_err(|e| StorageError::io(&self.path, e))
    }
}
