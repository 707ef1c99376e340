//! The on-disk home of a queue log.
//!
//! One file holds every queue record in append order. Recovery cuts a torn
//! final record off with `truncate`, and compaction swaps the whole file for
//! a snapshot with `replace`.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Suffix of the scratch file a compaction snapshot is written to.
const REPLACE_SUFFIX: &str = "compact";

/// Queue log stored in a single file.
///
/// The file length is cached, so offsets handed back by `append` line up
/// with the record framing the queue reads on the next start.
///
/// # Durability
///
/// A queue record counts as committed once `flush()` returns. It calls
/// `File::sync_data()`, so the record survives power loss as well as a
/// killed process. A compaction snapshot is written beside the log, synced,
/// renamed over it, and the parent directory is synced. A crash mid-way
/// leaves either the old log or the snapshot, never a mix.
///
/// # Example
///
/// ```no_run
/// use medsync_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut log = FileBackend::open(Path::new("queue.log")).unwrap();
/// let offset = log.append(b"enqueue record").unwrap();
/// log.flush().unwrap();
///
/// // Recovery found a torn record at `offset`.
/// log.truncate(offset).unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: RwLock<File>,
    size: RwLock<u64>,
}

impl FileBackend {
    /// Opens the queue log at `path`, starting an empty one if it is missing.
    ///
    /// Existing records are left as they are; the queue validates them on
    /// replay.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = Self::open_file(path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: RwLock::new(file),
            size: RwLock::new(size),
        })
    }

    /// Like [`FileBackend::open`], but first creates the directory the log
    /// lives in. Used on first launch, before the app data directory exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or the log cannot be created.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Path of the queue log.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_file(path: &Path) -> StorageResult<File> {
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?)
    }

    fn scratch_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".");
        name.push(REPLACE_SUFFIX);
        self.path.with_file_name(name)
    }

    #[cfg(unix)]
    fn sync_parent_dir(&self) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            let parent = if parent.as_os_str().is_empty() {
                Path::new(".")
            } else {
                parent
            };
            File::open(parent)?.sync_all()?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_parent_dir(&self) -> StorageResult<()> {
        Ok(())
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = *self.size.read();
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if data.is_empty() {
            return Ok(*self.size.read());
        }

        let mut file = self.file.write();
        let mut size = self.size.write();

        let offset = *size;
        file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        *size += data.len() as u64;

        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        let mut file = self.file.write();
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(*self.size.read())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let file = self.file.write();
        let mut size = self.size.write();

        if new_size > *size {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size: *size,
            });
        }

        file.set_len(new_size)?;
        file.sync_all()?;
        *size = new_size;

        Ok(())
    }

    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        let scratch = self.scratch_path();

        let mut tmp = File::create(&scratch)?;
        tmp.write_all(data)?;
        tmp.sync_all()?;
        drop(tmp);

        fs::rename(&scratch, &self.path)?;
        self.sync_parent_dir()?;

        let reopened = Self::open_file(&self.path)?;
        *self.file.write() = reopened;
        *self.size.write() = data.len() as u64;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_create_new() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.log");

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(path.exists());
    }

    #[test]
    fn file_append_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.log");

        let mut backend = FileBackend::open(&path).unwrap();

        assert_eq!(backend.append(b"enqueue").unwrap(), 0);
        assert_eq!(backend.append(b"remove").unwrap(), 7);
        assert_eq!(backend.size().unwrap(), 13);

        assert_eq!(backend.read_at(0, 13).unwrap(), b"enqueueremove");
        assert_eq!(backend.read_at(7, 6).unwrap(), b"remove");
    }

    #[test]
    fn file_read_past_end_fails() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&dir.path().join("queue.log")).unwrap();
        backend.append(b"hello").unwrap();

        let result = backend.read_at(3, 5);
        assert!(matches!(result, Err(StorageError::ReadPastEnd { .. })));
    }

    #[test]
    fn file_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.log");

        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(b"pending op").unwrap();
            backend.flush().unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 10);
        assert_eq!(backend.read_at(0, 10).unwrap(), b"pending op");
    }

    #[test]
    fn file_truncate_drops_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.log");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"complete-torn").unwrap();
        backend.truncate(8).unwrap();
        assert_eq!(backend.read_at(0, 8).unwrap(), b"complete");

        assert!(matches!(
            backend.truncate(100),
            Err(StorageError::TruncateBeyondEnd { .. })
        ));
    }

    #[test]
    fn file_append_after_torn_tail_cut_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.log");

        {
            let mut log = FileBackend::open(&path).unwrap();
            log.append(b"whole").unwrap();
            let torn = log.append(b"hal").unwrap();
            log.truncate(torn).unwrap();
            assert_eq!(log.append(b"next").unwrap(), torn);
            log.flush().unwrap();
        }

        let log = FileBackend::open(&path).unwrap();
        assert_eq!(log.size().unwrap(), 9);
        assert_eq!(log.read_at(0, 9).unwrap(), b"wholenext");
    }

    #[test]
    fn file_replace_swaps_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.log");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"a long history of records").unwrap();
        backend.replace(b"snapshot").unwrap();

        assert_eq!(backend.size().unwrap(), 8);
        assert_eq!(backend.read_at(0, 8).unwrap(), b"snapshot");

        // Appends continue after the new content.
        assert_eq!(backend.append(b"+").unwrap(), 8);
        drop(backend);

        let reopened = FileBackend::open(&path).unwrap();
        assert_eq!(reopened.read_at(0, 9).unwrap(), b"snapshot+");
        assert!(!dir.path().join("queue.log.compact").exists());
    }

    #[test]
    fn file_create_with_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("queue.log");

        let backend = FileBackend::open_with_create_dirs(&path).unwrap();
        assert_eq!(backend.path(), path);
        assert!(path.exists());
    }
}
