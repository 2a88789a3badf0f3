//! Offline data directory management.
//!
//! ```text
//! <data_dir>/
//! ├─ LOCK                # Advisory lock, one writer process at a time
//! ├─ queue.journal       # Pending outbound mutations
//! ├─ entities.journal    # Cached entity records
//! ├─ meta.journal        # Pull cursor and last-synced timestamp
//! └─ conflicts.journal   # Conflict records awaiting a decision
//! ```

use crate::error::{JournalError, JournalResult};
use crate::file::FileBackend;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const QUEUE_FILE: &str = "queue.journal";
const ENTITIES_FILE: &str = "entities.journal";
const META_FILE: &str = "meta.journal";
const CONFLICTS_FILE: &str = "conflicts.journal";

/// A locked directory holding a device's offline data.
///
/// Holding a `DataDir` guarantees that no other process writes the same
/// journals. The lock is released when the value is dropped.
#[derive(Debug)]
pub struct DataDir {
    path: PathBuf,
    _lock_file: File,
}

impl DataDir {
    /// Opens (creating if needed) and locks a data directory.
    ///
    /// Fails with [`JournalError::Locked`] if another `DataDir` holds it.
    pub fn open(path: &Path) -> JournalResult<Self> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }
        if !path.is_dir() {
            return Err(JournalError::Corrupted(format!(
                "data path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(JournalError::Locked(path.display().to_string()));
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the mutation queue journal.
    #[must_use]
    pub fn queue_path(&self) -> PathBuf {
        self.path.join(QUEUE_FILE)
    }

    /// Path of the entity store journal.
    #[must_use]
    pub fn entities_path(&self) -> PathBuf {
        self.path.join(ENTITIES_FILE)
    }

    /// Path of the sync metadata journal.
    #[must_use]
    pub fn meta_path(&self) -> PathBuf {
        self.path.join(META_FILE)
    }

    /// Path of the conflict record journal.
    #[must_use]
    pub fn conflicts_path(&self) -> PathBuf {
        self.path.join(CONFLICTS_FILE)
    }

    /// Opens the queue journal backend.
    pub fn queue_backend(&self) -> JournalResult<FileBackend> {
        FileBackend::open(&self.queue_path())
    }

    /// Opens the entity store journal backend.
    pub fn entities_backend(&self) -> JournalResult<FileBackend> {
        FileBackend::open(&self.entities_path())
    }

    /// Opens the sync metadata journal backend.
    pub fn meta_backend(&self) -> JournalResult<FileBackend> {
        FileBackend::open(&self.meta_path())
    }

    /// Opens the conflict record journal backend.
    pub fn conflicts_backend(&self) -> JournalResult<FileBackend> {
        FileBackend::open(&self.conflicts_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_directory() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("device");

        let dir = DataDir::open(&path).unwrap();
        assert!(path.is_dir());
        assert_eq!(dir.queue_path(), path.join("queue.journal"));
        assert_eq!(dir.entities_path(), path.join("entities.journal"));
    }

    #[test]
    fn second_open_is_locked_out() {
        let temp = tempdir().unwrap();
        let _first = DataDir::open(temp.path()).unwrap();

        let second = DataDir::open(temp.path());
        assert!(matches!(second, Err(JournalError::Locked(_))));
    }

    #[test]
    fn lock_released_on_drop() {
        let temp = tempdir().unwrap();
        {
            let _dir = DataDir::open(temp.path()).unwrap();
        }
        assert!(DataDir::open(temp.path()).is_ok());
    }
}
