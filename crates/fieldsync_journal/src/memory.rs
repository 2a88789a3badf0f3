//! In-memory journal backend.

use crate::backend::JournalBackend;
use crate::error::JournalResult;
use parking_lot::RwLock;
use std::sync::Arc;

/// A journal backend that keeps bytes in memory.
///
/// Clones share the same buffer, so a test can hand one clone to a journal,
/// drop the journal, and reopen a new journal over the other clone to
/// simulate a process restart.
///
/// ```rust
/// use fieldsync_journal::{JournalBackend, MemoryBackend};
///
/// let mut backend = MemoryBackend::new();
/// let offset = backend.append(b"abc").unwrap();
/// assert_eq!(offset, 0);
/// assert_eq!(backend.len().unwrap(), 3);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    data: Arc<RwLock<Vec<u8>>>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend pre-filled with bytes, e.g. a damaged journal image.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// Returns a copy of the stored bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl JournalBackend for MemoryBackend {
    fn read_all(&self) -> JournalResult<Vec<u8>> {
        Ok(self.data.read().clone())
    }

    fn append(&mut self, bytes: &[u8]) -> JournalResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn replace(&mut self, bytes: &[u8]) -> JournalResult<()> {
        let mut data = self.data.write();
        data.clear();
        data.extend_from_slice(bytes);
        Ok(())
    }

    fn sync(&mut self) -> JournalResult<()> {
        Ok(())
    }

    fn len(&self) -> JournalResult<u64> {
        Ok(self.data.read().len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_returns_offsets() {
        let mut backend = MemoryBackend::new();
        assert_eq!(backend.append(b"one").unwrap(), 0);
        assert_eq!(backend.append(b"two").unwrap(), 3);
        assert_eq!(backend.read_all().unwrap(), b"onetwo");
    }

    #[test]
    fn replace_discards_previous_contents() {
        let mut backend = MemoryBackend::with_data(b"stale".to_vec());
        backend.replace(b"fresh!").unwrap();
        assert_eq!(backend.read_all().unwrap(), b"fresh!");
        assert_eq!(backend.len().unwrap(), 6);
    }

    #[test]
    fn clones_share_storage() {
        let mut backend = MemoryBackend::new();
        let observer = backend.clone();
        backend.append(b"shared").unwrap();
        assert_eq!(observer.data(), b"shared");
        assert!(!observer.is_empty().unwrap());
    }
}
