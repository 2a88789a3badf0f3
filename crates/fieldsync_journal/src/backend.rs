//! Journal backend trait definition.

use crate::error::JournalResult;

/// A byte store underneath a [`crate::Journal`].
///
/// Backends are **opaque**: they never interpret the frames they hold.
/// The journal owns framing, checksums and record encoding.
///
/// # Invariants
///
/// - `append` writes after all previously appended bytes and returns the offset
/// - `read_all` returns every byte appended or replaced so far
/// - `replace` is atomic: after a crash either the old or the new contents survive
/// - `sync` makes all appended bytes durable
pub trait JournalBackend: Send + Sync {
    /// Reads the entire contents of the store.
    fn read_all(&self) -> JournalResult<Vec<u8>>;

    /// Appends bytes at the end and returns the offset they were written at.
    fn append(&mut self, data: &[u8]) -> JournalResult<u64>;

    /// Atomically replaces the whole contents with `data`.
    fn replace(&mut self, data: &[u8]) -> JournalResult<()>;

    /// Makes all appended data durable.
    fn sync(&mut self) -> JournalResult<()>;

    /// Returns the current size in bytes.
    fn len(&self) -> JournalResult<u64>;

    /// Returns true if the store holds no bytes.
    fn is_empty(&self) -> JournalResult<bool> {
        Ok(self.len()? == 0)
    }
}

impl<B: JournalBackend + ?Sized> JournalBackend for Box<B> {
    fn read_all(&self) -> JournalResult<Vec<u8>> {
        (**self).read_all()
    }

    fn append(&mut self, data: &[u8]) -> JournalResult<u64> {
        (**self).append(data)
    }

    fn replace(&mut self, data: &[u8]) -> JournalResult<()> {
        (**self).replace(data)
    }

    fn sync(&mut self) -> JournalResult<()> {
        (**self).sync()
    }

    fn len(&self) -> JournalResult<u64> {
        (**self).len()
    }
}
