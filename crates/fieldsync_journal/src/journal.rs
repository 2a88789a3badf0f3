//! Typed record journal.

use crate::backend::JournalBackend;
use crate::error::{JournalError, JournalResult};
use crate::frame::{decode_frames, encode_frame};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

/// Encodes a value as CBOR.
pub fn to_cbor<T: Serialize + ?Sized>(value: &T) -> JournalResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(JournalError::codec)?;
    Ok(buf)
}

/// Decodes a value from CBOR.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> JournalResult<T> {
    ciborium::from_reader(bytes).map_err(JournalError::codec)
}

/// An append-only log of typed records over a [`JournalBackend`].
///
/// Owners replay the records returned by [`Journal::open`] to rebuild their
/// state, append one record per state change, and periodically call
/// [`Journal::rewrite`] with a snapshot to drop dead history.
///
/// # Invariants
///
/// - Every appended record is synced before `append_record` returns
///   (unless `sync_on_append` is disabled)
/// - After `open`, the backend holds only intact frames
pub struct Journal<B: JournalBackend> {
    backend: B,
    record_count: usize,
    sync_on_append: bool,
}

impl<B: JournalBackend> Journal<B> {
    /// Opens a journal, replaying and decoding every intact record.
    ///
    /// A damaged tail (torn write) is discarded and the backend is rewritten
    /// with the intact prefix. A frame that passes its checksum but does not
    /// decode as `T` is reported as [`JournalError::Corrupted`].
    pub fn open<T: DeserializeOwned>(mut backend: B) -> JournalResult<(Self, Vec<T>)> {
        let image = backend.read_all()?;
        let decoded = decode_frames(&image);

        if let Some(damage) = &decoded.damage {
            warn!(
                damage = %damage,
                kept_bytes = decoded.valid_len,
                dropped_bytes = image.len() - decoded.valid_len,
                "discarding damaged journal tail"
            );
            backend.replace(&image[..decoded.valid_len])?;
            backend.sync()?;
        }

        let mut records = Vec::with_capacity(decoded.payloads.len());
        for (index, payload) in decoded.payloads.iter().enumerate() {
            let record = from_cbor(payload).map_err(|e| {
                JournalError::Corrupted(format!("record {index} does not decode: {e}"))
            })?;
            records.push(record);
        }

        debug!(records = records.len(), "journal replayed");

        Ok((
            Self {
                backend,
                record_count: records.len(),
                sync_on_append: true,
            },
            records,
        ))
    }

    /// Disables or enables syncing after every append.
    #[must_use]
    pub fn with_sync_on_append(mut self, sync: bool) -> Self {
        self.sync_on_append = sync;
        self
    }

    /// Appends one record.
    pub fn append_record<T: Serialize + ?Sized>(&mut self, record: &T) -> JournalResult<()> {
        let frame = encode_frame(&to_cbor(record)?)?;
        self.backend.append(&frame)?;
        if self.sync_on_append {
            self.backend.sync()?;
        }
        self.record_count += 1;
        Ok(())
    }

    /// Replaces the whole journal with `records`.
    pub fn rewrite<'a, T, I>(&mut self, records: I) -> JournalResult<()>
    where
        T: Serialize + 'a,
        I: IntoIterator<Item = &'a T>,
    {
        let mut image = Vec::new();
        let mut count = 0usize;
        for record in records {
            image.extend(encode_frame(&to_cbor(record)?)?);
            count += 1;
        }

        self.backend.replace(&image)?;
        self.backend.sync()?;
        debug!(records = count, bytes = image.len(), "journal rewritten");
        self.record_count = count;
        Ok(())
    }

    /// Flushes appended records to durable storage.
    pub fn sync(&mut self) -> JournalResult<()> {
        self.backend.sync()
    }

    /// Returns the number of records currently in the journal.
    pub fn record_count(&self) -> usize {
        self.record_count
    }

    /// Returns the journal size in bytes.
    pub fn byte_len(&self) -> JournalResult<u64> {
        self.backend.len()
    }

    /// Returns the underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode_frame;
    use crate::memory::MemoryBackend;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    enum Event {
        Put { key: String, value: u32 },
        Remove { key: String },
    }

    fn put(key: &str, value: u32) -> Event {
        Event::Put {
            key: key.into(),
            value,
        }
    }

    #[test]
    fn records_replay_after_reopen() {
        let backend = MemoryBackend::new();
        {
            let (mut journal, replayed) = Journal::open::<Event>(backend.clone()).unwrap();
            assert!(replayed.is_empty());
            journal.append_record(&put("a", 1)).unwrap();
            journal
                .append_record(&Event::Remove { key: "a".into() })
                .unwrap();
        }

        let (journal, replayed) = Journal::open::<Event>(backend).unwrap();
        assert_eq!(journal.record_count(), 2);
        assert_eq!(replayed, vec![put("a", 1), Event::Remove { key: "a".into() }]);
    }

    #[test]
    fn torn_tail_is_repaired_on_open() {
        let backend = MemoryBackend::new();
        {
            let (mut journal, _) = Journal::open::<Event>(backend.clone()).unwrap();
            journal.append_record(&put("a", 1)).unwrap();
        }
        let intact_len = backend.data().len();

        let mut damaged = backend.data();
        let frame = encode_frame(&to_cbor(&put("b", 2)).unwrap()).unwrap();
        damaged.extend_from_slice(&frame[..frame.len() / 2]);
        let backend = MemoryBackend::with_data(damaged);

        let (_, replayed) = Journal::open::<Event>(backend.clone()).unwrap();
        assert_eq!(replayed, vec![put("a", 1)]);
        assert_eq!(backend.data().len(), intact_len);
    }

    #[test]
    fn undecodable_record_is_corruption() {
        let image = encode_frame(b"\xff\xff not cbor").unwrap();
        let result = Journal::open::<Event>(MemoryBackend::with_data(image));
        assert!(matches!(result, Err(JournalError::Corrupted(_))));
    }

    #[test]
    fn rewrite_compacts_history() {
        let backend = MemoryBackend::new();
        let (mut journal, _) = Journal::open::<Event>(backend.clone()).unwrap();
        for value in 0..10 {
            journal.append_record(&put("a", value)).unwrap();
        }
        let before = journal.byte_len().unwrap();

        journal.rewrite(&[put("a", 9)]).unwrap();
        assert_eq!(journal.record_count(), 1);
        assert!(journal.byte_len().unwrap() < before);

        let (_, replayed) = Journal::open::<Event>(backend).unwrap();
        assert_eq!(replayed, vec![put("a", 9)]);
    }
}
