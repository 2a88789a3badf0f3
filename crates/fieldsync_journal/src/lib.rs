//! # FieldSync Journal
//!
//! Durable, append-only record journal for FieldSync offline data.
//!
//! Every piece of device-side state the sync engine must not lose (the
//! mutation queue, cached entities, the pull cursor, conflict records) is
//! persisted as a sequence of CBOR records in a journal. On open the journal
//! is replayed to rebuild in-memory state; compaction rewrites it as a
//! snapshot.
//!
//! ## Layers
//!
//! - [`JournalBackend`] - opaque byte store (read all, append, atomic replace)
//! - [`MemoryBackend`] / [`FileBackend`] - the two backends
//! - [`Journal`] - checksummed frames of typed records over a backend
//! - [`DataDir`] - a locked directory holding one journal per concern
//!
//! ## Frame format
//!
//! ```text
//! | "FSJR" | len: u32 LE | crc32(payload): u32 LE | payload (CBOR) |
//! ```
//!
//! A truncated or checksum-failing tail is treated as a torn write and is
//! cut off on open.
//!
//! ## Example
//!
//! ```rust
//! use fieldsync_journal::{Journal, MemoryBackend};
//!
//! let (mut journal, replayed) = Journal::<MemoryBackend>::open::<String>(MemoryBackend::new()).unwrap();
//! assert!(replayed.is_empty());
//! journal.append_record(&"hello".to_string()).unwrap();
//! assert_eq!(journal.record_count(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod dir;
mod error;
mod file;
mod frame;
mod journal;
mod memory;

pub use backend::JournalBackend;
pub use dir::DataDir;
pub use error::{JournalError, JournalResult};
pub use file::FileBackend;
pub use frame::{compute_crc32, decode_frames, encode_frame, DecodedFrames, FRAME_HEADER_LEN, FRAME_MAGIC};
pub use journal::{from_cbor, to_cbor, Journal};
pub use memory::MemoryBackend;
