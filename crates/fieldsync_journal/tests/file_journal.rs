//! On-disk journal behaviour across reopen and crash-like truncation.

use fieldsync_journal::{DataDir, FileBackend, Journal, JournalBackend};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use tempfile::tempdir;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Note {
    seq: u64,
    text: String,
}

fn note(seq: u64) -> Note {
    Note {
        seq,
        text: format!("note {seq}"),
    }
}

#[test]
fn data_dir_journals_persist_records() {
    let temp = tempdir().unwrap();

    {
        let dir = DataDir::open(temp.path()).unwrap();
        let (mut journal, replayed) = Journal::open::<Note>(dir.queue_backend().unwrap()).unwrap();
        assert!(replayed.is_empty());
        for seq in 1..=3 {
            journal.append_record(&note(seq)).unwrap();
        }
    }

    let dir = DataDir::open(temp.path()).unwrap();
    let (journal, replayed) = Journal::open::<Note>(dir.queue_backend().unwrap()).unwrap();
    assert_eq!(replayed, vec![note(1), note(2), note(3)]);
    assert_eq!(journal.record_count(), 3);
}

#[test]
fn garbage_appended_by_crash_is_discarded() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("entities.journal");

    {
        let (mut journal, _) = Journal::open::<Note>(FileBackend::open(&path).unwrap()).unwrap();
        journal.append_record(&note(1)).unwrap();
    }
    let intact = std::fs::metadata(&path).unwrap().len();

    {
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"FSJR\x40\x00").unwrap();
    }

    let (mut journal, replayed) = Journal::open::<Note>(FileBackend::open(&path).unwrap()).unwrap();
    assert_eq!(replayed, vec![note(1)]);
    assert_eq!(journal.backend().len().unwrap(), intact);

    journal.append_record(&note(2)).unwrap();
    drop(journal);

    let (_, replayed) = Journal::open::<Note>(FileBackend::open(&path).unwrap()).unwrap();
    assert_eq!(replayed, vec![note(1), note(2)]);
}
