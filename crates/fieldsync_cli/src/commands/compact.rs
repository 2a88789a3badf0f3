//! Compact command implementation.

use std::path::Path;

/// Journal sizes before and after compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactStats {
    /// Queue journal records before.
    pub queue_before: usize,
    /// Queue journal records after.
    pub queue_after: usize,
    /// Entity and metadata journal records before.
    pub store_before: usize,
    /// Entity and metadata journal records after.
    pub store_after: usize,
    /// Resolved conflicts dropped.
    pub conflicts_dropped: usize,
}

/// Runs the compact command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Compacting journals at {:?}", path);
    println!();

    let stats = compact(path)?;
    println!("Compaction Results:");
    println!(
        "  Queue records:    {} -> {}",
        stats.queue_before, stats.queue_after
    );
    println!(
        "  Store records:    {} -> {}",
        stats.store_before, stats.store_after
    );
    println!("  Conflicts pruned: {}", stats.conflicts_dropped);
    Ok(())
}

/// Compacts every journal in the data directory.
pub fn compact(path: &Path) -> Result<CompactStats, Box<dyn std::error::Error>> {
    let data = super::open(path)?;
    let engine = &data.engine;

    let queue_before = engine.queue().journal_records();
    let store_before = engine.store().journal_records();
    let conflicts_before = engine.conflicts().all().len();

    engine.compact()?;
    engine.store().compact()?;

    Ok(CompactStats {
        queue_before,
        queue_after: engine.queue().journal_records(),
        store_before,
        store_after: engine.store().journal_records(),
        conflicts_dropped: conflicts_before - engine.conflicts().all().len(),
    })
}
