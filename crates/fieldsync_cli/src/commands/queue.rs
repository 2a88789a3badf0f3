//! Queue commands: list, failed, retry and clear.

use super::{OutputFormat, Target};
use fieldsync_protocol::QueueItem;
use std::path::Path;
use tracing::info;

/// Lists pending mutations in push order.
pub fn list(
    path: &Path,
    limit: Option<usize>,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = super::open(path)?;
    let mut items = data.engine.queue().items();
    let total = items.len();
    if let Some(limit) = limit {
        items.truncate(limit);
    }

    match format {
        OutputFormat::Json => super::print_json(&items)?,
        OutputFormat::Text => {
            println!("Pending mutations ({} of {})", items.len(), total);
            println!();
            print_items(&items);
        }
    }
    Ok(())
}

/// Lists mutations at the retry cap.
pub fn failed(path: &Path, format: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let data = super::open(path)?;
    let items = data.engine.failed_items();

    match format {
        OutputFormat::Json => super::print_json(&items)?,
        OutputFormat::Text => {
            println!("Failed mutations ({})", items.len());
            println!();
            print_items(&items);
        }
    }
    Ok(())
}

/// Makes failed mutations eligible for the next cycle.
pub fn retry(path: &Path, target: Target) -> Result<(), Box<dyn std::error::Error>> {
    let data = super::open(path)?;
    match target {
        Target::One(id) => {
            data.engine.retry_failed(id)?;
            println!("Item {id} will be retried on the next sync");
        }
        Target::All => {
            let reset = data.engine.retry_all_failed()?;
            println!("{reset} failed item(s) will be retried on the next sync");
        }
    }
    Ok(())
}

/// Drops queued mutations without pushing them.
pub fn clear(path: &Path, target: Target) -> Result<(), Box<dyn std::error::Error>> {
    let data = super::open(path)?;
    match target {
        Target::One(id) => {
            data.engine.clear_item(id)?;
            info!(id, "queue item cleared");
            println!("Item {id} removed from the queue");
        }
        Target::All => {
            let removed = data.engine.queue().clear()?;
            info!(removed, "queue cleared");
            println!("{removed} item(s) removed from the queue");
        }
    }
    Ok(())
}

fn print_items(items: &[QueueItem]) {
    if items.is_empty() {
        println!("  (none)");
        return;
    }
    println!(
        "  {:>6}  {:<8}  {:<32}  {:>8}  {:>7}  {}",
        "ID", "ACTION", "ENTITY", "PRIORITY", "RETRIES", "LAST ERROR"
    );
    for item in items {
        println!(
            "  {:>6}  {:<8}  {:<32}  {:>8}  {:>7}  {}",
            item.id,
            item.action,
            item.key,
            item.priority,
            item.retry_count,
            item.last_error.as_deref().unwrap_or("-")
        );
    }
}
