//! Conflict commands: list and resolve.

use super::OutputFormat;
use fieldsync_protocol::{ConflictRecord, ConflictResolution};
use std::path::Path;

/// Lists conflicts, unresolved ones only unless `all` is set.
pub fn list(
    path: &Path,
    all: bool,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = super::open(path)?;
    let records = if all {
        data.engine.conflicts().all()
    } else {
        data.engine.unresolved_conflicts()
    };

    match format {
        OutputFormat::Json => super::print_json(&records)?,
        OutputFormat::Text => print_text_output(&records),
    }
    Ok(())
}

/// Applies a decision to a deferred conflict.
pub fn resolve(path: &Path, id: &str, keep: &str) -> Result<(), Box<dyn std::error::Error>> {
    let resolution = match keep {
        "local" => ConflictResolution::Local,
        "server" => ConflictResolution::Server,
        other => return Err(format!("Unknown side {other:?} (expected local or server)").into()),
    };

    let data = super::open(path)?;
    let outcome = data.engine.resolve_conflict(id, resolution)?;
    println!("Conflict {id} resolved: {outcome:?}");
    Ok(())
}

fn print_text_output(records: &[ConflictRecord]) {
    println!("Conflicts ({})", records.len());
    println!();
    for record in records {
        println!("{}", record.id);
        println!("  Entity:         {}", record.key);
        println!("  Action:         {}", record.action);
        println!("  Server version: {}", record.server_version);
        println!("  Detected at:    {}", record.detected_at);
        println!(
            "  Server data:    {}",
            if record.server_data.is_some() { "present" } else { "deleted" }
        );
        match record.resolution {
            Some(resolution) => println!("  Resolution:     {resolution}"),
            None => println!("  Resolution:     pending"),
        }
        println!();
    }
}
