//! Status command implementation.

use super::OutputFormat;
use fieldsync_engine::SyncStatus;
use std::path::Path;

/// Runs the status command.
pub fn run(path: &Path, format: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let data = super::open(path)?;
    let status = data.engine.status()?;

    match format {
        OutputFormat::Json => super::print_json(&status)?,
        OutputFormat::Text => print_text_output(path, &status),
    }
    Ok(())
}

fn print_text_output(path: &Path, status: &SyncStatus) {
    println!("FieldSync Data");
    println!("==============");
    println!();
    println!("Path:                 {}", path.display());
    println!("State:                {}", status.state);
    println!("Pending mutations:    {}", status.pending_count);
    println!("Failed mutations:     {}", status.failed_count);
    println!("Unresolved conflicts: {}", status.unresolved_conflicts);
    println!("Pull cursor:          {}", status.cursor);
    match status.last_synced_at {
        Some(at) => println!("Last synced at:       {at}"),
        None => println!("Last synced at:       never"),
    }
    if let Some(error) = &status.last_error {
        println!("Last error:           {error}");
    }
}
