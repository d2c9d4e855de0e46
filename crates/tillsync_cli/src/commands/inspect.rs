//! Inspect command implementation.

use serde::Serialize;
use std::path::Path;
use tillsync_store::{LocalStore, OutboxStats, Rejection};

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Device the store was opened as.
    pub device_id: String,
    /// Journal file size in bytes.
    pub journal_size: u64,
    /// Outbox and row counters.
    pub stats: OutboxStats,
    /// Rejected records (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected: Option<Vec<Rejection>>,
}

/// Runs the inspect command.
pub fn run(
    store: &LocalStore,
    path: &Path,
    show_rejected: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let result = InspectResult {
        path: path.display().to_string(),
        device_id: store.device_id().to_string(),
        journal_size: store.journal_size()?,
        stats: store.stats(),
        rejected: show_rejected.then(|| store.rejected()),
    };

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    let stats = &result.stats;
    println!("tillsync Store: {}", result.path);
    println!("===============");
    println!();
    println!("Journal:         {} bytes", result.journal_size);
    println!("Remote watermark: {}", stats.watermark);
    println!();
    println!("Outbox:");
    println!("  Total records: {}", stats.total_records);
    println!("  Pending:       {}", stats.pending);
    println!("  Processed:     {}", stats.processed);
    println!("  Rejected:      {}", stats.rejected);
    println!();
    println!("Rows:");
    println!("  Total:         {}", stats.rows);
    println!("  Not synced:    {}", stats.not_synced_rows);
    println!("  Conflicted:    {}", stats.conflicted_rows);
    println!("  Deleted:       {}", stats.deleted_rows);

    if let Some(rejected) = &result.rejected {
        println!();
        println!("Rejected records:");
        if rejected.is_empty() {
            println!("  (none)");
        }
        for r in rejected {
            println!(
                "  {} {}/{} at {}: {}",
                r.record_id, r.entity_type, r.entity_id, r.rejected_at, r.reason
            );
        }
    }
}
