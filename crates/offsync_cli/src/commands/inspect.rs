//! Inspect command implementation.

use super::{admin, AdminOrchestrator};
use chrono::{DateTime, Utc};
use offsync_store::LocalStore;
use serde::Serialize;
use std::error::Error;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Per entity type bookkeeping.
    pub entity_types: Vec<EntityRow>,
    /// Queue counts.
    pub queue: QueueRow,
    /// Number of local records across all types.
    pub records: usize,
}

/// Bookkeeping for one entity type.
#[derive(Debug, Serialize)]
pub struct EntityRow {
    /// Entity type name.
    pub name: String,
    /// Cursor timestamp.
    pub last_pulled_at: Option<DateTime<Utc>>,
    /// Whether an opaque sync token is stored.
    pub has_token: bool,
    /// Pending local writes flag.
    pub needs_sync: bool,
    /// Open queue items.
    pub pending_changes: u64,
    /// Whether the first full pull completed.
    pub initial_sync_complete: bool,
    /// Whether the type is past its staleness threshold.
    pub stale: bool,
    /// Last error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Queue counts.
#[derive(Debug, Serialize)]
pub struct QueueRow {
    /// Pending items.
    pub pending: u64,
    /// Items left in processing.
    pub processing: u64,
    /// Completed items not yet collected.
    pub completed: u64,
    /// Failed items, parked included.
    pub failed: u64,
    /// Items that exhausted their retries.
    pub parked: u64,
    /// Creation time of the oldest open item.
    pub oldest_open_at: Option<DateTime<Utc>>,
}

/// Runs the inspect command.
pub fn run(path: &Path, config: Option<&Path>, format: &str) -> Result<(), Box<dyn Error>> {
    let orchestrator = admin(path, config)?;
    let result = collect(path, &orchestrator)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

/// Gathers the inspection result.
pub fn collect(path: &Path, orchestrator: &AdminOrchestrator) -> Result<InspectResult, Box<dyn Error>> {
    let now = Utc::now();
    let metadata = orchestrator.metadata();

    let entity_types = metadata
        .all()?
        .into_iter()
        .map(|meta| {
            // Types missing from the configuration count as stale.
            let stale = metadata.is_stale(&meta.entity_type, now).unwrap_or(true);
            EntityRow {
                name: meta.entity_type,
                last_pulled_at: meta.last_pulled_at,
                has_token: meta.sync_token.is_some(),
                needs_sync: meta.needs_sync,
                pending_changes: meta.pending_changes_count,
                initial_sync_complete: meta.is_initial_sync_complete,
                stale,
                last_error: meta.last_error,
            }
        })
        .collect();

    let stats = orchestrator.queue().get_stats()?;
    let records = orchestrator
        .store()
        .read(|s| s.records.values().map(|t| t.len()).sum::<usize>())?;

    Ok(InspectResult {
        path: path.display().to_string(),
        entity_types,
        queue: QueueRow {
            pending: stats.pending,
            processing: stats.processing,
            completed: stats.completed,
            failed: stats.failed,
            parked: stats.parked,
            oldest_open_at: stats.oldest_open_at,
        },
        records,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("Store: {}", result.path);
    println!();
    println!("Entity types:");
    if result.entity_types.is_empty() {
        println!("  (none)");
    }
    for row in &result.entity_types {
        let pulled = row
            .last_pulled_at
            .map_or_else(|| "never".to_string(), |at| at.to_rfc3339());
        println!(
            "  {:<16} pulled {:<32} pending {:<4} {}{}",
            row.name,
            pulled,
            row.pending_changes,
            if row.needs_sync { "needs-sync " } else { "" },
            if row.stale { "stale" } else { "" },
        );
        if let Some(error) = &row.last_error {
            println!("  {:<16} last error: {}", "", error);
        }
    }
    println!();
    println!("Queue:");
    println!("  Pending:    {}", result.queue.pending);
    println!("  Processing: {}", result.queue.processing);
    println!("  Completed:  {}", result.queue.completed);
    println!("  Failed:     {} ({} parked)", result.queue.failed, result.queue.parked);
    if let Some(oldest) = result.queue.oldest_open_at {
        println!("  Oldest:     {}", oldest.to_rfc3339());
    }
    println!();
    println!("Local records: {}", result.records);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::seeded_store;

    #[test]
    fn collects_metadata_and_queue() {
        let dir = seeded_store();
        let orchestrator = admin(dir.path(), None).unwrap();

        let result = collect(dir.path(), &orchestrator).unwrap();

        assert_eq!(result.entity_types.len(), 2);
        let tickets = result.entity_types.iter().find(|r| r.name == "tickets").unwrap();
        assert!(tickets.has_token);
        assert!(!tickets.stale);
        let artists = result.entity_types.iter().find(|r| r.name == "artists").unwrap();
        assert!(artists.stale);
        assert_eq!(result.queue.pending, 1);
        assert_eq!(result.queue.failed, 1);
        assert_eq!(result.records, 0);
    }
}
