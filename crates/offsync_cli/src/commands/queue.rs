//! Queue listing command implementation.

use super::{admin, AdminOrchestrator};
use chrono::{DateTime, Utc};
use offsync_store::QueueStatus;
use serde::Serialize;
use std::error::Error;
use std::path::Path;

/// Status filter accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    /// Items with the given status.
    Status(QueueStatus),
    /// Failed items that exhausted their retries.
    Parked,
}

impl StatusFilter {
    /// Parses a filter name.
    pub fn parse(name: &str) -> Result<Self, Box<dyn Error>> {
        Ok(match name {
            "pending" => Self::Status(QueueStatus::Pending),
            "processing" => Self::Status(QueueStatus::Processing),
            "completed" => Self::Status(QueueStatus::Completed),
            "failed" => Self::Status(QueueStatus::Failed),
            "parked" => Self::Parked,
            other => return Err(format!("Unknown queue status '{other}'").into()),
        })
    }
}

/// One listed queue item.
#[derive(Debug, Serialize)]
pub struct QueueEntry {
    /// Item id.
    pub id: String,
    /// Entity type.
    pub entity_type: String,
    /// Entity id.
    pub entity_id: String,
    /// Operation name.
    pub operation: String,
    /// Status name; parked items report `parked`.
    pub status: String,
    /// Push priority.
    pub priority: i32,
    /// Failed attempts.
    pub retry_count: u32,
    /// First queued.
    pub created_at: DateTime<Utc>,
    /// Error from the last failed attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Runs the queue command.
pub fn run(
    path: &Path,
    config: Option<&Path>,
    status: Option<&str>,
    format: &str,
) -> Result<(), Box<dyn Error>> {
    let filter = status.map(StatusFilter::parse).transpose()?;
    let orchestrator = admin(path, config)?;
    let entries = list(&orchestrator, filter)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&entries)?),
        _ => print_text_output(&entries),
    }
    Ok(())
}

/// Lists queue items in processing order.
pub fn list(
    orchestrator: &AdminOrchestrator,
    filter: Option<StatusFilter>,
) -> Result<Vec<QueueEntry>, Box<dyn Error>> {
    let max_retry = orchestrator.config().max_retry;
    let status = match filter {
        Some(StatusFilter::Status(status)) => Some(status),
        Some(StatusFilter::Parked) => Some(QueueStatus::Failed),
        None => None,
    };

    let entries = orchestrator
        .queue()
        .items(status)?
        .into_iter()
        .filter(|item| filter != Some(StatusFilter::Parked) || item.is_parked(max_retry))
        .map(|item| {
            let status = if item.is_parked(max_retry) {
                "parked"
            } else {
                item.status.as_str()
            };
            QueueEntry {
                id: item.id.to_string(),
                entity_type: item.entity_type,
                entity_id: item.entity_id,
                operation: item.operation.as_str().to_string(),
                status: status.to_string(),
                priority: item.priority,
                retry_count: item.retry_count,
                created_at: item.created_at,
                last_error: item.last_error,
            }
        })
        .collect();
    Ok(entries)
}

fn print_text_output(entries: &[QueueEntry]) {
    if entries.is_empty() {
        println!("Queue is empty");
        return;
    }
    println!(
        "{:<36}  {:<12} {:<12} {:<8} {:<10} {:>5}",
        "ID", "TYPE", "ENTITY", "OP", "STATUS", "TRIES"
    );
    for entry in entries {
        println!(
            "{:<36}  {:<12} {:<12} {:<8} {:<10} {:>5}",
            entry.id,
            entry.entity_type,
            entry.entity_id,
            entry.operation,
            entry.status,
            entry.retry_count
        );
        if let Some(error) = &entry.last_error {
            println!("{:<38}{}", "", error);
        }
    }
    println!();
    println!("{} item(s)", entries.len());
}
