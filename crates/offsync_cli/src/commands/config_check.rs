//! Configuration check command implementation.

use super::read_config;
use offsync_engine::SyncConfig;
use offsync_protocol::ConflictPolicy;
use serde::Serialize;
use std::error::Error;
use std::path::Path;

/// One entity type in sync order.
#[derive(Debug, Serialize)]
pub struct TypeRow {
    /// Entity type name.
    pub name: String,
    /// Sync priority.
    pub priority: i32,
    /// Staleness threshold in seconds.
    pub staleness_secs: u64,
    /// Effective conflict policy.
    pub conflict_policy: ConflictPolicy,
    /// Number of mapped fields.
    pub mapped_fields: usize,
}

/// Runs the config-check command.
pub fn run(config: &Path, format: &str) -> Result<(), Box<dyn Error>> {
    let config = read_config(config)?;
    let rows = summarize(&config);

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&rows)?),
        _ => {
            println!("Configuration OK: {} entity type(s)", rows.len());
            for row in &rows {
                println!(
                    "  {:>3}  {:<16} stale after {:>6}s  {:?}  {} mapped field(s)",
                    row.priority,
                    row.name,
                    row.staleness_secs,
                    row.conflict_policy,
                    row.mapped_fields
                );
            }
        }
    }
    Ok(())
}

/// Lists entity types in the order a run visits them.
pub fn summarize(config: &SyncConfig) -> Vec<TypeRow> {
    let resolver = config.resolver();
    config
        .sorted_entity_types()
        .into_iter()
        .map(|t| TypeRow {
            name: t.name.clone(),
            priority: t.priority,
            staleness_secs: t.staleness_threshold.as_secs(),
            conflict_policy: resolver.policy_for(&t.name),
            mapped_fields: config
                .field_mappings
                .iter()
                .filter(|m| m.entity_type == t.name)
                .map(|m| m.fields.len())
                .sum(),
        })
        .collect()
}
