//! Queue and cursor maintenance commands.

use super::admin;
use std::error::Error;
use std::path::Path;
use std::time::Duration;

/// Releases every failed item, parked ones included.
pub fn retry_failed(path: &Path, config: Option<&Path>) -> Result<usize, Box<dyn Error>> {
    let orchestrator = admin(path, config)?;
    let released = orchestrator.queue().retry_failed()?;
    println!("Released {} failed item(s)", released);
    Ok(released)
}

/// Removes completed items. Without `older_than_hours` the configured
/// retention applies.
pub fn gc(
    path: &Path,
    config: Option<&Path>,
    older_than_hours: Option<u64>,
) -> Result<usize, Box<dyn Error>> {
    let orchestrator = admin(path, config)?;
    let queue = orchestrator.queue();
    let removed = match older_than_hours {
        Some(hours) => queue.clear_completed_older_than(Duration::from_secs(hours * 3_600))?,
        None => queue.clear_completed()?,
    };
    println!("Removed {} completed item(s)", removed);
    Ok(removed)
}

/// Forgets the cursor of one entity type, or of all of them.
pub fn reset(
    path: &Path,
    config: Option<&Path>,
    entity_type: Option<&str>,
    all: bool,
) -> Result<usize, Box<dyn Error>> {
    let orchestrator = admin(path, config)?;
    let reset = match (entity_type, all) {
        (Some(_), true) => return Err("Pass either an entity type or --all, not both".into()),
        (Some(entity_type), false) => {
            orchestrator.reset_entity(entity_type)?;
            1
        }
        (None, true) => orchestrator.reset_all()?,
        (None, false) => return Err("Entity type or --all required for reset".into()),
    };
    println!("Reset {} entity type(s); the next sync pulls them in full", reset);
    Ok(reset)
}
