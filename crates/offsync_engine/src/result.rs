//! Structured outcomes of sync runs.

use crate::queue::QueueRunSummary;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Error string reported when a run is refused for lack of connectivity.
pub const OFFLINE_ERROR: &str = "offline";

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The run went through every step.
    Completed,
    /// Skipped because the previous run finished less than the minimum
    /// interval ago. Counts as success.
    Throttled,
    /// Refused because the device is offline.
    Offline,
    /// Stopped by an explicit cancellation.
    Cancelled,
    /// Stopped by a defect (failed conflict resolution, shutdown).
    Aborted,
}

/// Result of syncing a single entity type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntitySyncResult {
    /// Entity type.
    pub entity_type: String,
    /// True if the type neither needed sync nor was stale.
    pub skipped: bool,
    /// Remote records received.
    pub pulled: u64,
    /// Remote records written locally.
    pub applied: u64,
    /// Local records removed by remote deletes.
    pub deleted: u64,
    /// Records that had a pending local write.
    pub conflicts: u64,
    /// Conflicts the local side won.
    pub kept_local: u64,
    /// Pages fetched.
    pub pages: u32,
    /// Error that stopped this type, if any.
    pub error: Option<String>,
}

impl EntitySyncResult {
    /// Creates an empty result for `entity_type`.
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            ..Default::default()
        }
    }

    /// Creates a result for a type that did not need syncing.
    pub fn skipped(entity_type: impl Into<String>) -> Self {
        Self {
            skipped: true,
            ..Self::new(entity_type)
        }
    }

    /// Creates a result for a type that failed.
    pub fn failed(entity_type: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(entity_type)
        }
    }

    /// Returns true if the type synced without error.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of a sync run.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRunResult {
    /// Run id, `None` if no run was started.
    pub run_id: Option<u64>,
    /// How the run ended.
    pub outcome: RunOutcome,
    /// Queue items delivered.
    pub pushed: u64,
    /// Queue items that failed this run.
    pub push_failed: u64,
    /// Queue items parked this run.
    pub parked: u64,
    /// Remote records received across all types.
    pub pulled: u64,
    /// Per entity type results, in sync order.
    pub entities: Vec<EntitySyncResult>,
    /// Errors in the order they occurred.
    pub errors: Vec<String>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Wall time of the run.
    pub duration: Duration,
}

impl SyncRunResult {
    pub(crate) fn begin(run_id: u64) -> Self {
        Self {
            run_id: Some(run_id),
            ..Self::empty(RunOutcome::Completed)
        }
    }

    fn empty(outcome: RunOutcome) -> Self {
        Self {
            run_id: None,
            outcome,
            pushed: 0,
            push_failed: 0,
            parked: 0,
            pulled: 0,
            entities: Vec::new(),
            errors: Vec::new(),
            started_at: Utc::now(),
            duration: Duration::ZERO,
        }
    }

    /// Result for a run refused because the device is offline.
    pub fn offline() -> Self {
        Self {
            errors: vec![OFFLINE_ERROR.to_string()],
            ..Self::empty(RunOutcome::Offline)
        }
    }

    /// Result for a run skipped by the throttle.
    pub fn throttled() -> Self {
        Self::empty(RunOutcome::Throttled)
    }

    /// Result for a run that could not finish.
    pub fn aborted(run_id: Option<u64>, error: impl Into<String>) -> Self {
        Self {
            run_id,
            errors: vec![error.into()],
            ..Self::empty(RunOutcome::Aborted)
        }
    }

    /// Returns true if the run did everything it set out to do.
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, RunOutcome::Completed | RunOutcome::Throttled)
            && self.errors.is_empty()
    }

    /// Returns true if the run was a no-op.
    pub fn is_skipped(&self) -> bool {
        self.outcome == RunOutcome::Throttled
    }

    /// Returns true if the run was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.outcome == RunOutcome::Cancelled
    }

    /// Returns the result for an entity type.
    pub fn entity(&self, entity_type: &str) -> Option<&EntitySyncResult> {
        self.entities.iter().find(|e| e.entity_type == entity_type)
    }

    /// Returns the first error.
    pub fn first_error(&self) -> Option<&str> {
        self.errors.first().map(String::as_str)
    }

    pub(crate) fn record_push(&mut self, summary: &QueueRunSummary) {
        self.pushed += summary.delivered;
        self.push_failed += summary.failed;
        self.parked += summary.parked;
        self.errors.extend(summary.errors.iter().cloned());
    }

    pub(crate) fn record_entity(&mut self, entity: EntitySyncResult) {
        self.pulled += entity.pulled;
        if let Some(error) = &entity.error {
            self.errors.push(format!("{}: {error}", entity.entity_type));
        }
        self.entities.push(entity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_result_is_structured_failure() {
        let result = SyncRunResult::offline();
        assert_eq!(result.outcome, RunOutcome::Offline);
        assert_eq!(result.errors, vec!["offline".to_string()]);
        assert!(!result.is_success());
        assert!(result.run_id.is_none());
    }

    #[test]
    fn throttled_result_is_noop_success() {
        let result = SyncRunResult::throttled();
        assert!(result.is_success());
        assert!(result.is_skipped());
        assert_eq!(result.pushed + result.pulled, 0);
    }

    #[test]
    fn entity_errors_are_prefixed() {
        let mut result = SyncRunResult::begin(1);
        result.record_entity(EntitySyncResult {
            pulled: 3,
            ..EntitySyncResult::new("artists")
        });
        result.record_entity(EntitySyncResult::failed("events", "operation timed out"));

        assert_eq!(result.pulled, 3);
        assert_eq!(result.first_error(), Some("events: operation timed out"));
        assert!(result.entity("artists").unwrap().is_success());
        assert!(!result.is_success());
    }
}
