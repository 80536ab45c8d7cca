//! Externally visible orchestrator state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The state of the sync orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// Not syncing; the last run succeeded or none ran yet.
    Idle,
    /// A run is in progress.
    Syncing,
    /// The last run finished with errors.
    Error,
    /// Connectivity is down.
    Offline,
    /// Scheduling is paused.
    Paused,
}

impl SyncState {
    /// Returns true if a run is in progress.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncState::Syncing)
    }

    /// Returns the lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::Syncing => "syncing",
            SyncState::Error => "error",
            SyncState::Offline => "offline",
            SyncState::Paused => "paused",
        }
    }
}

/// Snapshot of the orchestrator status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRunStatus {
    /// Displayed state.
    pub state: SyncState,
    /// When the last run finished.
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Open queue items across all entity types.
    pub pending_changes: u64,
    /// Progress of the current run, 0 to 100.
    pub progress: u8,
    /// Entity type being synced right now.
    pub current_entity: Option<String>,
    /// Runs that finished.
    pub sync_count: u64,
    /// Runs that finished with errors.
    pub failed_sync_count: u64,
    /// First error of the last failed run.
    pub last_error: Option<String>,
}

/// Mutable state behind [`SyncRunStatus`].
///
/// The machine runs `idle -> syncing -> {idle | error}`; `offline` and
/// `paused` are overlays that win over the machine state for display.
#[derive(Debug, Clone)]
pub(crate) struct StatusCell {
    pub(crate) machine: SyncState,
    pub(crate) online: bool,
    pub(crate) paused: bool,
    pub(crate) background: bool,
    pub(crate) last_sync_at: Option<DateTime<Utc>>,
    pub(crate) progress: u8,
    pub(crate) current_entity: Option<String>,
    pub(crate) sync_count: u64,
    pub(crate) failed_sync_count: u64,
    pub(crate) last_error: Option<String>,
}

impl StatusCell {
    pub(crate) fn new() -> Self {
        Self {
            machine: SyncState::Idle,
            online: true,
            paused: false,
            background: false,
            last_sync_at: None,
            progress: 0,
            current_entity: None,
            sync_count: 0,
            failed_sync_count: 0,
            last_error: None,
        }
    }

    pub(crate) fn displayed(&self) -> SyncState {
        if !self.online {
            SyncState::Offline
        } else if self.machine == SyncState::Syncing {
            SyncState::Syncing
        } else if self.paused {
            SyncState::Paused
        } else {
            self.machine
        }
    }

    /// Returns true if automatic triggers may start a run.
    pub(crate) fn accepts_triggers(&self) -> bool {
        self.online && !self.paused && !self.background
    }

    pub(crate) fn snapshot(&self, pending_changes: u64) -> SyncRunStatus {
        SyncRunStatus {
            state: self.displayed(),
            last_sync_at: self.last_sync_at,
            pending_changes,
            progress: self.progress,
            current_entity: self.current_entity.clone(),
            sync_count: self.sync_count,
            failed_sync_count: self.failed_sync_count,
            last_error: self.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_overrides_display() {
        let mut cell = StatusCell::new();
        cell.machine = SyncState::Syncing;
        cell.online = false;
        assert_eq!(cell.displayed(), SyncState::Offline);

        cell.online = true;
        assert_eq!(cell.displayed(), SyncState::Syncing);
    }

    #[test]
    fn paused_shows_unless_syncing() {
        let mut cell = StatusCell::new();
        cell.paused = true;
        assert_eq!(cell.displayed(), SyncState::Paused);
        assert!(!cell.accepts_triggers());

        cell.machine = SyncState::Error;
        assert_eq!(cell.displayed(), SyncState::Paused);

        cell.paused = false;
        assert_eq!(cell.displayed(), SyncState::Error);
        assert!(cell.accepts_triggers());
    }

    #[test]
    fn state_activity() {
        assert!(SyncState::Syncing.is_active());
        assert!(!SyncState::Idle.is_active());
        assert_eq!(SyncState::Paused.as_str(), "paused");
    }
}
