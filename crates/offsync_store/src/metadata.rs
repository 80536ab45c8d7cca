//! Per entity type sync bookkeeping.

use chrono::{DateTime, Utc};
use offsync_protocol::PullCursor;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sync bookkeeping for one entity type.
///
/// Created lazily the first time an entity type is touched and kept for the
/// lifetime of the application; only [`EntitySyncMetadata::reset`] clears it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySyncMetadata {
    /// Entity type this row describes.
    pub entity_type: String,
    /// High-water mark of the last applied pull. Never regresses.
    pub last_pulled_at: Option<DateTime<Utc>>,
    /// Opaque token returned by the last pull.
    pub sync_token: Option<String>,
    /// Number of queue items still open (pending or failed) for this type.
    pub pending_changes_count: u64,
    /// True once a local mutation was recorded and not yet reconciled.
    pub needs_sync: bool,
    /// True once a full pull has drained every page.
    pub is_initial_sync_complete: bool,
    /// Last error observed while syncing this type.
    pub last_error: Option<String>,
    /// When a push for this type last succeeded.
    pub last_pushed_at: Option<DateTime<Utc>>,
}

impl EntitySyncMetadata {
    /// Creates empty metadata for `entity_type`.
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            last_pulled_at: None,
            sync_token: None,
            pending_changes_count: 0,
            needs_sync: false,
            is_initial_sync_complete: false,
            last_error: None,
            last_pushed_at: None,
        }
    }

    /// Returns true if `now - last_pulled_at > threshold`.
    ///
    /// A type that was never pulled is always stale. A cursor ahead of `now`
    /// (clock moved backwards) is treated as fresh.
    pub fn is_stale(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        match self.last_pulled_at {
            None => true,
            Some(last) => now
                .signed_duration_since(last)
                .to_std()
                .map(|age| age > threshold)
                .unwrap_or(false),
        }
    }

    /// Advances the cursor to `cursor` unless that would move it backwards.
    ///
    /// Returns true if the cursor moved.
    pub fn advance_cursor(&mut self, cursor: &PullCursor) -> bool {
        let moves = self
            .last_pulled_at
            .map_or(true, |current| cursor.timestamp >= current);
        if moves {
            self.last_pulled_at = Some(cursor.timestamp);
            if cursor.token.is_some() {
                self.sync_token = cursor.token.clone();
            }
        }
        moves
    }

    /// Records that a local mutation was queued against this type.
    pub fn mark_pending(&mut self, open_items: u64) {
        self.needs_sync = true;
        self.pending_changes_count = open_items;
    }

    /// Clears the pending flag after a complete pull and push cycle.
    pub fn clear_pending(&mut self) {
        self.needs_sync = false;
        self.pending_changes_count = 0;
    }

    /// Records an error for this type.
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
    }

    /// Forgets cursor, token and flags so the next sync is a full resync.
    pub fn reset(&mut self) {
        self.last_pulled_at = None;
        self.sync_token = None;
        self.is_initial_sync_complete = false;
        self.last_error = None;
        self.last_pushed_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn cursor(secs: i64) -> PullCursor {
        PullCursor {
            timestamp: ts(secs),
            token: Some(format!("tok-{secs}")),
        }
    }

    #[test]
    fn never_pulled_is_stale() {
        let meta = EntitySyncMetadata::new("artists");
        assert!(meta.is_stale(Duration::from_secs(3600), ts(0)));
    }

    #[test]
    fn staleness_uses_threshold() {
        let mut meta = EntitySyncMetadata::new("balance");
        meta.advance_cursor(&cursor(1_000));

        assert!(!meta.is_stale(Duration::from_secs(60), ts(1_060)));
        assert!(meta.is_stale(Duration::from_secs(60), ts(1_061)));
        // Clock moved backwards.
        assert!(!meta.is_stale(Duration::from_secs(60), ts(10)));
    }

    #[test]
    fn cursor_never_regresses() {
        let mut meta = EntitySyncMetadata::new("artists");
        assert!(meta.advance_cursor(&cursor(100)));
        assert!(!meta.advance_cursor(&cursor(50)));
        assert_eq!(meta.last_pulled_at, Some(ts(100)));
        assert_eq!(meta.sync_token.as_deref(), Some("tok-100"));
    }

    #[test]
    fn pending_flag_lifecycle() {
        let mut meta = EntitySyncMetadata::new("tickets");
        meta.mark_pending(2);
        assert!(meta.needs_sync);
        assert_eq!(meta.pending_changes_count, 2);

        meta.clear_pending();
        assert!(!meta.needs_sync);
        assert_eq!(meta.pending_changes_count, 0);
    }

    #[test]
    fn reset_forces_full_resync() {
        let mut meta = EntitySyncMetadata::new("artists");
        meta.advance_cursor(&cursor(100));
        meta.is_initial_sync_complete = true;
        meta.reset();
        assert!(meta.last_pulled_at.is_none());
        assert!(meta.sync_token.is_none());
        assert!(!meta.is_initial_sync_complete);
    }
}
