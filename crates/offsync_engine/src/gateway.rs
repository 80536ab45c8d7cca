//! Remote gateway abstraction.

use crate::credential::Credential;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use chrono::Utc;
use offsync_protocol::{PullCursor, PullRequest, PullResponse, PushAck, PushRequest};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Pull/push access to the remote backend.
///
/// Implementations must treat `(entity_type, entity_id, operation)` as an
/// idempotency key: a redelivered push must not be applied twice.
#[async_trait]
pub trait RemoteSyncGateway: Send + Sync {
    /// Pulls records changed since the request cursor.
    async fn pull(&self, credential: &Credential, request: PullRequest) -> SyncResult<PullResponse>;

    /// Pushes local mutations.
    async fn push(&self, credential: &Credential, request: PushRequest) -> SyncResult<PushAck>;
}

#[async_trait]
impl<T: RemoteSyncGateway + ?Sized> RemoteSyncGateway for Arc<T> {
    async fn pull(&self, credential: &Credential, request: PullRequest) -> SyncResult<PullResponse> {
        (**self).pull(credential, request).await
    }

    async fn push(&self, credential: &Credential, request: PushRequest) -> SyncResult<PushAck> {
        (**self).push(credential, request).await
    }
}

/// Runs one network call under the per-call timeout and a cancellation token.
pub(crate) async fn guarded_call<T>(
    timeout: Duration,
    cancel: &CancellationToken,
    call: impl Future<Output = SyncResult<T>>,
) -> SyncResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SyncError::Cancelled),
        outcome = tokio::time::timeout(timeout, call) => outcome.unwrap_or(Err(SyncError::Timeout)),
    }
}

/// A scripted gateway for testing.
///
/// Scripted results are consumed in order per entity type. Without a
/// script, pulls return an empty final page and pushes accept everything.
#[derive(Debug, Default)]
pub struct MockGateway {
    pulls: Mutex<HashMap<String, VecDeque<SyncResult<PullResponse>>>>,
    pushes: Mutex<HashMap<String, VecDeque<SyncResult<PushAck>>>>,
    pull_log: Mutex<Vec<PullRequest>>,
    push_log: Mutex<Vec<PushRequest>>,
    latency: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockGateway {
    /// Creates a new mock gateway.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the result of the next pull for `entity_type`.
    pub fn script_pull(&self, entity_type: &str, result: SyncResult<PullResponse>) {
        self.pulls
            .lock()
            .entry(entity_type.to_string())
            .or_default()
            .push_back(result);
    }

    /// Queues the result of the next push for `entity_type`.
    pub fn script_push(&self, entity_type: &str, result: SyncResult<PushAck>) {
        self.pushes
            .lock()
            .entry(entity_type.to_string())
            .or_default()
            .push_back(result);
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    /// Returns every pull request received.
    pub fn pull_requests(&self) -> Vec<PullRequest> {
        self.pull_log.lock().clone()
    }

    /// Returns every push request received.
    pub fn push_requests(&self) -> Vec<PushRequest> {
        self.push_log.lock().clone()
    }

    /// Returns the number of pulls received.
    pub fn pull_count(&self) -> usize {
        self.pull_log.lock().len()
    }

    /// Returns the number of pushes received.
    pub fn push_count(&self) -> usize {
        self.push_log.lock().len()
    }

    /// Returns the highest number of calls observed in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        InFlight(&self.in_flight)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteSyncGateway for MockGateway {
    async fn pull(&self, _credential: &Credential, request: PullRequest) -> SyncResult<PullResponse> {
        self.pull_log.lock().push(request.clone());
        let _guard = self.enter().await;

        let scripted = self
            .pulls
            .lock()
            .get_mut(&request.entity_type)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| {
            Ok(PullResponse::new(
                Vec::new(),
                PullCursor {
                    timestamp: request.since.unwrap_or_else(Utc::now),
                    token: request.sync_token.clone(),
                },
            ))
        })
    }

    async fn push(&self, _credential: &Credential, request: PushRequest) -> SyncResult<PushAck> {
        self.push_log.lock().push(request.clone());
        let _guard = self.enter().await;

        let scripted = self
            .pushes
            .lock()
            .get_mut(&request.entity_type)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| {
            Ok(PushAck::accepted(
                request.mutations.iter().map(|m| m.entity_id.clone()),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_protocol::{ModificationMarker, RemoteRecord};
    use serde_json::Map;

    fn credential() -> Credential {
        Credential::bearer("token")
    }

    #[tokio::test]
    async fn mock_defaults() {
        let gateway = MockGateway::new();
        let page = gateway
            .pull(&credential(), PullRequest::new("artists", None, 10))
            .await
            .unwrap();
        assert!(page.records.is_empty());
        assert!(!page.has_more);

        let ack = gateway
            .push(&credential(), PushRequest::new("artists", Vec::new()))
            .await
            .unwrap();
        assert!(ack.accepted.is_empty());
        assert_eq!(gateway.pull_count(), 1);
        assert_eq!(gateway.push_count(), 1);
    }

    #[tokio::test]
    async fn mock_scripted_results_in_order() {
        let gateway = MockGateway::new();
        let record = RemoteRecord::new("a1", Map::new(), ModificationMarker::version(1));
        let cursor = PullCursor {
            timestamp: Utc::now(),
            token: None,
        };
        gateway.script_pull("artists", Ok(PullResponse::new(vec![record], cursor)));
        gateway.script_pull("artists", Err(SyncError::network_retryable("reset")));

        let first = gateway
            .pull(&credential(), PullRequest::new("artists", None, 10))
            .await
            .unwrap();
        assert_eq!(first.records.len(), 1);

        let second = gateway
            .pull(&credential(), PullRequest::new("artists", None, 10))
            .await;
        assert!(matches!(second, Err(SyncError::Network { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn guarded_call_times_out() {
        let cancel = CancellationToken::new();
        let result: SyncResult<()> = guarded_call(Duration::from_secs(1), &cancel, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(SyncError::Timeout)));
    }

    #[tokio::test]
    async fn guarded_call_observes_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: SyncResult<()> =
            guarded_call(Duration::from_secs(1), &cancel, std::future::pending()).await;
        assert!(matches!(result, Err(SyncError::Cancelled)));
    }
}
