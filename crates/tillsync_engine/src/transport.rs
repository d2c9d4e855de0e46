//! Remote authority abstraction.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tillsync_protocol::{
    EntityId, LogRecord, PullRequest, PullResponse, PulledRecord, PushRequest, PushResponse,
    RecordAck, RecordId,
};

/// The remote side of sync: accepts pushed records and serves the shared
/// log.
///
/// Implementations must tolerate the same record being pushed more than
/// once and answer with one outcome per pushed record.
pub trait RemoteAuthority: Send + Sync {
    /// Sends local records; returns one outcome per record.
    fn push(
        &self,
        request: &PushRequest,
    ) -> impl Future<Output = SyncResult<PushResponse>> + Send;

    /// Fetches records after `request.since`, in sequence order.
    fn pull(
        &self,
        request: &PullRequest,
    ) -> impl Future<Output = SyncResult<PullResponse>> + Send;
}

impl<R: RemoteAuthority> RemoteAuthority for Arc<R> {
    fn push(
        &self,
        request: &PushRequest,
    ) -> impl Future<Output = SyncResult<PushResponse>> + Send {
        (**self).push(request)
    }

    fn pull(
        &self,
        request: &PullRequest,
    ) -> impl Future<Output = SyncResult<PullResponse>> + Send {
        (**self).pull(request)
    }
}

#[derive(Debug, Default)]
struct MockState {
    log: Vec<PulledRecord>,
    received: Vec<LogRecord>,
    reject: HashMap<RecordId, String>,
    conflict: HashSet<EntityId>,
    failing_pushes: u32,
    failing_pulls: u32,
    push_calls: u32,
    pull_calls: u32,
    delay: Option<Duration>,
}

/// A scripted remote for tests.
///
/// Acknowledges every pushed record unless told to reject or conflict it,
/// and serves whatever records were seeded with [`MockRemote::seed`].
/// Pushed records are not echoed back on pull.
#[derive(Debug, Default)]
pub struct MockRemote {
    state: Mutex<MockState>,
}

impl MockRemote {
    /// Creates an empty mock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a record to the served log; returns its sequence.
    pub fn seed(&self, record: LogRecord) -> u64 {
        let mut state = self.state.lock();
        let sequence = state.log.len() as u64 + 1;
        state.log.push(PulledRecord { sequence, record });
        sequence
    }

    /// Rejects the record with this ID on every push.
    pub fn reject(&self, id: RecordId, reason: impl Into<String>) {
        self.state.lock().reject.insert(id, reason.into());
    }

    /// Reports a conflict for every record of this entity.
    pub fn conflict_on(&self, entity_id: EntityId) {
        self.state.lock().conflict.insert(entity_id);
    }

    /// Stops reporting conflicts.
    pub fn clear_conflicts(&self) {
        self.state.lock().conflict.clear();
    }

    /// Fails the next `count` push calls with a retryable error.
    pub fn fail_pushes(&self, count: u32) {
        self.state.lock().failing_pushes = count;
    }

    /// Fails the next `count` pull calls with a retryable error.
    pub fn fail_pulls(&self, count: u32) {
        self.state.lock().failing_pulls = count;
    }

    /// Delays every reply.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.state.lock().delay = delay;
    }

    /// Returns every record received, duplicates included.
    pub fn received(&self) -> Vec<LogRecord> {
        self.state.lock().received.clone()
    }

    /// Returns the number of push calls made.
    pub fn push_calls(&self) -> u32 {
        self.state.lock().push_calls
    }

    /// Returns the number of pull calls made.
    pub fn pull_calls(&self) -> u32 {
        self.state.lock().pull_calls
    }

    fn delay(&self) -> Option<Duration> {
        self.state.lock().delay
    }

    fn answer_push(&self, request: &PushRequest) -> SyncResult<PushResponse> {
        let mut state = self.state.lock();
        state.push_calls += 1;
        if state.failing_pushes > 0 {
            state.failing_pushes -= 1;
            return Err(SyncError::transport_retryable("connection reset"));
        }
        let outcomes = request
            .records
            .iter()
            .map(|record| {
                state.received.push(record.clone());
                if let Some(reason) = state.reject.get(&record.id) {
                    RecordAck::rejected(record, reason.clone())
                } else if state.conflict.contains(&record.entity_id) {
                    RecordAck::conflict(record, "remote holds a newer version")
                } else {
                    RecordAck::acked(record)
                }
            })
            .collect();
        Ok(PushResponse::new(outcomes))
    }

    fn answer_pull(&self, request: &PullRequest) -> SyncResult<PullResponse> {
        let mut state = self.state.lock();
        state.pull_calls += 1;
        if state.failing_pulls > 0 {
            state.failing_pulls -= 1;
            return Err(SyncError::transport_retryable("connection reset"));
        }
        let after: Vec<&PulledRecord> = state
            .log
            .iter()
            .filter(|p| p.sequence > request.since)
            .collect();
        let limit = request.limit.max(1) as usize;
        let has_more = after.len() > limit;
        let records: Vec<PulledRecord> = after.into_iter().take(limit).cloned().collect();
        let watermark = records.last().map_or(request.since, |p| p.sequence);
        Ok(PullResponse::new(records, watermark, has_more))
    }
}

impl RemoteAuthority for MockRemote {
    async fn push(&self, request: &PushRequest) -> SyncResult<PushResponse> {
        if let Some(delay) = self.delay() {
            tokio::time::sleep(delay).await;
        }
        self.answer_push(request)
    }

    async fn pull(&self, request: &PullRequest) -> SyncResult<PullResponse> {
        if let Some(delay) = self.delay() {
            tokio::time::sleep(delay).await;
        }
        self.answer_pull(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tillsync_protocol::{DeviceId, Operation, RecordOutcome, Timestamp};

    fn record(entity: &str, at: u64) -> LogRecord {
        LogRecord::new(
            Operation::Insert,
            "product",
            EntityId::new(entity),
            b"{}".to_vec(),
            DeviceId::new("till-2"),
            Timestamp::from_millis(at),
        )
    }

    #[tokio::test]
    async fn mock_pages_seeded_records() {
        let remote = MockRemote::new();
        for i in 1..=5 {
            remote.seed(record(&format!("p{i}"), i));
        }

        let page = remote
            .pull(&PullRequest::new(DeviceId::new("till-1"), 0, 2))
            .await
            .unwrap();
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.watermark, 2);
        assert!(page.has_more);

        let page = remote
            .pull(&PullRequest::new(DeviceId::new("till-1"), 4, 2))
            .await
            .unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.watermark, 5);
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn mock_scripted_outcomes() {
        let remote = MockRemote::new();
        let ok = record("a", 1);
        let bad = record("b", 2);
        let stale = record("c", 3);
        remote.reject(bad.id, "unknown entity type");
        remote.conflict_on(EntityId::new("c"));

        let request = PushRequest::new(
            DeviceId::new("till-1"),
            vec![ok.clone(), bad.clone(), stale.clone()],
        );
        let response = remote.push(&request).await.unwrap();
        assert_eq!(response.outcomes[0].outcome, RecordOutcome::Acked);
        assert_eq!(response.outcomes[1].outcome, RecordOutcome::Rejected);
        assert_eq!(response.outcomes[2].outcome, RecordOutcome::Conflict);
        assert_eq!(remote.received().len(), 3);
    }

    #[tokio::test]
    async fn mock_transient_failures() {
        let remote = MockRemote::new();
        remote.fail_pushes(1);
        let request = PushRequest::new(DeviceId::new("till-1"), vec![record("a", 1)]);

        let err = remote.push(&request).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(remote.push(&request).await.is_ok());
        assert_eq!(remote.push_calls(), 2);
    }
}
