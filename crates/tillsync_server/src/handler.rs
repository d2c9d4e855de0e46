//! Request handlers for sync endpoints.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::log::{Admission, ServerLog};
use std::sync::Arc;
use tillsync_protocol::{
    DeviceId, LogRecord, PullRequest, PullResponse, PushRequest, PushResponse, RecordAck,
    RecordOutcome, PROTOCOL_VERSION,
};
use tracing::{debug, info, warn};

/// Handler for sync requests.
pub struct RequestHandler {
    config: ServerConfig,
    log: Arc<ServerLog>,
}

impl RequestHandler {
    /// Creates a handler over a shared log.
    pub fn new(config: ServerConfig, log: Arc<ServerLog>) -> Self {
        Self { config, log }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Handles a push request.
    ///
    /// Every record gets its own outcome; one bad record never fails the
    /// rest of the batch. Records past `max_push_batch` get no outcome at
    /// all and the client sends them again.
    pub fn handle_push(&self, request: PushRequest) -> ServerResult<PushResponse> {
        check_version(request.protocol_version)?;
        let device = request.device_id;
        let mut records = request.records;
        let cap = self.config.max_push_batch.max(1) as usize;
        if records.len() > cap {
            warn!(
                %device,
                records = records.len(),
                cap,
                "push exceeds the batch cap; answering the first records only"
            );
            records.truncate(cap);
        }

        let mut outcomes = Vec::with_capacity(records.len());
        for record in records {
            if let Err(reason) = self.validate(&device, &record) {
                warn!(%device, record = %record.id, %reason, "rejecting record");
                outcomes.push(RecordAck::rejected(&record, reason));
                continue;
            }

            let ack = match self.log.admit(record.clone()) {
                Admission::Accepted { sequence } => {
                    debug!(record = %record.id, sequence, "record logged");
                    RecordAck::acked(&record)
                }
                Admission::Duplicate => RecordAck::acked(&record),
                Admission::Stale { current } => RecordAck::conflict(
                    &record,
                    format!("server holds newer version {}", current.version),
                ),
            };
            outcomes.push(ack);
        }

        let response = PushResponse::new(outcomes);
        info!(
            %device,
            acked = response.count(RecordOutcome::Acked),
            conflicts = response.count(RecordOutcome::Conflict),
            rejected = response.count(RecordOutcome::Rejected),
            "push handled"
        );
        Ok(response)
    }

    /// Handles a pull request.
    pub fn handle_pull(&self, request: PullRequest) -> ServerResult<PullResponse> {
        check_version(request.protocol_version)?;
        let limit = request.limit.clamp(1, self.config.max_pull_batch.max(1));

        let (records, has_more) = self.log.since(request.since, limit);
        let watermark = records
            .last()
            .map(|r| r.sequence)
            .unwrap_or(request.since);
        debug!(
            device = %request.device_id,
            since = request.since,
            records = records.len(),
            has_more,
            "pull handled"
        );
        Ok(PullResponse::new(records, watermark, has_more))
    }

    fn validate(&self, device: &DeviceId, record: &LogRecord) -> Result<(), String> {
        if record.entity_type.trim().is_empty() {
            return Err("missing entity type".to_string());
        }
        if record.entity_id.is_blank() {
            return Err("missing entity id".to_string());
        }
        if &record.device_id != device {
            return Err(format!(
                "record written by {} pushed by {device}",
                record.device_id
            ));
        }
        if !self.config.accepts_type(&record.entity_type) {
            return Err(format!("unknown entity type: {}", record.entity_type));
        }
        if !record.operation.is_delete() {
            serde_json::from_slice::<serde_json::Value>(&record.payload)
                .map_err(|e| format!("payload is not valid JSON: {e}"))?;
        }
        Ok(())
    }
}

fn check_version(got: u16) -> ServerResult<()> {
    if got != PROTOCOL_VERSION {
        return Err(ServerError::ProtocolMismatch {
            expected: PROTOCOL_VERSION,
            got,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tillsync_protocol::{DevicePriority, EntityId, Operation, Timestamp};

    fn make_record(entity_type: &str, id: &str, payload: &[u8], at: u64) -> LogRecord {
        LogRecord::new(
            Operation::Insert,
            entity_type,
            EntityId::new(id),
            payload.to_vec(),
            DeviceId::new("till-1"),
            Timestamp::from_millis(at),
        )
    }

    fn create_handler(config: ServerConfig) -> RequestHandler {
        let log = Arc::new(ServerLog::new(config.device_priority.clone()));
        RequestHandler::new(config, log)
    }

    fn push(records: Vec<LogRecord>) -> PushRequest {
        PushRequest::new(DeviceId::new("till-1"), records)
    }

    #[test]
    fn pull_empty() {
        let handler = create_handler(ServerConfig::default());
        let response = handler
            .handle_pull(PullRequest::new(DeviceId::new("till-1"), 0, 10))
            .unwrap();
        assert!(response.records.is_empty());
        assert_eq!(response.watermark, 0);
        assert!(!response.has_more);
    }

    #[test]
    fn push_and_pull() {
        let handler = create_handler(ServerConfig::default());
        let response = handler
            .handle_push(push(vec![
                make_record("sale", "s1", b"{}", 1),
                make_record("sale", "s2", b"{}", 2),
            ]))
            .unwrap();
        assert_eq!(response.count(RecordOutcome::Acked), 2);

        let pulled = handler
            .handle_pull(PullRequest::new(DeviceId::new("till-2"), 0, 10))
            .unwrap();
        assert_eq!(pulled.records.len(), 2);
        assert_eq!(pulled.watermark, 2);
    }

    #[test]
    fn invalid_records_are_rejected_individually() {
        let config = ServerConfig::default().with_known_entity_types(["sale"]);
        let handler = create_handler(config);
        let mut foreign = make_record("sale", "s4", b"{}", 4);
        foreign.device_id = DeviceId::new("till-9");

        let response = handler
            .handle_push(push(vec![
                make_record("sale", "s1", b"{}", 1),
                make_record("payroll", "p1", b"{}", 2),
                make_record("sale", "s3", b"not json", 3),
                foreign,
                make_record("sale", " ", b"{}", 5),
            ]))
            .unwrap();

        let outcomes: Vec<_> = response.outcomes.iter().map(|a| a.outcome).collect();
        assert_eq!(
            outcomes,
            vec![
                RecordOutcome::Acked,
                RecordOutcome::Rejected,
                RecordOutcome::Rejected,
                RecordOutcome::Rejected,
                RecordOutcome::Rejected,
            ]
        );
        assert!(response.outcomes[1]
            .reason
            .as_deref()
            .unwrap()
            .contains("unknown entity type"));
    }

    #[test]
    fn delete_payload_is_not_parsed() {
        let handler = create_handler(ServerConfig::default());
        let mut delete = make_record("sale", "s1", b"", 1);
        delete.operation = Operation::Delete;

        let response = handler.handle_push(push(vec![delete])).unwrap();
        assert_eq!(response.count(RecordOutcome::Acked), 1);
    }

    #[test]
    fn stale_write_is_a_conflict() {
        let handler = create_handler(ServerConfig::default());
        handler
            .handle_push(push(vec![make_record("sale", "s1", b"{}", 20)]))
            .unwrap();
        let response = handler
            .handle_push(push(vec![make_record("sale", "s1", b"{}", 10)]))
            .unwrap();

        assert_eq!(response.outcomes[0].outcome, RecordOutcome::Conflict);
    }

    #[test]
    fn oversized_push_is_answered_in_part() {
        let handler = create_handler(ServerConfig::default().with_max_push_batch(2));
        let records: Vec<LogRecord> = (0..3)
            .map(|i| make_record("sale", &format!("s{i}"), b"{}", i + 1))
            .collect();
        let response = handler.handle_push(push(records.clone())).unwrap();

        assert_eq!(response.outcomes.len(), 2);
        assert_eq!(response.outcomes[0].record_id, records[0].id);
        assert_eq!(response.outcomes[1].record_id, records[1].id);
        assert!(!handler.log.contains(&records[2].id));
    }

    #[test]
    fn wrong_protocol_version() {
        let handler = create_handler(ServerConfig::default());
        let mut request = PullRequest::new(DeviceId::new("till-1"), 0, 10);
        request.protocol_version = 99;
        assert!(matches!(
            handler.handle_pull(request),
            Err(ServerError::ProtocolMismatch { got: 99, .. })
        ));
    }

    #[test]
    fn pull_pagination_respects_server_cap() {
        let config = ServerConfig::default()
            .with_max_pull_batch(2)
            .with_device_priority(DevicePriority::default());
        let handler = create_handler(config);
        let records = (0..5)
            .map(|i| make_record("sale", &format!("s{i}"), b"{}", i))
            .collect();
        handler.handle_push(push(records)).unwrap();

        let device = DeviceId::new("till-2");
        let first = handler
            .handle_pull(PullRequest::new(device.clone(), 0, 100))
            .unwrap();
        assert_eq!(first.records.len(), 2);
        assert!(first.has_more);

        let second = handler
            .handle_pull(PullRequest::new(device.clone(), first.watermark, 100))
            .unwrap();
        assert_eq!(second.records.len(), 2);

        let last = handler
            .handle_pull(PullRequest::new(device, second.watermark, 100))
            .unwrap();
        assert_eq!(last.records.len(), 1);
        assert!(!last.has_more);
        assert_eq!(last.watermark, 5);
    }
}
