//! Push and pull wire messages.

use crate::codec::{from_cbor, to_cbor};
use crate::error::ProtocolResult;
use crate::ids::{DeviceId, EntityId, RecordId};
use crate::record::LogRecord;
use serde::{Deserialize, Serialize};

/// Version of the push/pull message format.
pub const PROTOCOL_VERSION: u16 = 1;

/// A batch of local records sent to the remote authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRequest {
    /// Message format version.
    pub protocol_version: u16,
    /// Device sending the batch.
    pub device_id: DeviceId,
    /// Records in `created_at` order.
    pub records: Vec<LogRecord>,
}

impl PushRequest {
    /// Creates a push request at the current protocol version.
    pub fn new(device_id: DeviceId, records: Vec<LogRecord>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            device_id,
            records,
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        from_cbor(bytes)
    }
}

/// What the remote authority did with one pushed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordOutcome {
    /// Stored (or already stored); the record is delivered.
    Acked,
    /// The remote holds a version that supersedes this one.
    Conflict,
    /// The record is malformed or not acceptable; do not resend.
    Rejected,
}

impl RecordOutcome {
    /// Returns a short lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordOutcome::Acked => "acked",
            RecordOutcome::Conflict => "conflict",
            RecordOutcome::Rejected => "rejected",
        }
    }
}

/// Per-record result of a push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordAck {
    /// The pushed record.
    pub record_id: RecordId,
    /// Entity the record targets.
    pub entity_id: EntityId,
    /// What happened to it.
    pub outcome: RecordOutcome,
    /// Human-readable detail for conflicts and rejections.
    pub reason: Option<String>,
}

impl RecordAck {
    /// Acknowledges a record.
    pub fn acked(record: &LogRecord) -> Self {
        Self::with_outcome(record, RecordOutcome::Acked, None)
    }

    /// Reports a conflict for a record.
    pub fn conflict(record: &LogRecord, reason: impl Into<String>) -> Self {
        Self::with_outcome(record, RecordOutcome::Conflict, Some(reason.into()))
    }

    /// Rejects a record.
    pub fn rejected(record: &LogRecord, reason: impl Into<String>) -> Self {
        Self::with_outcome(record, RecordOutcome::Rejected, Some(reason.into()))
    }

    fn with_outcome(record: &LogRecord, outcome: RecordOutcome, reason: Option<String>) -> Self {
        Self {
            record_id: record.id,
            entity_id: record.entity_id.clone(),
            outcome,
            reason,
        }
    }
}

/// Result of a push, one entry per pushed record in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResponse {
    /// Per-record outcomes.
    pub outcomes: Vec<RecordAck>,
}

impl PushResponse {
    /// Creates a response from outcomes.
    pub fn new(outcomes: Vec<RecordAck>) -> Self {
        Self { outcomes }
    }

    /// Counts outcomes of one kind.
    pub fn count(&self, outcome: RecordOutcome) -> usize {
        self.outcomes.iter().filter(|a| a.outcome == outcome).count()
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        from_cbor(bytes)
    }
}

/// Request for remote records after a watermark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Message format version.
    pub protocol_version: u16,
    /// Device asking.
    pub device_id: DeviceId,
    /// Return records with a sequence greater than this.
    pub since: u64,
    /// Maximum records to return.
    pub limit: u32,
}

impl PullRequest {
    /// Creates a pull request at the current protocol version.
    pub fn new(device_id: DeviceId, since: u64, limit: u32) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            device_id,
            since,
            limit,
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        from_cbor(bytes)
    }
}

/// A record as stored in the remote log, with its position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PulledRecord {
    /// Position in the remote log; strictly increasing.
    pub sequence: u64,
    /// The record.
    pub record: LogRecord,
}

/// A page of remote records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullResponse {
    /// Records in sequence order.
    pub records: Vec<PulledRecord>,
    /// Highest sequence covered by this page.
    pub watermark: u64,
    /// True if more records follow the watermark.
    pub has_more: bool,
}

impl PullResponse {
    /// Creates a pull response.
    pub fn new(records: Vec<PulledRecord>, watermark: u64, has_more: bool) -> Self {
        Self {
            records,
            watermark,
            has_more,
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        from_cbor(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::Timestamp;
    use crate::record::Operation;

    fn sample() -> LogRecord {
        LogRecord::new(
            Operation::Update,
            "product",
            EntityId::new("sku-9"),
            br#"{"stock":4}"#.to_vec(),
            DeviceId::new("till-2"),
            Timestamp::from_millis(1_700_000_000_000),
        )
    }

    #[test]
    fn push_request_roundtrip() {
        let req = PushRequest::new(DeviceId::new("till-2"), vec![sample(), sample()]);
        let decoded = PushRequest::decode(&req.encode().unwrap()).unwrap();
        assert_eq!(decoded, req);
        assert_eq!(decoded.protocol_version, PROTOCOL_VERSION);
    }

    #[test]
    fn push_response_counts() {
        let r = sample();
        let resp = PushResponse::new(vec![
            RecordAck::acked(&r),
            RecordAck::rejected(&r, "bad payload"),
            RecordAck::acked(&r),
        ]);
        let decoded = PushResponse::decode(&resp.encode().unwrap()).unwrap();
        assert_eq!(decoded.count(RecordOutcome::Acked), 2);
        assert_eq!(decoded.count(RecordOutcome::Rejected), 1);
        assert_eq!(decoded.outcomes[1].reason.as_deref(), Some("bad payload"));
    }

    #[test]
    fn pull_response_roundtrip() {
        let resp = PullResponse::new(
            vec![PulledRecord {
                sequence: 7,
                record: sample(),
            }],
            7,
            true,
        );
        assert_eq!(PullResponse::decode(&resp.encode().unwrap()).unwrap(), resp);
    }

    #[test]
    fn push_request_is_not_a_pull_request() {
        let bytes = PushRequest::new(DeviceId::new("x"), vec![]).encode().unwrap();
        assert!(PullRequest::decode(&bytes).is_err());
    }
}
