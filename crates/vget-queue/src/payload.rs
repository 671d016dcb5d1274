//! Queue payload and lease types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vget_models::JobId;

/// The payload carried by the queue.
///
/// Unknown fields are ignored on read; missing required fields make the
/// payload dead-letterable on first reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPayload {
    /// Job to execute
    pub job_id: JobId,
    /// Attempt number this delivery represents
    pub attempt: u32,
    /// When the payload entered the queue
    pub enqueued_at: DateTime<Utc>,
}

impl JobPayload {
    pub fn new(job_id: JobId, attempt: u32) -> Self {
        Self {
            job_id,
            attempt,
            enqueued_at: Utc::now(),
        }
    }

    /// Key identifying this payload while it is live in the queue.
    pub fn dedup_key(&self) -> String {
        format!("{}:{}", self.job_id, self.attempt)
    }
}

/// A time-bounded reservation of a payload.
///
/// The lease is owned exclusively by the reserving worker until `ack`,
/// `nack` or visibility expiry.
#[derive(Debug, Clone)]
pub struct Lease {
    /// The reserved payload
    pub payload: JobPayload,
    /// Backend-specific token identifying the reservation
    pub token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_wire_format() {
        let p = JobPayload::new(JobId::from("j-1"), 2);
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["job_id"], "j-1");
        assert_eq!(json["attempt"], 2);
        assert!(json["enqueued_at"].is_string());
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let raw = r#"{"job_id":"j-1","attempt":0,"enqueued_at":"2025-01-01T00:00:00Z","extra":true}"#;
        let p: JobPayload = serde_json::from_str(raw).unwrap();
        assert_eq!(p.job_id, JobId::from("j-1"));
    }

    #[test]
    fn missing_required_fields_fail() {
        let raw = r#"{"attempt":0}"#;
        assert!(serde_json::from_str::<JobPayload>(raw).is_err());
    }
}
