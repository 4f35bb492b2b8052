//! Event types pushed over the run progress stream
//!
//! The stream emits named events on a fixed cadence; `progress` and `log`
//! are suppressed when nothing changed since the previous emission, so
//! snapshot types implement `PartialEq` for the content-equality check.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entities::{ImportLog, RunProgress, RunStatus, RunSummary};

/// Maximum serialized payload size carried by a wire log entry. Anything
/// longer is truncated before transmission to keep log batches small.
pub const LOG_PAYLOAD_CAP_BYTES: usize = 1024;

/// Full progress snapshot for one run, emitted only when changed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressSnapshot {
    pub run_id: String,
    pub status: RunStatus,
    pub progress: RunProgress,
    pub summary: RunSummary,
    pub updated_at: DateTime<Utc>,
}

/// Wire form of an audit log entry: `{id, at, type, payload}` with the
/// payload size-capped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntryWire {
    pub id: i64,
    pub at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub log_type: String,
    pub payload: String,
}

impl LogEntryWire {
    pub fn from_log(log: &ImportLog) -> Self {
        let mut payload = log.payload.to_string();
        if payload.len() > LOG_PAYLOAD_CAP_BYTES {
            let mut cut = LOG_PAYLOAD_CAP_BYTES;
            while !payload.is_char_boundary(cut) {
                cut -= 1;
            }
            payload.truncate(cut);
            payload.push('…');
        }
        Self {
            id: log.id,
            at: log.at,
            log_type: log.log_type.as_str().to_string(),
            payload,
        }
    }
}

/// Incremental batch of log entries newer than the client's cursor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogBatch {
    /// Highest log id contained in `entries`; the client passes it back
    /// as its cursor. Monotonically advancing.
    pub cursor: i64,
    pub entries: Vec<LogEntryWire>,
}

/// Events emitted by the run progress stream.
///
/// `error` is non-fatal and leaves the channel open; `end` is always the
/// final event before the channel closes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum RunEvent {
    Progress(ProgressSnapshot),
    Log(LogBatch),
    Ping { at: DateTime<Utc> },
    End { reason: String, error: Option<String> },
    Error { code: String, message: String },
}

impl RunEvent {
    pub fn is_end(&self) -> bool {
        matches!(self, RunEvent::End { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::LogType;

    #[test]
    fn oversized_payload_is_truncated() {
        let log = ImportLog {
            id: 7,
            template_id: "t1".to_string(),
            run_id: None,
            log_type: LogType::Info,
            payload: serde_json::json!({"blob": "x".repeat(4096)}),
            at: Utc::now(),
        };
        let wire = LogEntryWire::from_log(&log);
        assert!(wire.payload.len() <= LOG_PAYLOAD_CAP_BYTES + '…'.len_utf8());
        assert!(wire.payload.ends_with('…'));
    }

    #[test]
    fn events_serialize_with_stable_names() {
        let ping = RunEvent::Ping { at: Utc::now() };
        let json = serde_json::to_value(&ping).unwrap();
        assert_eq!(json["event"], "ping");
    }
}
