//! NDJSON event stream for `ferrofeed watch`.
//!
//! | Event | Description |
//! |-------|-------------|
//! | `start` | Synchronization requested |
//! | `update` | One update batch (snapshot or incremental) |
//! | `error` | Error reported by a transport |
//! | `end` | Synchronization stopped |

use std::io::Write;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamEventType {
    Start,
    Update,
    Error,
    End,
}

/// Error payload for `error` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEventError {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl From<&ferrofeed_core::SyncError> for StreamEventError {
    fn from(error: &ferrofeed_core::SyncError) -> Self {
        Self {
            code: error.code().to_owned(),
            message: error.to_string(),
            retryable: error.retryable(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub event: StreamEventType,
    /// Starts at 1 and increases by one per event.
    pub seq: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StreamEventError>,
}

/// Writes one JSON event per line and flushes after each.
pub struct NdjsonStreamWriter<W: Write> {
    writer: W,
    next_seq: u64,
}

impl<W: Write> NdjsonStreamWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            next_seq: 1,
        }
    }

    pub fn emit_start(&mut self, data: Value) -> Result<(), StreamError> {
        self.emit(StreamEventType::Start, Some(data), None)
    }

    pub fn emit_update(&mut self, data: Value) -> Result<(), StreamError> {
        self.emit(StreamEventType::Update, Some(data), None)
    }

    pub fn emit_error(&mut self, error: StreamEventError, data: Option<Value>) -> Result<(), StreamError> {
        self.emit(StreamEventType::Error, data, Some(error))
    }

    pub fn emit_end(&mut self, data: Value) -> Result<(), StreamError> {
        self.emit(StreamEventType::End, Some(data), None)
    }

    fn emit(
        &mut self,
        event: StreamEventType,
        data: Option<Value>,
        error: Option<StreamEventError>,
    ) -> Result<(), StreamError> {
        let event = StreamEvent {
            event,
            seq: self.next_seq,
            ts: OffsetDateTime::now_utc(),
            data,
            error,
        };
        self.next_seq += 1;

        let payload = serde_json::to_string(&event)?;
        self.writer.write_all(payload.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_are_sequenced_one_per_line() {
        let mut writer = NdjsonStreamWriter::new(Vec::new());
        writer.emit_start(json!({"sourceId": "prices"})).expect("start");
        writer
            .emit_error(
                StreamEventError::from(&ferrofeed_core::SyncError::Timeout { timeout_ms: 10 }),
                None,
            )
            .expect("error");
        writer.emit_end(json!({"stopped": true})).expect("end");

        let output = String::from_utf8(writer.into_inner()).expect("utf8");
        let events: Vec<StreamEvent> = output
            .lines()
            .map(|line| serde_json::from_str(line).expect("valid event"))
            .collect();

        assert_eq!(events.len(), 3);
        assert_eq!(events[1].event, StreamEventType::Error);
        assert_eq!(events[1].seq, 2);
        assert_eq!(events[1].error.as_ref().map(|e| e.code.as_str()), Some("sync.timeout"));
        assert!(events[1].data.is_none());
    }
}
