//! Response-to-batch pipeline shared by polling and socket transports.
//!
//! Every payload goes through the same two steps: optional financial series
//! normalization at the configured path, then flattening (per element for
//! array payloads, once for a bare object).

use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, PoisonError};
use std::cell::Cell;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::error::SyncError;
use crate::financial::{is_financial_time_series, normalize, value_at_path, DEFAULT_DATE_KEY};
use crate::flatten::{flatten, DataRecord};
use crate::source::SourceConfig;

/// Transport a batch arrived over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedTransport {
    Http,
    #[serde(rename = "websocket")]
    WebSocket,
    #[serde(rename = "socketio")]
    SocketIo,
}

impl FeedTransport {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::WebSocket => "websocket",
            Self::SocketIo => "socketio",
        }
    }
}

impl Display for FeedTransport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the consumer should replace or append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    Snapshot,
    Incremental,
}

impl UpdateKind {
    pub const fn is_incremental(self) -> bool {
        matches!(self, Self::Incremental)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchMetadata {
    pub source_id: String,
    /// Endpoint or socket URL the payload came from.
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<FeedTransport>,
}

/// One normalized snapshot handed to the consumer. Never mutated after emission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBatch {
    pub records: Vec<DataRecord>,
    pub total_count: usize,
    #[serde(with = "time::serde::rfc3339")]
    pub fetched_at: OffsetDateTime,
    pub metadata: BatchMetadata,
}

/// Turns a parsed payload into a batch according to `config`.
pub fn build_batch(
    payload: &Value,
    config: &SourceConfig,
    metadata: BatchMetadata,
) -> UpdateBatch {
    let normalized = normalize_financial(payload, config);
    let data = normalized.as_ref().unwrap_or(payload);

    let records: Vec<DataRecord> = match data {
        Value::Array(items) => items.iter().map(|item| flatten(item, "")).collect(),
        Value::Object(_) => vec![flatten(data, "")],
        _ => Vec::new(),
    };

    UpdateBatch {
        total_count: records.len(),
        records,
        fetched_at: OffsetDateTime::now_utc(),
        metadata,
    }
}

fn normalize_financial(payload: &Value, config: &SourceConfig) -> Option<Value> {
    let path = config.financial_data_path.as_deref()?;
    let series = value_at_path(payload, path)?;
    if !is_financial_time_series(series) {
        tracing::debug!(path, "configured financial path does not hold a time series");
        return None;
    }
    Some(Value::Array(normalize(series, DEFAULT_DATE_KEY)))
}

/// Parses a raw text payload as JSON.
///
/// Event-multiplexed sockets sometimes deliver JSON encoded inside a string;
/// such payloads are unwrapped one level.
pub fn parse_payload(text: &str) -> Result<Value, SyncError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| SyncError::parse(format!("invalid JSON: {e}")))?;
    Ok(unwrap_string_payload(value))
}

pub(crate) fn unwrap_string_payload(value: Value) -> Value {
    match value {
        Value::String(inner) => match serde_json::from_str::<Value>(&inner) {
            Ok(parsed @ (Value::Object(_) | Value::Array(_))) => parsed,
            _ => Value::String(inner),
        },
        other => other,
    }
}

pub type UpdateHandler = Arc<dyn Fn(UpdateBatch, UpdateKind) + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(SyncError) + Send + Sync>;

thread_local! {
    static DELIVERING: Cell<bool> = const { Cell::new(false) };
}

/// Orders callback delivery against revocation for one session.
///
/// A delivery checks the revoked flag and runs the handler while holding
/// `in_flight`, so once `revoke` then `wait_idle` return no handler is
/// running and none will start. A thread that is itself inside a handler
/// never waits, so stopping sources from a callback cannot deadlock.
// Restores the thread's delivering flag even if the handler panics.
struct DeliveringMarker(bool);

impl DeliveringMarker {
    fn enter() -> Self {
        Self(DELIVERING.with(|delivering| delivering.replace(true)))
    }
}

impl Drop for DeliveringMarker {
    fn drop(&mut self) {
        DELIVERING.with(|delivering| delivering.set(self.0));
    }
}

#[derive(Default)]
struct DeliveryGuard {
    revoked: AtomicBool,
    in_flight: Mutex<()>,
}

impl DeliveryGuard {
    fn deliver(&self, invoke: impl FnOnce()) {
        let _in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if self.revoked.load(AtomicOrdering::SeqCst) {
            return;
        }
        let _marker = DeliveringMarker::enter();
        invoke();
    }

    fn revoke(&self) {
        self.revoked.store(true, AtomicOrdering::SeqCst);
    }

    fn wait_idle(&self) {
        if !DELIVERING.with(Cell::get) {
            drop(self.in_flight.lock().unwrap_or_else(PoisonError::into_inner));
        }
    }
}

/// Consumer callbacks for one source.
///
/// Clones share one delivery guard. Each transport session takes its own
/// guard through [`SyncCallbacks::for_session`] and revokes it on stop.
#[derive(Clone)]
pub struct SyncCallbacks {
    on_update: UpdateHandler,
    on_error: ErrorHandler,
    guard: Arc<DeliveryGuard>,
}

impl SyncCallbacks {
    pub fn new<U, E>(on_update: U, on_error: E) -> Self
    where
        U: Fn(UpdateBatch, UpdateKind) + Send + Sync + 'static,
        E: Fn(SyncError) + Send + Sync + 'static,
    {
        Self {
            on_update: Arc::new(on_update),
            on_error: Arc::new(on_error),
            guard: Arc::default(),
        }
    }

    /// Same handlers behind a fresh, live guard.
    pub(crate) fn for_session(&self) -> Self {
        Self {
            on_update: Arc::clone(&self.on_update),
            on_error: Arc::clone(&self.on_error),
            guard: Arc::default(),
        }
    }

    /// Invokes the update handler unless this session has been revoked.
    pub fn update(&self, batch: UpdateBatch, kind: UpdateKind) {
        self.guard.deliver(|| (self.on_update)(batch, kind));
    }

    /// Invokes the error handler unless this session has been revoked.
    pub fn error(&self, error: SyncError) {
        self.guard.deliver(|| (self.on_error)(error));
    }

    pub fn is_revoked(&self) -> bool {
        self.guard.revoked.load(AtomicOrdering::SeqCst)
    }

    /// Blocks further deliveries without waiting; safe under registry locks.
    pub(crate) fn revoke(&self) {
        self.guard.revoke();
    }

    /// Waits for a delivery already in progress on another thread.
    pub(crate) fn wait_idle(&self) {
        self.guard.wait_idle();
    }
}

impl std::fmt::Debug for SyncCallbacks {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCallbacks")
            .field("revoked", &self.is_revoked())
            .finish_non_exhaustive()
    }
}
