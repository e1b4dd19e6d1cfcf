//! # Ferrofeed Core
//!
//! Schema discovery, record normalization and live synchronization for
//! arbitrary JSON HTTP and WebSocket endpoints.
//!
//! ## Overview
//!
//! - **Discovery** of field trees and semantic types from one sample document
//! - **Normalization** of date-keyed financial series into sorted records
//! - **Flattening** of nested objects into dot-path records of scalars
//! - **Connection testing** of candidate endpoints before they are attached
//! - **Synchronization** by polling or by persistent sockets with automatic
//!   reconnection and fallback to polling
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | Engine tuning and `FERROFEED_*` overrides |
//! | [`discovery`] | Field tree and type inference |
//! | [`engine`] | Synchronization facade |
//! | [`error`] | Structured sync errors |
//! | [`financial`] | Financial series detection and normalization |
//! | [`flatten`] | Record flattening |
//! | [`http_client`] | HTTP client abstraction |
//! | [`pipeline`] | Payload to update batch |
//! | [`retry`] | Reconnection backoff |
//! | [`scheduler`] | Polling loops |
//! | [`socket`] | Socket transports and reconnection state machine |
//! | [`source`] | Source configuration |
//! | [`tester`] | One-shot connection test |
//! | [`throttling`] | Per-source request spacing |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ferrofeed_core::{SourceConfig, SyncCallbacks, SyncEngine};
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine = SyncEngine::new();
//!     let config = SourceConfig::new("https://api.example.com/prices")
//!         .with_refresh_interval_ms(5_000);
//!
//!     engine.start(
//!         "prices",
//!         config,
//!         SyncCallbacks::new(
//!             |batch, kind| println!("{kind:?}: {} records", batch.total_count),
//!             |error| eprintln!("{error}"),
//!         ),
//!     );
//!
//!     tokio::signal::ctrl_c().await.ok();
//!     engine.stop("prices");
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐
//! │   SyncEngine    │────▶│ initial fetch    │
//! └────────┬────────┘     └──────────────────┘
//!          │
//!    ┌─────┴──────────────┐
//!    ▼                    ▼
//! ┌─────────────┐   ┌───────────────┐  abandoned  ┌───────────────┐
//! │ Scheduler   │◀──│ SocketManager │────────────▶│ fallback poll │
//! └──────┬──────┘   └───────┬───────┘             └───────────────┘
//!        │                  │
//!        ▼                  ▼
//! ┌──────────────────────────────────┐
//! │ pipeline: normalize ▸ flatten    │
//! └──────────────────────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! ```rust
//! use ferrofeed_core::{SyncError, SyncErrorKind};
//!
//! fn on_error(error: SyncError) {
//!     match error.kind() {
//!         SyncErrorKind::RateLimited => {
//!             // expected while polling faster than the spacing; stay quiet
//!         }
//!         SyncErrorKind::ReconnectExhausted => {
//!             // socket given up; polling may have taken over
//!         }
//!         _ => eprintln!("{}: {error}", error.code()),
//!     }
//! }
//! ```
//!
//! ## Security
//!
//! - Credentials are applied to request headers only and redacted from
//!   `Debug` output
//! - Header values are never logged

pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod financial;
pub mod flatten;
pub mod http_client;
pub mod pipeline;
pub mod retry;
pub mod scheduler;
pub mod socket;
pub mod source;
pub mod tester;
pub mod throttling;

// Configuration
pub use config::{EngineConfig, ReconnectConfig};

// Discovery
pub use discovery::{
    all_paths, build_tree, discover, infer_type, is_date_like, DiscoveryResult, FieldNode,
    FieldType,
};

// Engine
pub use engine::{SyncEngine, SyncEngineBuilder, TransportMode};

// Error types
pub use error::{SyncError, SyncErrorKind};

// Normalization
pub use financial::{
    compare_date_keys, detect_series_paths, is_financial_time_series, normalize, value_at_path,
    DEFAULT_DATE_KEY,
};
pub use flatten::{flatten, unflatten, DataRecord, Scalar};

// HTTP client types
pub use http_client::{
    Authentication, HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse,
    ReqwestHttpClient,
};

// Update pipeline
pub use pipeline::{
    build_batch, parse_payload, BatchMetadata, FeedTransport, SyncCallbacks, UpdateBatch,
    UpdateKind,
};

// Reconnection
pub use retry::{Backoff, ReconnectPolicy};

// Transports
pub use scheduler::UpdateScheduler;
pub use socket::{SocketConnection, SocketConnector, SocketManager, SocketTarget};

// Sources
pub use source::{SocketKind, SourceConfig};

// Probing
pub use tester::{ConnectionTester, TestReport};

// Throttling
pub use throttling::RequestGate;
