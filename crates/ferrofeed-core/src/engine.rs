//! The synchronization facade hosts talk to.
//!
//! [`SyncEngine::start`] runs one immediate HTTP fetch for a source, delivers
//! it as a snapshot, then keeps the source fresh over a socket (when
//! `socketUrl` is set) or by polling (when `refreshIntervalMs` is positive).
//! All per-source state lives inside the engine and its scheduler and socket
//! manager; dropping the engine tears everything down.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::SyncError;
use crate::http_client::{HttpClient, ReqwestHttpClient};
use crate::pipeline::{SyncCallbacks, UpdateKind};
use crate::scheduler::UpdateScheduler;
use crate::socket::manager::AbandonHook;
use crate::socket::{SocketConnector, SocketManager};
use crate::source::{SocketKind, SourceConfig};
use crate::tester::ConnectionTester;

/// Transport currently keeping a source fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    /// Not started, still bootstrapping, or one-shot only.
    None,
    Polling,
    Socket,
}

impl TransportMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Polling => "polling",
            Self::Socket => "socket",
        }
    }
}

impl Display for TransportMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

struct SourceEntry {
    generation: u64,
    token: CancellationToken,
    callbacks: SyncCallbacks,
}

struct EngineInner {
    config: EngineConfig,
    http_client: Arc<dyn HttpClient>,
    scheduler: Arc<UpdateScheduler>,
    sockets: Arc<SocketManager>,
    next_generation: AtomicU64,
    sources: Mutex<HashMap<String, SourceEntry>>,
}

/// Builder for [`SyncEngine`].
///
/// ```no_run
/// use ferrofeed_core::{EngineConfig, SyncEngineBuilder};
///
/// let engine = SyncEngineBuilder::new()
///     .with_config(EngineConfig::default())
///     .build();
/// ```
#[derive(Default)]
pub struct SyncEngineBuilder {
    config: EngineConfig,
    http_client: Option<Arc<dyn HttpClient>>,
    connectors: Vec<(SocketKind, Arc<dyn SocketConnector>)>,
}

impl SyncEngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the reqwest transport, typically with an in-memory fake.
    pub fn with_http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Replace the connector for one socket variant.
    pub fn with_socket_connector(
        mut self,
        kind: SocketKind,
        connector: Arc<dyn SocketConnector>,
    ) -> Self {
        self.connectors.push((kind, connector));
        self
    }

    pub fn build(self) -> SyncEngine {
        let http_client = self
            .http_client
            .unwrap_or_else(|| Arc::new(ReqwestHttpClient::new()));
        let scheduler = Arc::new(UpdateScheduler::new(
            Arc::clone(&http_client),
            self.config.min_request_spacing,
            self.config.request_timeout,
        ));
        let sockets = self.connectors.into_iter().fold(
            SocketManager::new(Arc::clone(&scheduler), &self.config),
            |manager, (kind, connector)| manager.with_connector(kind, connector),
        );

        SyncEngine {
            inner: Arc::new(EngineInner {
                config: self.config,
                http_client,
                scheduler,
                sockets: Arc::new(sockets),
                next_generation: AtomicU64::new(1),
                sources: Mutex::new(HashMap::new()),
            }),
        }
    }
}

/// Single live entry point for synchronizing sources.
///
/// Methods that start work spawn tokio tasks and must be called from within
/// a runtime. Share the engine behind an `Arc`; it is torn down on drop.
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    /// Engine with default configuration and the reqwest transport.
    pub fn new() -> Self {
        SyncEngineBuilder::new().build()
    }

    pub fn builder() -> SyncEngineBuilder {
        SyncEngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Tester sharing this engine's transport and default timeout.
    pub fn tester(&self) -> ConnectionTester {
        ConnectionTester::new(Arc::clone(&self.inner.http_client))
            .with_default_timeout(self.inner.config.request_timeout)
    }

    /// Starts synchronizing `source_id`. Returns `false` when the id is
    /// already active; the existing transport is left untouched.
    pub fn start(&self, source_id: &str, config: SourceConfig, callbacks: SyncCallbacks) -> bool {
        let mut sources = self
            .inner
            .sources
            .lock()
            .expect("engine registry lock is not poisoned");
        if sources.contains_key(source_id) {
            tracing::debug!(source_id, "source already active; start ignored");
            return false;
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let callbacks = callbacks.for_session();
        let _ = tokio::spawn(bootstrap(
            Arc::clone(&self.inner),
            source_id.to_owned(),
            Arc::new(config),
            callbacks.clone(),
            generation,
            token.clone(),
        ));
        sources.insert(
            source_id.to_owned(),
            SourceEntry {
                generation,
                token,
                callbacks,
            },
        );

        tracing::info!(source_id, "source started");
        true
    }

    /// Stops every transport for `source_id` and discards its state.
    /// Returns whether anything was running.
    ///
    /// Once this returns, no callback for the source is running on another
    /// thread and none will be invoked. Called from inside a callback it
    /// does not wait for the delivery in progress.
    pub fn stop(&self, source_id: &str) -> bool {
        let mut detached = Vec::new();
        {
            let mut sources = self
                .inner
                .sources
                .lock()
                .expect("engine registry lock is not poisoned");
            if let Some(entry) = sources.remove(source_id) {
                entry.token.cancel();
                entry.callbacks.revoke();
                detached.push(entry.callbacks);
            }
            detached.extend(self.inner.sockets.detach(source_id));
            detached.extend(self.inner.scheduler.detach_polling(source_id));
        }

        for callbacks in &detached {
            callbacks.wait_idle();
        }
        let stopped = !detached.is_empty();
        if stopped {
            tracing::info!(source_id, "source stopped");
        }
        stopped
    }

    /// Stops every source; returns how many were registered.
    pub fn stop_all(&self) -> usize {
        let mut detached = Vec::new();
        let count = {
            let mut sources = self
                .inner
                .sources
                .lock()
                .expect("engine registry lock is not poisoned");
            let count = sources.len();
            for (_, entry) in sources.drain() {
                entry.token.cancel();
                entry.callbacks.revoke();
                detached.push(entry.callbacks);
            }
            detached.extend(self.inner.sockets.detach_all());
            detached.extend(self.inner.scheduler.detach_all());
            count
        };

        for callbacks in &detached {
            callbacks.wait_idle();
        }
        count
    }

    pub fn transport(&self, source_id: &str) -> TransportMode {
        if self.inner.sockets.is_active(source_id) {
            TransportMode::Socket
        } else if self.inner.scheduler.is_polling(source_id) {
            TransportMode::Polling
        } else {
            TransportMode::None
        }
    }

    pub fn is_active(&self, source_id: &str) -> bool {
        self.inner
            .sources
            .lock()
            .expect("engine registry lock is not poisoned")
            .contains_key(source_id)
    }

    /// Registered source ids in sorted order.
    pub fn active_sources(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .sources
            .lock()
            .expect("engine registry lock is not poisoned")
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

impl Default for SyncEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        let _ = self.stop_all();
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.inner.config)
            .field("scheduler", &self.inner.scheduler)
            .field("sockets", &self.inner.sockets)
            .finish_non_exhaustive()
    }
}

enum Continuation {
    Socket,
    Polling,
    OneShot,
}

async fn bootstrap(
    inner: Arc<EngineInner>,
    source_id: String,
    config: Arc<SourceConfig>,
    callbacks: SyncCallbacks,
    generation: u64,
    token: CancellationToken,
) {
    let outcome = tokio::select! {
        biased;
        _ = token.cancelled() => return,
        outcome = inner.scheduler.fetch_once(&source_id, &config) => outcome,
    };
    if token.is_cancelled() {
        return;
    }

    match outcome {
        Ok(batch) => callbacks.update(batch, UpdateKind::Snapshot),
        Err(error) => {
            tracing::warn!(source_id = %source_id, code = error.code(), %error, "initial fetch failed");
            inner.release(&source_id, generation);
            callbacks.error(error);
            return;
        }
    }

    let continuation = if config.socket_url.is_some() {
        Continuation::Socket
    } else if config.refresh_interval().is_some() {
        Continuation::Polling
    } else {
        Continuation::OneShot
    };

    // The registry check and the transport start happen under one lock so a
    // concurrent stop cannot slip between them. Callbacks run after release.
    let failure: Option<SyncError> = {
        let sources = inner
            .sources
            .lock()
            .expect("engine registry lock is not poisoned");
        let current = sources
            .get(&source_id)
            .is_some_and(|entry| entry.generation == generation);
        if !current || token.is_cancelled() {
            return;
        }

        match continuation {
            Continuation::Socket => {
                let engine = Arc::downgrade(&inner);
                let released_id = source_id.clone();
                let on_abandoned: AbandonHook = Box::new(move || {
                    if let Some(engine) = engine.upgrade() {
                        engine.release(&released_id, generation);
                    }
                });
                inner
                    .sockets
                    .start_session(&source_id, Arc::clone(&config), callbacks.clone(), Some(on_abandoned))
                    .err()
            }
            Continuation::Polling => {
                let _ = inner
                    .scheduler
                    .start_polling(&source_id, Arc::clone(&config), callbacks.clone(), true);
                None
            }
            Continuation::OneShot => {
                tracing::debug!(source_id = %source_id, "no continuous transport configured");
                None
            }
        }
    };

    if let Some(error) = failure {
        inner.release(&source_id, generation);
        callbacks.error(error);
    }
}

impl EngineInner {
    fn release(&self, source_id: &str, generation: u64) {
        let mut sources = self
            .sources
            .lock()
            .expect("engine registry lock is not poisoned");
        if sources
            .get(source_id)
            .is_some_and(|entry| entry.generation == generation)
        {
            let _ = sources.remove(source_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;
    use crate::http_client::{HttpError, HttpRequest, HttpResponse};

    #[derive(Default)]
    struct FixedClient {
        calls: AtomicUsize,
    }

    impl HttpClient for FixedClient {
        fn execute<'a>(
            &'a self,
            _request: HttpRequest,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(HttpResponse::ok_json(r#"{"price": 10}"#)) })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_source_stays_registered_without_transport() {
        let client = Arc::new(FixedClient::default());
        let engine = SyncEngine::builder().with_http_client(client.clone()).build();
        let callbacks = SyncCallbacks::new(|_, _| {}, |_| {});

        assert!(engine.start("once", SourceConfig::new("https://api.example.com"), callbacks));
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.transport("once"), TransportMode::None);
        assert_eq!(engine.active_sources(), vec![String::from("once")]);
        assert!(engine.stop("once"));
        assert!(!engine.stop("once"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_initial_fetch_releases_the_source() {
        let engine = SyncEngine::builder()
            .with_http_client(Arc::new(FixedClient::default()))
            .build();
        let errors = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&errors);
        let callbacks = SyncCallbacks::new(|_, _| {}, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        engine.start("bad", SourceConfig::new("ftp://example.com"), callbacks);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert!(!engine.is_active("bad"));
    }

    #[test]
    fn transport_mode_labels() {
        assert_eq!(TransportMode::Polling.to_string(), "polling");
        assert_eq!(TransportMode::None.as_str(), "none");
    }
}
