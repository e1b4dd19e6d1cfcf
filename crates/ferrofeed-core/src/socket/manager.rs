use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::event::EventSocketConnector;
use super::raw::RawSocketConnector;
use super::state::{Effect, SocketEvent, SocketMachine, SocketState};
use super::transport::{SocketConnection, SocketConnector, SocketTarget};
use crate::config::{EngineConfig, ReconnectConfig};
use crate::error::SyncError;
use crate::pipeline::{build_batch, parse_payload, BatchMetadata, FeedTransport, SyncCallbacks, UpdateKind};
use crate::retry::ReconnectPolicy;
use crate::scheduler::UpdateScheduler;
use crate::source::{SocketKind, SourceConfig};

struct SocketSession {
    generation: u64,
    token: CancellationToken,
    kind: SocketKind,
    callbacks: SyncCallbacks,
}

/// Runs once when a session gives up for good with no polling fallback.
pub(crate) type AbandonHook = Box<dyn FnOnce() + Send + Sync>;

/// Registry of live socket sessions, one per source id.
///
/// Each session runs a driver task that feeds connection events into a
/// [`SocketMachine`] and executes the effects it returns. When a session is
/// abandoned and the source has a refresh interval, the manager hands the
/// source over to the [`UpdateScheduler`].
pub struct SocketManager {
    scheduler: Arc<UpdateScheduler>,
    raw: Arc<dyn SocketConnector>,
    event: Arc<dyn SocketConnector>,
    reconnect: ReconnectConfig,
    connect_timeout: Duration,
    next_generation: AtomicU64,
    sessions: Mutex<HashMap<String, SocketSession>>,
}

impl SocketManager {
    pub fn new(scheduler: Arc<UpdateScheduler>, config: &EngineConfig) -> Self {
        Self {
            scheduler,
            raw: Arc::new(RawSocketConnector),
            event: Arc::new(EventSocketConnector),
            reconnect: config.reconnect,
            connect_timeout: config.connect_timeout,
            next_generation: AtomicU64::new(1),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the connector used for one wire variant.
    pub fn with_connector(mut self, kind: SocketKind, connector: Arc<dyn SocketConnector>) -> Self {
        match kind {
            SocketKind::Raw => self.raw = connector,
            SocketKind::Event => self.event = connector,
        }
        self
    }

    /// Opens a socket session for `source_id`.
    ///
    /// Returns `Ok(false)` when a session already exists, and an error when
    /// the source has no socket URL.
    pub fn start(
        self: &Arc<Self>,
        source_id: &str,
        config: Arc<SourceConfig>,
        callbacks: SyncCallbacks,
    ) -> Result<bool, SyncError> {
        self.start_session(source_id, config, callbacks, None)
    }

    pub(crate) fn start_session(
        self: &Arc<Self>,
        source_id: &str,
        config: Arc<SourceConfig>,
        callbacks: SyncCallbacks,
        on_abandoned: Option<AbandonHook>,
    ) -> Result<bool, SyncError> {
        let target = SocketTarget::from_source(&config)
            .ok_or_else(|| SyncError::invalid_config("socketUrl is not configured"))?;
        let kind = config.socket_kind().unwrap_or_else(|| SocketKind::for_url(&target.url));

        let mut sessions = self
            .sessions
            .lock()
            .expect("socket registry lock is not poisoned");
        if sessions.contains_key(source_id) {
            return Ok(false);
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let callbacks = callbacks.for_session();
        let driver = SocketDriver {
            manager: Arc::downgrade(self),
            source_id: source_id.to_owned(),
            generation,
            kind,
            connector: match kind {
                SocketKind::Raw => Arc::clone(&self.raw),
                SocketKind::Event => Arc::clone(&self.event),
            },
            target,
            config,
            callbacks: callbacks.clone(),
            token: token.clone(),
            policy: ReconnectPolicy::for_kind(kind, &self.reconnect),
            connect_timeout: self.connect_timeout,
            on_abandoned,
        };
        let _ = tokio::spawn(driver.run());
        sessions.insert(
            source_id.to_owned(),
            SocketSession {
                generation,
                token,
                kind,
                callbacks,
            },
        );

        tracing::info!(source_id, kind = kind.as_str(), "socket session started");
        Ok(true)
    }

    /// Cancels any pending reconnection and closes the live connection.
    /// Returns whether a session existed.
    ///
    /// No callback of the session runs after this returns, unless it is
    /// called from inside one of those callbacks.
    pub fn stop(&self, source_id: &str) -> bool {
        match self.detach(source_id) {
            Some(callbacks) => {
                callbacks.wait_idle();
                true
            }
            None => false,
        }
    }

    /// Removes, cancels and revokes the session without waiting for a
    /// delivery in progress.
    pub(crate) fn detach(&self, source_id: &str) -> Option<SyncCallbacks> {
        let session = self
            .sessions
            .lock()
            .expect("socket registry lock is not poisoned")
            .remove(source_id)?;
        session.token.cancel();
        session.callbacks.revoke();
        tracing::info!(source_id, "socket session stopped");
        Some(session.callbacks)
    }

    pub fn is_active(&self, source_id: &str) -> bool {
        self.sessions
            .lock()
            .expect("socket registry lock is not poisoned")
            .contains_key(source_id)
    }

    pub fn kind(&self, source_id: &str) -> Option<SocketKind> {
        self.sessions
            .lock()
            .expect("socket registry lock is not poisoned")
            .get(source_id)
            .map(|session| session.kind)
    }

    pub fn stop_all(&self) -> usize {
        let detached = self.detach_all();
        for callbacks in &detached {
            callbacks.wait_idle();
        }
        detached.len()
    }

    pub(crate) fn detach_all(&self) -> Vec<SyncCallbacks> {
        let drained: Vec<SocketSession> = self
            .sessions
            .lock()
            .expect("socket registry lock is not poisoned")
            .drain()
            .map(|(_, session)| session)
            .collect();
        drained
            .into_iter()
            .map(|session| {
                session.token.cancel();
                session.callbacks.revoke();
                session.callbacks
            })
            .collect()
    }

    // Removal and fallback happen under one lock so a concurrent stop either
    // cancels the session first or finds the polling loop afterwards.
    fn hand_off_to_polling(
        &self,
        source_id: &str,
        generation: u64,
        token: &CancellationToken,
        config: &Arc<SourceConfig>,
        callbacks: &SyncCallbacks,
    ) {
        let mut sessions = self
            .sessions
            .lock()
            .expect("socket registry lock is not poisoned");
        let current = sessions
            .get(source_id)
            .is_some_and(|session| session.generation == generation);
        if !current || token.is_cancelled() {
            return;
        }
        if let Some(session) = sessions.remove(source_id) {
            session.callbacks.revoke();
        }

        if self
            .scheduler
            .start_polling(source_id, Arc::clone(config), callbacks.clone(), false)
        {
            tracing::info!(source_id, "socket abandoned; polling fallback started");
        }
    }

    /// Drops the session if it still belongs to `generation`; returns
    /// whether it did.
    fn release(&self, source_id: &str, generation: u64) -> bool {
        let mut sessions = self
            .sessions
            .lock()
            .expect("socket registry lock is not poisoned");
        let current = sessions
            .get(source_id)
            .is_some_and(|session| session.generation == generation);
        if current {
            let _ = sessions.remove(source_id);
        }
        current
    }
}

impl std::fmt::Debug for SocketManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let active = self
            .sessions
            .lock()
            .map(|sessions| sessions.len())
            .unwrap_or_default();
        f.debug_struct("SocketManager")
            .field("reconnect", &self.reconnect)
            .field("connect_timeout", &self.connect_timeout)
            .field("active", &active)
            .finish_non_exhaustive()
    }
}

struct SocketDriver {
    manager: Weak<SocketManager>,
    source_id: String,
    generation: u64,
    kind: SocketKind,
    connector: Arc<dyn SocketConnector>,
    target: SocketTarget,
    config: Arc<SourceConfig>,
    callbacks: SyncCallbacks,
    token: CancellationToken,
    policy: ReconnectPolicy,
    connect_timeout: Duration,
    on_abandoned: Option<AbandonHook>,
}

impl SocketDriver {
    async fn run(mut self) {
        let mut machine = SocketMachine::new(self.policy)
            .with_subscription(self.config.subscribe_message.is_some())
            .with_fallback_polling(self.config.refresh_interval().is_some());
        let mut connection: Option<Box<dyn SocketConnection>> = None;
        let mut reconnect_at: Option<Instant> = None;
        let mut effects: VecDeque<Effect> = machine.handle(SocketEvent::ConnectRequested).into();

        loop {
            while let Some(effect) = effects.pop_front() {
                if self.token.is_cancelled() && !machine.state().is_finished() {
                    effects.clear();
                    effects.extend(machine.handle(SocketEvent::StopRequested));
                    continue;
                }
                if let Some(event) = self.apply(effect, &mut connection, &mut reconnect_at).await {
                    effects.extend(machine.handle(event));
                }
            }
            if machine.state().is_finished() {
                break;
            }

            let event = tokio::select! {
                biased;
                _ = self.token.cancelled() => SocketEvent::StopRequested,
                _ = sleep_until_deadline(reconnect_at) => {
                    reconnect_at = None;
                    SocketEvent::ReconnectDue
                }
                incoming = next_incoming(&mut connection) => match incoming {
                    Some(Ok(text)) => SocketEvent::Message(text),
                    Some(Err(error)) => SocketEvent::Errored(error_text(error)),
                    None => {
                        connection = None;
                        tracing::info!(source_id = %self.source_id, "socket closed by peer");
                        SocketEvent::Closed
                    }
                },
            };
            effects.extend(machine.handle(event));
        }

        if let Some(mut connection) = connection.take() {
            connection.close().await;
        }
        let released = self
            .manager
            .upgrade()
            .is_some_and(|manager| manager.release(&self.source_id, self.generation));
        let gave_up = machine.state() == SocketState::Abandoned && self.config.refresh_interval().is_none();
        if released && gave_up {
            tracing::info!(source_id = %self.source_id, "socket abandoned without fallback; source released");
            if let Some(on_abandoned) = self.on_abandoned.take() {
                on_abandoned();
            }
        }
        tracing::debug!(
            source_id = %self.source_id,
            state = ?machine.state(),
            "socket driver exited"
        );
    }

    async fn apply(
        &self,
        effect: Effect,
        connection: &mut Option<Box<dyn SocketConnection>>,
        reconnect_at: &mut Option<Instant>,
    ) -> Option<SocketEvent> {
        match effect {
            Effect::Connect => {
                let outcome = tokio::select! {
                    biased;
                    _ = self.token.cancelled() => return Some(SocketEvent::StopRequested),
                    outcome = tokio::time::timeout(self.connect_timeout, self.connector.connect(&self.target)) => outcome,
                };
                match outcome {
                    Ok(Ok(opened)) => {
                        *connection = Some(opened);
                        tracing::info!(source_id = %self.source_id, url = %self.target.url, "socket open");
                        Some(SocketEvent::Opened)
                    }
                    Ok(Err(error)) => Some(SocketEvent::ConnectFailed(error_text(error))),
                    Err(_) => Some(SocketEvent::ConnectFailed(format!(
                        "connection timed out after {}ms",
                        self.connect_timeout.as_millis()
                    ))),
                }
            }
            Effect::SendSubscription => {
                let message = self.config.subscribe_message.as_ref()?;
                let open = connection.as_mut()?;
                match open.send(message).await {
                    Ok(()) => None,
                    Err(error) => Some(SocketEvent::Errored(error_text(error))),
                }
            }
            Effect::EmitMessage(text) => {
                self.deliver_message(&text);
                None
            }
            Effect::EmitError(error) => {
                tracing::warn!(source_id = %self.source_id, %error, "socket error");
                self.deliver_error(error);
                None
            }
            Effect::ScheduleReconnect { attempt, delay } => {
                *connection = None;
                *reconnect_at = Some(Instant::now() + delay);
                tracing::info!(
                    source_id = %self.source_id,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "socket reconnect scheduled"
                );
                None
            }
            Effect::CancelReconnect => {
                *reconnect_at = None;
                None
            }
            Effect::CloseConnection => {
                if let Some(mut open) = connection.take() {
                    open.close().await;
                }
                None
            }
            Effect::StartFallbackPolling => {
                if let Some(manager) = self.manager.upgrade() {
                    manager.hand_off_to_polling(
                        &self.source_id,
                        self.generation,
                        &self.token,
                        &self.config,
                        &self.callbacks,
                    );
                }
                None
            }
            Effect::EmitTerminal(error) => {
                tracing::warn!(source_id = %self.source_id, kind = self.kind.as_str(), %error, "socket abandoned");
                self.deliver_error(error);
                None
            }
        }
    }

    fn deliver_message(&self, text: &str) {
        if self.token.is_cancelled() {
            return;
        }
        match parse_payload(text) {
            Ok(payload) => {
                let batch = build_batch(
                    &payload,
                    &self.config,
                    BatchMetadata {
                        source_id: self.source_id.clone(),
                        source: self.target.url.clone(),
                        transport: Some(self.transport()),
                    },
                );
                self.callbacks.update(batch, UpdateKind::Incremental);
            }
            Err(error) => self.callbacks.error(error),
        }
    }

    fn deliver_error(&self, error: SyncError) {
        if !self.token.is_cancelled() {
            self.callbacks.error(error);
        }
    }

    fn transport(&self) -> FeedTransport {
        match self.kind {
            SocketKind::Raw => FeedTransport::WebSocket,
            SocketKind::Event => FeedTransport::SocketIo,
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn next_incoming(
    connection: &mut Option<Box<dyn SocketConnection>>,
) -> Option<Result<String, SyncError>> {
    match connection.as_mut() {
        Some(open) => open.next_message().await,
        None => std::future::pending().await,
    }
}

fn error_text(error: SyncError) -> String {
    match error {
        SyncError::Socket { message } => message,
        other => other.to_string(),
    }
}
