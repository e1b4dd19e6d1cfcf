//! Per-source polling loops.
//!
//! Each polled source owns one background task driven by a tokio interval
//! and a [`CancellationToken`]. Requests for the same source id are spaced
//! by the shared [`RequestGate`], so no two requests for one source overlap
//! even when the engine's initial fetch and the loop race.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::SyncError;
use crate::http_client::{execute_with_timeout, HttpClient};
use crate::pipeline::{build_batch, parse_payload, BatchMetadata, FeedTransport, SyncCallbacks, UpdateBatch, UpdateKind};
use crate::source::SourceConfig;
use crate::throttling::RequestGate;

struct PollHandle {
    token: CancellationToken,
    interval: Duration,
    callbacks: SyncCallbacks,
}

/// Owns the polling registry and the per-source request gate.
pub struct UpdateScheduler {
    client: Arc<dyn HttpClient>,
    gate: RequestGate,
    default_timeout: Duration,
    polls: Mutex<HashMap<String, PollHandle>>,
}

impl UpdateScheduler {
    pub fn new(client: Arc<dyn HttpClient>, min_spacing: Duration, default_timeout: Duration) -> Self {
        Self {
            client,
            gate: RequestGate::new(min_spacing),
            default_timeout,
            polls: Mutex::new(HashMap::new()),
        }
    }

    /// Performs one gated fetch and runs the result through the pipeline.
    ///
    /// An attempt inside the spacing window fails with
    /// [`SyncError::RateLimited`] without touching the network.
    pub async fn fetch_once(
        &self,
        source_id: &str,
        config: &SourceConfig,
    ) -> Result<UpdateBatch, SyncError> {
        config.validate_endpoint()?;
        self.gate
            .try_acquire(source_id)
            .map_err(|retry_after| SyncError::RateLimited { retry_after })?;

        let request = config.to_http_request(self.default_timeout);
        let response = execute_with_timeout(self.client.as_ref(), request).await?;
        if !response.is_success() {
            return Err(SyncError::http_status(response.status));
        }

        let payload = parse_payload(&response.body)?;
        let batch = build_batch(
            &payload,
            config,
            BatchMetadata {
                source_id: source_id.to_owned(),
                source: config.endpoint.clone(),
                transport: Some(FeedTransport::Http),
            },
        );
        tracing::debug!(source_id, records = batch.total_count, "fetched batch");
        Ok(batch)
    }

    /// Starts the polling loop for `source_id`.
    ///
    /// Returns `false` without side effects when the source is already
    /// polling or has no positive refresh interval. With
    /// `skip_initial_fetch` the first request waits one full interval.
    pub fn start_polling(
        self: &Arc<Self>,
        source_id: &str,
        config: Arc<SourceConfig>,
        callbacks: SyncCallbacks,
        skip_initial_fetch: bool,
    ) -> bool {
        let Some(interval) = config.refresh_interval() else {
            tracing::debug!(source_id, "no refresh interval configured; polling not started");
            return false;
        };

        let mut polls = self
            .polls
            .lock()
            .expect("scheduler registry lock is not poisoned");
        if polls.contains_key(source_id) {
            return false;
        }

        let token = CancellationToken::new();
        let callbacks = callbacks.for_session();
        let _ = tokio::spawn(poll_loop(
            Arc::downgrade(self),
            source_id.to_owned(),
            config,
            callbacks.clone(),
            token.clone(),
            interval,
            skip_initial_fetch,
        ));
        polls.insert(
            source_id.to_owned(),
            PollHandle {
                token,
                interval,
                callbacks,
            },
        );

        tracing::info!(
            source_id,
            interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            skip_initial_fetch,
            "polling started"
        );
        true
    }

    /// Cancels the loop and forgets the rate-gate entry for `source_id`.
    ///
    /// Returns whether a loop was running. Once this returns no callback of
    /// that loop is running or will run. Safe to call from inside a callback
    /// of the same source.
    pub fn stop_polling(&self, source_id: &str) -> bool {
        match self.detach_polling(source_id) {
            Some(callbacks) => {
                callbacks.wait_idle();
                true
            }
            None => false,
        }
    }

    /// Removes and revokes the loop without waiting for an in-flight
    /// callback; the caller waits on the returned callbacks once its own
    /// locks are released.
    pub(crate) fn detach_polling(&self, source_id: &str) -> Option<SyncCallbacks> {
        let handle = self
            .polls
            .lock()
            .expect("scheduler registry lock is not poisoned")
            .remove(source_id);
        self.gate.forget(source_id);

        let handle = handle?;
        handle.token.cancel();
        handle.callbacks.revoke();
        tracing::info!(source_id, "polling stopped");
        Some(handle.callbacks)
    }

    pub fn is_polling(&self, source_id: &str) -> bool {
        self.polls
            .lock()
            .expect("scheduler registry lock is not poisoned")
            .contains_key(source_id)
    }

    pub fn poll_interval(&self, source_id: &str) -> Option<Duration> {
        self.polls
            .lock()
            .expect("scheduler registry lock is not poisoned")
            .get(source_id)
            .map(|handle| handle.interval)
    }

    /// Stops every loop; returns how many were running.
    pub fn stop_all(&self) -> usize {
        let detached = self.detach_all();
        for callbacks in &detached {
            callbacks.wait_idle();
        }
        detached.len()
    }

    pub(crate) fn detach_all(&self) -> Vec<SyncCallbacks> {
        let drained: Vec<(String, PollHandle)> = self
            .polls
            .lock()
            .expect("scheduler registry lock is not poisoned")
            .drain()
            .collect();

        drained
            .into_iter()
            .map(|(source_id, handle)| {
                handle.token.cancel();
                handle.callbacks.revoke();
                self.gate.forget(&source_id);
                handle.callbacks
            })
            .collect()
    }
}

impl std::fmt::Debug for UpdateScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let polling = self
            .polls
            .lock()
            .map(|polls| polls.len())
            .unwrap_or_default();
        f.debug_struct("UpdateScheduler")
            .field("gate", &self.gate)
            .field("default_timeout", &self.default_timeout)
            .field("polling", &polling)
            .finish_non_exhaustive()
    }
}

async fn poll_loop(
    scheduler: Weak<UpdateScheduler>,
    source_id: String,
    config: Arc<SourceConfig>,
    callbacks: SyncCallbacks,
    token: CancellationToken,
    interval: Duration,
    skip_initial_fetch: bool,
) {
    let first_tick = if skip_initial_fetch {
        Instant::now() + interval
    } else {
        Instant::now()
    };
    let mut ticker = tokio::time::interval_at(first_tick, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(scheduler) = scheduler.upgrade() else {
            break;
        };
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            outcome = scheduler.fetch_once(&source_id, &config) => outcome,
        };
        drop(scheduler);

        // stop() may have landed while the request was completing.
        if token.is_cancelled() {
            break;
        }
        match outcome {
            Ok(batch) => callbacks.update(batch, UpdateKind::Snapshot),
            Err(error) => {
                tracing::warn!(source_id = %source_id, code = error.code(), %error, "poll cycle failed");
                callbacks.error(error);
            }
        }
    }

    tracing::debug!(source_id = %source_id, "poll loop exited");
}
