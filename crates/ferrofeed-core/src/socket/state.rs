//! Connection lifecycle as a pure transition function.
//!
//! The machine owns the reconnect counter and decides what happens next; it
//! never touches sockets or timers. The manager feeds it [`SocketEvent`]s and
//! executes the returned [`Effect`]s in order.

use std::time::Duration;

use crate::error::SyncError;
use crate::retry::ReconnectPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Idle,
    Connecting,
    Open,
    /// Waiting for a scheduled reconnection.
    Reconnecting,
    /// Ceiling reached; the socket will not be retried.
    Abandoned,
    Stopped,
}

impl SocketState {
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Abandoned | Self::Stopped)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    ConnectRequested,
    Opened,
    Message(String),
    Errored(String),
    /// Peer or network closed the connection.
    Closed,
    ConnectFailed(String),
    ReconnectDue,
    StopRequested,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Connect,
    SendSubscription,
    EmitMessage(String),
    EmitError(SyncError),
    ScheduleReconnect { attempt: u32, delay: Duration },
    CancelReconnect,
    CloseConnection,
    StartFallbackPolling,
    EmitTerminal(SyncError),
}

#[derive(Debug, Clone)]
pub struct SocketMachine {
    state: SocketState,
    attempts: u32,
    policy: ReconnectPolicy,
    subscribe_on_open: bool,
    fallback_polling: bool,
}

impl SocketMachine {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: SocketState::Idle,
            attempts: 0,
            policy,
            subscribe_on_open: false,
            fallback_polling: false,
        }
    }

    /// Emit [`Effect::SendSubscription`] after every successful open.
    pub fn with_subscription(mut self, enabled: bool) -> Self {
        self.subscribe_on_open = enabled;
        self
    }

    /// Emit [`Effect::StartFallbackPolling`] when the socket is abandoned.
    pub fn with_fallback_polling(mut self, enabled: bool) -> Self {
        self.fallback_polling = enabled;
        self
    }

    pub fn state(&self) -> SocketState {
        self.state
    }

    /// Consecutive failed or dropped connections since the last open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn handle(&mut self, event: SocketEvent) -> Vec<Effect> {
        use SocketEvent as E;
        use SocketState as S;

        match (self.state, event) {
            (S::Idle, E::ConnectRequested) | (S::Reconnecting, E::ReconnectDue) => {
                self.state = S::Connecting;
                vec![Effect::Connect]
            }
            (S::Connecting, E::Opened) => {
                self.state = S::Open;
                self.attempts = 0;
                if self.subscribe_on_open {
                    vec![Effect::SendSubscription]
                } else {
                    Vec::new()
                }
            }
            (S::Open, E::Message(text)) => vec![Effect::EmitMessage(text)],
            (S::Connecting | S::Open, E::Errored(message)) => {
                vec![Effect::EmitError(SyncError::socket(message))]
            }
            (S::Open, E::Closed) => self.connection_lost(Vec::new()),
            (S::Connecting, E::ConnectFailed(message)) => {
                self.connection_lost(vec![Effect::EmitError(SyncError::socket(message))])
            }
            (S::Connecting, E::Closed) => self.connection_lost(Vec::new()),
            (S::Stopped, E::StopRequested) => Vec::new(),
            (state, E::StopRequested) => {
                self.state = S::Stopped;
                match state {
                    S::Reconnecting => vec![Effect::CancelReconnect],
                    S::Connecting | S::Open => vec![Effect::CloseConnection],
                    _ => Vec::new(),
                }
            }
            _ => Vec::new(),
        }
    }

    fn connection_lost(&mut self, mut effects: Vec<Effect>) -> Vec<Effect> {
        self.attempts = self.attempts.saturating_add(1);

        match self.policy.next_delay(self.attempts) {
            Some(delay) => {
                self.state = SocketState::Reconnecting;
                effects.push(Effect::ScheduleReconnect {
                    attempt: self.attempts,
                    delay,
                });
            }
            None => {
                self.state = SocketState::Abandoned;
                effects.push(Effect::EmitTerminal(SyncError::ReconnectExhausted {
                    attempts: self.attempts,
                }));
                if self.fallback_polling {
                    effects.push(Effect::StartFallbackPolling);
                }
            }
        }
        effects
    }
}
