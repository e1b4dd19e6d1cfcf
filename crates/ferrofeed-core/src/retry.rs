//! Reconnection backoff for socket transports.

use std::time::Duration;

use crate::config::ReconnectConfig;
use crate::source::SocketKind;

/// Delay strategy between reconnection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every attempt.
    Fixed {
        delay: Duration,
    },
    /// `base * 2^attempt`, capped at `max`.
    Exponential {
        base: Duration,
        max: Duration,
    },
}

impl Backoff {
    /// Delay before the given reconnection attempt (0-based).
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential { base, max } => {
                let factor = 1_u32.checked_shl(attempt).unwrap_or(u32::MAX);
                base.checked_mul(factor).unwrap_or(max).min(max)
            }
        }
    }
}

/// Attempt ceiling plus backoff for one socket variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl ReconnectPolicy {
    pub const fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Raw sockets compute their own exponential delay; the event-multiplexed
    /// variant hands the base delay to its built-in backoff, which grows up to
    /// a lower cap.
    pub fn for_kind(kind: SocketKind, config: &ReconnectConfig) -> Self {
        let max = match kind {
            SocketKind::Raw => config.raw_max_delay,
            SocketKind::Event => config.event_max_delay,
        };
        Self::new(
            config.max_attempts,
            Backoff::Exponential {
                base: config.base_delay,
                max,
            },
        )
    }

    /// Delay for the `attempt`-th consecutive failure (1-based), or `None`
    /// once the ceiling is reached.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt >= self.max_attempts {
            return None;
        }
        Some(self.backoff.delay(attempt - 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_backoff_never_grows() {
        let backoff = Backoff::Fixed {
            delay: Duration::from_millis(100),
        };

        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(10), Duration::from_millis(100));
    }

    #[test]
    fn exponential_backoff_doubles_until_capped() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(2_000),
            max: Duration::from_secs(30),
        };

        assert_eq!(backoff.delay(0), Duration::from_secs(2));
        assert_eq!(backoff.delay(1), Duration::from_secs(4));
        assert_eq!(backoff.delay(3), Duration::from_secs(16));
        assert_eq!(backoff.delay(4), Duration::from_secs(30));
        assert_eq!(backoff.delay(40), Duration::from_secs(30));
    }

    #[test]
    fn policy_stops_at_ceiling() {
        let policy = ReconnectPolicy::for_kind(SocketKind::Raw, &ReconnectConfig::default());

        assert_eq!(policy.next_delay(1), Some(Duration::from_secs(2)));
        assert_eq!(policy.next_delay(4), Some(Duration::from_secs(16)));
        assert_eq!(policy.next_delay(5), None);
    }

    #[test]
    fn event_variant_uses_lower_cap() {
        let policy = ReconnectPolicy::for_kind(SocketKind::Event, &ReconnectConfig::default());

        assert_eq!(policy.next_delay(1), Some(Duration::from_secs(2)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_secs(4)));
        assert_eq!(policy.next_delay(3), Some(Duration::from_secs(5)));
    }
}
