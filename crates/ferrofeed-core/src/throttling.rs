use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Per-source minimum spacing between outbound requests.
///
/// Only successful acquisitions move the window forward; a rejected attempt
/// leaves the previous timestamp in place.
#[derive(Debug)]
pub struct RequestGate {
    spacing: Duration,
    last_request: Mutex<HashMap<String, Instant>>,
}

impl RequestGate {
    pub fn new(spacing: Duration) -> Self {
        Self {
            spacing,
            last_request: Mutex::new(HashMap::new()),
        }
    }

    pub fn spacing(&self) -> Duration {
        self.spacing
    }

    /// Claims the request slot for `key`, or returns how long until it opens.
    pub fn try_acquire(&self, key: &str) -> Result<(), Duration> {
        let now = Instant::now();
        let mut last_request = self
            .last_request
            .lock()
            .expect("request gate lock is not poisoned");

        if let Some(previous) = last_request.get(key) {
            let elapsed = now.saturating_duration_since(*previous);
            if elapsed < self.spacing {
                return Err(self.spacing - elapsed);
            }
        }

        last_request.insert(key.to_owned(), now);
        Ok(())
    }

    /// Drops the recorded timestamp so the next request for `key` is admitted.
    pub fn forget(&self, key: &str) {
        let _ = self
            .last_request
            .lock()
            .expect("request gate lock is not poisoned")
            .remove(key);
    }

    pub fn tracked_len(&self) -> usize {
        self.last_request
            .lock()
            .expect("request gate lock is not poisoned")
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn rejects_second_request_inside_window() {
        let gate = RequestGate::new(Duration::from_millis(1_000));

        assert!(gate.try_acquire("prices").is_ok());
        tokio::time::advance(Duration::from_millis(400)).await;

        let wait = gate.try_acquire("prices").expect_err("inside spacing window");
        assert_eq!(wait, Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_attempt_does_not_extend_window() {
        let gate = RequestGate::new(Duration::from_millis(1_000));

        assert!(gate.try_acquire("prices").is_ok());
        tokio::time::advance(Duration::from_millis(900)).await;
        assert!(gate.try_acquire("prices").is_err());
        tokio::time::advance(Duration::from_millis(100)).await;

        assert!(gate.try_acquire("prices").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_independent_and_forgettable() {
        let gate = RequestGate::new(Duration::from_secs(1));

        assert!(gate.try_acquire("a").is_ok());
        assert!(gate.try_acquire("b").is_ok());
        assert!(gate.try_acquire("a").is_err());

        gate.forget("a");
        assert_eq!(gate.tracked_len(), 1);
        assert!(gate.try_acquire("a").is_ok());
    }
}
