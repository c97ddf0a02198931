//! Outbound request pacing and retry delays.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

/// Ceiling for the inflated minimum interval after repeated 429s.
const MAX_MIN_INTERVAL: Duration = Duration::from_secs(5);

// ---

/// Enforces a minimum gap between consecutive requests.
///
/// The interval grows by 25% on every rate-limit signal and stays grown for
/// the lifetime of the throttle (one run).
#[derive(Debug)]
pub struct Throttle {
    state: Mutex<ThrottleState>,
}

#[derive(Debug)]
struct ThrottleState {
    min_interval: Duration,
    last_request: Option<Instant>,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            state: Mutex::new(ThrottleState {
                min_interval,
                last_request: None,
            }),
        }
    }

    /// Sleep until the minimum interval since the previous request has
    /// elapsed, then claim the slot.
    pub async fn wait(&self) {
        // ---
        let mut state = self.state.lock().await;
        if let Some(last) = state.last_request {
            let ready_at = last + state.min_interval;
            let now = Instant::now();
            if ready_at > now {
                sleep(ready_at - now).await;
            }
        }
        state.last_request = Some(Instant::now());
    }

    /// Widen the interval after the API signalled throttling.
    pub async fn penalize(&self) {
        let mut state = self.state.lock().await;
        state.min_interval = state.min_interval.mul_f64(1.25).min(MAX_MIN_INTERVAL);
    }

    pub async fn min_interval(&self) -> Duration {
        self.state.lock().await.min_interval
    }
}

/// `min(base * 2^(attempt - 1), max)`; `attempt` is 1-based.
pub fn backoff_delay(base: Duration, attempt: u32, max: Duration) -> Duration {
    // ---
    let exponent = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1 << exponent).min(max)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_backoff_doubles_then_caps() {
        // ---
        let base = Duration::from_millis(500);
        let max = Duration::from_secs(3);

        assert_eq!(backoff_delay(base, 1, max), Duration::from_millis(500));
        assert_eq!(backoff_delay(base, 2, max), Duration::from_millis(1000));
        assert_eq!(backoff_delay(base, 3, max), Duration::from_millis(2000));
        assert_eq!(backoff_delay(base, 4, max), max);
        assert_eq!(backoff_delay(base, 40, max), max);
    }

    #[test]
    fn test_zero_attempt_treated_as_first() {
        // ---
        let base = Duration::from_millis(10);
        assert_eq!(backoff_delay(base, 0, Duration::from_secs(1)), base);
    }

    #[tokio::test]
    async fn test_penalize_grows_interval_with_cap() {
        // ---
        let throttle = Throttle::new(Duration::from_millis(400));
        throttle.penalize().await;
        assert_eq!(throttle.min_interval().await, Duration::from_millis(500));

        for _ in 0..20 {
            throttle.penalize().await;
        }
        assert_eq!(throttle.min_interval().await, MAX_MIN_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_spaces_requests() {
        // ---
        let throttle = Throttle::new(Duration::from_millis(200));
        let start = Instant::now();
        throttle.wait().await;
        throttle.wait().await;
        throttle.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(400));
    }
}
