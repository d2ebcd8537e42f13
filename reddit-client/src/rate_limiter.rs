use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub time_window: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Maximum jitter fraction added on top of a backoff wait (0.0 to 1.0).
    pub jitter_factor: f64,
}

impl RateLimitConfig {
    pub fn reddit_free_tier() -> Self {
        Self {
            max_requests: 60, // Conservative free tier budget
            time_window: Duration::from_secs(60),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(300),
            jitter_factor: 0.1,
        }
    }

    pub fn new(max_requests_per_minute: u32, backoff_base: Duration, backoff_cap: Duration) -> Self {
        Self {
            max_requests: max_requests_per_minute,
            time_window: Duration::from_secs(60),
            backoff_base,
            backoff_cap,
            jitter_factor: 0.1,
        }
    }
}

#[derive(Debug)]
struct LimiterState {
    /// Timestamps of requests admitted inside the trailing window.
    log: VecDeque<Instant>,
    backoff_attempt: u32,
}

/// Sliding-log rate limiter shared by every strategy runner.
///
/// One instance guards the whole per-minute quota; runners must never
/// construct their own.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Mutex::new(LimiterState {
                log: VecDeque::new(),
                backoff_attempt: 0,
            }),
        }
    }

    /// Block until admitting one more request keeps the trailing window
    /// at or under the configured cap, then record the request.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();

                while let Some(&oldest) = state.log.front() {
                    if now.duration_since(oldest) >= self.config.time_window {
                        state.log.pop_front();
                    } else {
                        break;
                    }
                }

                if (state.log.len() as u32) < self.config.max_requests {
                    state.log.push_back(now);
                    return;
                }

                match state.log.front() {
                    Some(&oldest) => self
                        .config
                        .time_window
                        .saturating_sub(now.duration_since(oldest)),
                    None => Duration::ZERO,
                }
            };

            debug!("Rate limit window full, waiting {:?}", wait);
            sleep(wait).await;
        }
    }

    /// React to a server throttle signal: escalate the exponential
    /// backoff and sleep it off. `hint` is the server's retry-after, used
    /// when it exceeds our own schedule. Returns the duration waited.
    pub async fn backoff(&self, hint: Option<Duration>) -> Duration {
        let attempt = {
            let mut state = self.state.lock().await;
            let attempt = state.backoff_attempt;
            state.backoff_attempt += 1;
            attempt
        };

        let mut wait = backoff_delay(&self.config, attempt);
        if let Some(hint) = hint {
            wait = wait.max(hint).min(self.config.backoff_cap);
        }
        if self.config.jitter_factor > 0.0 {
            let jitter_ceiling = (wait.as_millis() as f64 * self.config.jitter_factor) as u64;
            wait += Duration::from_millis(fastrand::u64(0..=jitter_ceiling));
        }

        warn!(
            "Throttled (attempt {}), backing off for {:?}",
            attempt + 1,
            wait
        );
        sleep(wait).await;
        wait
    }

    /// Reset the backoff schedule after the first subsequent success.
    pub async fn record_success(&self) {
        let mut state = self.state.lock().await;
        if state.backoff_attempt > 0 {
            debug!("Request succeeded, resetting backoff");
            state.backoff_attempt = 0;
        }
    }

    pub async fn current_window_requests(&self) -> usize {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        while let Some(&oldest) = state.log.front() {
            if now.duration_since(oldest) >= self.config.time_window {
                state.log.pop_front();
            } else {
                break;
            }
        }
        state.log.len()
    }
}

/// Pure exponential schedule: base × 2^attempt, capped.
pub fn backoff_delay(config: &RateLimitConfig, attempt: u32) -> Duration {
    config
        .backoff_base
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(config.backoff_cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(max_requests: u32) -> RateLimitConfig {
        RateLimitConfig {
            max_requests,
            time_window: Duration::from_secs(60),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(300),
            jitter_factor: 0.0, // Deterministic waits for tests
        }
    }

    #[test]
    fn backoff_schedule_doubles_and_caps() {
        let config = RateLimitConfig {
            backoff_cap: Duration::from_secs(10),
            ..test_config(60)
        };

        assert_eq!(backoff_delay(&config, 0), Duration::from_secs(1));
        assert_eq!(backoff_delay(&config, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(&config, 2), Duration::from_secs(4));
        assert_eq!(backoff_delay(&config, 3), Duration::from_secs(8));
        assert_eq!(backoff_delay(&config, 4), Duration::from_secs(10));
        assert_eq!(backoff_delay(&config, 30), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn window_never_exceeds_cap() {
        let limiter = RateLimiter::new(test_config(5));

        let mut admitted = Vec::new();
        for _ in 0..12 {
            limiter.acquire().await;
            admitted.push(Instant::now());
        }

        // Any request and the one 5 admissions later must be a full
        // window apart.
        for pair in admitted.windows(6) {
            assert!(pair[5].duration_since(pair[0]) >= Duration::from_secs(60));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_below_cap_is_not_delayed() {
        let limiter = RateLimiter::new(test_config(5));

        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert_eq!(Instant::now().duration_since(start), Duration::ZERO);
        assert_eq!(limiter.current_window_requests().await, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn old_entries_are_evicted() {
        let limiter = RateLimiter::new(test_config(2));

        limiter.acquire().await;
        limiter.acquire().await;
        sleep(Duration::from_secs(61)).await;

        let start = Instant::now();
        limiter.acquire().await;
        assert_eq!(Instant::now().duration_since(start), Duration::ZERO);
        assert_eq!(limiter.current_window_requests().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_throttles_escalate() {
        let limiter = RateLimiter::new(test_config(60));

        assert_eq!(limiter.backoff(None).await, Duration::from_secs(1));
        assert_eq!(limiter.backoff(None).await, Duration::from_secs(2));
        assert_eq!(limiter.backoff(None).await, Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_backoff() {
        let limiter = RateLimiter::new(test_config(60));

        limiter.backoff(None).await;
        limiter.backoff(None).await;
        limiter.record_success().await;

        assert_eq!(limiter.backoff(None).await, Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_hint_wins_when_longer() {
        let limiter = RateLimiter::new(test_config(60));

        let waited = limiter.backoff(Some(Duration::from_secs(30))).await;
        assert_eq!(waited, Duration::from_secs(30));
    }
}
