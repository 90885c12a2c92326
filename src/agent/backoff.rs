//! Rate-limit backoff state for the agent loop.
//!
//! When the agent backend reports a rate limit, the loop waits and retries the
//! same iteration. The wait is the backend's explicit retry-after plus a small
//! buffer, or exponential backoff from 30s capped at 16 minutes. An optional
//! budget bounds the cumulative wait across the whole run.

use std::time::Duration;

/// Base delay for exponential backoff.
pub const BACKOFF_BASE: Duration = Duration::from_secs(30);

/// Ceiling for exponential backoff.
pub const BACKOFF_MAX: Duration = Duration::from_secs(16 * 60);

/// Added to an explicit retry-after so we do not retry right on the edge.
pub const RETRY_AFTER_BUFFER: Duration = Duration::from_secs(5);

/// Interval between countdown ticks while waiting.
pub const COUNTDOWN_TICK: Duration = Duration::from_secs(10);

/// Wait before the next attempt.
///
/// `retry_after + 5s` when the backend gave a positive retry-after, otherwise
/// `min(30s * 2^consecutive_retries, 16m)`.
pub fn backoff_delay(retry_after: Option<Duration>, consecutive_retries: u32) -> Duration {
    match retry_after {
        Some(d) if !d.is_zero() => d.saturating_add(RETRY_AFTER_BUFFER),
        _ => {
            // 2^5 * 30s already exceeds the cap, so larger exponents are moot
            let factor = 1u32 << consecutive_retries.min(6);
            BACKOFF_BASE.saturating_mul(factor).min(BACKOFF_MAX)
        }
    }
}

/// Backoff bookkeeping carried across iterations of one loop run.
#[derive(Debug, Clone, Default)]
pub struct RateLimitState {
    /// Rate-limited attempts since the last non-rate-limited result.
    pub consecutive_retries: u32,
    /// Sum of every wait actually performed.
    pub total_wait: Duration,
    /// Cumulative wait budget; zero means unbounded.
    pub max_wait: Duration,
}

impl RateLimitState {
    pub fn new(max_wait: Duration) -> Self {
        Self {
            max_wait,
            ..Default::default()
        }
    }

    /// Wait for the next retry given the backend's hint.
    pub fn next_wait(&self, retry_after: Option<Duration>) -> Duration {
        backoff_delay(retry_after, self.consecutive_retries)
    }

    /// Whether waiting `wait` more stays within the budget.
    pub fn within_budget(&self, wait: Duration) -> bool {
        self.max_wait.is_zero() || self.total_wait.saturating_add(wait) <= self.max_wait
    }

    /// Account for a completed wait.
    pub fn record_wait(&mut self, wait: Duration) {
        self.total_wait = self.total_wait.saturating_add(wait);
        self.consecutive_retries += 1;

        tracing::warn!(
            wait_secs = wait.as_secs(),
            consecutive_retries = self.consecutive_retries,
            total_wait_secs = self.total_wait.as_secs(),
            "Rate limited, backing off"
        );
    }

    /// Reset the retry counter after a non-rate-limited result.
    pub fn record_success(&mut self) {
        self.consecutive_retries = 0;
    }
}

/// Sleep for `wait`, calling `on_tick` with the remaining time at the start
/// and after every `tick`. The ticks exist only for display.
pub async fn wait_with_countdown(wait: Duration, tick: Duration, mut on_tick: impl FnMut(Duration)) {
    let mut remaining = wait;
    while !remaining.is_zero() {
        on_tick(remaining);
        let step = if tick.is_zero() { remaining } else { remaining.min(tick) };
        tokio::time::sleep(step).await;
        remaining = remaining.saturating_sub(step);
    }
}

/// Format a duration as `1h2m3s`, dropping leading zero units.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    match (h, m) {
        (0, 0) => format!("{}s", s),
        (0, _) => format!("{}m{}s", m, s),
        _ => format!("{}h{}m{}s", h, m, s),
    }
}
