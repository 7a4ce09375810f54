//! Turning provider rate-limit signals into wake times.

use std::time::Duration;

use tokio::time::Instant;

use crate::transport::TransportResponse;

/// Header carrying seconds until the bucket resets, as a decimal string.
pub const RESET_AFTER_HEADER: &str = "x-ratelimit-reset-after";

/// JSON body field carrying seconds until retry, as a number.
pub const RETRY_AFTER_FIELD: &str = "retry_after";

/// Added on top of the provider's reset time.
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_millis(750);

/// Wait used when a 429 carries no usable reset signal.
pub const DEFAULT_RETRY_WAIT: Duration = Duration::from_secs(5);

/// Where a reset value was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalSource {
    Header,
    Body,
}

/// Seconds until the provider's rate-limit window resets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitSignal {
    pub reset_after_secs: f64,
    pub source: SignalSource,
}

impl RateLimitSignal {
    /// Extract the reset signal from a 429 response.
    ///
    /// Tries the reset header first and the body's `retry_after` field second.
    /// Values that are unparseable, non-finite or not positive are skipped.
    pub fn from_response(response: &TransportResponse) -> Option<Self> {
        Self::from_header(response).or_else(|| Self::from_body(&response.body))
    }

    fn from_header(response: &TransportResponse) -> Option<Self> {
        let secs: f64 = response.header(RESET_AFTER_HEADER)?.trim().parse().ok()?;
        usable(secs).map(|reset_after_secs| Self {
            reset_after_secs,
            source: SignalSource::Header,
        })
    }

    fn from_body(body: &[u8]) -> Option<Self> {
        let parsed: serde_json::Value = serde_json::from_slice(body).ok()?;
        usable(parsed.get(RETRY_AFTER_FIELD)?.as_f64()?).map(|reset_after_secs| Self {
            reset_after_secs,
            source: SignalSource::Body,
        })
    }
}

fn usable(secs: f64) -> Option<f64> {
    (secs.is_finite() && secs > 0.0).then_some(secs)
}

/// Absolute time at which a request may be retried.
///
/// The seconds value is split into whole seconds and a millisecond
/// remainder, and `margin` is added on top. Returns `None` when the value
/// is not a positive finite number or the result would overflow.
pub fn compute_wake_time(reset_after_secs: f64, margin: Duration, now: Instant) -> Option<Instant> {
    usable(reset_after_secs)?;

    let whole = reset_after_secs.trunc();
    let frac = reset_after_secs - whole;
    if whole > u64::MAX as f64 {
        return None;
    }

    // Round to the microsecond first so 2.3 gives 300ms, not 299.
    let micros = (frac * 1_000_000.0).round() as u64;
    let wait = Duration::from_secs(whole as u64)
        .checked_add(Duration::from_millis(micros.div_ceil(1000)))?
        .checked_add(margin)?;
    now.checked_add(wait)
}

/// Computes wake times with a fixed safety margin and fallback wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffCalculator {
    margin: Duration,
    default_wait: Duration,
}

impl BackoffCalculator {
    pub fn new(margin: Duration, default_wait: Duration) -> Self {
        Self {
            margin,
            default_wait,
        }
    }

    pub fn margin(&self) -> Duration {
        self.margin
    }

    pub fn default_wait(&self) -> Duration {
        self.default_wait
    }

    /// Wake time for a rate-limited attempt observed at `now`.
    ///
    /// Falls back to exactly `now + default_wait` when there is no signal or
    /// it cannot be turned into a wake time.
    pub fn wake_time(&self, signal: Option<&RateLimitSignal>, now: Instant) -> Instant {
        signal
            .and_then(|s| compute_wake_time(s.reset_after_secs, self.margin, now))
            .unwrap_or_else(|| now + self.default_wait)
    }
}

impl Default for BackoffCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_SAFETY_MARGIN, DEFAULT_RETRY_WAIT)
    }
}
