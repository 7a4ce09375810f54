//! Per-route buckets serializing deliveries to the same webhook.
//!
//! A [`RateLimiter`] owns one [`Bucket`] per route. Locking a bucket yields a
//! [`BucketHandle`]; at most one handle per route exists at any time. The
//! handle unlocks the bucket when released or dropped, so every acquire is
//! matched by exactly one release on every exit path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{OwnedMutexGuard, RwLock};
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, trace};

use crate::backoff::RESET_AFTER_HEADER;
use crate::error::DeliveryError;
use crate::transport::TransportResponse;
use crate::types::Route;

const LIMIT_HEADER: &str = "x-ratelimit-limit";
const REMAINING_HEADER: &str = "x-ratelimit-remaining";
const BUCKET_HEADER: &str = "x-ratelimit-bucket";

/// Registry of per-route buckets.
///
/// Constructed by the caller and shared through `Arc`; there is no
/// process-wide instance. Buckets live as long as the registry.
#[derive(Debug, Default)]
pub struct RateLimiter {
    buckets: RwLock<HashMap<String, Arc<Bucket>>>,
}

/// Mutual-exclusion gate plus last-known rate-limit state for one route.
#[derive(Debug)]
pub struct Bucket {
    key: String,
    gate: Arc<tokio::sync::Mutex<()>>,
    state: Mutex<BucketState>,
}

#[derive(Debug, Default, Clone)]
struct BucketState {
    limit: Option<u32>,
    remaining: Option<u32>,
    reset_at: Option<Instant>,
    provider_bucket: Option<String>,
    retry_at: Option<Instant>,
}

/// Snapshot of a bucket's advisory state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketStats {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    /// Time left until the provider's window resets, as last reported.
    pub reset_after: Option<Duration>,
    /// Provider-side bucket identifier, if reported.
    pub provider_bucket: Option<String>,
    /// Whether the route is still inside a rate-limit backoff.
    pub backing_off: bool,
    pub locked: bool,
}

impl Bucket {
    fn new(key: String) -> Self {
        Self {
            key,
            gate: Arc::new(tokio::sync::Mutex::new(())),
            state: Mutex::new(BucketState::default()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_locked(&self) -> bool {
        self.gate.try_lock().is_err()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stats(&self, now: Instant) -> BucketStats {
        let state = self.state().clone();
        BucketStats {
            limit: state.limit,
            remaining: state.remaining,
            reset_after: state.reset_at.map(|at| at.saturating_duration_since(now)),
            provider_bucket: state.provider_bucket,
            backing_off: state.retry_at.is_some_and(|at| at > now),
            locked: self.is_locked(),
        }
    }

    fn record(&self, response: Option<&TransportResponse>, retry_at: Option<Instant>) {
        let now = Instant::now();
        let mut state = self.state();

        if let Some(response) = response {
            if let Some(limit) = parse_header(response, LIMIT_HEADER) {
                state.limit = Some(limit);
            }
            if let Some(remaining) = parse_header(response, REMAINING_HEADER) {
                state.remaining = Some(remaining);
            }
            if let Some(reset_after) = parse_header::<f64>(response, RESET_AFTER_HEADER) {
                if let Ok(wait) = Duration::try_from_secs_f64(reset_after) {
                    state.reset_at = now.checked_add(wait);
                }
            }
            if let Some(bucket) = response.header(BUCKET_HEADER) {
                state.provider_bucket = Some(bucket.to_string());
            }
        }

        if retry_at.is_some() {
            state.retry_at = retry_at;
        }
    }
}

/// Exclusive hold on a route's bucket.
///
/// Consumed by [`release`](BucketHandle::release); dropping it also unlocks
/// the bucket, without recording any response state.
#[must_use = "the bucket stays locked until the handle is released or dropped"]
#[derive(Debug)]
pub struct BucketHandle {
    bucket: Arc<Bucket>,
    _guard: OwnedMutexGuard<()>,
}

impl BucketHandle {
    pub fn key(&self) -> &str {
        self.bucket.key()
    }

    /// Unlock the bucket, remembering rate-limit headers from `response`.
    pub fn release(self, response: Option<&TransportResponse>) {
        self.bucket.record(response, None);
        trace!(route = %self.bucket.key, "bucket released");
    }

    /// Unlock the bucket after a 429.
    ///
    /// The next holder of this bucket waits until `retry_at` before its
    /// request goes out.
    pub fn release_after_rate_limit(self, response: Option<&TransportResponse>, retry_at: Instant) {
        self.bucket.record(response, Some(retry_at));
        trace!(route = %self.bucket.key, "bucket released into backoff");
    }

    fn pending_backoff(&self) -> Option<Instant> {
        let retry_at = self.bucket.state().retry_at;
        retry_at.filter(|at| *at > Instant::now())
    }

    fn clear_backoff(&self) {
        self.bucket.state().retry_at = None;
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the route's bucket is exclusively held.
    ///
    /// If the previous holder was rate limited, also waits until its backoff
    /// has elapsed.
    pub async fn lock_bucket(&self, route: &Route) -> BucketHandle {
        let bucket = self.bucket(route).await;
        let guard = bucket.gate.clone().lock_owned().await;
        let handle = BucketHandle {
            bucket,
            _guard: guard,
        };

        let pending = handle.pending_backoff();
        if let Some(retry_at) = pending {
            debug!(route = %handle.key(), "waiting out previous rate limit");
            sleep_until(retry_at).await;
        }
        handle.clear_backoff();
        handle
    }

    /// Like [`lock_bucket`](Self::lock_bucket), giving up at `deadline`.
    pub async fn lock_bucket_until(
        &self,
        route: &Route,
        deadline: Option<Instant>,
    ) -> Result<BucketHandle, DeliveryError> {
        let Some(deadline) = deadline else {
            return Ok(self.lock_bucket(route).await);
        };

        let bucket = self.bucket(route).await;
        let guard = timeout_at(deadline, bucket.gate.clone().lock_owned())
            .await
            .map_err(|_| DeliveryError::DeadlineExceeded)?;
        let handle = BucketHandle {
            bucket,
            _guard: guard,
        };

        let pending = handle.pending_backoff();
        if let Some(retry_at) = pending {
            if retry_at > deadline {
                return Err(DeliveryError::DeadlineExceeded);
            }
            debug!(route = %handle.key(), "waiting out previous rate limit");
            sleep_until(retry_at).await;
        }
        handle.clear_backoff();
        Ok(handle)
    }

    /// Whether an attempt against `route` currently holds its bucket.
    pub async fn is_locked(&self, route: &Route) -> bool {
        let guard = self.buckets.read().await;
        guard
            .get(route.bucket_key())
            .is_some_and(|bucket| bucket.is_locked())
    }

    pub async fn bucket_count(&self) -> usize {
        self.buckets.read().await.len()
    }

    /// Advisory state for every known route.
    pub async fn stats(&self) -> HashMap<String, BucketStats> {
        let now = Instant::now();
        let guard = self.buckets.read().await;
        guard
            .iter()
            .map(|(key, bucket)| (key.clone(), bucket.stats(now)))
            .collect()
    }

    async fn bucket(&self, route: &Route) -> Arc<Bucket> {
        let key = route.bucket_key();
        {
            let guard = self.buckets.read().await;
            if let Some(bucket) = guard.get(key) {
                return bucket.clone();
            }
        }

        let mut guard = self.buckets.write().await;
        guard
            .entry(key.to_string())
            .or_insert_with(|| {
                debug!(route = %key, "creating bucket");
                Arc::new(Bucket::new(key.to_string()))
            })
            .clone()
    }
}

fn parse_header<T: std::str::FromStr>(response: &TransportResponse, name: &str) -> Option<T> {
    response.header(name)?.trim().parse().ok()
}
