use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, instrument, warn};

use crate::backoff::{BackoffCalculator, RateLimitSignal, SignalSource};
use crate::error::DeliveryError;
use crate::multipart::MultipartForm;
use crate::rate_limit::{BucketHandle, RateLimiter};
use crate::transport::{Transport, TransportResponse};
use crate::types::Route;

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

const JSON_CONTENT_TYPE: &str = "application/json";
const UPLOAD_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Added to every provider-supplied reset time.
    pub safety_margin_ms: u64,
    /// Wait after a 429 that carries no usable reset signal.
    pub default_retry_wait_ms: u64,
    /// Cap on rate-limited retries per call. `None` retries forever.
    pub max_rate_limit_retries: Option<u32>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            safety_margin_ms: 750,
            default_retry_wait_ms: 5_000,
            max_rate_limit_retries: None,
        }
    }
}

impl DispatcherConfig {
    fn backoff(&self) -> BackoffCalculator {
        BackoffCalculator::new(
            Duration::from_millis(self.safety_margin_ms),
            Duration::from_millis(self.default_retry_wait_ms),
        )
    }
}

/// Delivers payloads to webhook routes, absorbing rate limits.
///
/// With a [`RateLimiter`] attached, attempts against the same route are
/// serialized through that route's bucket. Without one, each call relies
/// only on its own backoff.
///
/// Cheap to clone; clones share the transport and rate limiter.
#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    limiter: Option<Arc<RateLimiter>>,
    backoff: BackoffCalculator,
    config: DispatcherConfig,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("bucketed", &self.limiter.is_some())
            .field("config", &self.config)
            .finish()
    }
}

/// What the loop does after one attempt.
enum Attempt {
    Delivered,
    RateLimited(Instant),
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, config: DispatcherConfig) -> Self {
        Self {
            transport,
            limiter: None,
            backoff: config.backoff(),
            config,
        }
    }

    /// Dispatcher over a default [`HttpTransport`](crate::HttpTransport).
    #[cfg(feature = "http")]
    pub fn http(config: DispatcherConfig) -> Self {
        Self::new(Arc::new(crate::transport::HttpTransport::new()), config)
    }

    /// Serialize attempts per route through `limiter`.
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn rate_limiter(&self) -> Option<&Arc<RateLimiter>> {
        self.limiter.as_ref()
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Deliver `payload` as JSON to `route`.
    ///
    /// Retries 429 responses after the provider's reset time; any other
    /// outcome is final.
    pub async fn send<P>(&self, route: &str, payload: &P) -> Result<(), DeliveryError>
    where
        P: Serialize + ?Sized,
    {
        self.send_inner(route, payload, None).await
    }

    /// Like [`send`](Self::send), failing with
    /// [`DeliveryError::DeadlineExceeded`] rather than waiting on a bucket or
    /// backoff past `deadline`.
    pub async fn send_with_deadline<P>(
        &self,
        route: &str,
        payload: &P,
        deadline: Instant,
    ) -> Result<(), DeliveryError>
    where
        P: Serialize + ?Sized,
    {
        self.send_inner(route, payload, Some(deadline)).await
    }

    #[instrument(skip_all, fields(route = %route))]
    async fn send_inner<P>(
        &self,
        route: &str,
        payload: &P,
        deadline: Option<Instant>,
    ) -> Result<(), DeliveryError>
    where
        P: Serialize + ?Sized,
    {
        let route = Route::parse(route)?;
        let body = serde_json::to_vec(payload).map_err(DeliveryError::Encoding)?;

        let mut retries = 0u32;
        loop {
            match self.attempt(&route, &body, deadline).await? {
                Attempt::Delivered => {
                    metric_inc("webhook.delivery.success");
                    if retries > 0 {
                        info!(route = %route.bucket_key(), retries, "delivered after rate limiting");
                    }
                    return Ok(());
                }
                Attempt::RateLimited(wake_at) => {
                    metric_inc("webhook.delivery.rate_limited");
                    if self
                        .config
                        .max_rate_limit_retries
                        .is_some_and(|max| retries >= max)
                    {
                        metric_inc("webhook.delivery.failed");
                        return Err(DeliveryError::RetriesExhausted { attempts: retries });
                    }
                    if deadline.is_some_and(|d| wake_at > d) {
                        metric_inc("webhook.delivery.failed");
                        return Err(DeliveryError::DeadlineExceeded);
                    }
                    sleep_until(wake_at).await;
                    retries += 1;
                }
            }
        }
    }

    /// One bucketed request. The bucket is released before this returns,
    /// whatever the outcome.
    async fn attempt(
        &self,
        route: &Route,
        body: &[u8],
        deadline: Option<Instant>,
    ) -> Result<Attempt, DeliveryError> {
        let handle = match &self.limiter {
            Some(limiter) => Some(
                limiter
                    .lock_bucket_until(route, deadline)
                    .await
                    .inspect_err(|_| metric_inc("webhook.delivery.failed"))?,
            ),
            None => None,
        };

        debug!(route = %route.bucket_key(), "posting webhook");
        let response = match self
            .transport
            .post(route.as_str(), JSON_CONTENT_TYPE, body.to_vec())
            .await
        {
            Ok(response) => response,
            Err(err) => {
                release(handle, None);
                metric_inc("webhook.delivery.failed");
                warn!(route = %route.bucket_key(), error = %err, "webhook transport failed");
                return Err(err.into());
            }
        };
        debug!(route = %route.bucket_key(), status = response.status, "webhook responded");

        if response.is_success() {
            release(handle, Some(&response));
            return Ok(Attempt::Delivered);
        }

        if response.status == 429 {
            let signal = RateLimitSignal::from_response(&response);
            let wake_at = self.backoff.wake_time(signal.as_ref(), Instant::now());
            if let Some(handle) = handle {
                handle.release_after_rate_limit(Some(&response), wake_at);
            }
            warn!(
                route = %route.bucket_key(),
                wait_ms = u64::try_from(wake_at.saturating_duration_since(Instant::now()).as_millis())
                    .unwrap_or(u64::MAX),
                source = signal_source(signal.as_ref()),
                "rate limited"
            );
            return Ok(Attempt::RateLimited(wake_at));
        }

        release(handle, Some(&response));
        metric_inc("webhook.delivery.failed");
        Err(DeliveryError::HttpStatus {
            code: response.status,
            body: response.body_text(),
        })
    }

    /// Upload a local file as the single `file` field of a multipart POST.
    ///
    /// Uploads go out once and do not pass through the rate limiter.
    pub async fn upload_file(&self, route: &str, path: impl AsRef<Path>) -> Result<(), DeliveryError> {
        self.upload(route, path.as_ref(), None).await
    }

    /// Upload a file together with a message, sent as `payload_json`.
    pub async fn upload_file_with_message<P>(
        &self,
        route: &str,
        path: impl AsRef<Path>,
        payload: &P,
    ) -> Result<(), DeliveryError>
    where
        P: Serialize + ?Sized,
    {
        let json = serde_json::to_string(payload).map_err(DeliveryError::Encoding)?;
        self.upload(route, path.as_ref(), Some(json)).await
    }

    #[instrument(skip_all, fields(route = %route, path = %path.display()))]
    async fn upload(
        &self,
        route: &str,
        path: &Path,
        payload_json: Option<String>,
    ) -> Result<(), DeliveryError> {
        let route = Route::parse(route)?;
        let bytes = tokio::fs::read(path).await.map_err(|source| DeliveryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());

        let mut form = MultipartForm::new();
        if let Some(json) = payload_json {
            form = form.text("payload_json", &json);
        }
        let form = form.file("file", &filename, UPLOAD_CONTENT_TYPE, &bytes);
        let content_type = form.content_type();

        debug!(route = %route.bucket_key(), size = bytes.len(), "uploading file");
        let response: TransportResponse = self
            .transport
            .post(route.as_str(), &content_type, form.finish())
            .await
            .inspect_err(|_| metric_inc("webhook.upload.failed"))?;

        if response.is_success() {
            metric_inc("webhook.upload.success");
            Ok(())
        } else {
            metric_inc("webhook.upload.failed");
            Err(DeliveryError::HttpStatus {
                code: response.status,
                body: response.body_text(),
            })
        }
    }
}

fn release(handle: Option<BucketHandle>, response: Option<&TransportResponse>) {
    if let Some(handle) = handle {
        handle.release(response);
    }
}

fn signal_source(signal: Option<&RateLimitSignal>) -> &'static str {
    match signal.map(|s| s.source) {
        Some(SignalSource::Header) => "header",
        Some(SignalSource::Body) => "body",
        None => "default",
    }
}
