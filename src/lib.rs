//! Rate-limit aware delivery to Discord-style incoming webhooks.
//!
//! This crate sends JSON messages (and multipart file uploads) to webhook
//! URLs without tripping the provider's abuse protection, even when many
//! deliveries are requested at once from many tasks.
//!
//! ## Guarantees
//! - At most one in-flight request per route through a shared [`RateLimiter`]
//! - HTTP 429 responses are retried after the provider's reset time plus a
//!   safety margin, never surfaced to the caller
//! - Every bucket acquired is released on every exit path
//!
//! ## Non-Guarantees
//! - Cross-process rate-limit coordination
//! - Proactive throttling before the first 429
//! - Rate limiting of file uploads
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use discord_webhook::{Dispatcher, DispatcherConfig, Message, RateLimiter};
//!
//! # async fn run() -> Result<(), discord_webhook::DeliveryError> {
//! let limiter = Arc::new(RateLimiter::new());
//! let dispatcher = Dispatcher::http(DispatcherConfig::default()).with_rate_limiter(limiter);
//!
//! let message = Message::new("deploy finished").with_username("ci-bot");
//! dispatcher
//!     .send("https://discord.com/api/webhooks/123/token", &message)
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod backoff;
mod dispatcher;
mod error;
mod multipart;
mod rate_limit;
mod transport;
mod types;

pub use backoff::{
    compute_wake_time,
    BackoffCalculator,
    RateLimitSignal,
    SignalSource,
    DEFAULT_RETRY_WAIT,
    DEFAULT_SAFETY_MARGIN,
    RESET_AFTER_HEADER,
    RETRY_AFTER_FIELD,
};
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use error::{DeliveryError, TransportError};
pub use multipart::MultipartForm;
pub use rate_limit::{Bucket, BucketHandle, BucketStats, RateLimiter};
pub use transport::{Transport, TransportResponse};
pub use types::{Author, Embed, Field, Footer, Image, Message, Route, Thumbnail};

#[cfg(feature = "http")]
pub use transport::HttpTransport;
