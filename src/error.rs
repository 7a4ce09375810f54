use std::path::PathBuf;

use thiserror::Error;

/// Terminal outcome of a failed delivery.
///
/// Rate-limit responses (HTTP 429) are not represented here: they are
/// absorbed by the dispatcher's retry loop and only show up as latency.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Route was empty or not a usable webhook URL.
    /// Raised before any I/O.
    #[error("invalid route: {0}")]
    Validation(String),

    /// Payload could not be serialized.
    #[error("failed to encode payload: {0}")]
    Encoding(#[source] serde_json::Error),

    /// Request never produced an HTTP response.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Provider rejected the request with a status other than 200, 204 or 429.
    #[error("HTTP request failed with status {code}, body: \n {body}")]
    HttpStatus { code: u16, body: String },

    /// Caller-supplied deadline passed while waiting on a bucket or a backoff.
    #[error("deadline exceeded before the webhook could be delivered")]
    DeadlineExceeded,

    /// Configured cap on rate-limited retries was reached.
    #[error("still rate limited after {attempts} retries")]
    RetriesExhausted { attempts: u32 },

    /// File to upload could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DeliveryError {
    /// Whether retrying the same call later could plausibly succeed.
    ///
    /// Transport failures and provider-side (5xx) errors qualify; validation,
    /// encoding and client errors do not.
    pub fn is_retryable(&self) -> bool {
        match self {
            DeliveryError::Transport(_) => true,
            DeliveryError::HttpStatus { code, .. } => *code >= 500,
            DeliveryError::DeadlineExceeded | DeliveryError::RetriesExhausted { .. } => true,
            DeliveryError::Validation(_)
            | DeliveryError::Encoding(_)
            | DeliveryError::Io { .. } => false,
        }
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            DeliveryError::HttpStatus { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Reasons why an HTTP request failed without a usable response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),

    /// Status line arrived but the body could not be read.
    #[error("failed to read response body: {0}")]
    Body(String),
}
