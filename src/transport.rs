use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::TransportError;

/// A response as seen by the dispatcher.
#[derive(Debug, Clone, Default)]
pub struct TransportResponse {
    pub status: u16,

    /// Header names are lower-cased.
    pub headers: HashMap<String, String>,

    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    /// Add a header; the name is lower-cased.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Only 200 and 204 count as delivered.
    pub fn is_success(&self) -> bool {
        matches!(self.status, 200 | 204)
    }
}

/// Performs a single HTTP POST.
///
/// Implementations must not retry; retry policy lives in the dispatcher.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(
        &self,
        url: &str,
        content_type: &str,
        body: Vec<u8>,
    ) -> Result<TransportResponse, TransportError>;
}

#[cfg(feature = "http")]
pub use self::http::HttpTransport;

#[cfg(feature = "http")]
mod http {
    use std::time::Duration;

    use async_trait::async_trait;
    use reqwest::header::CONTENT_TYPE;

    use super::{Transport, TransportResponse};
    use crate::error::TransportError;

    const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
    const DEFAULT_USER_AGENT: &str = concat!("discord_webhook/", env!("CARGO_PKG_VERSION"));

    /// [`Transport`] backed by a shared `reqwest::Client`.
    #[derive(Debug, Clone)]
    pub struct HttpTransport {
        client: reqwest::Client,
        timeout: Duration,
        user_agent: String,
    }

    impl HttpTransport {
        /// Defaults:
        /// - timeout: 10 seconds per request
        /// - user agent: `discord_webhook/<version>`
        pub fn new() -> Self {
            Self::with_client(reqwest::Client::new())
        }

        /// Reuse an existing client (connection pool, proxy settings, ...).
        pub fn with_client(client: reqwest::Client) -> Self {
            Self {
                client,
                timeout: DEFAULT_TIMEOUT,
                user_agent: DEFAULT_USER_AGENT.to_string(),
            }
        }

        pub fn with_timeout(mut self, timeout: Duration) -> Self {
            self.timeout = timeout;
            self
        }

        pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
            self.user_agent = user_agent.into();
            self
        }
    }

    impl Default for HttpTransport {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl Transport for HttpTransport {
        async fn post(
            &self,
            url: &str,
            content_type: &str,
            body: Vec<u8>,
        ) -> Result<TransportResponse, TransportError> {
            let response = self
                .client
                .post(url)
                .timeout(self.timeout)
                .header(CONTENT_TYPE, content_type)
                .header(reqwest::header::USER_AGENT, &self.user_agent)
                .body(body)
                .send()
                .await
                .map_err(classify)?;

            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
                })
                .collect();

            let body = response
                .bytes()
                .await
                .map_err(|e| TransportError::Body(e.to_string()))?
                .to_vec();

            Ok(TransportResponse {
                status,
                headers,
                body,
            })
        }
    }

    fn classify(err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(err.to_string())
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}
