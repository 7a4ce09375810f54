#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use discord_webhook::{Transport, TransportError, TransportResponse};
use tokio::time::Instant;

pub const ROUTE: &str = "https://discord.test/api/webhooks/1/token";
pub const OTHER_ROUTE: &str = "https://discord.test/api/webhooks/2/token";

/// One scripted reaction to a POST.
#[derive(Debug, Clone)]
pub enum Step {
    Respond(TransportResponse),
    Fail(TransportError),
}

/// A POST as seen by the transport.
#[derive(Debug, Clone)]
pub struct Call {
    pub url: String,
    pub content_type: String,
    pub body: Vec<u8>,
    pub at: Instant,
}

/// In-memory transport replaying a script; answers 204 once it runs dry.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<Call>>,
    latency: Duration,
    in_flight: Mutex<HashMap<String, usize>>,
    max_in_flight: Mutex<HashMap<String, usize>>,
    total_in_flight: Mutex<(usize, usize)>,
}

impl ScriptedTransport {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            script: Mutex::new(steps.into_iter().collect()),
            ..Default::default()
        }
    }

    /// Every request takes `latency` before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Highest number of simultaneous requests seen against `url`.
    pub fn max_in_flight(&self, url: &str) -> usize {
        self.max_in_flight
            .lock()
            .unwrap()
            .get(url)
            .copied()
            .unwrap_or(0)
    }

    /// Highest number of simultaneous requests across all urls.
    pub fn max_total_in_flight(&self) -> usize {
        self.total_in_flight.lock().unwrap().1
    }

    fn enter(&self, url: &str) {
        let mut in_flight = self.in_flight.lock().unwrap();
        let current = in_flight.entry(url.to_string()).or_insert(0);
        *current += 1;
        let mut max = self.max_in_flight.lock().unwrap();
        let peak = max.entry(url.to_string()).or_insert(0);
        *peak = (*peak).max(*current);

        let mut total = self.total_in_flight.lock().unwrap();
        total.0 += 1;
        total.1 = total.1.max(total.0);
    }

    fn leave(&self, url: &str) {
        if let Some(current) = self.in_flight.lock().unwrap().get_mut(url) {
            *current -= 1;
        }
        self.total_in_flight.lock().unwrap().0 -= 1;
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn post(
        &self,
        url: &str,
        content_type: &str,
        body: Vec<u8>,
    ) -> Result<TransportResponse, TransportError> {
        self.calls.lock().unwrap().push(Call {
            url: url.to_string(),
            content_type: content_type.to_string(),
            body,
            at: Instant::now(),
        });

        self.enter(url);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.leave(url);

        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(Step::Respond(response)) => Ok(response),
            Some(Step::Fail(err)) => Err(err),
            None => Ok(TransportResponse::new(204)),
        }
    }
}

pub fn ok() -> Step {
    Step::Respond(TransportResponse::new(204))
}

pub fn status(code: u16, body: &str) -> Step {
    Step::Respond(TransportResponse::new(code).with_body(body))
}

/// 429 carrying the reset time in the header.
pub fn limited_header(reset_after: &str) -> Step {
    Step::Respond(TransportResponse::new(429).with_header("X-RateLimit-Reset-After", reset_after))
}

/// 429 carrying the reset time only in the JSON body.
pub fn limited_body(retry_after: f64) -> Step {
    let body = serde_json::json!({
        "message": "You are being rate limited.",
        "retry_after": retry_after,
        "global": false,
    });
    Step::Respond(TransportResponse::new(429).with_body(body.to_string()))
}

/// 429 with no usable reset signal at all.
pub fn limited_blind() -> Step {
    Step::Respond(TransportResponse::new(429).with_body("slow down"))
}
