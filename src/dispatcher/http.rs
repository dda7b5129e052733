use std::time::Duration;

use reqwest::{StatusCode, header::CONTENT_TYPE, redirect::Policy};
use thiserror::Error;
use tracing::{Instrument, debug, info_span};

use crate::BoxFuture;

pub const EVENT_ID_HEADER: &str = "x-webhook-event-id";
pub const CLIENT_ID_HEADER: &str = "x-webhook-client-id";

/// Response bodies are cut to this many characters before they reach logs.
const MAX_BODY_EXCERPT: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    pub url: String,
    pub event_id: String,
    pub client_id: String,
    /// JSON-encoded payload.
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// `"503 Service Unavailable"`, or just the code when it has no reason
    /// phrase.
    pub fn status_line(&self) -> String {
        match StatusCode::from_u16(self.status)
            .ok()
            .and_then(|status| status.canonical_reason())
        {
            Some(reason) => format!("{} {reason}", self.status),
            None => self.status.to_string(),
        }
    }

    pub fn body_excerpt(&self) -> Option<String> {
        let trimmed = self.body.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(trimmed.chars().take(MAX_BODY_EXCERPT).collect())
    }
}

/// Failures where no HTTP status was received.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),
}

pub trait HttpClient: Send + Sync + 'static {
    fn post(&self, request: OutboundRequest) -> BoxFuture<'_, Result<HttpResponse, TransportError>>;
}

/// Pooled reqwest client with a total per-request timeout. Redirects are
/// returned to the caller as-is.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestHttpClient {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(Policy::none())
            .user_agent(concat!("webhook-dispatcher/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client, timeout })
    }
}

impl HttpClient for ReqwestHttpClient {
    fn post(&self, request: OutboundRequest) -> BoxFuture<'_, Result<HttpResponse, TransportError>> {
        let span = info_span!(
            "webhook_post",
            event_id = %request.event_id,
            url = %request.url,
        );

        Box::pin(
            async move {
                let response = self
                    .client
                    .post(&request.url)
                    .header(CONTENT_TYPE, "application/json")
                    .header(EVENT_ID_HEADER, &request.event_id)
                    .header(CLIENT_ID_HEADER, &request.client_id)
                    .body(request.body)
                    .send()
                    .await
                    .map_err(|err| self.classify(&err))?;

                let status = response.status().as_u16();
                // A body that cannot be read still leaves us with a status.
                let body = response.text().await.unwrap_or_default();
                debug!(status, "received response");

                Ok(HttpResponse { status, body })
            }
            .instrument(span),
        )
    }
}

impl ReqwestHttpClient {
    fn classify(&self, err: &reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout {
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}
