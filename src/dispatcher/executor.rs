use std::sync::Arc;

use tokio::task::JoinError;
use tracing::{Instrument, error, info, info_span, warn};

use super::{
    CircuitBreaker, DeliveryLogWriter,
    http::{HttpClient, HttpResponse, OutboundRequest},
    log_writer::serialize_payload,
};
use crate::types::{DeliveryAttemptLog, WebhookEvent};

pub const CIRCUIT_OPEN_MESSAGE: &str = "circuit open";

/// How a single delivery attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// 2xx or 3xx.
    Delivered { status: u16 },
    /// A status outside 200..=399.
    Rejected { status: u16, message: String },
    /// No HTTP status: timeout, refused connection, bad URL.
    TransportFailed { message: String },
    /// The HTTP call panicked before producing a response.
    Aborted { message: String },
    /// The circuit refused the call; nothing was sent.
    ShortCircuited,
}

impl AttemptOutcome {
    pub fn from_response(response: &HttpResponse) -> Self {
        if (200..=399).contains(&response.status) {
            return Self::Delivered {
                status: response.status,
            };
        }

        let message = match response.body_excerpt() {
            Some(body) => format!("{}: {body}", response.status_line()),
            None => response.status_line(),
        };
        Self::Rejected {
            status: response.status,
            message,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }

    pub fn response_status(&self) -> u16 {
        match self {
            Self::Delivered { status } | Self::Rejected { status, .. } => *status,
            Self::TransportFailed { .. } | Self::Aborted { .. } | Self::ShortCircuited => 0,
        }
    }

    pub fn error_message(&self) -> Option<String> {
        match self {
            Self::Delivered { .. } => None,
            Self::Rejected { message, .. }
            | Self::TransportFailed { message }
            | Self::Aborted { message } => Some(message.clone()),
            Self::ShortCircuited => Some(CIRCUIT_OPEN_MESSAGE.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub event_id: String,
    pub outcome: AttemptOutcome,
    /// `None` when the log store rejected the row.
    pub log: Option<DeliveryAttemptLog>,
}

/// Performs one guarded delivery attempt per call and never fails: every
/// problem ends up in the outcome, the log row, or the tracing output.
pub struct DeliveryExecutor {
    breaker: Arc<CircuitBreaker>,
    http: Arc<dyn HttpClient>,
    log_writer: DeliveryLogWriter,
}

impl DeliveryExecutor {
    pub fn new(
        breaker: Arc<CircuitBreaker>,
        http: Arc<dyn HttpClient>,
        log_writer: DeliveryLogWriter,
    ) -> Self {
        Self {
            breaker,
            http,
            log_writer,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub async fn deliver(&self, event: &WebhookEvent) -> DeliveryReport {
        let span = info_span!(
            "deliver",
            event_id = %event.event_id,
            client_id = %event.client_id,
            circuit = %self.breaker.name(),
        );

        async move {
            let request_payload = serialize_payload(&event.payload);

            // Every admitted call reports back, so a half-open probe always
            // resolves the circuit one way or the other.
            let outcome = if self.breaker.allow().await {
                let outcome = self.attempt(event, request_payload.clone()).await;
                if outcome.is_success() {
                    self.breaker.record_success().await;
                } else {
                    self.breaker.record_failure().await;
                }
                outcome
            } else {
                warn!(target_url = %event.target_url, "circuit open, delivery skipped");
                AttemptOutcome::ShortCircuited
            };

            let log = match self
                .log_writer
                .save_attempt(
                    event,
                    request_payload,
                    outcome.response_status(),
                    outcome.is_success(),
                    outcome.error_message(),
                )
                .await
            {
                Ok(log) => Some(log),
                Err(err) => {
                    error!(
                        error = %err,
                        success = outcome.is_success(),
                        status = outcome.response_status(),
                        "failed to persist delivery attempt log"
                    );
                    None
                }
            };

            DeliveryReport {
                event_id: event.event_id.clone(),
                outcome,
                log,
            }
        }
        .instrument(span)
        .await
    }

    /// Writes the failure row for a delivery whose task died before it could
    /// log. The breaker has already been told about the HTTP call, if any.
    pub async fn log_aborted(&self, event: &WebhookEvent, message: String) -> DeliveryReport {
        let outcome = AttemptOutcome::Aborted { message };
        let log = self
            .log_writer
            .save_log(
                event,
                outcome.response_status(),
                outcome.is_success(),
                outcome.error_message(),
            )
            .await
            .inspect_err(|err| {
                error!(event_id = %event.event_id, error = %err, "failed to log aborted delivery");
            })
            .ok();

        DeliveryReport {
            event_id: event.event_id.clone(),
            outcome,
            log,
        }
    }

    async fn attempt(&self, event: &WebhookEvent, body: String) -> AttemptOutcome {
        let request = OutboundRequest {
            url: event.target_url.clone(),
            event_id: event.event_id.clone(),
            client_id: event.client_id.clone(),
            body,
        };

        // The call runs in its own task so a panicking client cannot skip the
        // breaker report or the log row.
        let http = Arc::clone(&self.http);
        let call = async move { http.post(request).await }.in_current_span();
        let result = match tokio::spawn(call).await {
            Ok(result) => result,
            Err(join_err) => {
                let message = format!("delivery aborted: {}", panic_message(join_err));
                error!(error = %message, target_url = %event.target_url, "webhook call panicked");
                return AttemptOutcome::Aborted { message };
            }
        };

        match result {
            Ok(response) => {
                let outcome = AttemptOutcome::from_response(&response);
                if outcome.is_success() {
                    info!(status = response.status, "webhook delivered");
                } else {
                    warn!(status = response.status, "webhook rejected by target");
                }
                outcome
            }
            Err(err) => {
                warn!(error = %err, target_url = %event.target_url, "webhook transport failure");
                AttemptOutcome::TransportFailed {
                    message: err.to_string(),
                }
            }
        }
    }
}

pub(crate) fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic".to_string()
    }
}
