use std::sync::Arc;

use tracing::warn;

use crate::{
    audit::{LogStore, LogStoreError, NewDeliveryAttemptLog},
    time::now_utc,
    types::{DeliveryAttemptLog, Payload, WebhookEvent},
};

/// Builds one [`DeliveryAttemptLog`] per attempt and appends it.
#[derive(Clone)]
pub struct DeliveryLogWriter {
    store: Arc<dyn LogStore>,
}

impl DeliveryLogWriter {
    pub fn new(store: Arc<dyn LogStore>) -> Self {
        Self { store }
    }

    /// `response_status` is 0 when no HTTP status was received.
    pub async fn save_log(
        &self,
        event: &WebhookEvent,
        response_status: u16,
        success: bool,
        error_message: Option<String>,
    ) -> Result<DeliveryAttemptLog, LogStoreError> {
        self.save_attempt(
            event,
            serialize_payload(&event.payload),
            response_status,
            success,
            error_message,
        )
        .await
    }

    /// Like [`save_log`](Self::save_log) with the payload already encoded,
    /// for callers that sent that exact text.
    pub async fn save_attempt(
        &self,
        event: &WebhookEvent,
        request_payload: String,
        response_status: u16,
        success: bool,
        error_message: Option<String>,
    ) -> Result<DeliveryAttemptLog, LogStoreError> {
        let entry = NewDeliveryAttemptLog {
            event_id: event.event_id.clone(),
            target_url: event.target_url.clone(),
            request_payload,
            response_status,
            success,
            error_message,
            attempt_time: now_utc(),
        };

        self.store.append(entry).await
    }
}

/// JSON text of the payload. Falls back to the debug rendering so a log row
/// is still written when encoding fails.
pub fn serialize_payload(payload: &Payload) -> String {
    match serde_json::to_string(payload) {
        Ok(json) => json,
        Err(err) => {
            warn!(error = %err, "payload is not JSON-encodable, storing debug rendering");
            format!("{payload:?}")
        }
    }
}
