//! Admission side of the pipeline: validates candidate events, assigns an
//! event id when the caller did not supply one, and publishes keyed by client
//! id. Returns as soon as the channel accepted the record.

use std::{collections::BTreeMap, sync::Arc};

use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    channel::{Channel, ChannelError, PublishReceipt},
    types::{IngestRequest, WebhookEvent},
};

pub const CLIENT_ID_REQUIRED: &str = "Client ID is mandatory for partitioning logic.";
pub const TARGET_URL_REQUIRED: &str = "Target URL is mandatory.";

#[derive(Debug, Error)]
pub enum ProduceError {
    /// Field name to message, one entry per rejected field.
    #[error("validation failed")]
    Validation(BTreeMap<String, String>),

    #[error("messaging service unavailable: {0}")]
    Unavailable(#[from] ChannelError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Accepted {
    pub event: WebhookEvent,
    pub receipt: PublishReceipt,
}

pub struct Producer {
    channel: Arc<dyn Channel>,
}

impl Producer {
    pub fn new(channel: Arc<dyn Channel>) -> Self {
        Self { channel }
    }

    pub fn topic(&self) -> &str {
        self.channel.topic()
    }

    pub async fn submit(&self, request: IngestRequest) -> Result<Accepted, ProduceError> {
        let event = admit(request)?;

        info!(
            event_id = %event.event_id,
            client_id = %event.client_id,
            topic = self.channel.topic(),
            "publishing webhook event"
        );

        let receipt = self
            .channel
            .publish(&event.client_id, &event)
            .await
            .map_err(|err| {
                warn!(event_id = %event.event_id, error = %err, "publish failed");
                ProduceError::Unavailable(err)
            })?;

        Ok(Accepted { event, receipt })
    }
}

/// Validates a candidate and turns it into a publishable event.
pub fn admit(request: IngestRequest) -> Result<WebhookEvent, ProduceError> {
    let mut errors = BTreeMap::new();

    let client_id = non_blank(request.client_id);
    if client_id.is_none() {
        errors.insert("clientId".to_string(), CLIENT_ID_REQUIRED.to_string());
    }
    let target_url = non_blank(request.target_url);
    if target_url.is_none() {
        errors.insert("targetUrl".to_string(), TARGET_URL_REQUIRED.to_string());
    }

    let (Some(client_id), Some(target_url)) = (client_id, target_url) else {
        return Err(ProduceError::Validation(errors));
    };

    // Any supplied id is kept as is; only a missing one is generated.
    let event_id = request.event_id.unwrap_or_else(|| Uuid::new_v4().to_string());

    Ok(WebhookEvent {
        event_id,
        client_id,
        target_url,
        payload: request.payload.unwrap_or_default(),
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}
