use serde::{Deserialize, Serialize};
use specta::Type;
use std::collections::BTreeMap;

pub type Payload = BTreeMap<String, serde_json::Value>;

/// An event as it travels through the channel. Never modified after publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Type)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    pub event_id: String,
    /// Partition key: every event of one client is delivered in publish order.
    pub client_id: String,
    pub target_url: String,
    #[serde(default)]
    pub payload: Payload,
}
