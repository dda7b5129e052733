use serde::{Deserialize, Serialize};
use specta::Type;

use super::Payload;

/// Candidate event as posted to the ingestion endpoint. Required fields are
/// optional here so missing values surface as validation errors, not as
/// deserialization rejections.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Type)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub target_url: Option<String>,
    #[serde(default)]
    pub payload: Option<Payload>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    pub event_id: String,
    pub partition: u32,
    pub message: String,
}
