use serde::{Deserialize, Serialize};
use specta::Type;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Type)]
pub struct DeliveryAttemptLog {
    pub id: i64,
    pub event_id: String,
    pub target_url: String,
    pub request_payload: String,
    /// 0 when no HTTP response was obtained (transport failure or open circuit).
    pub response_status: u16,
    pub success: bool,
    pub error_message: Option<String>,
    pub attempt_time: String,
}
