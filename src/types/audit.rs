use serde::{Deserialize, Serialize};
use specta::Type;

use super::{CircuitBreakerState, DeliveryAttemptLog};

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct ListLogsResponse {
    pub logs: Vec<DeliveryAttemptLog>,
    pub next_before_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct ListCircuitsResponse {
    pub circuits: Vec<CircuitBreakerState>,
}
