use serde::{Deserialize, Serialize};
use specta::Type;

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct CircuitBreakerState {
    pub name: String,
    pub state: CircuitStatus,
    /// Counts within the current rolling window.
    pub failure_count: u32,
    pub success_count: u32,
    pub opened_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}
