pub mod api_error;
pub mod audit;
pub mod circuit_breaker_state;
pub mod delivery_attempt_log;
pub mod ingest;
pub mod webhook_event;

#[allow(unused_imports)]
pub use api_error::{ApiErrorCode, ApiErrorResponse};
#[allow(unused_imports)]
pub use audit::{ListCircuitsResponse, ListLogsResponse};
#[allow(unused_imports)]
pub use circuit_breaker_state::{CircuitBreakerState, CircuitStatus};
#[allow(unused_imports)]
pub use delivery_attempt_log::DeliveryAttemptLog;
#[allow(unused_imports)]
pub use ingest::{IngestRequest, IngestResponse};
#[allow(unused_imports)]
pub use webhook_event::{Payload, WebhookEvent};
