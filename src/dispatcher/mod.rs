mod breaker;
mod config;
mod executor;
pub mod http;
mod log_writer;
mod worker;

pub use breaker::{CircuitBreaker, CircuitBreakerRegistry};
pub use config::{CircuitConfig, DEFAULT_CIRCUIT_NAME, DispatcherConfig};
pub use executor::{AttemptOutcome, CIRCUIT_OPEN_MESSAGE, DeliveryExecutor, DeliveryReport};
pub use http::{HttpClient, HttpResponse, OutboundRequest, ReqwestHttpClient, TransportError};
pub use log_writer::{DeliveryLogWriter, serialize_payload};
pub use worker::{Dispatcher, DispatcherHandle, Processed, ShutdownTimeout, WorkerConfig};
