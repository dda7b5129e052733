use std::sync::Arc;

use crate::{audit::LogStore, dispatcher::CircuitBreakerRegistry, producer::Producer};

#[derive(Clone)]
pub struct AppState {
    /// `None` when this process only consumes; ingestion routes are not mounted.
    pub producer: Option<Arc<Producer>>,
    pub log_store: Arc<dyn LogStore>,
    pub circuits: Arc<CircuitBreakerRegistry>,
    pub audit_api_token: Option<String>,
}
