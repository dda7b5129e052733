pub mod audit;
pub mod ingest;

use axum::{
    Json, Router, middleware,
    routing::{get, post},
};
use serde_json::{Value, json};

use crate::{auth::audit_auth, state::AppState};

/// Full HTTP surface. Ingestion is mounted only when the state carries a
/// producer.
pub fn router(state: AppState) -> Router {
    let audit = Router::new()
        .route("/api/audit/logs", get(audit::list_logs_handler))
        .route("/api/audit/circuits", get(audit::list_circuits_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), audit_auth));

    let mut app = Router::new()
        .route("/health", get(health_handler))
        .merge(audit);

    if state.producer.is_some() {
        app = app.route("/webhooks", post(ingest::ingest_handler));
    }

    app.with_state(state)
}

pub async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
