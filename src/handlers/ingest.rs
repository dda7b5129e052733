use axum::{Json, extract::State, http::StatusCode};

use crate::{
    error::ApiError,
    extractors::ValidJson,
    state::AppState,
    types::{IngestRequest, IngestResponse},
};

pub async fn ingest_handler(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<IngestRequest>,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError> {
    let Some(producer) = state.producer.as_ref() else {
        return Err(ApiError::NotFound("ingestion is disabled".to_string()));
    };

    let accepted = producer.submit(req).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            message: format!(
                "Webhook event sent successfully with ID: {}",
                accepted.event.event_id
            ),
            event_id: accepted.event.event_id,
            partition: accepted.receipt.partition,
        }),
    ))
}
