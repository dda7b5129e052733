use axum::{Json, extract::State};
use serde::Deserialize;

use crate::{
    audit::LogQuery,
    error::ApiError,
    extractors::ValidQuery,
    state::AppState,
    types::{ListCircuitsResponse, ListLogsResponse},
};

#[derive(Debug, Deserialize)]
pub struct ListLogsQuery {
    event_id: Option<String>,
    limit: Option<i64>,
    before_id: Option<i64>,
}

pub async fn list_logs_handler(
    State(state): State<AppState>,
    ValidQuery(query): ValidQuery<ListLogsQuery>,
) -> Result<Json<ListLogsResponse>, ApiError> {
    let limit = parse_limit(query.limit)?;
    let event_id = match query.event_id {
        Some(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Err(ApiError::validation("event_id must be non-empty"));
            }
            Some(trimmed.to_string())
        }
        None => None,
    };
    if query.before_id.is_some_and(|id| id <= 0) {
        return Err(ApiError::validation("before_id must be positive"));
    }

    let page = state
        .log_store
        .list(LogQuery {
            event_id,
            before_id: query.before_id,
            limit,
        })
        .await?;

    Ok(Json(page))
}

pub async fn list_circuits_handler(State(state): State<AppState>) -> Json<ListCircuitsResponse> {
    Json(ListCircuitsResponse {
        circuits: state.circuits.snapshots().await,
    })
}

fn parse_limit(limit: Option<i64>) -> Result<i64, ApiError> {
    let limit = limit.unwrap_or(50);
    if !(1..=200).contains(&limit) {
        return Err(ApiError::validation("limit must be between 1 and 200"));
    }
    Ok(limit)
}
