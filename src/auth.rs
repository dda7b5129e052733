use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::{error::ApiError, state::AppState};

/// Guards the audit routes with a bearer token when one is configured.
pub async fn audit_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.audit_api_token.as_deref() else {
        return Ok(next.run(req).await);
    };

    let Some(provided) = bearer_token(req.headers()) else {
        warn!(path = %req.uri().path(), "audit request without bearer token");
        return Err(ApiError::unauthorized(
            "missing or invalid Authorization header",
        ));
    };

    if !bool::from(expected.as_bytes().ct_eq(provided.as_bytes())) {
        warn!(path = %req.uri().path(), "audit request with wrong token");
        return Err(ApiError::unauthorized("invalid token"));
    }

    Ok(next.run(req).await)
}

/// Token of an `Authorization: Bearer <token>` header; the scheme is
/// case-insensitive.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim_start();
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
