//! Webhook endpoint
//!
//! Takes the body as raw [`Bytes`]: signatures are computed over the
//! exact wire bytes, so the payload must not pass through a JSON
//! extractor first.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::state::AppState;

pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let outcome = state.reconciler.handle(&body, &headers).await?;
    tracing::debug!(outcome = ?outcome, "Webhook delivery acknowledged");
    Ok(Json(json!({"received": true})))
}
