//! Checkout initiation endpoint

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use aeroscout_billing::CheckoutSession;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateCheckoutRequest {
    #[serde(default)]
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub user_email: Option<String>,
}

pub async fn create_checkout(
    State(state): State<AppState>,
    Json(request): Json<CreateCheckoutRequest>,
) -> Result<Json<CheckoutSession>, ApiError> {
    let user_id = request
        .user_id
        .ok_or_else(|| ApiError::BadRequest("user_id is required".into()))?;
    let user_email = request
        .user_email
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .ok_or_else(|| ApiError::BadRequest("user_email is required".into()))?;

    let session = state.provider.create_checkout(user_id, user_email).await?;

    tracing::info!(
        user_id = %user_id,
        provider = %state.provider.name(),
        session_id = ?session.session_id,
        "Checkout session created"
    );

    Ok(Json(session))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_deserializes_with_missing_fields() {
        let request: CreateCheckoutRequest = serde_json::from_str("{}").unwrap();
        assert!(request.user_id.is_none());
        assert!(request.user_email.is_none());
    }

    #[test]
    fn request_deserializes_full_body() {
        let request: CreateCheckoutRequest = serde_json::from_str(
            r#"{"user_id":"0b2e9d14-3c1a-4a6f-9a0e-1d2c3b4a5f6e","user_email":"pilot@example.com"}"#,
        )
        .unwrap();
        assert!(request.user_id.is_some());
        assert_eq!(request.user_email.as_deref(), Some("pilot@example.com"));
    }
}
