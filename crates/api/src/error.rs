//! API error responses
//!
//! Maps billing-layer errors to the HTTP contract: rejected deliveries
//! (bad signature, unparseable payload) are 400, upstream provider
//! failures during checkout are 502, everything else is 500. Bodies are
//! `{"error": "..."}` JSON.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use aeroscout_billing::BillingError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    BadGateway(String),

    #[error("{0}")]
    Internal(String),
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::SignatureInvalid => {
                ApiError::BadRequest("invalid webhook signature".into())
            }
            BillingError::MalformedPayload(detail) => {
                ApiError::BadRequest(format!("malformed payload: {detail}"))
            }
            BillingError::ProviderApi(detail) => ApiError::BadGateway(detail),
            BillingError::MissingConfig(name) => {
                ApiError::Internal(format!("missing configuration: {name}"))
            }
            BillingError::Database(detail) => ApiError::Internal(detail),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::BadGateway(m) => {
                tracing::error!(error = %m, "Upstream provider failure");
                (StatusCode::BAD_GATEWAY, m)
            }
            ApiError::Internal(m) => {
                tracing::error!(error = %m, "Internal error");
                // Internals stay in the logs.
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".into())
            }
        };

        (status, Json(json!({"error": message}))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_failure_maps_to_400() {
        let err: ApiError = BillingError::SignatureInvalid.into();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn provider_failure_maps_to_502() {
        let err: ApiError = BillingError::ProviderApi("stripe down".into()).into();
        assert!(matches!(err, ApiError::BadGateway(_)));
    }

    #[test]
    fn database_failure_maps_to_500() {
        let err: ApiError = BillingError::Database("pool exhausted".into()).into();
        assert!(matches!(err, ApiError::Internal(_)));
    }
}
