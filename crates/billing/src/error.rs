//! Billing error types

use thiserror::Error;

pub type BillingResult<T> = Result<T, BillingError>;

/// Error taxonomy for webhook reconciliation and checkout initiation.
///
/// Only `SignatureInvalid` and `MalformedPayload` reject a webhook delivery
/// (HTTP 400, no mutation). Everything downstream of a verified, parseable
/// event is logged and acknowledged so providers do not redeliver events
/// that will never succeed.
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("webhook signature verification failed")]
    SignatureInvalid,

    #[error("malformed webhook payload: {0}")]
    MalformedPayload(String),

    #[error("provider API error: {0}")]
    ProviderApi(String),

    #[error("missing configuration: {0}")]
    MissingConfig(&'static str),

    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(e: sqlx::Error) -> Self {
        BillingError::Database(e.to_string())
    }
}

impl From<reqwest::Error> for BillingError {
    fn from(e: reqwest::Error) -> Self {
        BillingError::ProviderApi(e.to_string())
    }
}
