//! Payment provider abstraction
//!
//! One implementation per provider, selected once at startup from
//! configuration. The reconciler only ever sees this trait; nothing in the
//! pipeline branches on a detected provider type at runtime.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use http::HeaderMap;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::event::{CanonicalEvent, CheckoutSession, Provider};

pub(crate) type HmacSha256 = Hmac<Sha256>;

/// A payment provider integration: webhook authenticity, payload
/// normalization, and checkout initiation.
///
/// `verify` runs over the exact raw bytes received; `parse` must only be
/// called after `verify` succeeds.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn name(&self) -> Provider;

    /// Verify the authenticity of a webhook delivery.
    ///
    /// Async because one scheme (PayPal) requires a callback to the
    /// provider's verification API; the HMAC providers never await.
    async fn verify(&self, body: &[u8], headers: &HeaderMap) -> BillingResult<()>;

    /// Parse the verified raw body into a canonical entitlement event.
    fn parse(&self, body: &[u8]) -> BillingResult<CanonicalEvent>;

    /// Initiate a checkout for the given user, embedding `user_id` as the
    /// trusted identifier that later webhook events echo back.
    async fn create_checkout(&self, user_id: Uuid, email: &str)
        -> BillingResult<CheckoutSession>;
}

/// Compute HMAC-SHA256 over `payload` and compare against a hex digest in
/// constant time.
pub(crate) fn verify_hmac_hex(
    secret: &str,
    payload: &[u8],
    expected_hex: &str,
) -> BillingResult<()> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| BillingError::SignatureInvalid)?;
    mac.update(payload);
    let computed = hex::encode(mac.finalize().into_bytes());

    // Compare the hex strings rather than decoded bytes so a malformed
    // signature header fails the same way as a wrong one.
    if computed.as_bytes().ct_eq(expected_hex.as_bytes()).into() {
        Ok(())
    } else {
        Err(BillingError::SignatureInvalid)
    }
}

/// Pull a header value as a string, rejecting the delivery when absent.
pub(crate) fn require_header<'a>(headers: &'a HeaderMap, name: &str) -> BillingResult<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or(BillingError::SignatureInvalid)
}
