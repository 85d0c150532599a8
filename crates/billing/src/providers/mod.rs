//! Provider implementations
//!
//! One module per payment provider. Each implements [`PaymentProvider`]
//! with that provider's signature scheme, event vocabulary, and checkout
//! API; the rest of the crate never sees provider-specific shapes.

pub mod gumroad;
pub mod lemonsqueezy;
pub mod paddle;
pub mod paypal;
pub mod stripe;

pub use gumroad::{GumroadConfig, GumroadProvider};
pub use lemonsqueezy::{LemonSqueezyConfig, LemonSqueezyProvider};
pub use paddle::{PaddleConfig, PaddleProvider};
pub use paypal::{PayPalConfig, PayPalMode, PayPalProvider};
pub use stripe::{StripeConfig, StripeProvider};

use serde_json::Value;
use uuid::Uuid;

/// Extract an id from a Stripe-style expandable field: either a bare id
/// string or an expanded object carrying `id`.
pub(crate) fn expandable_id(v: &Value) -> Option<String> {
    v.as_str()
        .map(str::to_string)
        .or_else(|| v.get("id").and_then(Value::as_str).map(str::to_string))
}

/// Parse a trusted user id from checkout metadata. Invalid ids are logged
/// and dropped so resolution can fall back to email.
pub(crate) fn parse_user_id(raw: Option<&str>) -> Option<Uuid> {
    let raw = raw?;
    match Uuid::parse_str(raw) {
        Ok(id) => Some(id),
        Err(_) => {
            tracing::warn!(raw = %raw, "Ignoring malformed user id in checkout metadata");
            None
        }
    }
}

pub(crate) fn timestamp_opt(unix: Option<i64>) -> Option<time::OffsetDateTime> {
    unix.and_then(|t| time::OffsetDateTime::from_unix_timestamp(t).ok())
}
