//! Canonical event model
//!
//! Every provider's webhook payload is normalized into a [`CanonicalEvent`]
//! before the reconciler touches any state. The event carries the intent,
//! the provider's subscription id, and whatever identity material the
//! payload included (trusted user id from checkout metadata, customer
//! email).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The payment providers this deployment can be configured with.
///
/// Exactly one is active per deployment; the enum doubles as the key for
/// the per-provider column family in `profiles`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Stripe,
    PayPal,
    Paddle,
    Gumroad,
    LemonSqueezy,
}

impl Provider {
    /// Column-family prefix in the `profiles` table.
    pub fn column_prefix(&self) -> &'static str {
        match self {
            Provider::Stripe => "stripe",
            Provider::PayPal => "paypal",
            Provider::Paddle => "paddle",
            Provider::Gumroad => "gumroad",
            Provider::LemonSqueezy => "lemonsqueezy",
        }
    }

    /// Parse the `PAYMENT_PROVIDER` configuration value.
    pub fn from_config(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "stripe" => Some(Provider::Stripe),
            "paypal" => Some(Provider::PayPal),
            "paddle" => Some(Provider::Paddle),
            "gumroad" => Some(Provider::Gumroad),
            "lemonsqueezy" | "lemon_squeezy" => Some(Provider::LemonSqueezy),
            _ => None,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.column_prefix())
    }
}

/// What a webhook event means for the user's entitlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntitlementIntent {
    /// New purchase, trial start, or resumed subscription.
    Activate,
    /// Cancelled, suspended, paused, or expired subscription.
    Deactivate,
    /// Recurring charge succeeded; premium must be reasserted if it was
    /// somehow lost, otherwise a no-op.
    PaymentConfirmed,
    /// Event type this deployment does not handle. Acknowledged, never an
    /// error: providers add event types over time.
    Unknown,
}

impl std::fmt::Display for EntitlementIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntitlementIntent::Activate => write!(f, "activate"),
            EntitlementIntent::Deactivate => write!(f, "deactivate"),
            EntitlementIntent::PaymentConfirmed => write!(f, "payment_confirmed"),
            EntitlementIntent::Unknown => write!(f, "unknown"),
        }
    }
}

/// Normalized webhook event, provider-independent.
#[derive(Debug, Clone)]
pub struct CanonicalEvent {
    pub intent: EntitlementIntent,
    /// The provider's raw event-type string, for logging.
    pub event_type: String,
    /// Provider subscription/agreement id, the join key for later
    /// cancellation and renewal events.
    pub subscription_id: Option<String>,
    /// Trusted application-issued user id, echoed back from checkout
    /// metadata. Authoritative when present.
    pub user_id: Option<Uuid>,
    /// Customer email, the fallback join key.
    pub email: Option<String>,
    /// Provider customer id, stored for support lookups.
    pub customer_id: Option<String>,
    /// Provider-reported subscription status, stored verbatim.
    pub status: Option<String>,
    /// Whether the subscription is in a trial period, when reported.
    pub is_trial: Option<bool>,
    pub trial_ends_at: Option<time::OffsetDateTime>,
}

impl CanonicalEvent {
    pub fn unknown(event_type: impl Into<String>) -> Self {
        Self {
            intent: EntitlementIntent::Unknown,
            event_type: event_type.into(),
            subscription_id: None,
            user_id: None,
            email: None,
            customer_id: None,
            status: None,
            is_trial: None,
            trial_ends_at: None,
        }
    }
}

/// Result of initiating a checkout with the active provider.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutSession {
    /// Provider-hosted checkout URL the client redirects to.
    pub url: String,
    /// Provider session/subscription id, when the provider issues one
    /// before payment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_config_parsing() {
        assert_eq!(Provider::from_config("stripe"), Some(Provider::Stripe));
        assert_eq!(Provider::from_config("PayPal"), Some(Provider::PayPal));
        assert_eq!(
            Provider::from_config("lemon_squeezy"),
            Some(Provider::LemonSqueezy)
        );
        assert_eq!(Provider::from_config("braintree"), None);
    }

    #[test]
    fn provider_column_prefixes_are_valid_identifiers() {
        for p in [
            Provider::Stripe,
            Provider::PayPal,
            Provider::Paddle,
            Provider::Gumroad,
            Provider::LemonSqueezy,
        ] {
            assert!(p
                .column_prefix()
                .chars()
                .all(|c| c.is_ascii_lowercase() || c == '_'));
        }
    }
}
