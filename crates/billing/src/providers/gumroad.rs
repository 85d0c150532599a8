//! Gumroad integration
//!
//! Gumroad's ping webhook has no signature scheme: deliveries are
//! form-urlencoded and the only authenticity signal is the `seller_id`
//! field, which must match the configured seller. Checkout happens in
//! Gumroad's client-side overlay, so `create_checkout` just hands back the
//! configured product permalink.
//!
//! Events carry no trusted user id; the purchase email is the only join
//! key, which makes this the provider that exercises the pending-profile
//! path most.

use std::collections::HashMap;

use async_trait::async_trait;
use http::HeaderMap;
use subtle::ConstantTimeEq;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::event::{CanonicalEvent, CheckoutSession, EntitlementIntent, Provider};
use crate::provider::PaymentProvider;

#[derive(Debug, Clone)]
pub struct GumroadConfig {
    pub seller_id: String,
    /// Product permalink, e.g. `https://store.gumroad.com/l/aeroscout-pro`.
    pub product_url: String,
}

pub struct GumroadProvider {
    config: GumroadConfig,
}

impl GumroadProvider {
    pub fn new(config: GumroadConfig) -> Self {
        Self { config }
    }

    fn form_fields(body: &[u8]) -> HashMap<String, String> {
        url::form_urlencoded::parse(body)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }
}

#[async_trait]
impl PaymentProvider for GumroadProvider {
    fn name(&self) -> Provider {
        Provider::Gumroad
    }

    async fn verify(&self, body: &[u8], _headers: &HeaderMap) -> BillingResult<()> {
        let fields = Self::form_fields(body);
        let seller_id = fields
            .get("seller_id")
            .ok_or(BillingError::SignatureInvalid)?;

        if seller_id
            .as_bytes()
            .ct_eq(self.config.seller_id.as_bytes())
            .into()
        {
            Ok(())
        } else {
            tracing::warn!("Gumroad seller_id mismatch - rejecting delivery");
            Err(BillingError::SignatureInvalid)
        }
    }

    fn parse(&self, body: &[u8]) -> BillingResult<CanonicalEvent> {
        let fields = Self::form_fields(body);

        let email = fields
            .get("email")
            .or_else(|| fields.get("purchaser_id"))
            .cloned()
            .ok_or_else(|| BillingError::MalformedPayload("no customer email".into()))?;

        // Ping deliveries for plain sales omit resource_name.
        let resource_name = fields
            .get("resource_name")
            .map(String::as_str)
            .unwrap_or("sale");

        let subscription_id = fields
            .get("subscription_id")
            .or_else(|| fields.get("sale_id"))
            .cloned();

        let is_trial = fields
            .get("is_free_trial_purchase")
            .map(|v| v == "true");
        let trial_ends_at = fields
            .get("free_trial_ends_at")
            .and_then(|v| OffsetDateTime::parse(v, &Rfc3339).ok());

        let canonical = match resource_name {
            "sale" | "ping" => CanonicalEvent {
                intent: EntitlementIntent::Activate,
                event_type: resource_name.to_string(),
                subscription_id,
                user_id: None,
                email: Some(email),
                customer_id: fields.get("purchaser_id").cloned(),
                status: None,
                is_trial,
                trial_ends_at,
            },
            "subscription_cancelled" | "cancellation" | "subscription_ended" => CanonicalEvent {
                intent: EntitlementIntent::Deactivate,
                event_type: resource_name.to_string(),
                subscription_id: fields.get("subscription_id").cloned(),
                user_id: None,
                email: Some(email),
                customer_id: None,
                status: Some(resource_name.to_string()),
                is_trial: None,
                trial_ends_at: None,
            },
            "subscription_restarted" => CanonicalEvent {
                intent: EntitlementIntent::PaymentConfirmed,
                event_type: resource_name.to_string(),
                subscription_id: fields.get("subscription_id").cloned(),
                user_id: None,
                email: Some(email),
                customer_id: None,
                status: None,
                is_trial: None,
                trial_ends_at: None,
            },
            _ => CanonicalEvent::unknown(resource_name),
        };

        Ok(canonical)
    }

    async fn create_checkout(
        &self,
        _user_id: Uuid,
        email: &str,
    ) -> BillingResult<CheckoutSession> {
        // Overlay checkout; prefill the buyer email so the webhook's email
        // matches the account that initiated checkout.
        let url = format!(
            "{}?wanted=true&email={}",
            self.config.product_url,
            url::form_urlencoded::byte_serialize(email.as_bytes()).collect::<String>()
        );
        Ok(CheckoutSession {
            url,
            session_id: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SELLER: &str = "GRseller123";

    fn provider() -> GumroadProvider {
        GumroadProvider::new(GumroadConfig {
            seller_id: SELLER.into(),
            product_url: "https://store.gumroad.com/l/aeroscout-pro".into(),
        })
    }

    #[tokio::test]
    async fn accepts_matching_seller_id() {
        let p = provider();
        let body = format!("seller_id={SELLER}&email=pilot%40example.com");
        assert!(p.verify(body.as_bytes(), &HeaderMap::new()).await.is_ok());
    }

    #[tokio::test]
    async fn rejects_wrong_seller_id() {
        let p = provider();
        let body = b"seller_id=GRother&email=pilot%40example.com";
        assert!(matches!(
            p.verify(body, &HeaderMap::new()).await,
            Err(BillingError::SignatureInvalid)
        ));
    }

    #[tokio::test]
    async fn rejects_missing_seller_id() {
        let p = provider();
        assert!(p
            .verify(b"email=pilot%40example.com", &HeaderMap::new())
            .await
            .is_err());
    }

    #[test]
    fn sale_without_resource_name_activates_by_email() {
        let p = provider();
        let body = format!(
            "seller_id={SELLER}&email=pilot%40example.com&sale_id=S123&purchaser_id=P9"
        );
        let event = p.parse(body.as_bytes()).unwrap();
        assert_eq!(event.intent, EntitlementIntent::Activate);
        assert_eq!(event.email.as_deref(), Some("pilot@example.com"));
        assert_eq!(event.subscription_id.as_deref(), Some("S123"));
        assert!(event.user_id.is_none());
    }

    #[test]
    fn subscription_id_preferred_over_sale_id() {
        let p = provider();
        let body = format!(
            "seller_id={SELLER}&email=a%40b.c&resource_name=sale&subscription_id=SUB1&sale_id=S123"
        );
        let event = p.parse(body.as_bytes()).unwrap();
        assert_eq!(event.subscription_id.as_deref(), Some("SUB1"));
    }

    #[test]
    fn missing_email_is_malformed() {
        let p = provider();
        let body = format!("seller_id={SELLER}&resource_name=sale");
        assert!(matches!(
            p.parse(body.as_bytes()),
            Err(BillingError::MalformedPayload(_))
        ));
    }

    #[test]
    fn cancellation_deactivates() {
        let p = provider();
        let body = format!(
            "seller_id={SELLER}&email=a%40b.c&resource_name=subscription_cancelled&subscription_id=SUB1"
        );
        let event = p.parse(body.as_bytes()).unwrap();
        assert_eq!(event.intent, EntitlementIntent::Deactivate);
        assert_eq!(event.subscription_id.as_deref(), Some("SUB1"));
        assert_eq!(event.email.as_deref(), Some("a@b.c"));
    }

    #[test]
    fn restart_confirms_payment() {
        let p = provider();
        let body = format!(
            "seller_id={SELLER}&email=a%40b.c&resource_name=subscription_restarted&subscription_id=SUB1"
        );
        let event = p.parse(body.as_bytes()).unwrap();
        assert_eq!(event.intent, EntitlementIntent::PaymentConfirmed);
    }

    #[test]
    fn trial_fields_are_captured() {
        let p = provider();
        let body = format!(
            "seller_id={SELLER}&email=a%40b.c&is_free_trial_purchase=true&free_trial_ends_at=2026-09-12T00%3A00%3A00Z"
        );
        let event = p.parse(body.as_bytes()).unwrap();
        assert_eq!(event.is_trial, Some(true));
        assert!(event.trial_ends_at.is_some());
    }

    #[tokio::test]
    async fn checkout_returns_prefilled_permalink() {
        let p = provider();
        let session = p
            .create_checkout(Uuid::new_v4(), "pilot@example.com")
            .await
            .unwrap();
        assert!(session.url.starts_with("https://store.gumroad.com/l/aeroscout-pro?wanted=true"));
        assert!(session.url.contains("pilot%40example.com"));
        assert!(session.session_id.is_none());
    }
}
