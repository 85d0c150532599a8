//! Stripe integration
//!
//! Webhook verification follows Stripe's signed-payload scheme: the
//! `Stripe-Signature` header carries `t=<unix ts>,v1=<hex hmac>`, and the
//! HMAC-SHA256 is computed over `"{t}.{raw body}"` with the endpoint
//! secret. A 5-minute timestamp tolerance bounds replay.

use async_trait::async_trait;
use hmac::Mac;
use http::HeaderMap;
use serde_json::Value;
use subtle::ConstantTimeEq;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::event::{CanonicalEvent, CheckoutSession, EntitlementIntent, Provider};
use crate::provider::{require_header, HmacSha256, PaymentProvider};
use crate::providers::{expandable_id, parse_user_id, timestamp_opt};

const SIGNATURE_HEADER: &str = "stripe-signature";
const TIMESTAMP_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub price_id: String,
    pub success_url: String,
    pub cancel_url: String,
}

pub struct StripeProvider {
    config: StripeConfig,
    http: reqwest::Client,
    api_base: String,
}

impl StripeProvider {
    pub fn new(config: StripeConfig, http: reqwest::Client) -> Self {
        Self {
            config,
            http,
            api_base: "https://api.stripe.com".to_string(),
        }
    }

    #[cfg(test)]
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.to_string();
        self
    }

    /// Verify a `t=..,v1=..` signature header against the raw body.
    fn verify_signature(&self, body: &[u8], signature: &str) -> BillingResult<()> {
        let mut timestamp: Option<i64> = None;
        let mut v1_signature: Option<&str> = None;

        for part in signature.split(',') {
            match part.splitn(2, '=').collect::<Vec<_>>()[..] {
                ["t", v] => timestamp = v.parse().ok(),
                ["v1", v] => v1_signature = Some(v),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(BillingError::SignatureInvalid)?;
        let v1_signature = v1_signature.ok_or(BillingError::SignatureInvalid)?;

        let now = OffsetDateTime::now_utc().unix_timestamp();
        if (now - timestamp).abs() > TIMESTAMP_TOLERANCE_SECS {
            tracing::warn!(
                timestamp = timestamp,
                skew_secs = (now - timestamp).abs(),
                "Stripe webhook timestamp outside tolerance"
            );
            return Err(BillingError::SignatureInvalid);
        }

        let secret = self
            .config
            .webhook_secret
            .strip_prefix("whsec_")
            .unwrap_or(&self.config.webhook_secret);

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| BillingError::SignatureInvalid)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(body);
        let computed = hex::encode(mac.finalize().into_bytes());

        if computed.as_bytes().ct_eq(v1_signature.as_bytes()).into() {
            Ok(())
        } else {
            Err(BillingError::SignatureInvalid)
        }
    }
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    fn name(&self) -> Provider {
        Provider::Stripe
    }

    async fn verify(&self, body: &[u8], headers: &HeaderMap) -> BillingResult<()> {
        let signature = require_header(headers, SIGNATURE_HEADER)?;
        self.verify_signature(body, signature)
    }

    fn parse(&self, body: &[u8]) -> BillingResult<CanonicalEvent> {
        let event: Value = serde_json::from_slice(body)
            .map_err(|e| BillingError::MalformedPayload(e.to_string()))?;
        let event_type = event
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| BillingError::MalformedPayload("missing event type".into()))?;
        let object = &event["data"]["object"];

        let canonical = match event_type {
            "checkout.session.completed" => {
                let user_id = parse_user_id(
                    object["metadata"]["supabase_user_id"].as_str(),
                );
                let email = object["customer_details"]["email"]
                    .as_str()
                    .or_else(|| object["customer_email"].as_str())
                    .map(str::to_string);
                CanonicalEvent {
                    intent: EntitlementIntent::Activate,
                    event_type: event_type.to_string(),
                    subscription_id: expandable_id(&object["subscription"]),
                    user_id,
                    email,
                    customer_id: expandable_id(&object["customer"]),
                    status: None,
                    is_trial: None,
                    trial_ends_at: None,
                }
            }
            "customer.subscription.updated" => {
                let status = object["status"].as_str().unwrap_or_default();
                let intent = match status {
                    "active" | "trialing" => EntitlementIntent::Activate,
                    "canceled" | "unpaid" | "paused" => EntitlementIntent::Deactivate,
                    _ => EntitlementIntent::Unknown,
                };
                CanonicalEvent {
                    intent,
                    event_type: event_type.to_string(),
                    subscription_id: object["id"].as_str().map(str::to_string),
                    user_id: parse_user_id(object["metadata"]["supabase_user_id"].as_str()),
                    email: None,
                    customer_id: expandable_id(&object["customer"]),
                    status: Some(status.to_string()),
                    is_trial: Some(status == "trialing"),
                    trial_ends_at: timestamp_opt(object["trial_end"].as_i64()),
                }
            }
            "customer.subscription.deleted" => CanonicalEvent {
                intent: EntitlementIntent::Deactivate,
                event_type: event_type.to_string(),
                subscription_id: object["id"].as_str().map(str::to_string),
                user_id: None,
                email: None,
                customer_id: expandable_id(&object["customer"]),
                status: object["status"].as_str().map(str::to_string),
                is_trial: None,
                trial_ends_at: None,
            },
            "invoice.paid" | "invoice.payment_succeeded" => CanonicalEvent {
                intent: EntitlementIntent::PaymentConfirmed,
                event_type: event_type.to_string(),
                subscription_id: expandable_id(&object["subscription"]),
                user_id: None,
                email: object["customer_email"].as_str().map(str::to_string),
                customer_id: expandable_id(&object["customer"]),
                status: None,
                is_trial: None,
                trial_ends_at: None,
            },
            _ => CanonicalEvent::unknown(event_type),
        };

        Ok(canonical)
    }

    async fn create_checkout(
        &self,
        user_id: Uuid,
        email: &str,
    ) -> BillingResult<CheckoutSession> {
        let user_id = user_id.to_string();
        let params: Vec<(&str, &str)> = vec![
            ("mode", "subscription"),
            ("line_items[0][price]", &self.config.price_id),
            ("line_items[0][quantity]", "1"),
            ("success_url", &self.config.success_url),
            ("cancel_url", &self.config.cancel_url),
            ("customer_email", email),
            ("client_reference_id", &user_id),
            ("metadata[supabase_user_id]", &user_id),
            // Propagated to the subscription so later subscription events
            // carry the trusted id too.
            ("subscription_data[metadata][supabase_user_id]", &user_id),
        ];

        let response = self
            .http
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&self.config.secret_key)
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(BillingError::ProviderApi(format!(
                "stripe checkout session failed ({status}): {detail}"
            )));
        }

        let session: Value = response.json().await?;
        let url = session["url"]
            .as_str()
            .ok_or_else(|| BillingError::ProviderApi("checkout session missing url".into()))?
            .to_string();

        Ok(CheckoutSession {
            url,
            session_id: session["id"].as_str().map(str::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> StripeProvider {
        StripeProvider::new(
            StripeConfig {
                secret_key: "sk_test_xxx".into(),
                webhook_secret: "whsec_test123secret456".into(),
                price_id: "price_123".into(),
                success_url: "https://aeroscout.example/premium/success".into(),
                cancel_url: "https://aeroscout.example/premium".into(),
            },
            reqwest::Client::new(),
        )
    }

    fn sign(payload: &[u8], secret: &str, timestamp: i64) -> String {
        let secret = secret.strip_prefix("whsec_").unwrap_or(secret);
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{timestamp}.").as_bytes());
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    fn signed_headers(payload: &[u8], secret: &str, timestamp: i64) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let sig = format!("t={},v1={}", timestamp, sign(payload, secret, timestamp));
        headers.insert("stripe-signature", sig.parse().unwrap());
        headers
    }

    #[tokio::test]
    async fn accepts_valid_signature() {
        let p = provider();
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let headers = signed_headers(payload, "whsec_test123secret456", now);
        assert!(p.verify(payload, &headers).await.is_ok());
    }

    #[tokio::test]
    async fn rejects_wrong_secret() {
        let p = provider();
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let headers = signed_headers(payload, "whsec_wrong", now);
        assert!(matches!(
            p.verify(payload, &headers).await,
            Err(BillingError::SignatureInvalid)
        ));
    }

    #[tokio::test]
    async fn rejects_modified_payload() {
        let p = provider();
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let headers = signed_headers(payload, "whsec_test123secret456", now);
        assert!(p.verify(b"{\"type\":\"tampered\"}", &headers).await.is_err());
    }

    #[tokio::test]
    async fn rejects_stale_timestamp() {
        let p = provider();
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let old = OffsetDateTime::now_utc().unix_timestamp() - 600;
        let headers = signed_headers(payload, "whsec_test123secret456", old);
        assert!(p.verify(payload, &headers).await.is_err());
    }

    #[tokio::test]
    async fn rejects_missing_header() {
        let p = provider();
        assert!(p.verify(b"{}", &HeaderMap::new()).await.is_err());
    }

    #[test]
    fn parses_checkout_completed() {
        let p = provider();
        let body = serde_json::json!({
            "type": "checkout.session.completed",
            "data": {"object": {
                "id": "cs_1",
                "customer": "cus_1",
                "subscription": "sub_1",
                "customer_details": {"email": "pilot@example.com"},
                "metadata": {"supabase_user_id": "8f7f54a4-6ba4-4e16-8f2c-5c6c5fc7d2f5"}
            }}
        });
        let event = p.parse(body.to_string().as_bytes()).unwrap();
        assert_eq!(event.intent, EntitlementIntent::Activate);
        assert_eq!(event.subscription_id.as_deref(), Some("sub_1"));
        assert_eq!(event.customer_id.as_deref(), Some("cus_1"));
        assert_eq!(event.email.as_deref(), Some("pilot@example.com"));
        assert_eq!(
            event.user_id,
            Some("8f7f54a4-6ba4-4e16-8f2c-5c6c5fc7d2f5".parse().unwrap())
        );
    }

    #[test]
    fn parses_subscription_deleted() {
        let p = provider();
        let body = serde_json::json!({
            "type": "customer.subscription.deleted",
            "data": {"object": {"id": "sub_1", "customer": "cus_1", "status": "canceled"}}
        });
        let event = p.parse(body.to_string().as_bytes()).unwrap();
        assert_eq!(event.intent, EntitlementIntent::Deactivate);
        assert_eq!(event.subscription_id.as_deref(), Some("sub_1"));
        assert_eq!(event.status.as_deref(), Some("canceled"));
    }

    #[test]
    fn parses_invoice_paid_with_expanded_customer() {
        let p = provider();
        let body = serde_json::json!({
            "type": "invoice.paid",
            "data": {"object": {
                "subscription": {"id": "sub_9"},
                "customer": {"id": "cus_9"},
                "customer_email": "crew@example.com"
            }}
        });
        let event = p.parse(body.to_string().as_bytes()).unwrap();
        assert_eq!(event.intent, EntitlementIntent::PaymentConfirmed);
        assert_eq!(event.subscription_id.as_deref(), Some("sub_9"));
        assert_eq!(event.customer_id.as_deref(), Some("cus_9"));
    }

    #[test]
    fn unrecognized_event_is_unknown_not_error() {
        let p = provider();
        let body = br#"{"type":"charge.dispute.created","data":{"object":{}}}"#;
        let event = p.parse(body).unwrap();
        assert_eq!(event.intent, EntitlementIntent::Unknown);
    }

    #[test]
    fn malformed_json_is_rejected() {
        let p = provider();
        assert!(matches!(
            p.parse(b"not json"),
            Err(BillingError::MalformedPayload(_))
        ));
    }

    #[tokio::test]
    async fn creates_checkout_session() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/checkout/sessions")
            .with_status(200)
            .with_body(r#"{"id":"cs_test_1","url":"https://checkout.stripe.com/c/pay/cs_test_1"}"#)
            .create_async()
            .await;

        let p = provider().with_api_base(&server.url());
        let session = p
            .create_checkout(Uuid::new_v4(), "pilot@example.com")
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(session.url, "https://checkout.stripe.com/c/pay/cs_test_1");
        assert_eq!(session.session_id.as_deref(), Some("cs_test_1"));
    }

    #[tokio::test]
    async fn checkout_surfaces_provider_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/checkout/sessions")
            .with_status(402)
            .with_body(r#"{"error":{"message":"account inactive"}}"#)
            .create_async()
            .await;

        let p = provider().with_api_base(&server.url());
        let err = p
            .create_checkout(Uuid::new_v4(), "pilot@example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::ProviderApi(_)));
    }
}
