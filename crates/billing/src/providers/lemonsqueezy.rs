//! Lemon Squeezy integration
//!
//! Webhooks carry an `X-Signature` header: a hex HMAC-SHA256 of the raw
//! body. The payload is JSON:API with the event name and checkout custom
//! data under `meta`, and the subscription under `data`.

use async_trait::async_trait;
use http::HeaderMap;
use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::event::{CanonicalEvent, CheckoutSession, EntitlementIntent, Provider};
use crate::provider::{require_header, verify_hmac_hex, PaymentProvider};
use crate::providers::parse_user_id;

const SIGNATURE_HEADER: &str = "x-signature";

#[derive(Debug, Clone)]
pub struct LemonSqueezyConfig {
    pub api_key: String,
    pub webhook_secret: String,
    pub store_id: String,
    pub variant_id: String,
}

pub struct LemonSqueezyProvider {
    config: LemonSqueezyConfig,
    http: reqwest::Client,
    api_base: String,
}

impl LemonSqueezyProvider {
    pub fn new(config: LemonSqueezyConfig, http: reqwest::Client) -> Self {
        Self {
            config,
            http,
            api_base: "https://api.lemonsqueezy.com".to_string(),
        }
    }

    #[cfg(test)]
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.to_string();
        self
    }
}

/// Customer/subscription ids are numeric in Lemon Squeezy's JSON:API
/// attributes but strings at `data.id`; normalize both to strings.
fn id_string(v: &Value) -> Option<String> {
    v.as_str()
        .map(str::to_string)
        .or_else(|| v.as_i64().map(|n| n.to_string()))
}

#[async_trait]
impl PaymentProvider for LemonSqueezyProvider {
    fn name(&self) -> Provider {
        Provider::LemonSqueezy
    }

    async fn verify(&self, body: &[u8], headers: &HeaderMap) -> BillingResult<()> {
        let signature = require_header(headers, SIGNATURE_HEADER)?;
        verify_hmac_hex(&self.config.webhook_secret, body, signature)
    }

    fn parse(&self, body: &[u8]) -> BillingResult<CanonicalEvent> {
        let payload: Value = serde_json::from_slice(body)
            .map_err(|e| BillingError::MalformedPayload(e.to_string()))?;
        let event_name = payload["meta"]["event_name"]
            .as_str()
            .ok_or_else(|| BillingError::MalformedPayload("missing meta.event_name".into()))?;

        let user_id = parse_user_id(payload["meta"]["custom_data"]["user_id"].as_str());
        let attributes = &payload["data"]["attributes"];
        let subscription_id = id_string(&payload["data"]["id"]);
        let customer_id = id_string(&attributes["customer_id"]);
        let email = attributes["user_email"].as_str().map(str::to_string);
        let status = attributes["status"].as_str().map(str::to_string);
        let trial_ends_at = attributes["trial_ends_at"]
            .as_str()
            .and_then(|v| OffsetDateTime::parse(v, &Rfc3339).ok());

        let canonical = match event_name {
            "subscription_created" | "subscription_resumed" | "subscription_unpaused" => {
                CanonicalEvent {
                    intent: EntitlementIntent::Activate,
                    event_type: event_name.to_string(),
                    subscription_id,
                    user_id,
                    email,
                    customer_id,
                    is_trial: status.as_deref().map(|s| s == "on_trial"),
                    trial_ends_at,
                    status,
                }
            }
            "subscription_cancelled" | "subscription_expired" | "subscription_paused" => {
                CanonicalEvent {
                    intent: EntitlementIntent::Deactivate,
                    event_type: event_name.to_string(),
                    subscription_id,
                    user_id: None,
                    email,
                    customer_id,
                    status,
                    is_trial: None,
                    trial_ends_at: None,
                }
            }
            "subscription_updated" => {
                if matches!(status.as_deref(), Some("active") | Some("on_trial")) {
                    CanonicalEvent {
                        intent: EntitlementIntent::Activate,
                        event_type: event_name.to_string(),
                        subscription_id,
                        user_id,
                        email,
                        customer_id,
                        is_trial: status.as_deref().map(|s| s == "on_trial"),
                        trial_ends_at,
                        status,
                    }
                } else {
                    CanonicalEvent::unknown(event_name)
                }
            }
            "subscription_payment_success" => CanonicalEvent {
                intent: EntitlementIntent::PaymentConfirmed,
                event_type: event_name.to_string(),
                // The payload is a subscription invoice; the subscription
                // id lives in its attributes.
                subscription_id: id_string(&attributes["subscription_id"]),
                user_id,
                email,
                customer_id,
                status: None,
                is_trial: None,
                trial_ends_at: None,
            },
            _ => CanonicalEvent::unknown(event_name),
        };

        Ok(canonical)
    }

    async fn create_checkout(
        &self,
        user_id: Uuid,
        email: &str,
    ) -> BillingResult<CheckoutSession> {
        let payload = json!({
            "data": {
                "type": "checkouts",
                "attributes": {
                    "checkout_data": {
                        "email": email,
                        "custom": {"user_id": user_id.to_string()}
                    }
                },
                "relationships": {
                    "store": {"data": {"type": "stores", "id": self.config.store_id}},
                    "variant": {"data": {"type": "variants", "id": self.config.variant_id}}
                }
            }
        });

        let response = self
            .http
            .post(format!("{}/v1/checkouts", self.api_base))
            .bearer_auth(&self.config.api_key)
            .header("Accept", "application/vnd.api+json")
            .header("Content-Type", "application/vnd.api+json")
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(BillingError::ProviderApi(format!(
                "lemonsqueezy checkout failed ({status}): {detail}"
            )));
        }

        let body: Value = response.json().await?;
        let url = body["data"]["attributes"]["url"]
            .as_str()
            .ok_or_else(|| BillingError::ProviderApi("checkout missing url".into()))?
            .to_string();

        Ok(CheckoutSession {
            url,
            session_id: id_string(&body["data"]["id"]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hmac::Mac;

    use crate::provider::HmacSha256;

    const SECRET: &str = "ls_whsec";

    fn provider() -> LemonSqueezyProvider {
        LemonSqueezyProvider::new(
            LemonSqueezyConfig {
                api_key: "ls_api_key".into(),
                webhook_secret: SECRET.into(),
                store_id: "4242".into(),
                variant_id: "777".into(),
            },
            reqwest::Client::new(),
        )
    }

    fn signed_headers(payload: &[u8]) -> HeaderMap {
        let mut mac = HmacSha256::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(payload);
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-signature",
            hex::encode(mac.finalize().into_bytes()).parse().unwrap(),
        );
        headers
    }

    #[tokio::test]
    async fn accepts_valid_signature() {
        let p = provider();
        let payload = br#"{"meta":{"event_name":"subscription_created"}}"#;
        assert!(p.verify(payload, &signed_headers(payload)).await.is_ok());
    }

    #[tokio::test]
    async fn rejects_invalid_signature() {
        let p = provider();
        let mut headers = HeaderMap::new();
        headers.insert("x-signature", "deadbeef".parse().unwrap());
        assert!(p.verify(b"{}", &headers).await.is_err());
    }

    #[test]
    fn parses_subscription_created_with_trial() {
        let p = provider();
        let body = serde_json::json!({
            "meta": {
                "event_name": "subscription_created",
                "custom_data": {"user_id": "0b2e9d14-3c1a-4a6f-9a0e-1d2c3b4a5f6e"}
            },
            "data": {
                "id": "312",
                "attributes": {
                    "status": "on_trial",
                    "customer_id": 9912,
                    "user_email": "pilot@example.com",
                    "trial_ends_at": "2026-09-12T00:00:00Z"
                }
            }
        });
        let event = p.parse(body.to_string().as_bytes()).unwrap();
        assert_eq!(event.intent, EntitlementIntent::Activate);
        assert_eq!(event.subscription_id.as_deref(), Some("312"));
        assert_eq!(event.customer_id.as_deref(), Some("9912"));
        assert_eq!(event.is_trial, Some(true));
        assert!(event.trial_ends_at.is_some());
        assert!(event.user_id.is_some());
    }

    #[test]
    fn parses_subscription_cancelled() {
        let p = provider();
        let body = serde_json::json!({
            "meta": {"event_name": "subscription_cancelled"},
            "data": {"id": "312", "attributes": {"status": "cancelled"}}
        });
        let event = p.parse(body.to_string().as_bytes()).unwrap();
        assert_eq!(event.intent, EntitlementIntent::Deactivate);
        assert_eq!(event.status.as_deref(), Some("cancelled"));
    }

    #[test]
    fn payment_success_uses_invoice_subscription_id() {
        let p = provider();
        let body = serde_json::json!({
            "meta": {"event_name": "subscription_payment_success"},
            "data": {"id": "88", "attributes": {"subscription_id": 312}}
        });
        let event = p.parse(body.to_string().as_bytes()).unwrap();
        assert_eq!(event.intent, EntitlementIntent::PaymentConfirmed);
        assert_eq!(event.subscription_id.as_deref(), Some("312"));
    }

    #[test]
    fn unknown_event_acknowledged() {
        let p = provider();
        let body = serde_json::json!({
            "meta": {"event_name": "order_refunded"},
            "data": {"id": "1", "attributes": {}}
        });
        let event = p.parse(body.to_string().as_bytes()).unwrap();
        assert_eq!(event.intent, EntitlementIntent::Unknown);
    }

    #[tokio::test]
    async fn creates_checkout() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/checkouts")
            .with_status(201)
            .with_body(
                r#"{"data":{"id":"chk_1","attributes":{"url":"https://aeroscout.lemonsqueezy.com/checkout/buy/abc"}}}"#,
            )
            .create_async()
            .await;

        let p = provider().with_api_base(&server.url());
        let session = p
            .create_checkout(Uuid::new_v4(), "pilot@example.com")
            .await
            .unwrap();
        assert_eq!(
            session.url,
            "https://aeroscout.lemonsqueezy.com/checkout/buy/abc"
        );
    }
}
