//! Paddle integration
//!
//! The `Paddle-Signature` header carries semicolon-separated fields
//! (`ts=<unix>;h1=<hex>`); only the `h1` field is compared, against an
//! HMAC-SHA256 of the raw body. Events arrive as a JSON envelope with
//! `event_type` and a `data` object carrying `custom_data` from checkout.

use async_trait::async_trait;
use http::HeaderMap;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::event::{CanonicalEvent, CheckoutSession, EntitlementIntent, Provider};
use crate::provider::{require_header, verify_hmac_hex, PaymentProvider};
use crate::providers::parse_user_id;

const SIGNATURE_HEADER: &str = "paddle-signature";

#[derive(Debug, Clone)]
pub struct PaddleConfig {
    pub api_key: String,
    pub webhook_secret: String,
    pub price_id: String,
}

pub struct PaddleProvider {
    config: PaddleConfig,
    http: reqwest::Client,
    api_base: String,
}

impl PaddleProvider {
    pub fn new(config: PaddleConfig, http: reqwest::Client) -> Self {
        Self {
            config,
            http,
            api_base: "https://api.paddle.com".to_string(),
        }
    }

    #[cfg(test)]
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.to_string();
        self
    }
}

#[async_trait]
impl PaymentProvider for PaddleProvider {
    fn name(&self) -> Provider {
        Provider::Paddle
    }

    async fn verify(&self, body: &[u8], headers: &HeaderMap) -> BillingResult<()> {
        let signature = require_header(headers, SIGNATURE_HEADER)?;

        let h1 = signature
            .split(';')
            .find_map(|part| part.strip_prefix("h1="))
            .ok_or(BillingError::SignatureInvalid)?;

        verify_hmac_hex(&self.config.webhook_secret, body, h1)
    }

    fn parse(&self, body: &[u8]) -> BillingResult<CanonicalEvent> {
        let event: Value = serde_json::from_slice(body)
            .map_err(|e| BillingError::MalformedPayload(e.to_string()))?;
        let event_type = event
            .get("event_type")
            .and_then(Value::as_str)
            .ok_or_else(|| BillingError::MalformedPayload("missing event_type".into()))?;
        let data = &event["data"];

        let user_id = parse_user_id(data["custom_data"]["supabase_user_id"].as_str());
        let customer_id = data["customer_id"].as_str().map(str::to_string);
        let status = data["status"].as_str().map(str::to_string);

        let canonical = match event_type {
            "subscription.activated" | "subscription.created" => CanonicalEvent {
                intent: EntitlementIntent::Activate,
                event_type: event_type.to_string(),
                subscription_id: data["id"].as_str().map(str::to_string),
                user_id,
                email: data["customer"]["email"].as_str().map(str::to_string),
                customer_id,
                status,
                is_trial: None,
                trial_ends_at: None,
            },
            "subscription.canceled" | "subscription.paused" => CanonicalEvent {
                intent: EntitlementIntent::Deactivate,
                event_type: event_type.to_string(),
                subscription_id: data["id"].as_str().map(str::to_string),
                user_id: None,
                email: None,
                customer_id,
                status,
                is_trial: None,
                trial_ends_at: None,
            },
            // Resume/update only reactivates when Paddle reports the
            // subscription as active again; other statuses pass through
            // unhandled.
            "subscription.resumed" | "subscription.updated" => {
                if status.as_deref() == Some("active") {
                    CanonicalEvent {
                        intent: EntitlementIntent::Activate,
                        event_type: event_type.to_string(),
                        subscription_id: data["id"].as_str().map(str::to_string),
                        user_id,
                        email: None,
                        customer_id,
                        status,
                        is_trial: None,
                        trial_ends_at: None,
                    }
                } else {
                    CanonicalEvent::unknown(event_type)
                }
            }
            "transaction.completed" => CanonicalEvent {
                intent: EntitlementIntent::PaymentConfirmed,
                event_type: event_type.to_string(),
                subscription_id: data["subscription_id"].as_str().map(str::to_string),
                user_id,
                email: None,
                customer_id,
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
        let payload = json!({
            "items": [{"price_id": self.config.price_id, "quantity": 1}],
            "custom_data": {"supabase_user_id": user_id.to_string()},
            "customer": {"email": email},
        });

        let response = self
            .http
            .post(format!("{}/transactions", self.api_base))
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(BillingError::ProviderApi(format!(
                "paddle transaction failed ({status}): {detail}"
            )));
        }

        let body: Value = response.json().await?;
        let url = body["data"]["checkout"]["url"]
            .as_str()
            .ok_or_else(|| BillingError::ProviderApi("transaction missing checkout url".into()))?
            .to_string();

        Ok(CheckoutSession {
            url,
            session_id: body["data"]["id"].as_str().map(str::to_string),
        })
    }
}
