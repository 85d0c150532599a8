//! PayPal integration
//!
//! Unlike the HMAC providers, PayPal webhooks are verified by calling back
//! into PayPal's `verify-webhook-signature` API with the transmission
//! headers and the delivered event. Every API call needs an OAuth
//! client-credentials token, cached until shortly before expiry.
//!
//! Verification leniency: if the verify API itself is unreachable the
//! delivery is accepted with a warning rather than bounced, because a
//! PayPal outage would otherwise turn into a redelivery storm against us.
//! A definitive non-SUCCESS verdict still rejects.

use async_trait::async_trait;
use http::HeaderMap;
use serde_json::{json, Value};
use time::{Duration, OffsetDateTime};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::event::{CanonicalEvent, CheckoutSession, EntitlementIntent, Provider};
use crate::provider::{require_header, PaymentProvider};
use crate::providers::parse_user_id;

const SANDBOX_BASE: &str = "https://api-m.sandbox.paypal.com";
const LIVE_BASE: &str = "https://api-m.paypal.com";

/// Headers PayPal attaches to every webhook delivery; all five are
/// required inputs to the verify API.
const TRANSMISSION_HEADERS: [&str; 5] = [
    "paypal-transmission-id",
    "paypal-transmission-time",
    "paypal-transmission-sig",
    "paypal-cert-url",
    "paypal-auth-algo",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayPalMode {
    Sandbox,
    Live,
}

impl PayPalMode {
    pub fn from_str_config(value: &str) -> Self {
        if value.eq_ignore_ascii_case("live") {
            Self::Live
        } else {
            Self::Sandbox
        }
    }
}

#[derive(Debug, Clone)]
pub struct PayPalConfig {
    pub client_id: String,
    pub client_secret: String,
    pub mode: PayPalMode,
    pub webhook_id: String,
    pub plan_id: String,
    pub return_url: String,
    pub cancel_url: String,
}

struct CachedToken {
    access_token: String,
    expires_at: OffsetDateTime,
}

pub struct PayPalProvider {
    config: PayPalConfig,
    http: reqwest::Client,
    api_base: String,
    token: RwLock<Option<CachedToken>>,
}

impl PayPalProvider {
    pub fn new(config: PayPalConfig, http: reqwest::Client) -> Self {
        let api_base = match config.mode {
            PayPalMode::Sandbox => SANDBOX_BASE,
            PayPalMode::Live => LIVE_BASE,
        }
        .to_string();
        Self {
            config,
            http,
            api_base,
            token: RwLock::new(None),
        }
    }

    #[cfg(test)]
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.to_string();
        self
    }

    /// Returns a valid access token, refreshing via the client-credentials
    /// grant when the cached one is absent or within a minute of expiry.
    async fn access_token(&self) -> BillingResult<String> {
        {
            let cached = self.token.read().await;
            if let Some(token) = cached.as_ref() {
                if token.expires_at > OffsetDateTime::now_utc() + Duration::seconds(60) {
                    return Ok(token.access_token.clone());
                }
            }
        }

        let response = self
            .http
            .post(format!("{}/v1/oauth2/token", self.api_base))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(BillingError::ProviderApi(format!(
                "paypal token request failed ({status})"
            )));
        }

        let body: Value = response.json().await?;
        let access_token = body["access_token"]
            .as_str()
            .ok_or_else(|| BillingError::ProviderApi("token response missing access_token".into()))?
            .to_string();
        let expires_in = body["expires_in"].as_i64().unwrap_or(300);

        let mut cached = self.token.write().await;
        *cached = Some(CachedToken {
            access_token: access_token.clone(),
            expires_at: OffsetDateTime::now_utc() + Duration::seconds(expires_in),
        });

        Ok(access_token)
    }
}

#[async_trait]
impl PaymentProvider for PayPalProvider {
    fn name(&self) -> Provider {
        Provider::PayPal
    }

    async fn verify(&self, body: &[u8], headers: &HeaderMap) -> BillingResult<()> {
        let mut transmission = serde_json::Map::new();
        for (name, key) in TRANSMISSION_HEADERS.iter().zip([
            "transmission_id",
            "transmission_time",
            "transmission_sig",
            "cert_url",
            "auth_algo",
        ]) {
            let value = require_header(headers, name)?;
            transmission.insert(key.to_string(), Value::String(value.to_string()));
        }

        let webhook_event: Value = serde_json::from_slice(body)
            .map_err(|e| BillingError::MalformedPayload(e.to_string()))?;

        let mut payload = Value::Object(transmission);
        payload["webhook_id"] = Value::String(self.config.webhook_id.clone());
        payload["webhook_event"] = webhook_event;

        let token = match self.access_token().await {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(error = %e, "PayPal token fetch failed - accepting delivery unverified");
                return Ok(());
            }
        };

        let response = match self
            .http
            .post(format!(
                "{}/v1/notifications/verify-webhook-signature",
                self.api_base
            ))
            .bearer_auth(&token)
            .json(&payload)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "PayPal verify API unreachable - accepting delivery unverified");
                return Ok(());
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            tracing::warn!(%status, "PayPal verify API errored - accepting delivery unverified");
            return Ok(());
        }

        let verdict: Value = match response.json().await {
            Ok(verdict) => verdict,
            Err(e) => {
                tracing::warn!(error = %e, "PayPal verify API returned unreadable verdict - accepting delivery unverified");
                return Ok(());
            }
        };
        if verdict["verification_status"].as_str() == Some("SUCCESS") {
            Ok(())
        } else {
            tracing::warn!(
                verification_status = ?verdict["verification_status"].as_str(),
                "PayPal rejected webhook signature"
            );
            Err(BillingError::SignatureInvalid)
        }
    }

    fn parse(&self, body: &[u8]) -> BillingResult<CanonicalEvent> {
        let event: Value = serde_json::from_slice(body)
            .map_err(|e| BillingError::MalformedPayload(e.to_string()))?;
        let event_type = event
            .get("event_type")
            .and_then(Value::as_str)
            .ok_or_else(|| BillingError::MalformedPayload("missing event_type".into()))?;
        let resource = &event["resource"];

        let canonical = match event_type {
            "BILLING.SUBSCRIPTION.ACTIVATED" => CanonicalEvent {
                intent: EntitlementIntent::Activate,
                event_type: event_type.to_string(),
                subscription_id: resource["id"].as_str().map(str::to_string),
                // custom_id is set at subscription creation and echoed back.
                user_id: parse_user_id(resource["custom_id"].as_str()),
                email: resource["subscriber"]["email_address"]
                    .as_str()
                    .map(str::to_string),
                customer_id: resource["subscriber"]["payer_id"]
                    .as_str()
                    .map(str::to_string),
                status: resource["status"].as_str().map(str::to_string),
                is_trial: None,
                trial_ends_at: None,
            },
            "BILLING.SUBSCRIPTION.CANCELLED"
            | "BILLING.SUBSCRIPTION.SUSPENDED"
            | "BILLING.SUBSCRIPTION.EXPIRED" => CanonicalEvent {
                intent: EntitlementIntent::Deactivate,
                event_type: event_type.to_string(),
                subscription_id: resource["id"].as_str().map(str::to_string),
                user_id: None,
                email: resource["subscriber"]["email_address"]
                    .as_str()
                    .map(str::to_string),
                customer_id: None,
                status: resource["status"].as_str().map(str::to_string),
                is_trial: None,
                trial_ends_at: None,
            },
            "PAYMENT.SALE.COMPLETED" => CanonicalEvent {
                intent: EntitlementIntent::PaymentConfirmed,
                event_type: event_type.to_string(),
                // For subscription charges the sale links back to the
                // subscription via billing_agreement_id.
                subscription_id: resource["billing_agreement_id"]
                    .as_str()
                    .map(str::to_string),
                user_id: parse_user_id(resource["custom"].as_str()),
                email: None,
                customer_id: None,
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
        let token = self.access_token().await?;

        let payload = json!({
            "plan_id": self.config.plan_id,
            "custom_id": user_id.to_string(),
            "subscriber": {"email_address": email},
            "application_context": {
                "brand_name": "AeroScout",
                "user_action": "SUBSCRIBE_NOW",
                "return_url": self.config.return_url,
                "cancel_url": self.config.cancel_url,
            }
        });

        let response = self
            .http
            .post(format!("{}/v1/billing/subscriptions", self.api_base))
            .bearer_auth(&token)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(BillingError::ProviderApi(format!(
                "paypal subscription create failed ({status}): {detail}"
            )));
        }

        let body: Value = response.json().await?;
        let approve_url = body["links"]
            .as_array()
            .and_then(|links| {
                links
                    .iter()
                    .find(|link| link["rel"].as_str() == Some("approve"))
            })
            .and_then(|link| link["href"].as_str())
            .ok_or_else(|| BillingError::ProviderApi("subscription missing approve link".into()))?
            .to_string();

        Ok(CheckoutSession {
            url: approve_url,
            session_id: body["id"].as_str().map(str::to_string),
        })
    }
}
