//! Environment configuration
//!
//! Fail-closed: every credential the configured provider needs is
//! mandatory. A deployment with a missing webhook secret must refuse to
//! start rather than accept unverified deliveries.

use anyhow::Context;

use aeroscout_billing::providers::{
    GumroadConfig, LemonSqueezyConfig, PaddleConfig, PayPalConfig, PayPalMode, StripeConfig,
};
use aeroscout_billing::Provider;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub allowed_origins: Vec<String>,
    pub provider: ProviderSettings,
}

/// Credentials for the single provider this deployment is wired to.
#[derive(Debug, Clone)]
pub enum ProviderSettings {
    Stripe(StripeConfig),
    PayPal(PayPalConfig),
    Paddle(PaddleConfig),
    Gumroad(GumroadConfig),
    LemonSqueezy(LemonSqueezyConfig),
}

impl ProviderSettings {
    pub fn provider(&self) -> Provider {
        match self {
            ProviderSettings::Stripe(_) => Provider::Stripe,
            ProviderSettings::PayPal(_) => Provider::PayPal,
            ProviderSettings::Paddle(_) => Provider::Paddle,
            ProviderSettings::Gumroad(_) => Provider::Gumroad,
            ProviderSettings::LemonSqueezy(_) => Provider::LemonSqueezy,
        }
    }
}

fn require(name: &'static str) -> anyhow::Result<String> {
    std::env::var(name).with_context(|| format!("{name} must be set"))
}

fn optional(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = require("DATABASE_URL")?;
        let bind_address = optional("BIND_ADDRESS", "0.0.0.0:8080");
        let allowed_origins = optional(
            "ALLOWED_ORIGINS",
            "http://localhost:3000,http://127.0.0.1:3000",
        )
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

        let provider_name = require("PAYMENT_PROVIDER")?;
        let provider = Provider::from_config(&provider_name)
            .with_context(|| format!("unrecognized PAYMENT_PROVIDER: {provider_name}"))?;

        let provider = match provider {
            Provider::Stripe => ProviderSettings::Stripe(StripeConfig {
                secret_key: require("STRIPE_SECRET_KEY")?,
                webhook_secret: require("STRIPE_WEBHOOK_SECRET")?,
                price_id: require("STRIPE_PRICE_ID")?,
                success_url: require("CHECKOUT_SUCCESS_URL")?,
                cancel_url: require("CHECKOUT_CANCEL_URL")?,
            }),
            Provider::PayPal => ProviderSettings::PayPal(PayPalConfig {
                client_id: require("PAYPAL_CLIENT_ID")?,
                client_secret: require("PAYPAL_CLIENT_SECRET")?,
                mode: PayPalMode::from_str_config(&optional("PAYPAL_MODE", "sandbox")),
                webhook_id: require("PAYPAL_WEBHOOK_ID")?,
                plan_id: require("PAYPAL_PLAN_ID")?,
                return_url: require("CHECKOUT_SUCCESS_URL")?,
                cancel_url: require("CHECKOUT_CANCEL_URL")?,
            }),
            Provider::Paddle => ProviderSettings::Paddle(PaddleConfig {
                api_key: require("PADDLE_API_KEY")?,
                webhook_secret: require("PADDLE_WEBHOOK_SECRET")?,
                price_id: require("PADDLE_PRICE_ID")?,
            }),
            Provider::Gumroad => ProviderSettings::Gumroad(GumroadConfig {
                seller_id: require("GUMROAD_SELLER_ID")?,
                product_url: require("GUMROAD_PRODUCT_URL")?,
            }),
            Provider::LemonSqueezy => ProviderSettings::LemonSqueezy(LemonSqueezyConfig {
                api_key: require("LEMONSQUEEZY_API_KEY")?,
                webhook_secret: require("LEMONSQUEEZY_WEBHOOK_SECRET")?,
                store_id: require("LEMONSQUEEZY_STORE_ID")?,
                variant_id: require("LEMONSQUEEZY_VARIANT_ID")?,
            }),
        };

        Ok(Self {
            database_url,
            bind_address,
            allowed_origins,
            provider,
        })
    }
}
