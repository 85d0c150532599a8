//! Application state

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use sqlx::PgPool;

use aeroscout_billing::providers::{
    GumroadProvider, LemonSqueezyProvider, PaddleProvider, PayPalProvider, StripeProvider,
};
use aeroscout_billing::{EntitlementReconciler, PaymentProvider, PgProfileStore};

use crate::config::{Config, ProviderSettings};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub provider: Arc<dyn PaymentProvider>,
    pub reconciler: Arc<EntitlementReconciler>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> anyhow::Result<Self> {
        // Bounded timeout so a hung provider API (PayPal verification,
        // checkout creation) cannot pin webhook handlers.
        let http_client = Client::builder().timeout(Duration::from_secs(5)).build()?;

        let provider: Arc<dyn PaymentProvider> = match &config.provider {
            ProviderSettings::Stripe(c) => {
                Arc::new(StripeProvider::new(c.clone(), http_client.clone()))
            }
            ProviderSettings::PayPal(c) => {
                Arc::new(PayPalProvider::new(c.clone(), http_client.clone()))
            }
            ProviderSettings::Paddle(c) => {
                Arc::new(PaddleProvider::new(c.clone(), http_client.clone()))
            }
            ProviderSettings::Gumroad(c) => Arc::new(GumroadProvider::new(c.clone())),
            ProviderSettings::LemonSqueezy(c) => {
                Arc::new(LemonSqueezyProvider::new(c.clone(), http_client.clone()))
            }
        };
        tracing::info!(provider = %provider.name(), "Payment provider initialized");

        let store = Arc::new(PgProfileStore::new(pool.clone()));
        let reconciler = Arc::new(EntitlementReconciler::new(provider.clone(), store));

        Ok(Self {
            pool,
            config,
            provider,
            reconciler,
        })
    }
}
