//! Entitlement reconciler
//!
//! Invoked once per inbound webhook delivery from the active payment
//! provider. Verifies authenticity over the raw bytes, normalizes the
//! event, resolves the target profile, and applies the entitlement change
//! as an idempotent upsert.
//!
//! Delivery contract: signature and parse failures reject with an error
//! (HTTP 400, no mutation). Everything after a verified parse is
//! acknowledged — including unknown event types, unmatchable targets, and
//! even store write failures — because providers treat any non-2xx as
//! "redeliver", and redelivering an event that can never apply serves no
//! purpose.

use std::sync::Arc;

use http::HeaderMap;
use time::OffsetDateTime;

use crate::error::BillingResult;
use crate::event::{CanonicalEvent, EntitlementIntent};
use crate::provider::PaymentProvider;
use crate::store::{Activation, ProfileKey, ProfileStore};

/// What happened to a verified, parseable delivery. All outcomes are
/// acknowledged with 200.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// A profile was mutated.
    Applied(EntitlementIntent),
    /// Purchase preceded signup; a pending profile row keyed by email was
    /// created for the signup flow to claim later.
    PendingLinked,
    /// No profile matched the event's identifiers. Not a failure: e.g. a
    /// cancellation for a subscription this system never saw.
    NoTarget,
    /// Unrecognized event type, logged and skipped.
    Ignored,
    /// The entitlement change was classified but the write failed. Logged
    /// for manual reconciliation; still acknowledged to avoid provider
    /// retry storms.
    StoreFailed,
}

pub struct EntitlementReconciler {
    provider: Arc<dyn PaymentProvider>,
    store: Arc<dyn ProfileStore>,
}

impl EntitlementReconciler {
    pub fn new(provider: Arc<dyn PaymentProvider>, store: Arc<dyn ProfileStore>) -> Self {
        Self { provider, store }
    }

    /// Process one webhook delivery: verify, parse, resolve, apply.
    ///
    /// `body` must be the exact bytes received on the wire; signatures are
    /// computed over them, not over a re-serialized parse.
    pub async fn handle(&self, body: &[u8], headers: &HeaderMap) -> BillingResult<WebhookOutcome> {
        // Never parse before the signature checks out.
        self.provider.verify(body, headers).await?;
        let event = self.provider.parse(body)?;

        tracing::info!(
            provider = %self.provider.name(),
            event_type = %event.event_type,
            intent = %event.intent,
            subscription_id = ?event.subscription_id,
            user_id = ?event.user_id,
            "Processing webhook event"
        );

        let outcome = match event.intent {
            EntitlementIntent::Activate => self.apply_activation(&event).await,
            EntitlementIntent::PaymentConfirmed => self.apply_payment_confirmed(&event).await,
            EntitlementIntent::Deactivate => self.apply_deactivation(&event).await,
            EntitlementIntent::Unknown => {
                tracing::info!(
                    provider = %self.provider.name(),
                    event_type = %event.event_type,
                    "Unhandled event type - acknowledged without processing"
                );
                Ok(WebhookOutcome::Ignored)
            }
        };

        // Store failures are logged with enough context to reconcile
        // manually, then acknowledged: a 4xx/5xx here would only trigger
        // redelivery of a write that keeps failing.
        match outcome {
            Ok(o) => Ok(o),
            Err(e) => {
                tracing::error!(
                    provider = %self.provider.name(),
                    event_type = %event.event_type,
                    subscription_id = ?event.subscription_id,
                    email = ?event.email,
                    error = %e,
                    "Failed to apply entitlement change - manual reconciliation needed"
                );
                Ok(WebhookOutcome::StoreFailed)
            }
        }
    }

    fn activation_fields(&self, event: &CanonicalEvent) -> Activation {
        Activation {
            provider: self.provider.name(),
            subscription_id: event.subscription_id.clone(),
            customer_id: event.customer_id.clone(),
            customer_email: event.email.clone(),
            subscription_status: event.status.clone(),
            is_trial: event.is_trial,
            trial_ends_at: event.trial_ends_at,
            occurred_at: OffsetDateTime::now_utc(),
        }
    }

    async fn apply_activation(&self, event: &CanonicalEvent) -> BillingResult<WebhookOutcome> {
        let activation = self.activation_fields(event);

        // Trusted identifier wins: it was issued by this system at
        // checkout time and echoed back verbatim.
        if let Some(user_id) = event.user_id {
            let id = self
                .store
                .activate(&ProfileKey::UserId(user_id), &activation)
                .await?;
            tracing::info!(
                user_id = %id,
                subscription_id = ?event.subscription_id,
                "User upgraded to premium"
            );
            return Ok(WebhookOutcome::Applied(EntitlementIntent::Activate));
        }

        // No trusted id (e.g. Gumroad): resolve by email, falling back to
        // a pending row the signup flow can claim retroactively.
        if let Some(email) = &event.email {
            if let Some(profile) = self.store.find_by_email(email).await? {
                self.store
                    .activate(&ProfileKey::UserId(profile.id), &activation)
                    .await?;
                tracing::info!(user_id = %profile.id, email = %email, "User upgraded to premium");
                return Ok(WebhookOutcome::Applied(EntitlementIntent::Activate));
            }

            let id = self
                .store
                .activate(&ProfileKey::Email(email.clone()), &activation)
                .await?;
            tracing::info!(
                pending_id = %id,
                email = %email,
                "No account for purchase email - stored pending premium profile"
            );
            return Ok(WebhookOutcome::PendingLinked);
        }

        // Resume/reactivation events may carry only the subscription id
        // (e.g. a Paddle `subscription.resumed` without custom data).
        if let Some(subscription_id) = &event.subscription_id {
            if let Some(profile) = self
                .store
                .find_by_subscription(self.provider.name(), subscription_id)
                .await?
            {
                self.store
                    .activate(&ProfileKey::UserId(profile.id), &activation)
                    .await?;
                tracing::info!(
                    user_id = %profile.id,
                    subscription_id = %subscription_id,
                    "User subscription reactivated"
                );
                return Ok(WebhookOutcome::Applied(EntitlementIntent::Activate));
            }
        }

        tracing::warn!(
            event_type = %event.event_type,
            subscription_id = ?event.subscription_id,
            "Activation event matched no profile and carried no email"
        );
        Ok(WebhookOutcome::NoTarget)
    }

    async fn apply_payment_confirmed(
        &self,
        event: &CanonicalEvent,
    ) -> BillingResult<WebhookOutcome> {
        // Identity-bearing payment confirmations (Paddle
        // transaction.completed and friends) reassert the full activation
        // upsert; the write is idempotent so redelivery is a no-op.
        if let Some(user_id) = event.user_id {
            let activation = self.activation_fields(event);
            self.store
                .activate(&ProfileKey::UserId(user_id), &activation)
                .await?;
            tracing::info!(user_id = %user_id, "Payment confirmed, premium asserted");
            return Ok(WebhookOutcome::Applied(EntitlementIntent::PaymentConfirmed));
        }

        if let Some(subscription_id) = &event.subscription_id {
            if let Some(profile) = self
                .store
                .find_by_subscription(self.provider.name(), subscription_id)
                .await?
            {
                self.store.reassert_premium(profile.id).await?;
                tracing::info!(
                    user_id = %profile.id,
                    subscription_id = %subscription_id,
                    "Payment confirmed for known subscription"
                );
                return Ok(WebhookOutcome::Applied(EntitlementIntent::PaymentConfirmed));
            }
        }

        tracing::info!(
            event_type = %event.event_type,
            subscription_id = ?event.subscription_id,
            email = ?event.email,
            "Payment confirmation matched no profile - acknowledged"
        );
        Ok(WebhookOutcome::NoTarget)
    }

    async fn apply_deactivation(&self, event: &CanonicalEvent) -> BillingResult<WebhookOutcome> {
        let profile = match &event.subscription_id {
            Some(subscription_id) => {
                self.store
                    .find_by_subscription(self.provider.name(), subscription_id)
                    .await?
            }
            None => match &event.email {
                // Gumroad cancellations may arrive without a subscription
                // id; the purchase email is the only remaining join key.
                Some(email) => {
                    self.store
                        .find_by_provider_email(self.provider.name(), email)
                        .await?
                }
                None => None,
            },
        };

        match profile {
            Some(profile) => {
                self.store
                    .deactivate(
                        profile.id,
                        OffsetDateTime::now_utc(),
                        event.status.as_deref(),
                    )
                    .await?;
                tracing::info!(
                    user_id = %profile.id,
                    event_type = %event.event_type,
                    subscription_id = ?event.subscription_id,
                    "User subscription deactivated"
                );
                Ok(WebhookOutcome::Applied(EntitlementIntent::Deactivate))
            }
            None => {
                tracing::info!(
                    event_type = %event.event_type,
                    subscription_id = ?event.subscription_id,
                    email = ?event.email,
                    "Deactivation matched no profile - acknowledged"
                );
                Ok(WebhookOutcome::NoTarget)
            }
        }
    }
}
