#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Billing core for AeroScout: webhook verification, event
//! normalization, and idempotent entitlement writes against the profiles
//! table. The HTTP layer lives in the api crate; everything here is
//! transport-agnostic apart from taking raw bytes and headers.

pub mod error;
pub mod event;
pub mod provider;
pub mod providers;
pub mod reconciler;
pub mod store;


pub use error::{BillingError, BillingResult};
pub use event::{CanonicalEvent, CheckoutSession, EntitlementIntent, Provider};
pub use provider::PaymentProvider;
pub use reconciler::{EntitlementReconciler, WebhookOutcome};
pub use store::{Activation, PgProfileStore, Profile, ProfileKey, ProfileStore};
