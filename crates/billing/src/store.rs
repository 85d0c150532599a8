//! Profile store
//!
//! The reconciler's only collaborator: a handle to the `profiles` table,
//! injected at startup. All writes are idempotent upserts so duplicate and
//! concurrent webhook redeliveries cannot corrupt state; no row locks are
//! taken.

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::event::Provider;

/// A profile row, as the reconciler sees it.
#[derive(Debug, Clone, FromRow)]
pub struct Profile {
    pub id: Uuid,
    pub email: Option<String>,
    pub is_premium: bool,
    pub premium_since: Option<OffsetDateTime>,
    pub premium_ended: Option<OffsetDateTime>,
    pub subscription_status: Option<String>,
}

/// How to address the target row for an activation upsert.
#[derive(Debug, Clone)]
pub enum ProfileKey {
    /// Trusted application-issued user id (checkout metadata round trip).
    UserId(Uuid),
    /// Pending-profile path: purchase arrived before signup. The row is
    /// keyed by unique email so the signup flow can claim it later.
    Email(String),
}

/// The field set written on Activate and identity-bearing PaymentConfirmed
/// events.
#[derive(Debug, Clone)]
pub struct Activation {
    pub provider: Provider,
    pub subscription_id: Option<String>,
    pub customer_id: Option<String>,
    pub customer_email: Option<String>,
    pub subscription_status: Option<String>,
    pub is_trial: Option<bool>,
    pub trial_ends_at: Option<OffsetDateTime>,
    pub occurred_at: OffsetDateTime,
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Upsert a premium activation keyed by user id or by email.
    /// Returns the id of the affected row.
    async fn activate(&self, key: &ProfileKey, activation: &Activation) -> BillingResult<Uuid>;

    /// Find the profile holding the given provider subscription id.
    async fn find_by_subscription(
        &self,
        provider: Provider,
        subscription_id: &str,
    ) -> BillingResult<Option<Profile>>;

    /// Find a profile by account email.
    async fn find_by_email(&self, email: &str) -> BillingResult<Option<Profile>>;

    /// Find a profile by the email the provider reported at purchase time
    /// (may differ from the account email).
    async fn find_by_provider_email(
        &self,
        provider: Provider,
        email: &str,
    ) -> BillingResult<Option<Profile>>;

    /// End the entitlement window for a profile.
    async fn deactivate(
        &self,
        id: Uuid,
        ended_at: OffsetDateTime,
        status: Option<&str>,
    ) -> BillingResult<()>;

    /// Reassert premium after a confirmed recurring charge. No-op when the
    /// profile is already premium.
    async fn reassert_premium(&self, id: Uuid) -> BillingResult<()>;
}

/// Postgres-backed store over the shared connection pool.
#[derive(Clone)]
pub struct PgProfileStore {
    pool: PgPool,
}

impl PgProfileStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const PROFILE_COLUMNS: &str =
    "id, email, is_premium, premium_since, premium_ended, subscription_status";

#[async_trait]
impl ProfileStore for PgProfileStore {
    async fn activate(&self, key: &ProfileKey, activation: &Activation) -> BillingResult<Uuid> {
        // Column names come from the Provider enum, never from input.
        let p = activation.provider.column_prefix();

        let sql = match key {
            ProfileKey::UserId(_) => format!(
                r#"
                INSERT INTO profiles
                    (id, is_premium, {p}_subscription_id, {p}_customer_id,
                     {p}_customer_email, subscription_status, is_trial,
                     trial_ends_at, premium_since, premium_ended, updated_at)
                VALUES ($1, TRUE, $2, $3, $4, $5, $6, $7, $8, NULL, NOW())
                ON CONFLICT (id) DO UPDATE SET
                    is_premium = TRUE,
                    {p}_subscription_id = COALESCE(EXCLUDED.{p}_subscription_id, profiles.{p}_subscription_id),
                    {p}_customer_id = COALESCE(EXCLUDED.{p}_customer_id, profiles.{p}_customer_id),
                    {p}_customer_email = COALESCE(EXCLUDED.{p}_customer_email, profiles.{p}_customer_email),
                    subscription_status = COALESCE(EXCLUDED.subscription_status, profiles.subscription_status),
                    is_trial = COALESCE(EXCLUDED.is_trial, profiles.is_trial),
                    trial_ends_at = COALESCE(EXCLUDED.trial_ends_at, profiles.trial_ends_at),
                    premium_since = COALESCE(profiles.premium_since, EXCLUDED.premium_since),
                    premium_ended = NULL,
                    updated_at = NOW()
                RETURNING id
                "#
            ),
            ProfileKey::Email(_) => format!(
                r#"
                INSERT INTO profiles
                    (email, is_premium, {p}_subscription_id, {p}_customer_id,
                     {p}_customer_email, subscription_status, is_trial,
                     trial_ends_at, premium_since, premium_ended, updated_at)
                VALUES ($1, TRUE, $2, $3, $4, $5, $6, $7, $8, NULL, NOW())
                ON CONFLICT (email) DO UPDATE SET
                    is_premium = TRUE,
                    {p}_subscription_id = COALESCE(EXCLUDED.{p}_subscription_id, profiles.{p}_subscription_id),
                    {p}_customer_id = COALESCE(EXCLUDED.{p}_customer_id, profiles.{p}_customer_id),
                    {p}_customer_email = COALESCE(EXCLUDED.{p}_customer_email, profiles.{p}_customer_email),
                    subscription_status = COALESCE(EXCLUDED.subscription_status, profiles.subscription_status),
                    is_trial = COALESCE(EXCLUDED.is_trial, profiles.is_trial),
                    trial_ends_at = COALESCE(EXCLUDED.trial_ends_at, profiles.trial_ends_at),
                    premium_since = COALESCE(profiles.premium_since, EXCLUDED.premium_since),
                    premium_ended = NULL,
                    updated_at = NOW()
                RETURNING id
                "#
            ),
        };

        let mut query = sqlx::query_as::<_, (Uuid,)>(&sql);
        query = match key {
            ProfileKey::UserId(id) => query.bind(*id),
            ProfileKey::Email(email) => query.bind(email.clone()),
        };
        let (id,) = query
            .bind(activation.subscription_id.as_deref())
            .bind(activation.customer_id.as_deref())
            .bind(activation.customer_email.as_deref())
            .bind(activation.subscription_status.as_deref())
            .bind(activation.is_trial)
            .bind(activation.trial_ends_at)
            .bind(activation.occurred_at)
            .fetch_one(&self.pool)
            .await?;

        Ok(id)
    }

    async fn find_by_subscription(
        &self,
        provider: Provider,
        subscription_id: &str,
    ) -> BillingResult<Option<Profile>> {
        let p = provider.column_prefix();
        let sql = format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE {p}_subscription_id = $1"
        );
        let profile = sqlx::query_as::<_, Profile>(&sql)
            .bind(subscription_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(profile)
    }

    async fn find_by_email(&self, email: &str) -> BillingResult<Option<Profile>> {
        let sql = format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE email = $1");
        let profile = sqlx::query_as::<_, Profile>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(profile)
    }

    async fn find_by_provider_email(
        &self,
        provider: Provider,
        email: &str,
    ) -> BillingResult<Option<Profile>> {
        let p = provider.column_prefix();
        let sql = format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE {p}_customer_email = $1"
        );
        let profile = sqlx::query_as::<_, Profile>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(profile)
    }

    async fn deactivate(
        &self,
        id: Uuid,
        ended_at: OffsetDateTime,
        status: Option<&str>,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE profiles
            SET is_premium = FALSE,
                premium_ended = $2,
                subscription_status = COALESCE($3, subscription_status),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(ended_at)
        .bind(status)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reassert_premium(&self, id: Uuid) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE profiles
            SET is_premium = TRUE, premium_ended = NULL, updated_at = NOW()
            WHERE id = $1 AND is_premium = FALSE
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
