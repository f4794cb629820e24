use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::db::models::{
    ActivePlan, AiModelRow, AiProviderRow, AiRouteConfig, NewUsageRecord, UsageRecord,
};
use crate::error::AppError;
use crate::Result;

const ROUTE_CONFIG_ID: i32 = 1;

/// Outcome of the guarded ledger write.
#[derive(Debug)]
pub enum GuardedWrite {
    Recorded(UsageRecord),
    LimitReached { identity_count: i64, ip_count: i64 },
}

/// Admin update payload for the routing singleton.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RouteConfigUpdate {
    pub primary_model_id: Option<Uuid>,
    pub fallback1_model_id: Option<Uuid>,
    pub fallback2_model_id: Option<Uuid>,
    pub retry_attempts: i32,
    pub timeout_seconds: i32,
    pub enable_fallback: bool,
}

pub struct DbOperations {
    pool: Arc<PgPool>,
}

impl DbOperations {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    pub async fn new_with_options(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await?;

        Ok(Self { pool: Arc::new(pool) })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn begin_transaction(&self) -> Result<Transaction<'_, Postgres>> {
        Ok(self.pool.as_ref().begin().await?)
    }

    /// Count of today's records matching any facet of the caller's own
    /// identity: account, session cookie, or device fingerprint.
    pub async fn count_identity_usage(
        &self,
        since: DateTime<Utc>,
        user_id: Option<Uuid>,
        session_id: Option<&str>,
        device_fingerprint: Option<&str>,
    ) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM usage_records
            WHERE created_at >= $1
              AND (
                   ($2::uuid IS NOT NULL AND user_id = $2)
                OR ($3::text IS NOT NULL AND session_id = $3)
                OR ($4::text IS NOT NULL AND device_fingerprint = $4)
              )
            "#,
        )
        .bind(since)
        .bind(user_id)
        .bind(session_id)
        .bind(device_fingerprint)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(count)
    }

    /// Count of today's records from the caller's network address. This
    /// bucket survives cleared cookies and new browsers.
    pub async fn count_ip_usage(&self, since: DateTime<Utc>, ip_address: &str) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM usage_records WHERE created_at >= $1 AND ip_address = $2",
        )
        .bind(since)
        .bind(ip_address)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(count)
    }

    /// Atomic check-and-insert: serializes concurrent writers on the same
    /// network address with an advisory transaction lock, re-counts inside
    /// the lock, and only writes while still under the limit. Two requests
    /// racing on the last quota slot cannot both get a record.
    pub async fn insert_usage_guarded(
        &self,
        record: &NewUsageRecord,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<GuardedWrite> {
        let mut tx = self.begin_transaction().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(advisory_key(&record.ip_address))
            .execute(&mut *tx)
            .await?;

        let identity_count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM usage_records
            WHERE created_at >= $1
              AND (
                   ($2::uuid IS NOT NULL AND user_id = $2)
                OR ($3::text IS NOT NULL AND session_id = $3)
                OR ($4::text IS NOT NULL AND device_fingerprint = $4)
              )
            "#,
        )
        .bind(since)
        .bind(record.user_id)
        .bind(record.session_id.as_deref())
        .bind(record.device_fingerprint.as_deref())
        .fetch_one(&mut *tx)
        .await?;

        let ip_count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM usage_records WHERE created_at >= $1 AND ip_address = $2",
        )
        .bind(since)
        .bind(&record.ip_address)
        .fetch_one(&mut *tx)
        .await?;

        if identity_count.max(ip_count) >= limit {
            tx.rollback().await?;
            return Ok(GuardedWrite::LimitReached { identity_count, ip_count });
        }

        let written = sqlx::query_as::<_, UsageRecord>(
            r#"
            INSERT INTO usage_records
                (id, tool_id, user_id, session_id, ip_address, device_fingerprint,
                 user_agent, used_ai, ai_tokens, ai_cost, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&record.tool_id)
        .bind(record.user_id)
        .bind(record.session_id.as_deref())
        .bind(&record.ip_address)
        .bind(record.device_fingerprint.as_deref())
        .bind(record.user_agent.as_deref())
        .bind(record.used_ai)
        .bind(record.ai_tokens)
        .bind(record.ai_cost)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(GuardedWrite::Recorded(written))
    }

    /// Active paid subscription for the user, if any.
    pub async fn get_active_plan(&self, user_id: Uuid) -> Result<Option<ActivePlan>> {
        let plan = sqlx::query_as::<_, ActivePlan>(
            r#"
            SELECT p.name AS plan_name, p.daily_limit
            FROM subscriptions s
            JOIN plans p ON p.id = s.plan_id
            WHERE s.user_id = $1
              AND s.status = 'active'
              AND s.current_period_end > $2
            ORDER BY s.current_period_end DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(Utc::now())
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(plan)
    }

    /// Reads the routing singleton, inserting the default row on first use.
    pub async fn get_or_init_route_config(&self) -> Result<AiRouteConfig> {
        if let Some(existing) = sqlx::query_as::<_, AiRouteConfig>(
            "SELECT * FROM ai_config WHERE id = $1",
        )
        .bind(ROUTE_CONFIG_ID)
        .fetch_optional(self.pool.as_ref())
        .await?
        {
            return Ok(existing);
        }

        let created = sqlx::query_as::<_, AiRouteConfig>(
            r#"
            INSERT INTO ai_config (id, retry_attempts, timeout_seconds, enable_fallback, updated_at)
            VALUES ($1, 1, 30, TRUE, $2)
            ON CONFLICT (id) DO UPDATE SET id = ai_config.id
            RETURNING *
            "#,
        )
        .bind(ROUTE_CONFIG_ID)
        .bind(Utc::now())
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(created)
    }

    /// Replaces the routing singleton. Referenced models must exist and be
    /// active, otherwise the update is rejected.
    pub async fn update_route_config(&self, update: &RouteConfigUpdate) -> Result<AiRouteConfig> {
        for model_id in [
            update.primary_model_id,
            update.fallback1_model_id,
            update.fallback2_model_id,
        ]
        .into_iter()
        .flatten()
        {
            let active = sqlx::query_scalar::<_, bool>(
                "SELECT is_active FROM ai_models WHERE id = $1",
            )
            .bind(model_id)
            .fetch_optional(self.pool.as_ref())
            .await?;

            match active {
                Some(true) => {}
                Some(false) => {
                    return Err(AppError::ValidationError(format!(
                        "model {} is inactive",
                        model_id
                    )))
                }
                None => {
                    return Err(AppError::ValidationError(format!(
                        "unknown model {}",
                        model_id
                    )))
                }
            }
        }

        if update.retry_attempts < 1 || update.timeout_seconds < 1 {
            return Err(AppError::ValidationError(
                "retry_attempts and timeout_seconds must be positive".into(),
            ));
        }

        let updated = sqlx::query_as::<_, AiRouteConfig>(
            r#"
            INSERT INTO ai_config
                (id, primary_model_id, fallback1_model_id, fallback2_model_id,
                 retry_attempts, timeout_seconds, enable_fallback, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                primary_model_id = EXCLUDED.primary_model_id,
                fallback1_model_id = EXCLUDED.fallback1_model_id,
                fallback2_model_id = EXCLUDED.fallback2_model_id,
                retry_attempts = EXCLUDED.retry_attempts,
                timeout_seconds = EXCLUDED.timeout_seconds,
                enable_fallback = EXCLUDED.enable_fallback,
                updated_at = EXCLUDED.updated_at
            RETURNING *
            "#,
        )
        .bind(ROUTE_CONFIG_ID)
        .bind(update.primary_model_id)
        .bind(update.fallback1_model_id)
        .bind(update.fallback2_model_id)
        .bind(update.retry_attempts)
        .bind(update.timeout_seconds)
        .bind(update.enable_fallback)
        .bind(Utc::now())
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(updated)
    }

    pub async fn get_model(&self, model_id: Uuid) -> Result<Option<AiModelRow>> {
        let model = sqlx::query_as::<_, AiModelRow>("SELECT * FROM ai_models WHERE id = $1")
            .bind(model_id)
            .fetch_optional(self.pool.as_ref())
            .await?;

        Ok(model)
    }

    pub async fn get_provider(&self, provider_id: Uuid) -> Result<Option<AiProviderRow>> {
        let provider =
            sqlx::query_as::<_, AiProviderRow>("SELECT * FROM ai_providers WHERE id = $1")
                .bind(provider_id)
                .fetch_optional(self.pool.as_ref())
                .await?;

        Ok(provider)
    }

    pub async fn list_active_models(&self) -> Result<Vec<AiModelRow>> {
        let models = sqlx::query_as::<_, AiModelRow>(
            r#"
            SELECT m.* FROM ai_models m
            JOIN ai_providers p ON p.id = m.provider_id
            WHERE m.is_active AND p.is_active
            ORDER BY p.sort_order, m.display_name
            "#,
        )
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(models)
    }

    pub async fn list_providers(&self) -> Result<Vec<AiProviderRow>> {
        let providers = sqlx::query_as::<_, AiProviderRow>(
            "SELECT * FROM ai_providers ORDER BY sort_order, name",
        )
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(providers)
    }

    pub async fn insert_provider(&self, provider: &AiProviderRow) -> Result<AiProviderRow> {
        let created = sqlx::query_as::<_, AiProviderRow>(
            r#"
            INSERT INTO ai_providers
                (id, name, kind, api_key_ciphertext, api_key_nonce, base_url,
                 is_active, sort_order, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(provider.id)
        .bind(&provider.name)
        .bind(&provider.kind)
        .bind(&provider.api_key_ciphertext)
        .bind(&provider.api_key_nonce)
        .bind(provider.base_url.as_deref())
        .bind(provider.is_active)
        .bind(provider.sort_order)
        .bind(provider.created_at)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(created)
    }

    pub async fn insert_model(&self, model: &AiModelRow) -> Result<AiModelRow> {
        let created = sqlx::query_as::<_, AiModelRow>(
            r#"
            INSERT INTO ai_models
                (id, provider_id, model_id, display_name, is_active,
                 supports_vision, supports_tools, supports_streaming,
                 input_price_per_1k, output_price_per_1k, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(model.id)
        .bind(model.provider_id)
        .bind(&model.model_id)
        .bind(&model.display_name)
        .bind(model.is_active)
        .bind(model.supports_vision)
        .bind(model.supports_tools)
        .bind(model.supports_streaming)
        .bind(model.input_price_per_1k)
        .bind(model.output_price_per_1k)
        .bind(model.created_at)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(created)
    }
}

/// Derives a stable advisory-lock key from a correlation string.
fn advisory_key(ip_address: &str) -> i64 {
    let digest = Sha256::digest(ip_address.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advisory_key_stable() {
        assert_eq!(advisory_key("203.0.113.9"), advisory_key("203.0.113.9"));
        assert_ne!(advisory_key("203.0.113.9"), advisory_key("203.0.113.10"));
    }

    #[test]
    fn test_advisory_key_handles_unknown_sentinel() {
        // The resolver falls back to "unknown"; the lock key must still work.
        let key = advisory_key("unknown");
        assert_eq!(key, advisory_key("unknown"));
    }
}
