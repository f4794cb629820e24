use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One immutable ledger entry per successful tool invocation. The crate
/// never updates or deletes these rows.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UsageRecord {
    pub id: Uuid,
    pub tool_id: String,
    pub user_id: Option<Uuid>,
    pub session_id: Option<String>,
    pub ip_address: String,
    pub device_fingerprint: Option<String>,
    pub user_agent: Option<String>,
    pub used_ai: bool,
    pub ai_tokens: i32,
    pub ai_cost: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for the ledger.
#[derive(Debug, Clone)]
pub struct NewUsageRecord {
    pub tool_id: String,
    pub user_id: Option<Uuid>,
    pub session_id: Option<String>,
    pub ip_address: String,
    pub device_fingerprint: Option<String>,
    pub user_agent: Option<String>,
    pub used_ai: bool,
    pub ai_tokens: i32,
    pub ai_cost: Decimal,
}

/// AI vendor credential + endpoint row.
///
/// Deliberately not `Serialize`: the ciphertext and nonce must never end
/// up in a response body. Admin listings go through
/// `crate::ai::ProviderSummary`, which substitutes the mask sentinel.
#[derive(Debug, Clone, FromRow)]
pub struct AiProviderRow {
    pub id: Uuid,
    pub name: String,
    pub kind: String,
    pub api_key_ciphertext: String,
    pub api_key_nonce: String,
    pub base_url: Option<String>,
    pub is_active: bool,
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AiModelRow {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub model_id: String,
    pub display_name: String,
    pub is_active: bool,
    pub supports_vision: bool,
    pub supports_tools: bool,
    pub supports_streaming: bool,
    pub input_price_per_1k: Decimal,
    pub output_price_per_1k: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Singleton routing configuration (row id is always 1). Lazily created
/// with defaults on first read; updated only via the admin endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AiRouteConfig {
    pub id: i32,
    pub primary_model_id: Option<Uuid>,
    pub fallback1_model_id: Option<Uuid>,
    pub fallback2_model_id: Option<Uuid>,
    pub retry_attempts: i32,
    pub timeout_seconds: i32,
    pub enable_fallback: bool,
    pub updated_at: DateTime<Utc>,
}

/// Result of the active-subscription lookup: the plan's daily quota.
#[derive(Debug, Clone, FromRow)]
pub struct ActivePlan {
    pub plan_name: String,
    pub daily_limit: i64,
}
