//! AI provider abstraction and dispatch: a uniform chat interface over
//! heterogeneous vendors, encrypted credentials, and an ordered failover
//! chain resolved from persisted configuration.

pub mod crypto;
pub mod provider;
pub mod service;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::AiProviderRow;
use crate::error::AppError;
use crate::Result;

/// Sentinel substituted for API keys in anything client-facing.
pub const MASKED_KEY: &str = "***hidden***";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Google,
    Custom,
}

impl ProviderKind {
    pub fn from_db(kind: &str) -> Result<Self> {
        match kind {
            "openai" => Ok(ProviderKind::OpenAi),
            "anthropic" => Ok(ProviderKind::Anthropic),
            "google" => Ok(ProviderKind::Google),
            "custom" => Ok(ProviderKind::Custom),
            other => Err(AppError::ConfigError(format!(
                "unknown provider kind '{}'",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Google => "google",
            ProviderKind::Custom => "custom",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }
}

#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self { max_tokens: 1024, temperature: None }
    }
}

/// Uniform result shape across vendors.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl ChatOutcome {
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub display_name: String,
}

/// Client-facing projection of a provider row. The key field always holds
/// the mask sentinel; the row type itself is not serializable.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderSummary {
    pub id: Uuid,
    pub name: String,
    pub kind: String,
    pub api_key: String,
    pub base_url: Option<String>,
    pub is_active: bool,
    pub sort_order: i32,
}

impl From<&AiProviderRow> for ProviderSummary {
    fn from(row: &AiProviderRow) -> Self {
        Self {
            id: row.id,
            name: row.name.clone(),
            kind: row.kind.clone(),
            api_key: MASKED_KEY.to_string(),
            base_url: row.base_url.clone(),
            is_active: row.is_active,
            sort_order: row.sort_order,
        }
    }
}

/// Per-model token pricing applied to a vendor-reported usage count.
pub fn token_cost(
    prompt_tokens: u32,
    completion_tokens: u32,
    input_price_per_1k: Decimal,
    output_price_per_1k: Decimal,
) -> Decimal {
    let thousand = Decimal::from(1000);
    Decimal::from(prompt_tokens) * input_price_per_1k / thousand
        + Decimal::from(completion_tokens) * output_price_per_1k / thousand
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_provider_kind_round_trip() {
        for kind in ["openai", "anthropic", "google", "custom"] {
            assert_eq!(ProviderKind::from_db(kind).unwrap().as_str(), kind);
        }
        assert!(ProviderKind::from_db("azure").is_err());
    }

    #[test]
    fn test_token_cost() {
        // 2000 prompt tokens at $0.01/1k plus 500 completion at $0.03/1k.
        let cost = token_cost(2000, 500, dec("0.01"), dec("0.03"));
        assert_eq!(cost, dec("0.035"));
    }

    #[test]
    fn test_token_cost_zero_usage() {
        let cost = token_cost(0, 0, dec("0.01"), dec("0.03"));
        assert_eq!(cost, Decimal::ZERO);
    }

    #[test]
    fn test_provider_summary_masks_key() {
        let row = AiProviderRow {
            id: Uuid::new_v4(),
            name: "primary-openai".into(),
            kind: "openai".into(),
            api_key_ciphertext: "c2VjcmV0".into(),
            api_key_nonce: "bm9uY2U=".into(),
            base_url: None,
            is_active: true,
            sort_order: 0,
            created_at: Utc::now(),
        };

        let summary = ProviderSummary::from(&row);
        assert_eq!(summary.api_key, MASKED_KEY);

        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains(MASKED_KEY));
        assert!(!json.contains("c2VjcmV0"));
    }
}
