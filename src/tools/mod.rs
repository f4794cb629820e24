//! Tool handler factory: composes identity resolution, the usage policy
//! engine, input validation, content screening, and AI dispatch into one
//! request handler per registered tool. Ordering is fixed:
//! check before call, record only after success.

pub mod catalog;

use std::collections::HashMap;
use std::sync::Arc;

use actix_web::{web, HttpRequest, HttpResponse};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{error, info};

use crate::ai::service::AiDispatcher;
use crate::error::AppError;
use crate::usage::RecordedUsage;
use crate::AppState;

/// Patterns that hard-reject input before it reaches any processor.
/// Matching is case-insensitive substring search over every string in
/// the payload.
const BLOCKED_PATTERNS: &[&str] = &[
    "<script",
    "javascript:",
    "eval(",
    "new function(",
    "<iframe",
    "onerror=",
    "onload=",
];

/// What a tool run produced, plus the accounting metadata the ledger
/// entry needs.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub content: Value,
    pub model: Option<String>,
    pub used_ai: bool,
    pub ai_tokens: i32,
    pub ai_cost: Decimal,
}

impl ToolOutput {
    pub fn plain(content: Value) -> Self {
        Self {
            content,
            model: None,
            used_ai: false,
            ai_tokens: 0,
            ai_cost: Decimal::ZERO,
        }
    }
}

#[async_trait]
pub trait ToolProcessor: Send + Sync {
    async fn process(&self, input: &Value, ai: &AiDispatcher) -> crate::Result<ToolOutput>;
}

type Validator = fn(&Value) -> std::result::Result<(), String>;

/// Per-tool behavior knobs consumed by the factory handler.
pub struct ToolSpec {
    pub id: String,
    pub require_auth: bool,
    pub skip_usage_check: bool,
    pub skip_moderation: bool,
    pub validate: Validator,
    pub processor: Arc<dyn ToolProcessor>,
}

pub struct ToolRegistry {
    tools: HashMap<String, ToolSpec>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    /// The shipped tool catalog.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for spec in catalog::builtin_tools() {
            registry.register(spec);
        }
        registry
    }

    pub fn register(&mut self, spec: ToolSpec) {
        self.tools.insert(spec.id.clone(), spec);
    }

    pub fn get(&self, id: &str) -> Option<&ToolSpec> {
        self.tools.get(id)
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.tools.keys().map(|k| k.as_str()).collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// `POST /tools/{tool_id}` — the factory-generated handler.
pub async fn run_tool(
    req: HttpRequest,
    tool_id: web::Path<String>,
    body: web::Json<Value>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let tool = state
        .tools
        .get(&tool_id)
        .ok_or_else(|| AppError::NotFound(format!("unknown tool '{}'", tool_id)))?;
    let input = body.into_inner();

    let identity = state.identity.resolve(&req);

    if tool.require_auth && !identity.is_authenticated() {
        return Err(AppError::Unauthorized("This tool requires an account".into()));
    }

    // Quota gate before any other work; denial carries the full decision.
    if !tool.skip_usage_check {
        let decision = state.usage.check(&identity).await?;
        if !decision.allowed {
            return Err(AppError::QuotaExceeded(Box::new(decision)));
        }
    }

    // Invalid input neither runs the processor nor consumes quota.
    (tool.validate)(&input).map_err(AppError::ValidationError)?;

    if !tool.skip_moderation {
        screen_content(&input)?;
    }

    let output = match tool.processor.process(&input, &state.ai).await {
        Ok(output) => output,
        Err(e @ AppError::ProviderError(_)) => return Err(e),
        Err(e) => {
            error!(tool_id = %tool.id, "Tool processor failed: {}", e);
            return Err(AppError::InternalError("tool processing failed".into()));
        }
    };

    // Ledger write happens only after the processor succeeded; a failed
    // AI call never burns quota.
    if !tool.skip_usage_check {
        state
            .usage
            .record(
                &identity,
                &tool.id,
                RecordedUsage {
                    used_ai: output.used_ai,
                    ai_tokens: output.ai_tokens,
                    ai_cost: output.ai_cost,
                },
            )
            .await?;
    }

    info!(tool_id = %tool.id, used_ai = output.used_ai, "Tool invocation served");

    let mut response = HttpResponse::Ok();
    if identity.minted_session {
        response.cookie(state.identity.session_cookie(&identity.session_id));
    }
    Ok(response.json(serde_json::json!({
        "content": output.content,
        "metadata": {
            "model": output.model,
            "ai_tokens": output.ai_tokens,
            "ai_cost": output.ai_cost,
        }
    })))
}

/// Rejects payloads containing any blacklisted pattern. A match is a hard
/// 400, never a soft warning.
pub fn screen_content(input: &Value) -> Result<(), AppError> {
    let mut stack = vec![input];
    while let Some(value) = stack.pop() {
        match value {
            Value::String(s) => {
                let lowered = s.to_lowercase();
                for pattern in BLOCKED_PATTERNS {
                    if lowered.contains(pattern) {
                        return Err(AppError::ContentRejected(format!(
                            "input contains a blocked pattern: {}",
                            pattern
                        )));
                    }
                }
            }
            Value::Array(items) => stack.extend(items),
            Value::Object(map) => stack.extend(map.values()),
            _ => {}
        }
    }
    Ok(())
}
