use actix_web::{web, HttpRequest, HttpResponse};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::info;

use crate::error::AppError;
use crate::usage::RecordedUsage;
use crate::AppState;

/// `POST /usage/check` — returns the caller's quota decision without
/// consuming anything. The only side effect is the guest cookie.
pub async fn check_usage(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let identity = state.identity.resolve(&req);
    let decision = state.usage.check(&identity).await?;

    let mut response = HttpResponse::Ok();
    if identity.minted_session {
        response.cookie(state.identity.session_cookie(&identity.session_id));
    }
    Ok(response.json(decision))
}

#[derive(Debug, Deserialize)]
pub struct RecordUsageRequest {
    pub tool_id: String,
    pub used_ai: Option<bool>,
    pub ai_tokens: Option<i32>,
    pub ai_cost: Option<Decimal>,
}

/// `POST /usage/record` — writes one ledger entry. The limit is
/// re-validated server-side inside the write regardless of what the
/// client believes its remaining quota is.
pub async fn record_usage(
    req: HttpRequest,
    body: web::Json<RecordUsageRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let payload = body.into_inner();
    if payload.tool_id.trim().is_empty() {
        return Err(AppError::ValidationError("tool_id is required".into()));
    }
    if payload.ai_tokens.is_some_and(|t| t < 0) {
        return Err(AppError::ValidationError("ai_tokens must be non-negative".into()));
    }

    let identity = state.identity.resolve(&req);
    let usage = RecordedUsage {
        used_ai: payload.used_ai.unwrap_or(false),
        ai_tokens: payload.ai_tokens.unwrap_or(0),
        ai_cost: payload.ai_cost.unwrap_or(Decimal::ZERO),
    };

    state.usage.record(&identity, &payload.tool_id, usage).await?;
    info!(tool_id = %payload.tool_id, "Usage recorded via API");

    let mut response = HttpResponse::Ok();
    if identity.minted_session {
        response.cookie(state.identity.session_cookie(&identity.session_id));
    }
    Ok(response.json(serde_json::json!({ "success": true })))
}
