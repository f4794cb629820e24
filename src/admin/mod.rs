//! Admin back-office endpoints for the AI routing configuration. The
//! wider admin application lives elsewhere; these are the surfaces the
//! dispatch layer owns.

use actix_web::{web, HttpResponse};
use tracing::info;

use crate::ai::ProviderSummary;
use crate::db::RouteConfigUpdate;
use crate::error::AppError;
use crate::AppState;

/// `GET /admin/providers` — provider rows with the key field masked.
pub async fn list_providers(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let providers = state.db.list_providers().await?;
    let summaries: Vec<ProviderSummary> = providers.iter().map(ProviderSummary::from).collect();
    Ok(HttpResponse::Ok().json(summaries))
}

/// `GET /admin/providers/{provider_id}/models` — what the vendor itself
/// reports as available, for populating the model catalog.
pub async fn list_vendor_models(
    provider_id: web::Path<uuid::Uuid>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let models = state.ai.list_vendor_models(provider_id.into_inner()).await?;
    Ok(HttpResponse::Ok().json(models))
}

/// `GET /admin/models` — active models for the config dropdowns.
pub async fn list_models(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let models = state.db.list_active_models().await?;
    Ok(HttpResponse::Ok().json(models))
}

/// `GET /admin/ai-config` — the routing singleton, created with defaults
/// on first read.
pub async fn get_ai_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.db.get_or_init_route_config().await?;
    Ok(HttpResponse::Ok().json(config))
}

/// `PUT /admin/ai-config` — replaces the routing singleton. Referenced
/// models must exist and be active.
pub async fn update_ai_config(
    body: web::Json<RouteConfigUpdate>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let updated = state.db.update_route_config(&body.into_inner()).await?;
    info!(
        primary = ?updated.primary_model_id,
        enable_fallback = updated.enable_fallback,
        "AI routing configuration updated"
    );
    Ok(HttpResponse::Ok().json(updated))
}
