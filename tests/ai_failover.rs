//! Failover dispatch resolved from persisted configuration: primary
//! first, fallbacks in order, nothing in parallel.

mod common;

use std::sync::Arc;

use common::*;
use serde_json::json;
use toolforge_server::ai::{ChatMessage, ChatOptions};
use toolforge_server::db::RouteConfigUpdate;
use toolforge_server::error::ProviderError;
use toolforge_server::AppError;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn ok_response(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{"message": {"role": "assistant", "content": text}}],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5}
    }))
}

fn failing_response() -> ResponseTemplate {
    ResponseTemplate::new(500).set_body_string("primary exploded")
}

#[tokio::test]
async fn test_unconfigured_primary_is_fatal() {
    let (pool, db_name) = setup_test_db().await;
    let state = test_state(Arc::new(pool));

    let err = state.ai.default_chain().await.unwrap_err();
    assert!(matches!(
        err,
        AppError::ProviderError(ProviderError::NoModelConfigured)
    ));

    state.db.pool().close().await;
    cleanup_test_db(&db_name).await;
}

#[tokio::test]
async fn test_primary_failure_served_by_fallback() {
    let (pool, db_name) = setup_test_db().await;
    let state = test_state(Arc::new(pool));

    let primary_vendor = MockServer::start().await;
    let fallback_vendor = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(failing_response())
        .mount(&primary_vendor)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ok_response("from fallback"))
        .mount(&fallback_vendor)
        .await;

    let primary = seed_model(&state.db, &primary_vendor.uri(), "primary-model", true).await;
    let fallback = seed_model(&state.db, &fallback_vendor.uri(), "fallback-model", true).await;
    state
        .db
        .update_route_config(&RouteConfigUpdate {
            primary_model_id: Some(primary),
            fallback1_model_id: Some(fallback),
            fallback2_model_id: None,
            retry_attempts: 1,
            timeout_seconds: 5,
            enable_fallback: true,
        })
        .await
        .unwrap();

    let chain = state.ai.default_chain().await.unwrap();
    assert_eq!(chain.tiers().len(), 2);

    let result = state
        .ai
        .chat(&chain, &[ChatMessage::user("hi")], &ChatOptions::default())
        .await
        .unwrap();

    // The fallback answer comes back; the primary's failure is not
    // surfaced to the caller.
    assert_eq!(result.content, "from fallback");
    assert_eq!(result.model_name, "fallback-model");

    state.db.pool().close().await;
    cleanup_test_db(&db_name).await;
}

#[tokio::test]
async fn test_disabled_fallback_never_contacts_backups() {
    let (pool, db_name) = setup_test_db().await;
    let state = test_state(Arc::new(pool));

    let primary_vendor = MockServer::start().await;
    let fallback_vendor = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(failing_response())
        .mount(&primary_vendor)
        .await;
    Mock::given(method("POST"))
        .respond_with(ok_response("unreachable"))
        .expect(0)
        .mount(&fallback_vendor)
        .await;

    let primary = seed_model(&state.db, &primary_vendor.uri(), "primary-model", true).await;
    let fallback = seed_model(&state.db, &fallback_vendor.uri(), "fallback-model", true).await;
    state
        .db
        .update_route_config(&RouteConfigUpdate {
            primary_model_id: Some(primary),
            fallback1_model_id: Some(fallback),
            fallback2_model_id: None,
            retry_attempts: 1,
            timeout_seconds: 5,
            enable_fallback: false,
        })
        .await
        .unwrap();

    let chain = state.ai.default_chain().await.unwrap();
    assert_eq!(chain.tiers().len(), 1);

    let err = state
        .ai
        .chat(&chain, &[ChatMessage::user("hi")], &ChatOptions::default())
        .await
        .unwrap_err();

    match err {
        AppError::ProviderError(ProviderError::RequestFailed { status, detail, .. }) => {
            assert_eq!(status, 500);
            assert!(detail.contains("primary exploded"));
        }
        other => panic!("unexpected error: {:?}", other),
    }

    state.db.pool().close().await;
    cleanup_test_db(&db_name).await;
}

#[tokio::test]
async fn test_inactive_primary_drops_to_fallback_tier() {
    let (pool, db_name) = setup_test_db().await;
    let state = test_state(Arc::new(pool));

    let vendor = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ok_response("healthy backup"))
        .mount(&vendor)
        .await;

    let inactive = seed_model(&state.db, &vendor.uri(), "retired-model", false).await;
    let active = seed_model(&state.db, &vendor.uri(), "backup-model", true).await;

    // The config validator refuses inactive models, so point the
    // singleton at the retired model directly, as legacy rows might.
    sqlx::query(
        "INSERT INTO ai_config
             (id, primary_model_id, fallback1_model_id, retry_attempts,
              timeout_seconds, enable_fallback, updated_at)
         VALUES (1, $1, $2, 1, 5, TRUE, now())",
    )
    .bind(inactive)
    .bind(active)
    .execute(state.db.pool())
    .await
    .unwrap();

    let chain = state.ai.default_chain().await.unwrap();
    assert_eq!(chain.tiers().len(), 1);

    let result = state
        .ai
        .chat(&chain, &[ChatMessage::user("hi")], &ChatOptions::default())
        .await
        .unwrap();
    assert_eq!(result.content, "healthy backup");
    assert_eq!(result.model_name, "backup-model");

    state.db.pool().close().await;
    cleanup_test_db(&db_name).await;
}

#[tokio::test]
async fn test_chain_for_model_pins_single_tier() {
    let (pool, db_name) = setup_test_db().await;
    let state = test_state(Arc::new(pool));

    let vendor = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ok_response("pinned"))
        .mount(&vendor)
        .await;

    let pinned = seed_model(&state.db, &vendor.uri(), "pinned-model", true).await;

    let chain = state.ai.chain_for_model(pinned).await.unwrap();
    assert_eq!(chain.tiers().len(), 1);

    let result = state
        .ai
        .chat(&chain, &[ChatMessage::user("hi")], &ChatOptions::default())
        .await
        .unwrap();
    assert_eq!(result.model_name, "pinned-model");

    state.db.pool().close().await;
    cleanup_test_db(&db_name).await;
}
