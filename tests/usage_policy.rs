//! Policy engine behavior against a real ledger: idempotent checks,
//! monotonic consumption, cross-identity correlation, and tier limits.

mod common;

use std::sync::Arc;

use common::*;
use rust_decimal::Decimal;
use toolforge_server::usage::{RecordedUsage, UserTier};
use toolforge_server::AppError;
use uuid::Uuid;

fn ai_usage() -> RecordedUsage {
    RecordedUsage {
        used_ai: true,
        ai_tokens: 100,
        ai_cost: Decimal::new(5, 4), // 0.0005
    }
}

#[tokio::test]
async fn test_check_is_idempotent() {
    let (pool, db_name) = setup_test_db().await;
    let state = test_state(Arc::new(pool));
    let identity = guest_identity("session-a", "203.0.113.1", None);

    state.usage.record(&identity, "summarizer", ai_usage()).await.unwrap();

    let first = state.usage.check(&identity).await.unwrap();
    let second = state.usage.check(&identity).await.unwrap();
    let third = state.usage.check(&identity).await.unwrap();

    assert_eq!(first.remaining, second.remaining);
    assert_eq!(second.remaining, third.remaining);
    assert_eq!(first.allowed, third.allowed);

    state.db.pool().close().await;
    cleanup_test_db(&db_name).await;
}

#[tokio::test]
async fn test_each_record_decrements_remaining_by_one() {
    let (pool, db_name) = setup_test_db().await;
    let state = test_state(Arc::new(pool));
    let identity = guest_identity("session-b", "203.0.113.2", None);

    let mut previous = state.usage.check(&identity).await.unwrap().remaining;
    assert_eq!(previous, 10);

    for _ in 0..3 {
        state.usage.record(&identity, "summarizer", ai_usage()).await.unwrap();
        let now = state.usage.check(&identity).await.unwrap().remaining;
        assert_eq!(now, previous - 1);
        previous = now;
    }

    state.db.pool().close().await;
    cleanup_test_db(&db_name).await;
}

#[tokio::test]
async fn test_cleared_cookies_do_not_reset_quota() {
    let (pool, db_name) = setup_test_db().await;
    let state = test_state(Arc::new(pool));

    // Exhaust the guest quota from one session on a fixed address.
    let original = guest_identity("session-old", "203.0.113.3", Some("fp-1"));
    for _ in 0..10 {
        state.usage.record(&original, "summarizer", ai_usage()).await.unwrap();
    }

    // Fresh session and fingerprint, same address: the IP bucket wins.
    let evader = guest_identity("session-new", "203.0.113.3", Some("fp-2"));
    let decision = state.usage.check(&evader).await.unwrap();

    assert!(!decision.allowed);
    assert_eq!(decision.remaining, 0);
    assert_eq!(decision.requires_login, Some(true));

    state.db.pool().close().await;
    cleanup_test_db(&db_name).await;
}

#[tokio::test]
async fn test_new_network_gets_fresh_ip_bucket() {
    let (pool, db_name) = setup_test_db().await;
    let state = test_state(Arc::new(pool));

    let home = guest_identity("session-c", "203.0.113.4", None);
    for _ in 0..4 {
        state.usage.record(&home, "summarizer", ai_usage()).await.unwrap();
    }

    // Same session from a new address: identity count still applies, so
    // the quota does not reset, but the address bucket itself is fresh.
    let mobile = guest_identity("session-c", "198.51.100.7", None);
    let decision = state.usage.check(&mobile).await.unwrap();
    assert!(decision.allowed);
    assert_eq!(decision.remaining, 6);

    // A genuinely unseen identity on the new address has the full quota.
    let newcomer = guest_identity("session-d", "198.51.100.8", None);
    let decision = state.usage.check(&newcomer).await.unwrap();
    assert_eq!(decision.remaining, 10);

    state.db.pool().close().await;
    cleanup_test_db(&db_name).await;
}

#[tokio::test]
async fn test_fingerprint_correlates_across_sessions() {
    let (pool, db_name) = setup_test_db().await;
    let state = test_state(Arc::new(pool));

    let first = guest_identity("session-e", "203.0.113.5", Some("fp-shared"));
    for _ in 0..6 {
        state.usage.record(&first, "summarizer", ai_usage()).await.unwrap();
    }

    // New session and new address, same device fingerprint.
    let second = guest_identity("session-f", "198.51.100.9", Some("fp-shared"));
    let decision = state.usage.check(&second).await.unwrap();
    assert_eq!(decision.remaining, 4);

    state.db.pool().close().await;
    cleanup_test_db(&db_name).await;
}

#[tokio::test]
async fn test_guest_denial_at_limit() {
    let (pool, db_name) = setup_test_db().await;
    let state = test_state(Arc::new(pool));
    let identity = guest_identity("session-g", "203.0.113.6", None);

    for _ in 0..10 {
        state.usage.record(&identity, "summarizer", ai_usage()).await.unwrap();
    }

    let decision = state.usage.check(&identity).await.unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.limit, 10);
    assert_eq!(decision.user_type, UserTier::Guest);
    assert_eq!(decision.requires_login, Some(true));
    assert!(decision.requires_upgrade.is_none());

    state.db.pool().close().await;
    cleanup_test_db(&db_name).await;
}

#[tokio::test]
async fn test_authenticated_user_gets_default_limit_and_upgrade_prompt() {
    let (pool, db_name) = setup_test_db().await;
    let state = test_state(Arc::new(pool));
    let identity = user_identity(Uuid::new_v4(), "session-h", "203.0.113.7");

    let decision = state.usage.check(&identity).await.unwrap();
    assert_eq!(decision.user_type, UserTier::User);
    assert_eq!(decision.limit, 50);

    for _ in 0..50 {
        state.usage.record(&identity, "summarizer", ai_usage()).await.unwrap();
    }

    let decision = state.usage.check(&identity).await.unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.requires_upgrade, Some(true));
    assert!(decision.requires_login.is_none());

    state.db.pool().close().await;
    cleanup_test_db(&db_name).await;
}

#[tokio::test]
async fn test_subscriber_uses_plan_limit_without_prompts() {
    let (pool, db_name) = setup_test_db().await;
    let state = test_state(Arc::new(pool));

    let user_id = Uuid::new_v4();
    seed_subscription(&state.db, user_id, 3).await;
    let identity = user_identity(user_id, "session-i", "203.0.113.8");

    let decision = state.usage.check(&identity).await.unwrap();
    assert_eq!(decision.user_type, UserTier::Subscriber);
    assert_eq!(decision.limit, 3);

    for _ in 0..3 {
        state.usage.record(&identity, "summarizer", ai_usage()).await.unwrap();
    }

    let decision = state.usage.check(&identity).await.unwrap();
    assert!(!decision.allowed);
    assert!(decision.requires_login.is_none());
    assert!(decision.requires_upgrade.is_none());

    state.db.pool().close().await;
    cleanup_test_db(&db_name).await;
}

#[tokio::test]
async fn test_guarded_record_refuses_over_limit_write() {
    let (pool, db_name) = setup_test_db().await;
    let state = test_state(Arc::new(pool));
    let identity = guest_identity("session-j", "203.0.113.9", None);

    for _ in 0..10 {
        state.usage.record(&identity, "summarizer", ai_usage()).await.unwrap();
    }

    // The eleventh write is refused inside the store transaction even
    // though the caller skipped the check.
    let err = state
        .usage
        .record(&identity, "summarizer", ai_usage())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::QuotaExceeded(_)));

    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM usage_records")
        .fetch_one(state.db.pool())
        .await
        .unwrap();
    assert_eq!(count, 10);

    state.db.pool().close().await;
    cleanup_test_db(&db_name).await;
}

#[tokio::test]
async fn test_concurrent_records_cannot_overrun_quota() {
    let (pool, db_name) = setup_test_db().await;
    let state = test_state(Arc::new(pool));

    // Burn down to the final slot.
    let identity = guest_identity("session-k", "203.0.113.10", None);
    for _ in 0..9 {
        state.usage.record(&identity, "summarizer", ai_usage()).await.unwrap();
    }

    // Race eight writers for one remaining slot.
    let mut handles = Vec::new();
    for _ in 0..8 {
        let usage = state.usage.clone();
        let identity = identity.clone();
        handles.push(tokio::spawn(async move {
            usage.record(&identity, "summarizer", ai_usage()).await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            successes += 1;
        }
    }
    assert_eq!(successes, 1);

    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM usage_records")
        .fetch_one(state.db.pool())
        .await
        .unwrap();
    assert_eq!(count, 10);

    state.db.pool().close().await;
    cleanup_test_db(&db_name).await;
}
