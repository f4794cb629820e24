//! Usage policy engine: tiered daily quotas with multi-identity abuse
//! correlation. The decision is computed from two ledger counts, one keyed
//! by the caller's own identity and one keyed by network address; the
//! larger count wins so clearing cookies does not reset the quota.

pub mod handlers;

use std::sync::Arc;

use chrono::{DateTime, Local, LocalResult, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::LimitsConfig;
use crate::db::{DbOperations, GuardedWrite, NewUsageRecord, UsageRecord};
use crate::error::AppError;
use crate::identity::ResolvedIdentity;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserTier {
    Guest,
    User,
    Subscriber,
}

/// The allow/deny decision for one request. Ephemeral and side-effect
/// free; calling the check twice without recording in between yields the
/// same answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageDecision {
    pub allowed: bool,
    pub remaining: i64,
    pub limit: i64,
    pub user_type: UserTier,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_login: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_upgrade: Option<bool>,
}

impl UsageDecision {
    pub fn denied(user_type: UserTier, limit: i64, reason: String) -> Self {
        let mut decision = Self {
            allowed: false,
            remaining: 0,
            limit,
            user_type,
            reason: Some(reason),
            requires_login: None,
            requires_upgrade: None,
        };
        match user_type {
            UserTier::Guest => decision.requires_login = Some(true),
            UserTier::User => decision.requires_upgrade = Some(true),
            UserTier::Subscriber => {}
        }
        decision
    }
}

/// AI usage metadata attached to a ledger entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordedUsage {
    pub used_ai: bool,
    pub ai_tokens: i32,
    pub ai_cost: Decimal,
}

pub struct UsageGuard {
    db: Arc<DbOperations>,
    limits: LimitsConfig,
}

impl UsageGuard {
    pub fn new(db: Arc<DbOperations>, limits: LimitsConfig) -> Self {
        Self { db, limits }
    }

    /// Computes the caller's quota decision. Read-only; any store failure
    /// propagates (the request errors rather than silently passing).
    pub async fn check(&self, identity: &ResolvedIdentity) -> Result<UsageDecision> {
        let (tier, limit) = self.tier_and_limit(identity.user_id).await?;
        let since = current_day_start();

        let identity_count = self
            .db
            .count_identity_usage(
                since,
                identity.user_id,
                Some(&identity.session_id),
                identity.device_fingerprint.as_deref(),
            )
            .await?;
        let ip_count = self.db.count_ip_usage(since, &identity.ip_address).await?;

        Ok(evaluate(tier, limit, identity_count, ip_count))
    }

    /// Writes one ledger entry, re-validating the quota inside the same
    /// store transaction. Over-limit callers get the deny decision as an
    /// error and no record is written.
    pub async fn record(
        &self,
        identity: &ResolvedIdentity,
        tool_id: &str,
        usage: RecordedUsage,
    ) -> Result<UsageRecord> {
        let (tier, limit) = self.tier_and_limit(identity.user_id).await?;

        let record = NewUsageRecord {
            tool_id: tool_id.to_string(),
            user_id: identity.user_id,
            session_id: Some(identity.session_id.clone()),
            ip_address: identity.ip_address.clone(),
            device_fingerprint: identity.device_fingerprint.clone(),
            user_agent: identity.user_agent.clone(),
            used_ai: usage.used_ai,
            ai_tokens: usage.ai_tokens,
            ai_cost: usage.ai_cost,
        };

        match self
            .db
            .insert_usage_guarded(&record, current_day_start(), limit)
            .await?
        {
            GuardedWrite::Recorded(written) => {
                info!(
                    tool_id,
                    tier = ?tier,
                    used_ai = usage.used_ai,
                    "Recorded tool usage"
                );
                Ok(written)
            }
            GuardedWrite::LimitReached {
                identity_count,
                ip_count,
            } => {
                warn!(
                    tool_id,
                    identity_count, ip_count, limit, "Refused over-limit usage record"
                );
                let decision = evaluate(tier, limit, identity_count, ip_count);
                Err(AppError::QuotaExceeded(Box::new(decision)))
            }
        }
    }

    async fn tier_and_limit(&self, user_id: Option<Uuid>) -> Result<(UserTier, i64)> {
        match user_id {
            None => Ok((UserTier::Guest, self.limits.guest_daily)),
            Some(id) => match self.db.get_active_plan(id).await? {
                Some(plan) => Ok((UserTier::Subscriber, plan.daily_limit)),
                None => Ok((UserTier::User, self.limits.user_daily)),
            },
        }
    }
}

/// Pure decision: the effective count is the max of the two correlation
/// buckets. A caller who clears local state keeps their IP bucket; a
/// caller who changes networks gets a fresh IP bucket, which is accepted
/// bounded leniency.
fn evaluate(tier: UserTier, limit: i64, identity_count: i64, ip_count: i64) -> UsageDecision {
    let effective = identity_count.max(ip_count);
    let allowed = effective < limit;
    let remaining = (limit - effective).max(0);

    if allowed {
        return UsageDecision {
            allowed: true,
            remaining,
            limit,
            user_type: tier,
            reason: None,
            requires_login: None,
            requires_upgrade: None,
        };
    }

    let reason = match tier {
        UserTier::Guest => "Daily free limit reached. Sign in to continue.",
        UserTier::User => "Daily limit reached. Upgrade your plan for a higher quota.",
        UserTier::Subscriber => "Daily plan limit reached. Your quota resets tomorrow.",
    };
    UsageDecision::denied(tier, limit, reason.to_string())
}

/// Start of the current calendar day at local server midnight, in UTC.
/// The quota window is a calendar day, not a rolling 24 hours.
pub fn current_day_start() -> DateTime<Utc> {
    let midnight = Local::now().date_naive().and_time(NaiveTime::MIN);
    match Local.from_local_datetime(&midnight) {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt.with_timezone(&Utc),
        // A DST transition exactly at midnight leaves no local midnight;
        // the UTC day boundary is the closest sane window start.
        LocalResult::None => Utc::now()
            .date_naive()
            .and_time(NaiveTime::MIN)
            .and_utc(),
    }
}
