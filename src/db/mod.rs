//! Persistence layer: the append-only usage ledger, AI provider/model
//! configuration, and plan lookups.

pub mod models;
pub mod operations;

pub use models::{
    ActivePlan, AiModelRow, AiProviderRow, AiRouteConfig, NewUsageRecord, UsageRecord,
};
pub use operations::{DbOperations, GuardedWrite, RouteConfigUpdate};
