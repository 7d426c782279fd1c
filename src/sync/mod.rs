//! Sync engine: push/pull coordination, LWW merging, rules and actions

/// Action dispatcher and handler contracts
pub mod actions;
/// Idempotency cache for action results
pub mod idempotency;
/// Column-level Last-Writer-Wins merge
pub mod merge;
/// Pull coordinator
pub mod pull;
/// Ingestion coordinator
pub mod push;
/// Bucket-based sync rules
pub mod rules;

pub use actions::{
    Action, ActionBatchResult, ActionDispatcher, ActionHandler, ActionResult, ActionStatus,
    AuthContext,
};
pub use idempotency::IdempotencyCache;
pub use merge::RowState;
pub use pull::PullCoordinator;
pub use push::{IngestionCoordinator, PushOutcome, MAX_PUSH_DELTAS};
pub use rules::{Bucket, BucketFilter, FilterOp, SyncRules, SyncRulesContext};
