//! Action dispatcher
//!
//! Imperative actions (connector side-effects, not row deltas) route to
//! registered handlers by connector name. Dispatch is idempotent: results
//! are cached by action id and by explicit idempotency key, and a cached
//! result short-circuits re-execution. Handler failures are cached only
//! when the handler marks them non-retryable.

use crate::core::error::{ActionExecutionError, Error};
use crate::sync::idempotency::{IdempotencyCache, IDEMPOTENCY_PREFIX};
use crate::types::schema::is_safe_identifier;
use crate::types::{HlcClock, HlcTimestamp};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// One imperative action pushed by a client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    /// Unique action identifier; primary idempotency key
    pub action_id: String,
    /// Originating client
    pub client_id: String,
    /// Client HLC when the action was issued
    pub hlc: HlcTimestamp,
    /// Target connector name
    pub connector: String,
    /// Connector-specific action type
    pub action_type: String,
    /// Connector-specific parameters
    #[serde(default)]
    pub params: serde_json::Value,
    /// Optional explicit idempotency key shared across retries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

/// Result status for one action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionStatus {
    /// Handler executed successfully
    #[serde(rename = "OK")]
    Ok,
    /// Handler failed
    #[serde(rename = "ERROR")]
    Error,
    /// No handler for the connector, or the type is unsupported
    #[serde(rename = "ACTION_NOT_SUPPORTED")]
    NotSupported,
}

/// Per-action result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    /// The action this result answers
    pub action_id: String,
    /// Outcome
    pub status: ActionStatus,
    /// Diagnostic for ERROR / NOT_SUPPORTED
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Handler-provided payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Batch response: per-action results plus the server clock
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionBatchResult {
    /// Results in request order
    pub results: Vec<ActionResult>,
    /// Server clock after dispatch
    pub server_hlc: HlcTimestamp,
}

/// Caller identity and claims, passed through to handlers
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    /// Transport-bound client id, when present
    pub client_id: Option<String>,
    /// JWT claims
    pub claims: HashMap<String, serde_json::Value>,
}

/// A connector-side action executor
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Whether this handler executes the given action type
    fn supports(&self, action_type: &str) -> bool;

    /// Execute one action
    async fn execute_action(
        &self,
        action: &Action,
        auth: &AuthContext,
    ) -> Result<ActionResult, ActionExecutionError>;
}

/// Connector-name → handler routing with an idempotency cache
pub struct ActionDispatcher {
    handlers: DashMap<String, Arc<dyn ActionHandler>>,
    cache: IdempotencyCache,
    clock: Arc<HlcClock>,
}

impl ActionDispatcher {
    /// Create a dispatcher with default cache bounds
    pub fn new(clock: Arc<HlcClock>) -> Self {
        Self::with_cache(clock, IdempotencyCache::default())
    }

    /// Create a dispatcher with an explicit cache
    pub fn with_cache(clock: Arc<HlcClock>, cache: IdempotencyCache) -> Self {
        Self { handlers: DashMap::new(), cache, clock }
    }

    /// Register a handler for a connector name
    pub fn register_handler(&self, connector: impl Into<String>, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(connector.into(), handler);
    }

    /// Registered connector names, sorted
    pub fn connectors(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    fn validate(action: &Action) -> Result<(), Error> {
        if action.action_id.is_empty() {
            return Err(Error::ActionValidation("actionId must not be empty".into()));
        }
        if action.client_id.is_empty() {
            return Err(Error::ActionValidation(format!(
                "action '{}' is missing clientId",
                action.action_id
            )));
        }
        if !is_safe_identifier(&action.connector) {
            return Err(Error::ActionValidation(format!(
                "action '{}' has unsafe connector name '{}'",
                action.action_id, action.connector
            )));
        }
        if action.action_type.is_empty() {
            return Err(Error::ActionValidation(format!(
                "action '{}' is missing actionType",
                action.action_id
            )));
        }
        Ok(())
    }

    fn cached(&self, action: &Action) -> Option<ActionResult> {
        if let Some(result) = self.cache.get(&action.action_id) {
            return Some(result);
        }
        action
            .idempotency_key
            .as_deref()
            .and_then(|key| self.cache.get(&format!("{IDEMPOTENCY_PREFIX}{key}")))
    }

    fn cache_result(&self, action: &Action, result: &ActionResult) {
        self.cache.set(action.action_id.clone(), result.clone());
        if let Some(key) = &action.idempotency_key {
            self.cache.set(format!("{IDEMPOTENCY_PREFIX}{key}"), result.clone());
        }
    }

    /// Dispatch a batch. Structural validation fails the whole batch; every
    /// structurally valid batch yields one result per action.
    pub async fn dispatch(
        &self,
        actions: Vec<Action>,
        auth: &AuthContext,
    ) -> Result<ActionBatchResult, Error> {
        for action in &actions {
            Self::validate(action)?;
        }

        let mut results = Vec::with_capacity(actions.len());
        for action in &actions {
            if let Some(result) = self.cached(action) {
                results.push(result);
                continue;
            }

            let handler = self
                .handlers
                .get(&action.connector)
                .map(|entry| Arc::clone(entry.value()));
            let handler = match handler {
                Some(h) if h.supports(&action.action_type) => h,
                _ => {
                    let result = ActionResult {
                        action_id: action.action_id.clone(),
                        status: ActionStatus::NotSupported,
                        message: Some(format!(
                            "no handler for connector '{}' action '{}'",
                            action.connector, action.action_type
                        )),
                        data: None,
                    };
                    self.cache_result(action, &result);
                    results.push(result);
                    continue;
                }
            };

            match handler.execute_action(action, auth).await {
                Ok(result) => {
                    self.cache_result(action, &result);
                    results.push(result);
                }
                Err(err) => {
                    tracing::warn!(
                        action_id = %action.action_id,
                        connector = %action.connector,
                        retryable = err.retryable,
                        "action handler failed: {err}"
                    );
                    let result = ActionResult {
                        action_id: action.action_id.clone(),
                        status: ActionStatus::Error,
                        message: Some(err.message.clone()),
                        data: None,
                    };
                    if !err.retryable {
                        self.cache_result(action, &result);
                    }
                    results.push(result);
                }
            }
        }

        Ok(ActionBatchResult { results, server_hlc: self.clock.now() })
    }
}
