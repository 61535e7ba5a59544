pub mod builtin;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::warn;

use crate::core::client::rpc::RpcConnection;
use crate::core::deployments::DeploymentLookup;
use crate::types::{RpcEndpoint, TargetConfig};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    #[error("unknown action '{0}'")]
    UnknownAction(String),

    #[error("action '{0}' is registered twice")]
    DuplicateAction(String),
}

/// Final status an action reports for one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ActionStatus {
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    pub status: ActionStatus,
    pub error: Option<String>,
}

impl ActionOutcome {
    pub fn success() -> Self {
        Self { status: ActionStatus::Success, error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { status: ActionStatus::Failed, error: Some(error.into()) }
    }

    /// `reason` is kept in the ledger's error column for triage.
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self { status: ActionStatus::Skipped, error: Some(reason.into()) }
    }
}

/// Everything an action may use while running against one target.
pub struct ActionContext {
    pub target: TargetConfig,
    pub environment: String,
    pub named_parameter: Option<String>,
    pub connection: Arc<RpcConnection>,
    /// Resolved endpoints, for diagnostics only
    pub endpoints: Vec<RpcEndpoint>,
    pub dry_run: bool,
    pub deployments: Arc<dyn DeploymentLookup>,
}

/// An operation the orchestrator can run against a target.
///
/// Implementations must be idempotent: a run may be retried after a crash
/// halfway through.
#[async_trait]
pub trait Action: Send + Sync {
    fn id(&self) -> &str;

    fn label(&self) -> &str;

    /// Mutating actions never overlap on the same target
    fn mutates_state(&self) -> bool;

    fn requires_named_parameter(&self) -> bool {
        false
    }

    /// An `Err` is recorded as a failure, same as [`ActionOutcome::failed`].
    async fn run(&self, ctx: &ActionContext) -> color_eyre::Result<ActionOutcome>;
}

/// Parameters an action's ledger entries are fingerprinted with.
pub fn action_params(action: &dyn Action, named_parameter: Option<&str>) -> Value {
    match (action.requires_named_parameter(), named_parameter) {
        (true, Some(name)) => json!({ "name": name }),
        _ => json!({}),
    }
}

/// Ordered set of known actions.
#[derive(Default, Clone)]
pub struct ActionCatalog {
    actions: Vec<Arc<dyn Action>>,
}

impl ActionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with the actions shipped with the binary.
    pub fn with_builtin() -> Self {
        Self { actions: builtin::builtin_actions() }
    }

    pub fn register(&mut self, action: Arc<dyn Action>) -> Result<(), ActionError> {
        if self.get(action.id()).is_some() {
            return Err(ActionError::DuplicateAction(action.id().to_string()));
        }
        self.actions.push(action);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn Action>> {
        self.actions.iter().find(|a| a.id() == id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.actions.iter().map(|a| a.id())
    }

    /// Requested actions in catalog order, duplicates collapsed.
    pub fn resolve(&self, requested: &[String]) -> Result<Vec<Arc<dyn Action>>, ActionError> {
        let mut wanted = HashSet::new();
        for id in requested {
            let id = id.trim();
            if self.get(id).is_none() {
                return Err(ActionError::UnknownAction(id.to_string()));
            }
            wanted.insert(id);
        }
        Ok(self.actions.iter().filter(|a| wanted.contains(a.id())).cloned().collect())
    }
}

/// Ids of actions that need the named parameter when none was given. Each is logged.
pub fn validate_requirements(actions: &[Arc<dyn Action>], named_parameter: Option<&str>) -> Vec<String> {
    if named_parameter.is_some_and(|p| !p.trim().is_empty()) {
        return Vec::new();
    }
    actions
        .iter()
        .filter(|a| a.requires_named_parameter())
        .map(|a| {
            warn!(action = %a.id(), "Action requires a named parameter (--contract) but none was given");
            a.id().to_string()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::common::CountingAction;
    use assert_matches::assert_matches;

    fn catalog() -> ActionCatalog {
        let mut catalog = ActionCatalog::new();
        catalog.register(Arc::new(CountingAction::new("deploy", true))).unwrap();
        catalog.register(Arc::new(CountingAction::new("verify", false))).unwrap();
        catalog.register(Arc::new(CountingAction::new("propose", true).with_named_parameter())).unwrap();
        catalog
    }

    #[test]
    fn resolve_follows_catalog_order() {
        let requested = ["propose".to_string(), "deploy".to_string(), "propose".to_string()];
        let resolved = catalog().resolve(&requested).unwrap();
        let ids: Vec<_> = resolved.iter().map(|a| a.id()).collect();
        assert_eq!(ids, vec!["deploy", "propose"]);
    }

    #[test]
    fn resolve_rejects_unknown_ids() {
        assert_matches!(
            catalog().resolve(&["deploy".to_string(), "teleport".to_string()]).err(),
            Some(ActionError::UnknownAction(id)) if id == "teleport"
        );
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut catalog = catalog();
        assert_matches!(
            catalog.register(Arc::new(CountingAction::new("verify", false))),
            Err(ActionError::DuplicateAction(_))
        );
    }

    #[test]
    fn missing_named_parameter_is_reported() {
        let actions = catalog().resolve(&["deploy".to_string(), "propose".to_string()]).unwrap();
        assert_eq!(validate_requirements(&actions, None), vec!["propose".to_string()]);
        assert!(validate_requirements(&actions, Some("Widget")).is_empty());
    }

    #[test]
    fn params_only_carry_the_name_when_required() {
        let plain = CountingAction::new("deploy", true);
        let named = CountingAction::new("propose", true).with_named_parameter();
        assert_eq!(action_params(&plain, Some("Widget")), json!({}));
        assert_eq!(action_params(&named, Some("Widget")), json!({ "name": "Widget" }));
    }

    #[test]
    fn builtin_catalog_has_read_only_checks() {
        let catalog = ActionCatalog::with_builtin();
        let ids: Vec<_> = catalog.ids().collect();
        assert_eq!(ids, vec!["check-chain-id", "check-deployment"]);
        assert!(catalog.get("check-deployment").unwrap().requires_named_parameter());
        assert!(!catalog.get("check-chain-id").unwrap().mutates_state());
    }
}
