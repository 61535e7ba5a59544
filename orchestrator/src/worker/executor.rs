use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use futures::FutureExt;
use tracing::{error, info, info_span, warn, Instrument};

use super::summary::RunSummary;
use crate::core::actions::{action_params, Action, ActionContext, ActionStatus};
use crate::core::build_profile::BuildProfileManager;
use crate::core::client::rpc::ConnectionPool;
use crate::core::deployments::DeploymentLookup;
use crate::core::grouping::{ExecutionGroup, GroupKind};
use crate::core::tracking::{hash_action_params, ActionMeta, LedgerKey, TrackingStore};
use crate::types::{TargetConfig, TrackingStatus, DEFAULT_ENVIRONMENT};

pub const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    pub environment: String,
    /// Worker pool size per group; the special group always uses one
    pub concurrency: usize,
    pub dry_run: bool,
    pub named_parameter: Option<String>,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            environment: DEFAULT_ENVIRONMENT.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            dry_run: false,
            named_parameter: None,
        }
    }
}

/// A requested action with the fingerprint its ledger rows are keyed by.
#[derive(Clone)]
pub struct PlannedAction {
    pub action: Arc<dyn Action>,
    pub meta: ActionMeta,
}

/// Fingerprint every action with the run's named parameter.
pub fn plan_actions(actions: &[Arc<dyn Action>], named_parameter: Option<&str>) -> Vec<PlannedAction> {
    actions
        .iter()
        .map(|action| PlannedAction {
            meta: ActionMeta {
                id: action.id().to_string(),
                label: action.label().to_string(),
                params_hash: hash_action_params(&action_params(action.as_ref(), named_parameter)),
            },
            action: Arc::clone(action),
        })
        .collect()
}

impl From<ActionStatus> for TrackingStatus {
    fn from(status: ActionStatus) -> Self {
        match status {
            ActionStatus::Success => TrackingStatus::Success,
            ActionStatus::Failed => TrackingStatus::Failed,
            ActionStatus::Skipped => TrackingStatus::Skipped,
        }
    }
}

/// Drives groups, then targets, then actions.
pub struct Executor {
    pool: Arc<ConnectionPool>,
    store: Arc<TrackingStore>,
    deployments: Arc<dyn DeploymentLookup>,
    profiles: Option<Arc<BuildProfileManager>>,
    options: ExecutionOptions,
}

impl Executor {
    pub fn new(
        pool: Arc<ConnectionPool>,
        store: Arc<TrackingStore>,
        deployments: Arc<dyn DeploymentLookup>,
        options: ExecutionOptions,
    ) -> Self {
        Self { pool, store, deployments, profiles: None, options }
    }

    pub fn with_profiles(mut self, profiles: Arc<BuildProfileManager>) -> Self {
        self.profiles = Some(profiles);
        self
    }

    /// Run every planned action on every grouped target and summarize the ledger.
    ///
    /// Groups run one after the other. Failures are recorded, never returned.
    pub async fn execute_groups(
        &self,
        groups: &[ExecutionGroup],
        skipped: &[TargetConfig],
        actions: &[PlannedAction],
    ) -> RunSummary {
        let skipped_ids: Vec<String> = skipped.iter().map(|t| t.id.clone()).collect();
        for target in skipped {
            warn!(chain = %target.id, compatibility = %target.compatibility, "No build profile for target, skipping");
        }

        for group in groups {
            let span = info_span!("group", group = %group.kind);
            self.execute_group(group, actions).instrument(span).await;
        }

        if let Some(profiles) = &self.profiles {
            if let Err(e) = profiles.restore() {
                error!(error = %e, "Failed to restore build profile");
            }
        }

        let metas: Vec<ActionMeta> = actions.iter().map(|p| p.meta.clone()).collect();
        let target_ids: Vec<String> = groups.iter().flat_map(|g| g.targets.iter().map(|t| t.id.clone())).collect();

        let summary = if self.options.dry_run {
            RunSummary::dry_run(&target_ids, &metas, skipped_ids)
        } else {
            let mut all_ids = target_ids;
            all_ids.extend(skipped_ids.iter().cloned());
            RunSummary::from_store(&self.store, &all_ids, &metas, skipped_ids)
        };
        info!(
            actions = metas.len(),
            failures = summary.failures.len(),
            dry_run = self.options.dry_run,
            "Run finished"
        );
        summary
    }

    async fn execute_group(&self, group: &ExecutionGroup, actions: &[PlannedAction]) {
        info!(targets = group.targets.len(), compatibility = ?group.required_compatibility, "Starting group");

        if !self.options.dry_run {
            if let Some(profiles) = &self.profiles {
                if let Err(e) = profiles.apply_profile(group).await {
                    error!(error = %e, "Build profile could not be applied, failing group");
                    let message = format!("build profile for group {}: {}", group.kind, e);
                    for target in &group.targets {
                        self.fail_unfinished(target, actions, &message);
                    }
                    self.persist().await;
                    return;
                }
            }
        }

        let workers = match group.kind {
            GroupKind::Special => 1,
            _ => self.options.concurrency.max(1),
        };
        let queue: Mutex<VecDeque<&TargetConfig>> = Mutex::new(group.targets.iter().collect());
        let queue = &queue;

        let pool = (0..workers.min(group.targets.len())).map(move |_| async move {
            loop {
                let next = queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
                let Some(target) = next else { break };
                let span = info_span!("target", chain = %target.id);
                self.execute_target(target, actions).instrument(span).await;
            }
        });
        join_all(pool).await;
    }

    async fn execute_target(&self, target: &TargetConfig, actions: &[PlannedAction]) {
        if self.options.dry_run {
            for planned in actions {
                info!(action = %planned.meta.id, mutates = planned.action.mutates_state(), "Dry run, skipping");
            }
            return;
        }

        let connection = match self.pool.get_connection(target).await {
            Ok(connection) => connection,
            Err(e) => {
                error!(error = %e, "Connection setup failed, failing every action of the target");
                self.fail_unfinished(target, actions, &format!("connection failed: {}", e));
                self.persist().await;
                return;
            }
        };

        let ctx = ActionContext {
            target: target.clone(),
            environment: self.options.environment.clone(),
            named_parameter: self.options.named_parameter.clone(),
            endpoints: connection.endpoints().to_vec(),
            connection,
            dry_run: self.options.dry_run,
            deployments: Arc::clone(&self.deployments),
        };

        let (mutating, read_only): (Vec<&PlannedAction>, Vec<&PlannedAction>) =
            actions.iter().partition(|p| p.action.mutates_state());

        // At most one mutating action in flight per target, in catalog order
        let chain = async {
            for planned in mutating {
                self.execute_action(&ctx, planned).await;
            }
        };
        let concurrent = join_all(read_only.into_iter().map(|planned| self.execute_action(&ctx, planned)));

        tokio::join!(chain, concurrent);
    }

    async fn execute_action(&self, ctx: &ActionContext, planned: &PlannedAction) {
        let key = LedgerKey::new(ctx.target.id.clone(), &planned.meta);
        let span = info_span!("action", action = %planned.meta.id);

        async {
            if self.store.should_skip(&key) {
                info!("Already succeeded, skipping");
                return;
            }

            self.store.start_action(&key);
            self.persist().await;

            let result = AssertUnwindSafe(planned.action.run(ctx)).catch_unwind().await;
            let (status, message) = match result {
                Ok(Ok(outcome)) => (TrackingStatus::from(outcome.status), outcome.error),
                Ok(Err(e)) => (TrackingStatus::Failed, Some(e.to_string())),
                Err(panic) => (TrackingStatus::Failed, Some(panic_message(panic.as_ref()))),
            };

            match status {
                TrackingStatus::Failed => warn!(error = message.as_deref().unwrap_or_default(), "Action failed"),
                TrackingStatus::Skipped => info!(reason = message.as_deref().unwrap_or_default(), "Action skipped"),
                _ => info!("Action succeeded"),
            }

            self.store.finish_action(&key, status, message);
            self.persist().await;
        }
        .instrument(span)
        .await
    }

    /// Mark every requested action of the target failed, except ones that already succeeded.
    fn fail_unfinished(&self, target: &TargetConfig, actions: &[PlannedAction], message: &str) {
        for planned in actions {
            let key = LedgerKey::new(target.id.clone(), &planned.meta);
            if !self.store.should_skip(&key) {
                self.store.finish_action(&key, TrackingStatus::Failed, Some(message.to_string()));
            }
        }
    }

    async fn persist(&self) {
        if let Err(e) = self.store.save().await {
            error!(path = %self.store.path().display(), error = %e, "Failed to save ledger");
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("action panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("action panicked: {}", message)
    } else {
        "action panicked".to_string()
    }
}
