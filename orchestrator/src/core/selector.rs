use std::collections::HashSet;
use std::str::FromStr;

use futures::{stream, StreamExt};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::client::rpc::{has_code, ConnectionPool};
use crate::core::deployments::{is_valid_address, DeploymentLookup};
use crate::core::registry::TargetRegistry;
use crate::types::{TargetConfig, DEFAULT_ENVIRONMENT};

pub const DEFAULT_PROBE_CONCURRENCY: usize = 6;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error("unknown selector '{0}'")]
    UnknownSelector(String),

    #[error("selector '{directive}' requires a {parameter}")]
    MissingParameter { directive: String, parameter: &'static str },

    /// `deployed` given without a contract name and no global one set
    #[error("selector 'deployed' needs a contract name, pass deployed:<name> or --contract")]
    MissingContractName,

    #[error("selector 'deployed' needs a connection pool to probe bytecode")]
    ProbeUnavailable,
}

impl SelectionError {
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            SelectionError::UnknownSelector(_)
                | SelectionError::MissingParameter { .. }
                | SelectionError::MissingContractName
                | SelectionError::ProbeUnavailable
        )
    }
}

/// One parsed selection rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionDirective {
    All,
    /// Targets whose compatibility tag matches, case-insensitively
    Compatibility(String),
    /// Targets with live bytecode for the contract, falling back to the global name
    Deployed(Option<String>),
    Explicit(Vec<String>),
}

impl SelectionDirective {
    pub fn parse(raw: &str) -> Result<Self, SelectionError> {
        let raw = raw.trim();
        let (kind, argument) = match raw.split_once(':') {
            Some((kind, argument)) => (kind.trim(), Some(argument.trim())),
            None => (raw, None),
        };
        let argument = argument.filter(|a| !a.is_empty());

        match kind.to_ascii_lowercase().as_str() {
            "all" if argument.is_none() => Ok(SelectionDirective::All),
            "compatibility" => argument
                .map(|tag| SelectionDirective::Compatibility(tag.to_string()))
                .ok_or(SelectionError::MissingParameter { directive: raw.to_string(), parameter: "compatibility tag" }),
            "deployed" => Ok(SelectionDirective::Deployed(argument.map(str::to_string))),
            "explicit" => argument
                .map(|ids| SelectionDirective::Explicit(ids.split('+').map(|id| id.trim().to_string()).collect()))
                .ok_or(SelectionError::MissingParameter { directive: raw.to_string(), parameter: "target id" }),
            _ => Err(SelectionError::UnknownSelector(raw.to_string())),
        }
    }
}

impl FromStr for SelectionDirective {
    type Err = SelectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Everything that decides which targets participate in a run.
#[derive(Debug, Clone)]
pub struct SelectionRequest {
    pub directives: Vec<SelectionDirective>,
    pub explicit_ids: Vec<String>,
    /// Removed after the union of every directive
    pub exclude: Vec<String>,
    pub environment: String,
    /// Global contract name for `deployed` without an argument
    pub contract_name: Option<String>,
    pub probe_concurrency: usize,
    pub active_only: bool,
}

impl Default for SelectionRequest {
    fn default() -> Self {
        Self {
            directives: Vec::new(),
            explicit_ids: Vec::new(),
            exclude: Vec::new(),
            environment: DEFAULT_ENVIRONMENT.to_string(),
            contract_name: None,
            probe_concurrency: DEFAULT_PROBE_CONCURRENCY,
            active_only: false,
        }
    }
}

/// Resolve the targets of a run, in registry order.
///
/// Unknown explicit ids are dropped with a warning. Probe failures only
/// disqualify the affected target.
pub async fn select_targets(
    registry: &TargetRegistry,
    request: &SelectionRequest,
    deployments: &dyn DeploymentLookup,
    pool: Option<&ConnectionPool>,
) -> Result<Vec<TargetConfig>, SelectionError> {
    let all = SelectionDirective::All;
    let mut explicit_ids: Vec<&str> = request.explicit_ids.iter().map(String::as_str).collect();
    let mut directives = Vec::new();
    for directive in &request.directives {
        match directive {
            SelectionDirective::Explicit(ids) => explicit_ids.extend(ids.iter().map(String::as_str)),
            other => directives.push(other),
        }
    }
    if directives.is_empty() && explicit_ids.is_empty() {
        directives.push(&all);
    }

    // Configuration problems surface before any target is probed
    let mut probes = Vec::new();
    for directive in &directives {
        if let SelectionDirective::Deployed(name) = directive {
            let contract = name.as_ref().or(request.contract_name.as_ref()).ok_or(SelectionError::MissingContractName)?;
            probes.push(contract.clone());
        }
    }
    if !probes.is_empty() && pool.is_none() {
        return Err(SelectionError::ProbeUnavailable);
    }

    let all_targets = registry.load_all();
    let mut selected: HashSet<String> = HashSet::new();

    for id in explicit_ids {
        if registry.get(id).is_some() {
            selected.insert(id.to_string());
        } else {
            warn!(chain = %id, "Unknown target id, ignoring");
        }
    }

    for directive in directives {
        match directive {
            SelectionDirective::All => selected.extend(all_targets.iter().map(|t| t.id.clone())),
            SelectionDirective::Compatibility(tag) => selected.extend(
                all_targets.iter().filter(|t| t.compatibility.eq_ignore_ascii_case(tag)).map(|t| t.id.clone()),
            ),
            SelectionDirective::Deployed(_) | SelectionDirective::Explicit(_) => {}
        }
    }

    if let Some(pool) = pool {
        for contract in &probes {
            let deployed = deployed_targets(
                &all_targets,
                contract,
                &request.environment,
                deployments,
                pool,
                request.probe_concurrency,
            )
            .await;
            info!(contract = %contract, count = deployed.len(), "Targets with live deployment");
            selected.extend(deployed);
        }
    }

    for id in &request.exclude {
        if selected.remove(id.trim()) {
            debug!(chain = %id, "Excluded target");
        }
    }

    if request.active_only {
        for target in all_targets.iter().filter(|t| !t.is_active()) {
            if selected.remove(&target.id) {
                info!(chain = %target.id, status = %target.status, "Dropping inactive target");
            }
        }
    }

    Ok(all_targets.into_iter().filter(|t| selected.contains(&t.id)).collect())
}

async fn deployed_targets(
    targets: &[TargetConfig],
    contract: &str,
    environment: &str,
    deployments: &dyn DeploymentLookup,
    pool: &ConnectionPool,
    concurrency: usize,
) -> HashSet<String> {
    stream::iter(targets)
        .map(|target| async move {
            has_live_deployment(target, contract, environment, deployments, pool).await.then(|| target.id.clone())
        })
        .buffer_unordered(concurrency.max(1))
        .filter_map(|id| async move { id })
        .collect()
        .await
}

async fn has_live_deployment(
    target: &TargetConfig,
    contract: &str,
    environment: &str,
    deployments: &dyn DeploymentLookup,
    pool: &ConnectionPool,
) -> bool {
    let record = match deployments.get_deployment(&target.id, environment).await {
        Ok(Some(record)) => record,
        Ok(None) => return false,
        Err(e) => {
            warn!(chain = %target.id, error = %e, "Could not read deployment record");
            return false;
        }
    };

    let Some(address) = record.get(contract) else {
        debug!(chain = %target.id, contract, "Contract not in deployment record");
        return false;
    };
    if !is_valid_address(address) {
        warn!(chain = %target.id, contract, address = %address, "Malformed deployment address");
        return false;
    }

    match pool.probe(target, address).await {
        Ok(code) => has_code(&code),
        Err(e) => {
            warn!(chain = %target.id, contract, error = %e, "Bytecode probe failed");
            false
        }
    }
}
