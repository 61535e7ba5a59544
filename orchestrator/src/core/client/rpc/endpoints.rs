use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use super::error::RpcError;
use super::registry::EndpointRegistry;
use crate::types::endpoint::dedup_by_url;
use crate::types::{EndpointOrigin, RpcEndpoint, TargetConfig};

/// Where endpoints for a target come from, fixed for the lifetime of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, strum_macros::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum RpcSource {
    /// One endpoint from the target's environment variable
    Direct,
    /// The direct endpoint plus commented-out alternatives from the env file
    DirectWithFallback,
    /// Every active endpoint stored in the external registry, by priority
    Registry,
    /// The `rpcUrl` shipped with the target registry
    TargetDefault,
}

/// Reads a variable from the process environment (or a test double).
pub type EnvReader = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

pub fn process_env() -> EnvReader {
    Arc::new(|key| std::env::var(key).ok().filter(|v| !v.trim().is_empty()))
}

pub struct EndpointResolver {
    source: RpcSource,
    env: EnvReader,
    env_file: Option<PathBuf>,
    registry: Option<Arc<dyn EndpointRegistry>>,
}

impl EndpointResolver {
    pub fn new(source: RpcSource) -> Self {
        Self { source, env: process_env(), env_file: None, registry: None }
    }

    pub fn with_env_reader(mut self, env: EnvReader) -> Self {
        self.env = env;
        self
    }

    pub fn with_env_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.env_file = Some(path.into());
        self
    }

    pub fn with_registry(mut self, registry: Arc<dyn EndpointRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn source(&self) -> RpcSource {
        self.source
    }

    /// Ordered, de-duplicated endpoints for the target.
    pub async fn resolve(&self, target: &TargetConfig) -> Result<Vec<RpcEndpoint>, RpcError> {
        match self.source {
            RpcSource::Direct => Ok(vec![self.direct(target)?]),
            RpcSource::DirectWithFallback => {
                // The primary endpoint is mandatory even when alternatives exist
                let mut endpoints = vec![self.direct(target)?];
                endpoints.extend(self.fallback_list(target));
                Ok(dedup_by_url(endpoints))
            }
            RpcSource::Registry => self.from_registry(target).await,
            RpcSource::TargetDefault => {
                if target.rpc_url.trim().is_empty() {
                    return Err(RpcError::MissingEndpoint {
                        target: target.id.clone(),
                        reason: "registry entry has no rpcUrl".to_string(),
                    });
                }
                Ok(vec![RpcEndpoint::new(target.rpc_url.trim(), EndpointOrigin::TargetDefault)])
            }
        }
    }

    fn direct(&self, target: &TargetConfig) -> Result<RpcEndpoint, RpcError> {
        let var = target.endpoint_env_var();
        (self.env)(&var).map(|url| RpcEndpoint::new(url.trim(), EndpointOrigin::Direct)).ok_or_else(|| {
            RpcError::MissingEndpoint { target: target.id.clone(), reason: format!("{} is not set", var) }
        })
    }

    fn fallback_list(&self, target: &TargetConfig) -> Vec<RpcEndpoint> {
        let Some(path) = &self.env_file else {
            return Vec::new();
        };
        match std::fs::read_to_string(path) {
            Ok(content) => parse_commented_endpoints(&content, &target.endpoint_env_var())
                .into_iter()
                .map(|url| RpcEndpoint::new(url, EndpointOrigin::FallbackList))
                .collect(),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "No env file to read fallback endpoints from");
                Vec::new()
            }
        }
    }

    async fn from_registry(&self, target: &TargetConfig) -> Result<Vec<RpcEndpoint>, RpcError> {
        let registry = self
            .registry
            .as_ref()
            .ok_or_else(|| RpcError::RegistryUnavailable("no endpoint registry configured".to_string()))?;

        let endpoints = order_registry_endpoints(registry.endpoints_for(&target.id).await?);
        if endpoints.is_empty() {
            return Err(RpcError::MissingEndpoint {
                target: target.id.clone(),
                reason: "registry returned no active endpoints".to_string(),
            });
        }
        Ok(endpoints)
    }
}

/// Values of commented-out `# VAR=value` lines for exactly `var_name`, quotes stripped.
pub fn parse_commented_endpoints(content: &str, var_name: &str) -> Vec<String> {
    content
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if !line.starts_with('#') {
                return None;
            }
            let (key, value) = line.trim_start_matches('#').trim().split_once('=')?;
            if key.trim() != var_name {
                return None;
            }
            let value = value.trim().trim_matches(|c| c == '"' || c == '\'').trim();
            (!value.is_empty()).then(|| value.to_string())
        })
        .collect()
}

/// Drop endpoints explicitly marked inactive, sort by descending priority (stable), de-duplicate.
pub fn order_registry_endpoints(endpoints: Vec<RpcEndpoint>) -> Vec<RpcEndpoint> {
    let mut active: Vec<_> = endpoints.into_iter().filter(|e| e.active != Some(false)).collect();
    active.sort_by(|a, b| b.priority.unwrap_or_default().cmp(&a.priority.unwrap_or_default()));
    dedup_by_url(active)
}
