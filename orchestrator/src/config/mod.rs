use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::cli::{RpcCliArgs, RunCmd, SelectionCliArgs};
use crate::core::build_profile::CompatProfile;
use crate::core::client::rpc::{ConnectionPool, EndpointResolver, MongoEndpointRegistry, RetryPolicy, RpcSource};
use crate::core::selector::{SelectionDirective, SelectionRequest};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::worker::ExecutionOptions;

/// Upper bound on `--rpc-retries`, the backoff is exponential
pub const MAX_RPC_RETRIES: u32 = 10;

/// Endpoint resolution settings of a command.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub source: RpcSource,
    pub policy: RetryPolicy,
    pub env_file: PathBuf,
    pub registry_uri: Option<String>,
    pub registry_db: String,
}

impl RpcConfig {
    /// Build the pool, connecting to the endpoint registry when it is the source.
    pub async fn build_pool(&self) -> OrchestratorResult<ConnectionPool> {
        let mut resolver = EndpointResolver::new(self.source).with_env_file(&self.env_file);
        if self.source == RpcSource::Registry {
            let uri = self.registry_uri.as_deref().ok_or_else(|| {
                OrchestratorError::ConfigError("--registry-uri is required for the registry source".to_string())
            })?;
            let registry = MongoEndpointRegistry::connect(uri, &self.registry_db).await?;
            info!(database = %self.registry_db, "Connected to endpoint registry");
            resolver = resolver.with_registry(Arc::new(registry));
        }
        Ok(ConnectionPool::new(resolver, self.policy.clone()))
    }
}

impl TryFrom<&RpcCliArgs> for RpcConfig {
    type Error = OrchestratorError;

    fn try_from(args: &RpcCliArgs) -> Result<Self, Self::Error> {
        if args.rpc_retries > MAX_RPC_RETRIES {
            return Err(OrchestratorError::ConfigError(format!(
                "--rpc-retries must be at most {}, got {}",
                MAX_RPC_RETRIES, args.rpc_retries
            )));
        }
        if args.rpc_timeout_ms == 0 {
            return Err(OrchestratorError::ConfigError("--rpc-timeout-ms must be greater than 0".to_string()));
        }
        Ok(Self {
            source: args.rpc_source,
            policy: RetryPolicy {
                retries: args.rpc_retries,
                base_delay: Duration::from_millis(args.rpc_retry_delay_ms),
                timeout: Duration::from_millis(args.rpc_timeout_ms),
            },
            env_file: args.env_file.clone(),
            registry_uri: args.registry_uri.clone(),
            registry_db: args.registry_db.clone(),
        })
    }
}

impl TryFrom<&SelectionCliArgs> for SelectionRequest {
    type Error = OrchestratorError;

    fn try_from(args: &SelectionCliArgs) -> Result<Self, Self::Error> {
        let directives = non_empty(&args.select)
            .map(|raw| SelectionDirective::parse(&raw))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            directives,
            explicit_ids: non_empty(&args.targets).collect(),
            exclude: non_empty(&args.exclude).collect(),
            environment: args.environment.trim().to_string(),
            contract_name: args.contract.as_ref().map(|c| c.trim().to_string()).filter(|c| !c.is_empty()),
            probe_concurrency: args.probe_concurrency,
            active_only: args.active_only,
        })
    }
}

/// Validated, typed settings of the `run` command.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub actions: Vec<String>,
    pub selection: SelectionRequest,
    pub networks: PathBuf,
    pub deployments_dir: PathBuf,
    pub rpc: RpcConfig,
    pub execution: ExecutionOptions,
    pub ledger: PathBuf,
    pub profile_file: PathBuf,
    pub build_command: String,
    pub legacy_profile: CompatProfile,
}

impl TryFrom<&RunCmd> for RunConfig {
    type Error = OrchestratorError;

    fn try_from(run_cmd: &RunCmd) -> Result<Self, Self::Error> {
        if run_cmd.concurrency == 0 {
            return Err(OrchestratorError::ConfigError("--concurrency must be at least 1".to_string()));
        }
        let actions: Vec<String> = non_empty(&run_cmd.actions).collect();
        if actions.is_empty() {
            return Err(OrchestratorError::ConfigError("--actions must name at least one action".to_string()));
        }

        let selection = SelectionRequest::try_from(&run_cmd.selection)?;
        let execution = ExecutionOptions {
            environment: selection.environment.clone(),
            concurrency: run_cmd.concurrency,
            dry_run: run_cmd.dry_run,
            named_parameter: selection.contract_name.clone(),
        };

        Ok(Self {
            actions,
            networks: run_cmd.selection.networks.clone(),
            deployments_dir: run_cmd.selection.deployments_dir.clone(),
            rpc: RpcConfig::try_from(&run_cmd.rpc)?,
            execution,
            selection,
            ledger: run_cmd.ledger.clone(),
            profile_file: run_cmd.profile_file.clone(),
            build_command: run_cmd.build_command.clone(),
            legacy_profile: CompatProfile {
                evm_version: run_cmd.legacy_evm_version.trim().to_string(),
                solc_version: run_cmd.legacy_solc_version.trim().to_string(),
            },
        })
    }
}

fn non_empty(values: &[String]) -> impl Iterator<Item = String> + '_ {
    values.iter().map(|v| v.trim()).filter(|v| !v.is_empty()).map(str::to_string)
}
