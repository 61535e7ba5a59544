use std::path::PathBuf;

use clap::Args;

use crate::core::client::rpc::RpcSource;

/// Endpoint resolution and resilience knobs.
#[derive(Debug, Clone, Args)]
pub struct RpcCliArgs {
    /// Where endpoints come from.
    #[arg(env = "ROLLOUT_RPC_SOURCE", long, value_enum, default_value_t = RpcSource::Direct)]
    pub rpc_source: RpcSource,

    /// Retries per endpoint after the first attempt.
    #[arg(env = "ROLLOUT_RPC_RETRIES", long, default_value = "3")]
    pub rpc_retries: u32,

    /// Base delay of the exponential backoff.
    #[arg(env = "ROLLOUT_RPC_RETRY_DELAY_MS", long, default_value = "500")]
    pub rpc_retry_delay_ms: u64,

    /// Timeout of every single RPC call.
    #[arg(env = "ROLLOUT_RPC_TIMEOUT_MS", long, default_value = "20000")]
    pub rpc_timeout_ms: u64,

    /// Env file scanned for commented-out fallback endpoints.
    #[arg(env = "ROLLOUT_ENV_FILE", long, default_value = ".env")]
    pub env_file: PathBuf,

    /// MongoDB connection string of the endpoint registry.
    #[arg(env = "ROLLOUT_REGISTRY_URI", long, required_if_eq("rpc_source", "registry"))]
    pub registry_uri: Option<String>,

    /// Database holding the `RpcEndpoints` collection.
    #[arg(env = "ROLLOUT_REGISTRY_DB", long, default_value = "rollout")]
    pub registry_db: String,
}
