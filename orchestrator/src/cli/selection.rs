use std::path::PathBuf;

use clap::Args;

use super::parse_positive_usize;

/// Which targets a command acts on.
#[derive(Debug, Clone, Args)]
pub struct SelectionCliArgs {
    /// Comma separated target ids to include.
    #[arg(env = "ROLLOUT_TARGETS", long, value_delimiter = ',')]
    pub targets: Vec<String>,

    /// Comma separated selectors: all, compatibility:<tag>, deployed[:<contract>].
    #[arg(env = "ROLLOUT_SELECT", long, value_delimiter = ',')]
    pub select: Vec<String>,

    /// Comma separated target ids removed after every selector was applied.
    #[arg(env = "ROLLOUT_EXCLUDE", long, value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// Deployment environment, selects deployment records and the ledger.
    #[arg(env = "ROLLOUT_ENVIRONMENT", long, default_value = "production")]
    pub environment: String,

    /// Contract name used by `deployed` without an argument and by actions needing a name.
    #[arg(env = "ROLLOUT_CONTRACT", long)]
    pub contract: Option<String>,

    /// Drop targets marked inactive in the registry.
    #[arg(env = "ROLLOUT_ACTIVE_ONLY", long, default_value_t = false)]
    pub active_only: bool,

    /// Target registry file.
    #[arg(env = "ROLLOUT_NETWORKS", long, default_value = "config/networks.json")]
    pub networks: PathBuf,

    /// Directory holding `<target>[.<environment>].json` deployment records.
    #[arg(env = "ROLLOUT_DEPLOYMENTS_DIR", long, default_value = "deployments")]
    pub deployments_dir: PathBuf,

    /// How many bytecode probes run at once for `deployed` selectors.
    #[arg(env = "ROLLOUT_PROBE_CONCURRENCY", long, default_value = "6", value_parser = parse_positive_usize)]
    pub probe_concurrency: usize,
}
