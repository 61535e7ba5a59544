use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

pub mod rpc;
pub mod selection;

pub use rpc::RpcCliArgs;
pub use selection::SelectionCliArgs;

pub(crate) fn parse_positive_usize(s: &str) -> Result<usize, String> {
    let value: usize = s.parse().map_err(|_| format!("'{}' is not a valid number", s))?;
    if value == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(value)
}

#[derive(Parser, Debug)]
#[command(
    name = "rollout-orchestrator",
    about = "Roll actions out across many chains, concurrently and resumably",
    long_about = "Runs a set of actions against every selected chain.\n\n\
    Chains are grouped by the build profile they need, each group is built once,\n\
    and progress is tracked in a ledger so an interrupted run resumes where it stopped.",
    after_help = "Examples:\n  \
    rollout-orchestrator run --actions check-chain-id --select all\n  \
    rollout-orchestrator run --actions check-deployment --select deployed:Widget --exclude mainnet\n  \
    rollout-orchestrator targets --select compatibility:london\n  \
    rollout-orchestrator status --ledger .rollout/tracking.json"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute actions against the selected targets
    Run {
        #[command(flatten)]
        run_command: Box<RunCmd>,
    },
    /// List the selected targets and how they would be grouped
    Targets {
        #[command(flatten)]
        targets_command: Box<TargetsCmd>,
    },
    /// Print the summary of an existing ledger
    Status {
        #[command(flatten)]
        status_command: StatusCmd,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RunCmd {
    /// Comma separated action ids to run.
    #[arg(env = "ROLLOUT_ACTIONS", long, value_delimiter = ',', required = true)]
    pub actions: Vec<String>,

    #[command(flatten)]
    pub selection: SelectionCliArgs,

    #[command(flatten)]
    pub rpc: RpcCliArgs,

    /// Targets processed at once within a group.
    #[arg(env = "ROLLOUT_CONCURRENCY", long, default_value = "4")]
    pub concurrency: usize,

    /// Report what would run without connecting or touching the ledger.
    #[arg(env = "ROLLOUT_DRY_RUN", long, default_value_t = false)]
    pub dry_run: bool,

    /// Tracking ledger file.
    #[arg(env = "ROLLOUT_LEDGER", long, default_value = ".rollout/tracking.json")]
    pub ledger: PathBuf,

    /// Build profile file switched between groups.
    #[arg(env = "ROLLOUT_PROFILE_FILE", long, default_value = "foundry.toml")]
    pub profile_file: PathBuf,

    /// Build tool invoked as `<cmd> clean` and `<cmd> build` after a profile switch.
    #[arg(env = "ROLLOUT_BUILD_COMMAND", long, default_value = "forge")]
    pub build_command: String,

    /// `evm_version` of the legacy build profile.
    #[arg(env = "ROLLOUT_LEGACY_EVM_VERSION", long, default_value = "london")]
    pub legacy_evm_version: String,

    /// `solc_version` of the legacy build profile.
    #[arg(env = "ROLLOUT_LEGACY_SOLC_VERSION", long, default_value = "0.8.17")]
    pub legacy_solc_version: String,
}

#[derive(Args, Debug, Clone)]
pub struct TargetsCmd {
    #[command(flatten)]
    pub selection: SelectionCliArgs,

    #[command(flatten)]
    pub rpc: RpcCliArgs,

    /// Build profile file the default compatibility tag is read from.
    #[arg(env = "ROLLOUT_PROFILE_FILE", long, default_value = "foundry.toml")]
    pub profile_file: PathBuf,

    /// `evm_version` of the legacy build profile.
    #[arg(env = "ROLLOUT_LEGACY_EVM_VERSION", long, default_value = "london")]
    pub legacy_evm_version: String,
}

#[derive(Args, Debug, Clone)]
pub struct StatusCmd {
    /// Tracking ledger file.
    #[arg(env = "ROLLOUT_LEDGER", long, default_value = ".rollout/tracking.json")]
    pub ledger: PathBuf,
}
