use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser as _;
use dotenvy::dotenv;
use rollout_orchestrator::cli::{Cli, Commands, RunCmd, StatusCmd, TargetsCmd};
use rollout_orchestrator::config::{RpcConfig, RunConfig};
use rollout_orchestrator::core::actions::{validate_requirements, ActionCatalog};
use rollout_orchestrator::core::build_profile::{BuildProfileManager, CompatProfile, ForgeBuildRunner};
use rollout_orchestrator::core::deployments::{DeploymentLookup, FileDeploymentLookup};
use rollout_orchestrator::core::grouping::{group_targets_with_legacy, Grouping};
use rollout_orchestrator::core::registry::TargetRegistry;
use rollout_orchestrator::core::selector::{select_targets, SelectionRequest};
use rollout_orchestrator::core::tracking::{ActionMeta, TrackingStore};
use rollout_orchestrator::types::TargetConfig;
use rollout_orchestrator::utils::logging::init_logging;
use rollout_orchestrator::worker::{plan_actions, Executor, RunSummary};
use rollout_orchestrator::{OrchestratorError, OrchestratorResult};
use tracing::{error, info, warn};

/// Exit status when interrupted with ctrl+c
const INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    init_logging();
    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Run { run_command } => run(run_command).await,
        Commands::Targets { targets_command } => list_targets(targets_command).await,
        Commands::Status { status_command } => status(status_command).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, error_chain = ?e, "Rollout aborted");
            exit_code_for(&e)
        }
    }
}

fn exit_code_for(error: &OrchestratorError) -> ExitCode {
    match error {
        OrchestratorError::NoTargets => ExitCode::from(3),
        e if e.is_configuration_error() => ExitCode::from(2),
        _ => ExitCode::FAILURE,
    }
}

async fn run(run_cmd: &RunCmd) -> OrchestratorResult<ExitCode> {
    let config = RunConfig::try_from(run_cmd)?;
    info!(actions = ?config.actions, dry_run = config.execution.dry_run, "Starting rollout");

    let registry = TargetRegistry::load_from_file(&config.networks)?;
    let actions = ActionCatalog::with_builtin().resolve(&config.actions)?;
    let missing = validate_requirements(&actions, config.execution.named_parameter.as_deref());
    if !missing.is_empty() {
        return Err(OrchestratorError::ConfigError(format!(
            "{} require a contract name, pass --contract",
            missing.join(", ")
        )));
    }

    let deployments: Arc<dyn DeploymentLookup> = Arc::new(FileDeploymentLookup::new(&config.deployments_dir));
    let pool = Arc::new(config.rpc.build_pool().await?);

    let targets = select_targets(&registry, &config.selection, deployments.as_ref(), Some(&pool)).await?;
    if targets.is_empty() {
        return Err(OrchestratorError::NoTargets);
    }
    info!(count = targets.len(), "Selected targets");

    let runner = Arc::new(ForgeBuildRunner::new(&config.build_command, working_dir(&config.profile_file)));
    let profiles = Arc::new(
        BuildProfileManager::new(&config.profile_file, runner).with_legacy_profile(config.legacy_profile.clone()),
    );
    let guard = profiles.acquire()?;
    let grouping = group_targets_with_legacy(
        &targets,
        &profiles.get_default_profile()?,
        &profiles.legacy_profile().evm_version,
    );

    let planned = plan_actions(&actions, config.execution.named_parameter.as_deref());
    let metas: Vec<ActionMeta> = planned.iter().map(|p| p.meta.clone()).collect();
    let target_ids: Vec<String> = targets.iter().map(|t| t.id.clone()).collect();
    let store = Arc::new(TrackingStore::load(&config.ledger, &config.execution.environment, &metas, &target_ids).await);
    info!(run_id = %store.run_id(), ledger = %store.path().display(), "Ledger ready");

    let executor = Executor::new(pool, store, deployments, config.execution.clone()).with_profiles(profiles.clone());

    let summary = tokio::select! {
        summary = executor.execute_groups(&grouping.groups, &grouping.skipped, &planned) => summary,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, unfinished actions will run again on the next invocation");
            return Ok(ExitCode::from(INTERRUPTED));
        }
    };
    drop(guard);

    print_summary(&summary);
    Ok(if summary.has_failures() { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

async fn list_targets(targets_cmd: &TargetsCmd) -> OrchestratorResult<ExitCode> {
    let request = SelectionRequest::try_from(&targets_cmd.selection)?;
    let registry = TargetRegistry::load_from_file(&targets_cmd.selection.networks)?;
    let deployments = FileDeploymentLookup::new(&targets_cmd.selection.deployments_dir);
    let pool = RpcConfig::try_from(&targets_cmd.rpc)?.build_pool().await?;

    let targets = select_targets(&registry, &request, &deployments, Some(&pool)).await?;
    if targets.is_empty() {
        return Err(OrchestratorError::NoTargets);
    }

    print_targets(&targets);

    // Only read, never rebuilt
    let runner = Arc::new(ForgeBuildRunner::new("forge", working_dir(&targets_cmd.profile_file)));
    let legacy = CompatProfile { evm_version: targets_cmd.legacy_evm_version.trim().to_string(), ..Default::default() };
    let profiles = BuildProfileManager::new(&targets_cmd.profile_file, runner).with_legacy_profile(legacy);
    match profiles.backup().and_then(|_| profiles.get_default_profile()) {
        Ok(default_compatibility) => {
            let grouping =
                group_targets_with_legacy(&targets, &default_compatibility, &profiles.legacy_profile().evm_version);
            print_grouping(&grouping);
        }
        Err(e) => {
            warn!(path = %targets_cmd.profile_file.display(), error = %e, "Build profile unreadable, not grouping")
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn status(status_cmd: &StatusCmd) -> OrchestratorResult<ExitCode> {
    let store = TrackingStore::open(&status_cmd.ledger).await?;
    let mut target_ids: Vec<String> = store.entries().into_iter().map(|(key, _)| key.target_id).collect();
    target_ids.dedup();

    let summary = RunSummary::from_store(&store, &target_ids, &store.actions(), Vec::new());
    print_status(&store, &summary);
    Ok(if summary.has_failures() { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

fn working_dir(profile_file: &Path) -> &Path {
    profile_file.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."))
}

#[allow(clippy::print_stdout)]
fn print_summary(summary: &RunSummary) {
    println!("{}", summary);
}

#[allow(clippy::print_stdout)]
fn print_targets(targets: &[TargetConfig]) {
    let width = targets.iter().map(|t| t.id.len()).max().unwrap_or(0).max("Target".len());
    println!("{:<width$}  {:>10}  {:<14}  {:<7}  Status", "Target", "Chain id", "Compatibility", "Special");
    for target in targets {
        println!(
            "{:<width$}  {:>10}  {:<14}  {:<7}  {}",
            target.id, target.chain_id, target.compatibility, target.special, target.status
        );
    }
    println!();
}

#[allow(clippy::print_stdout)]
fn print_grouping(grouping: &Grouping) {
    for group in &grouping.groups {
        let ids: Vec<&str> = group.targets.iter().map(|t| t.id.as_str()).collect();
        match &group.required_compatibility {
            Some(tag) => println!("{} ({}): {}", group.kind, tag, ids.join(", ")),
            None => println!("{}: {}", group.kind, ids.join(", ")),
        }
    }
    if !grouping.skipped.is_empty() {
        let ids: Vec<&str> = grouping.skipped.iter().map(|t| t.id.as_str()).collect();
        println!("skipped: {}", ids.join(", "));
    }
}

#[allow(clippy::print_stdout)]
fn print_status(store: &TrackingStore, summary: &RunSummary) {
    println!("Run {} ({})", store.run_id(), store.environment());
    println!("{}", summary);
}
