use thiserror::Error;

use crate::core::actions::ActionError;
use crate::core::build_profile::ProfileError;
use crate::core::client::rpc::RpcError;
use crate::core::registry::RegistryError;
use crate::core::selector::SelectionError;
use crate::core::tracking::TrackingError;

/// Result type for orchestrator operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Error types for the orchestrator
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Registry error: {0}")]
    RegistryError(#[from] RegistryError),

    #[error("Selection error: {0}")]
    SelectionError(#[from] SelectionError),

    #[error("RPC error: {0}")]
    RpcError(#[from] RpcError),

    #[error("Build profile error: {0}")]
    ProfileError(#[from] ProfileError),

    #[error("Action error: {0}")]
    ActionError(#[from] ActionError),

    #[error("Tracking error: {0}")]
    TrackingError(#[from] TrackingError),

    /// Invalid command line or environment configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Selection and exclusion left nothing to run against
    #[error("No targets remain after selection and exclusion")]
    NoTargets,
}

impl OrchestratorError {
    /// Errors that must abort a run before any target is touched.
    pub fn is_configuration_error(&self) -> bool {
        match self {
            OrchestratorError::ConfigError(_) | OrchestratorError::RegistryError(_) => true,
            OrchestratorError::SelectionError(e) => e.is_configuration_error(),
            OrchestratorError::ActionError(ActionError::UnknownAction(_)) => true,
            OrchestratorError::ActionError(ActionError::DuplicateAction(_)) => true,
            OrchestratorError::ProfileError(ProfileError::MissingDefaultProfile(_)) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::bad_flag(OrchestratorError::ConfigError("--concurrency must be at least 1".to_string()), true)]
    #[case::unknown_action(ActionError::UnknownAction("teleport".to_string()).into(), true)]
    #[case::no_default_profile(ProfileError::MissingDefaultProfile("no [profile.default]".to_string()).into(), true)]
    #[case::not_backed_up(ProfileError::NotBackedUp.into(), false)]
    #[case::no_targets(OrchestratorError::NoTargets, false)]
    fn configuration_errors_abort_before_any_target(#[case] error: OrchestratorError, #[case] expected: bool) {
        assert_eq!(error.is_configuration_error(), expected);
    }
}
