use serde::{Deserialize, Serialize};

/// Whether a target is still being rolled out to.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, strum_macros::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TargetStatus {
    #[default]
    Active,
    Inactive,
}

/// A single remote network the orchestrator acts upon.
///
/// Loaded once by the [`TargetRegistry`](crate::core::registry::TargetRegistry)
/// and never mutated afterwards.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TargetConfig {
    /// Unique identifier, also used as the key in the registry file
    #[serde(alias = "name")]
    pub id: String,
    pub chain_id: u64,
    /// Toolchain compatibility tag (EVM version the target was deployed with)
    #[serde(alias = "deployedWithEvmVersion")]
    pub compatibility: String,
    /// Targets that need class-specific handling (zk-rollup style execution)
    #[serde(default, alias = "isZkEVM")]
    pub special: bool,
    /// RPC url shipped with the registry, used by the `target-default` source
    #[serde(default)]
    pub rpc_url: String,
    #[serde(default)]
    pub status: TargetStatus,
}

impl TargetConfig {
    pub fn is_active(&self) -> bool {
        self.status == TargetStatus::Active
    }

    /// Name of the environment variable holding the primary endpoint for this target.
    ///
    /// `arbitrum-nova` becomes `ETH_NODE_URI_ARBITRUM_NOVA`.
    pub fn endpoint_env_var(&self) -> String {
        format!("ETH_NODE_URI_{}", self.id.to_uppercase().replace('-', "_"))
    }
}
