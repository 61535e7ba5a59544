use std::sync::Arc;

use async_trait::async_trait;

use super::{Action, ActionContext, ActionOutcome};
use crate::core::client::rpc::has_code;
use crate::core::deployments::is_valid_address;

pub fn builtin_actions() -> Vec<Arc<dyn Action>> {
    vec![Arc::new(CheckChainId), Arc::new(CheckDeployment)]
}

/// Compares the chain id reported by the node with the registry's.
pub struct CheckChainId;

#[async_trait]
impl Action for CheckChainId {
    fn id(&self) -> &str {
        "check-chain-id"
    }

    fn label(&self) -> &str {
        "Verify RPC chain id"
    }

    fn mutates_state(&self) -> bool {
        false
    }

    async fn run(&self, ctx: &ActionContext) -> color_eyre::Result<ActionOutcome> {
        let reported = ctx.connection.chain_id().await?;
        if reported == ctx.target.chain_id {
            Ok(ActionOutcome::success())
        } else {
            Ok(ActionOutcome::failed(format!(
                "endpoint reports chain id {} but {} is registered with {}",
                reported, ctx.target.id, ctx.target.chain_id
            )))
        }
    }
}

/// Checks that the named contract has bytecode at its recorded address.
pub struct CheckDeployment;

#[async_trait]
impl Action for CheckDeployment {
    fn id(&self) -> &str {
        "check-deployment"
    }

    fn label(&self) -> &str {
        "Verify contract bytecode"
    }

    fn mutates_state(&self) -> bool {
        false
    }

    fn requires_named_parameter(&self) -> bool {
        true
    }

    async fn run(&self, ctx: &ActionContext) -> color_eyre::Result<ActionOutcome> {
        let Some(contract) = ctx.named_parameter.as_deref() else {
            return Ok(ActionOutcome::skipped("no contract name given"));
        };

        let record = ctx.deployments.get_deployment(&ctx.target.id, &ctx.environment).await?;
        let Some(address) = record.as_ref().and_then(|r| r.get(contract)) else {
            return Ok(ActionOutcome::skipped(format!("{} is not deployed on {}", contract, ctx.target.id)));
        };
        if !is_valid_address(address) {
            return Ok(ActionOutcome::failed(format!("malformed address '{}' for {}", address, contract)));
        }

        let code = ctx.connection.get_code(address).await?;
        if has_code(&code) {
            Ok(ActionOutcome::success())
        } else {
            Ok(ActionOutcome::failed(format!("no bytecode for {} at {}", contract, address)))
        }
    }
}
