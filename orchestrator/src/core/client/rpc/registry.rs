use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection};
use serde::Deserialize;
use tracing::debug;

use super::error::RpcError;
use crate::types::{EndpointOrigin, RpcEndpoint};

/// External document store holding RPC endpoints tagged by target id.
#[async_trait]
pub trait EndpointRegistry: Send + Sync {
    /// Every endpoint stored for the target, unfiltered and unsorted.
    async fn endpoints_for(&self, target_id: &str) -> Result<Vec<RpcEndpoint>, RpcError>;
}

pub const ENDPOINT_COLLECTION: &str = "RpcEndpoints";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EndpointDocument {
    url: String,
    #[serde(default)]
    priority: Option<i64>,
    #[serde(default)]
    is_active: Option<bool>,
}

pub struct MongoEndpointRegistry {
    collection: Collection<EndpointDocument>,
}

impl MongoEndpointRegistry {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, RpcError> {
        let mut options =
            ClientOptions::parse(uri).await.map_err(|e| RpcError::RegistryUnavailable(e.to_string()))?;
        options.server_selection_timeout = Some(Duration::from_secs(5));
        options.app_name = Some("rollout-orchestrator".to_string());

        let client = Client::with_options(options).map_err(|e| RpcError::RegistryUnavailable(e.to_string()))?;
        let collection = client.database(database).collection::<EndpointDocument>(ENDPOINT_COLLECTION);
        Ok(Self { collection })
    }
}

#[async_trait]
impl EndpointRegistry for MongoEndpointRegistry {
    async fn endpoints_for(&self, target_id: &str) -> Result<Vec<RpcEndpoint>, RpcError> {
        let cursor = self
            .collection
            .find(doc! { "chainName": target_id }, None)
            .await
            .map_err(|e| RpcError::RegistryUnavailable(e.to_string()))?;
        let documents: Vec<EndpointDocument> =
            cursor.try_collect().await.map_err(|e| RpcError::RegistryUnavailable(e.to_string()))?;

        debug!(chain = %target_id, count = documents.len(), "Fetched endpoints from registry");

        Ok(documents
            .into_iter()
            .map(|d| {
                RpcEndpoint::new(d.url, EndpointOrigin::ExternalRegistry)
                    .with_priority(d.priority)
                    .with_active(d.is_active)
            })
            .collect())
    }
}
