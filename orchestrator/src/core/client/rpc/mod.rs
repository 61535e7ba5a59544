pub mod endpoints;
pub mod error;
pub mod registry;
pub mod transport;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

pub use endpoints::{EndpointResolver, RpcSource};
pub use error::{is_transient_message, RpcError};
pub use registry::{EndpointRegistry, MongoEndpointRegistry};
pub use transport::{HttpTransportFactory, RetryPolicy, RpcTransport, TransportFactory};

use crate::types::{RpcEndpoint, TargetConfig};

/// An open, resilient channel to one target.
pub struct RpcConnection {
    target_id: String,
    transport: Arc<dyn RpcTransport>,
    endpoints: Vec<RpcEndpoint>,
}

impl std::fmt::Debug for RpcConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcConnection")
            .field("target_id", &self.target_id)
            .field("transport", &self.transport.describe())
            .finish()
    }
}

impl RpcConnection {
    pub fn new(target_id: impl Into<String>, transport: Arc<dyn RpcTransport>, endpoints: Vec<RpcEndpoint>) -> Self {
        Self { target_id: target_id.into(), transport, endpoints }
    }

    pub fn endpoints(&self) -> &[RpcEndpoint] {
        &self.endpoints
    }

    pub async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.transport.request(method, params).await
    }

    /// Deployed bytecode at `address` on the latest block, as returned by the node.
    pub async fn get_code(&self, address: &str) -> Result<String, RpcError> {
        let code = self.request("eth_getCode", json!([address, "latest"])).await?;
        code.as_str()
            .map(str::to_string)
            .ok_or_else(|| RpcError::MalformedResponse(format!("eth_getCode returned {}", code)))
    }

    pub async fn chain_id(&self) -> Result<u64, RpcError> {
        let value = self.request("eth_chainId", json!([])).await?;
        let hex = value
            .as_str()
            .ok_or_else(|| RpcError::MalformedResponse(format!("eth_chainId returned {}", value)))?;
        u64::from_str_radix(hex.trim_start_matches("0x"), 16)
            .map_err(|e| RpcError::MalformedResponse(format!("eth_chainId returned '{}': {}", hex, e)))
    }
}

/// True when bytecode is present: not empty, not `0x`, not all zeroes.
pub fn has_code(bytecode: &str) -> bool {
    let digits = bytecode.trim().trim_start_matches("0x");
    !digits.is_empty() && digits.chars().any(|c| c != '0')
}

/// Resolves endpoints per target and caches one connection per target id.
pub struct ConnectionPool {
    resolver: EndpointResolver,
    factory: Arc<dyn TransportFactory>,
    policy: RetryPolicy,
    connections: Mutex<HashMap<String, Arc<OnceCell<Arc<RpcConnection>>>>>,
}

impl ConnectionPool {
    pub fn new(resolver: EndpointResolver, policy: RetryPolicy) -> Self {
        Self::with_factory(resolver, policy, Arc::new(HttpTransportFactory::default()))
    }

    pub fn with_factory(resolver: EndpointResolver, policy: RetryPolicy, factory: Arc<dyn TransportFactory>) -> Self {
        Self { resolver, factory, policy, connections: Mutex::new(HashMap::new()) }
    }

    pub async fn get_endpoints(&self, target: &TargetConfig) -> Result<Vec<RpcEndpoint>, RpcError> {
        self.resolver.resolve(target).await
    }

    /// Same as [`Self::get_endpoints`] but never fails, for diagnostics.
    pub async fn describe_endpoints(&self, target: &TargetConfig) -> Vec<RpcEndpoint> {
        match self.resolver.resolve(target).await {
            Ok(endpoints) => endpoints,
            Err(e) => {
                warn!(chain = %target.id, error = %e, "Could not resolve endpoints");
                Vec::new()
            }
        }
    }

    /// Cached connection for the target, built on first use.
    ///
    /// A failed build is not cached, the next call tries again.
    pub async fn get_connection(&self, target: &TargetConfig) -> Result<Arc<RpcConnection>, RpcError> {
        let cell = {
            let mut connections = self.connections.lock().await;
            connections.entry(target.id.clone()).or_default().clone()
        };

        cell.get_or_try_init(|| async {
            let endpoints = self.resolver.resolve(target).await?;
            let transport = transport::build_transport(&endpoints, self.factory.as_ref(), &self.policy)?;
            info!(
                chain = %target.id,
                source = %self.resolver.source(),
                endpoints = endpoints.len(),
                transport = %transport.describe(),
                "Connection ready"
            );
            Ok(Arc::new(RpcConnection::new(target.id.clone(), transport, endpoints)))
        })
        .await
        .cloned()
    }

    /// Fetch live bytecode at `address` on the target.
    pub async fn probe(&self, target: &TargetConfig, address: &str) -> Result<String, RpcError> {
        let connection = self.get_connection(target).await?;
        let code = connection.get_code(address).await?;
        debug!(chain = %target.id, address, code_len = code.len(), "Probed bytecode");
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::common::{fixed_env, target, StubTransportFactory};
    use rstest::rstest;
    use std::time::Duration;

    fn pool(factory: Arc<StubTransportFactory>, env: &[(&str, &str)]) -> ConnectionPool {
        let resolver = EndpointResolver::new(RpcSource::Direct).with_env_reader(fixed_env(env));
        let policy = RetryPolicy { retries: 0, base_delay: Duration::from_millis(1), timeout: Duration::from_secs(1) };
        ConnectionPool::with_factory(resolver, policy, factory)
    }

    #[rstest]
    #[case("0x", false)]
    #[case("", false)]
    #[case("0x0000", false)]
    #[case("0x6001", true)]
    #[case("0x60806040", true)]
    fn bytecode_presence(#[case] code: &str, #[case] expected: bool) {
        assert_eq!(has_code(code), expected);
    }

    #[tokio::test]
    async fn connections_are_cached_per_target() {
        let factory = Arc::new(StubTransportFactory::default());
        let pool = pool(factory.clone(), &[("ETH_NODE_URI_MAINNET", "https://mainnet.example")]);
        let mainnet = target("mainnet", "cancun");

        let first = pool.get_connection(&mainnet).await.unwrap();
        let second = pool.get_connection(&mainnet).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.created(), 1);
    }

    #[tokio::test]
    async fn failed_connection_is_not_cached() {
        let factory = Arc::new(StubTransportFactory::default());
        let pool = pool(factory.clone(), &[]);

        assert!(pool.get_connection(&target("mainnet", "cancun")).await.is_err());
        assert!(pool.get_connection(&target("mainnet", "cancun")).await.is_err());
        assert_eq!(factory.created(), 0);
    }

    #[tokio::test]
    async fn describe_endpoints_never_fails() {
        let pool = pool(Arc::new(StubTransportFactory::default()), &[]);
        assert!(pool.describe_endpoints(&target("mainnet", "cancun")).await.is_empty());
    }

    #[tokio::test]
    async fn probe_and_chain_id_use_the_connection() {
        let factory = Arc::new(StubTransportFactory::default().with_code("https://mainnet.example", "0x6001"));
        let pool = pool(factory, &[("ETH_NODE_URI_MAINNET", "https://mainnet.example")]);
        let mainnet = target("mainnet", "cancun");

        assert_eq!(pool.probe(&mainnet, "0x1111111111111111111111111111111111111111").await.unwrap(), "0x6001");
        assert_eq!(pool.get_connection(&mainnet).await.unwrap().chain_id().await.unwrap(), 1);
    }
}
