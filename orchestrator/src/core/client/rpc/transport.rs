use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::error::RpcError;
use crate::types::RpcEndpoint;

/// Retry and timeout knobs shared by every endpoint of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one, per endpoint
    pub retries: u32,
    pub base_delay: Duration,
    /// Applied to every single call
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { retries: 3, base_delay: Duration::from_millis(500), timeout: Duration::from_secs(20) }
    }
}

impl RetryPolicy {
    /// `max(base, base * 2^attempt)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.min(16));
        self.base_delay.saturating_mul(factor).max(self.base_delay)
    }
}

/// A single JSON-RPC capable channel.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError>;

    /// Human readable description used in logs
    fn describe(&self) -> String;
}

/// Builds the leaf transport for one endpoint.
pub trait TransportFactory: Send + Sync {
    fn create(&self, endpoint: &RpcEndpoint) -> Result<Arc<dyn RpcTransport>, RpcError>;
}

/// JSON-RPC 2.0 over HTTP(S)
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self { client, url: url.into(), next_id: AtomicU64::new(1) }
    }

    fn map_reqwest_error(&self, error: reqwest::Error) -> RpcError {
        // The client's own timeout reports no duration, only RetryTransport's does
        let mut message = if error.is_timeout() {
            format!("request to {} timed out in the HTTP client: {}", self.url, error)
        } else {
            error.to_string()
        };
        // reqwest's top level message hides the cause (refused, dns, reset), walk the chain
        let mut source = std::error::Error::source(&error);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        RpcError::Transport(message)
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });

        let response =
            self.client.post(&self.url).json(&body).send().await.map_err(|e| self.map_reqwest_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::HttpStatus {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_string(),
                url: self.url.clone(),
            });
        }

        let payload: Value = response.json().await.map_err(|e| RpcError::MalformedResponse(e.to_string()))?;
        if let Some(error) = payload.get("error") {
            return Err(RpcError::Rpc {
                code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
                message: error.get("message").and_then(Value::as_str).unwrap_or_default().to_string(),
            });
        }
        payload
            .get("result")
            .cloned()
            .ok_or_else(|| RpcError::MalformedResponse(format!("no result in response from {}", self.url)))
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Default factory, one shared `reqwest` client for every endpoint.
#[derive(Debug, Clone, Default)]
pub struct HttpTransportFactory {
    client: reqwest::Client,
}

impl HttpTransportFactory {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl TransportFactory for HttpTransportFactory {
    fn create(&self, endpoint: &RpcEndpoint) -> Result<Arc<dyn RpcTransport>, RpcError> {
        url::Url::parse(&endpoint.url)
            .map_err(|e| RpcError::Transport(format!("invalid endpoint url '{}': {}", endpoint.url, e)))?;
        Ok(Arc::new(HttpTransport::new(self.client.clone(), endpoint.url.clone())))
    }
}

/// Applies the per-call timeout and retries transient failures against one endpoint.
pub struct RetryTransport {
    inner: Arc<dyn RpcTransport>,
    policy: RetryPolicy,
}

impl RetryTransport {
    pub fn new(inner: Arc<dyn RpcTransport>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl RpcTransport for RetryTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let mut last_error = RpcError::Transport(format!("no attempt made against {}", self.inner.describe()));

        for attempt in 0..=self.policy.retries {
            let call = tokio::time::timeout(self.policy.timeout, self.inner.request(method, params.clone()));
            let result = match call.await {
                Ok(result) => result,
                Err(_) => Err(RpcError::Timeout {
                    url: self.inner.describe(),
                    timeout_ms: self.policy.timeout.as_millis() as u64,
                }),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(error) if !error.is_transient() => return Err(error),
                Err(error) => {
                    if attempt < self.policy.retries {
                        let delay = self.policy.delay_for(attempt);
                        debug!(
                            endpoint = %self.inner.describe(),
                            method,
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "Transient RPC failure, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last_error = error;
                }
            }
        }

        Err(last_error)
    }

    fn describe(&self) -> String {
        self.inner.describe()
    }
}

/// Tries endpoints in order, failing over only on transient errors.
pub struct FallbackTransport {
    members: Vec<RetryTransport>,
}

impl FallbackTransport {
    pub fn new(members: Vec<RetryTransport>) -> Self {
        Self { members }
    }
}

#[async_trait]
impl RpcTransport for FallbackTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let mut last_error = RpcError::Transport("fallback transport has no endpoints".to_string());

        for member in &self.members {
            match member.request(method, params.clone()).await {
                Ok(value) => return Ok(value),
                Err(error) if !error.is_transient() => return Err(error),
                Err(error) => {
                    warn!(endpoint = %member.describe(), method, error = %error, "Endpoint exhausted, failing over");
                    last_error = error;
                }
            }
        }

        Err(RpcError::Exhausted { endpoints: self.members.len(), last: Box::new(last_error) })
    }

    fn describe(&self) -> String {
        let urls: Vec<_> = self.members.iter().map(|m| m.describe()).collect();
        format!("fallback[{}]", urls.join(", "))
    }
}

/// One endpoint yields a direct (retrying) transport, several yield a fan-out transport.
pub fn build_transport(
    endpoints: &[RpcEndpoint],
    factory: &dyn TransportFactory,
    policy: &RetryPolicy,
) -> Result<Arc<dyn RpcTransport>, RpcError> {
    let mut members = endpoints
        .iter()
        .map(|endpoint| Ok(RetryTransport::new(factory.create(endpoint)?, policy.clone())))
        .collect::<Result<Vec<_>, RpcError>>()?;

    match members.len() {
        0 => Err(RpcError::Transport("no endpoints to build a transport from".to_string())),
        1 => Ok(Arc::new(members.remove(0))),
        _ => Ok(Arc::new(FallbackTransport::new(members))),
    }
}
