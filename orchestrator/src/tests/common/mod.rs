use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use color_eyre::eyre::eyre;
use serde_json::{json, Value};

use crate::core::actions::{Action, ActionContext, ActionOutcome};
use crate::core::build_profile::{BuildRunner, ProfileError};
use crate::core::client::rpc::endpoints::EnvReader;
use crate::core::client::rpc::{
    ConnectionPool, EndpointRegistry, EndpointResolver, RetryPolicy, RpcConnection, RpcError, RpcSource,
    RpcTransport, TransportFactory,
};
use crate::core::deployments::{DeploymentError, DeploymentLookup, DeploymentRecord};
use crate::types::{RpcEndpoint, TargetConfig, TargetStatus, DEFAULT_ENVIRONMENT};

/// Active, non-special target on chain 1.
pub fn target(id: &str, compatibility: &str) -> TargetConfig {
    TargetConfig {
        id: id.to_string(),
        chain_id: 1,
        compatibility: compatibility.to_string(),
        special: false,
        rpc_url: String::new(),
        status: TargetStatus::Active,
    }
}

pub fn fixed_env(vars: &[(&str, &str)]) -> EnvReader {
    let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    Arc::new(move |name| vars.get(name).cloned())
}

pub fn fast_policy() -> RetryPolicy {
    RetryPolicy { retries: 0, base_delay: Duration::from_millis(1), timeout: Duration::from_secs(5) }
}

/// Pool resolving endpoints from `env` only, with transports from `factory`.
pub fn direct_pool(factory: Arc<StubTransportFactory>, source: RpcSource, env: &[(&str, &str)]) -> ConnectionPool {
    let resolver = EndpointResolver::new(source).with_env_reader(fixed_env(env));
    ConnectionPool::with_factory(resolver, fast_policy(), factory)
}

#[derive(Debug, Clone)]
enum Script {
    Respond,
    FailTimes(usize, String),
    AlwaysFail(String),
}

/// In-memory transport answering from a script.
///
/// Calls are counted when they start, so timed out calls count too.
pub struct ScriptedTransport {
    url: String,
    script: Script,
    default_response: Value,
    responses: HashMap<String, Value>,
    latency: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            script: Script::Respond,
            default_response: json!("0x1"),
            responses: HashMap::new(),
            latency: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn fail_times(mut self, times: usize, message: &str) -> Self {
        self.script = Script::FailTimes(times, message.to_string());
        self
    }

    pub fn always_fail(mut self, message: &str) -> Self {
        self.script = Script::AlwaysFail(message.to_string());
        self
    }

    /// Response for every method without a specific one
    pub fn returning(mut self, value: Value) -> Self {
        self.default_response = value;
        self
    }

    pub fn respond(mut self, method: &str, value: Value) -> Self {
        self.responses.insert(method.to_string(), value);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RpcTransport for ScriptedTransport {
    async fn request(&self, method: &str, _params: Value) -> Result<Value, RpcError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        match &self.script {
            Script::AlwaysFail(message) => return Err(RpcError::Rpc { code: -32000, message: message.clone() }),
            Script::FailTimes(times, message) if call < *times => {
                return Err(RpcError::Rpc { code: -32000, message: message.clone() })
            }
            _ => {}
        }
        Ok(self.responses.get(method).cloned().unwrap_or_else(|| self.default_response.clone()))
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Builds [`ScriptedTransport`]s, counting how many it created.
#[derive(Default)]
pub struct StubTransportFactory {
    code: HashMap<String, String>,
    failing: HashMap<String, String>,
    created: AtomicUsize,
    transports: Mutex<HashMap<String, Arc<ScriptedTransport>>>,
}

impl StubTransportFactory {
    /// `eth_getCode` answer for `url`, `"0x"` otherwise
    pub fn with_code(mut self, url: &str, code: &str) -> Self {
        self.code.insert(url.to_string(), code.to_string());
        self
    }

    /// Every call to `url` fails with `message`
    pub fn failing(mut self, url: &str, message: &str) -> Self {
        self.failing.insert(url.to_string(), message.to_string());
        self
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Calls made through the transport built for `url`
    pub fn calls_to(&self, url: &str) -> usize {
        self.transports.lock().unwrap().get(url).map(|t| t.calls()).unwrap_or_default()
    }
}

impl TransportFactory for StubTransportFactory {
    fn create(&self, endpoint: &RpcEndpoint) -> Result<Arc<dyn RpcTransport>, RpcError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let code = self.code.get(&endpoint.url).cloned().unwrap_or_else(|| "0x".to_string());
        let mut transport = ScriptedTransport::new(endpoint.url.clone()).respond("eth_getCode", json!(code));
        if let Some(message) = self.failing.get(&endpoint.url) {
            transport = transport.always_fail(message);
        }
        let transport = Arc::new(transport);
        self.transports.lock().unwrap().insert(endpoint.url.clone(), transport.clone());
        Ok(transport)
    }
}

pub struct StaticEndpointRegistry {
    endpoints: Vec<RpcEndpoint>,
}

impl StaticEndpointRegistry {
    pub fn new(endpoints: Vec<RpcEndpoint>) -> Self {
        Self { endpoints }
    }
}

#[async_trait]
impl EndpointRegistry for StaticEndpointRegistry {
    async fn endpoints_for(&self, _target_id: &str) -> Result<Vec<RpcEndpoint>, RpcError> {
        Ok(self.endpoints.clone())
    }
}

#[derive(Default)]
pub struct StubBuildRunner {
    failure: Option<String>,
    builds: AtomicUsize,
}

impl StubBuildRunner {
    pub fn failing(output: &str) -> Self {
        Self { failure: Some(output.to_string()), builds: AtomicUsize::new(0) }
    }

    /// Rebuilds attempted so far
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BuildRunner for StubBuildRunner {
    async fn rebuild(&self) -> Result<(), ProfileError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(output) => Err(ProfileError::BuildFailed {
                command: "forge build".to_string(),
                status: "exit status: 1".to_string(),
                output: output.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// Deployment records keyed by target, the same for every environment.
#[derive(Default)]
pub struct InMemoryDeployments {
    records: HashMap<String, DeploymentRecord>,
}

impl InMemoryDeployments {
    pub fn with(mut self, target_id: &str, contract: &str, address: &str) -> Self {
        self.records.entry(target_id.to_string()).or_default().insert(contract.to_string(), address.to_string());
        self
    }
}

#[async_trait]
impl DeploymentLookup for InMemoryDeployments {
    async fn get_deployment(
        &self,
        target_id: &str,
        _environment: &str,
    ) -> Result<Option<DeploymentRecord>, DeploymentError> {
        Ok(self.records.get(target_id).cloned())
    }
}

/// Context for running an action against a scripted node reporting chain id 1.
pub fn action_context(
    target_id: &str,
    chain_id: u64,
    code: &str,
    deployments: InMemoryDeployments,
    named_parameter: Option<&str>,
) -> ActionContext {
    let mut target = target(target_id, "cancun");
    target.chain_id = chain_id;
    let transport = Arc::new(ScriptedTransport::new("https://scripted.example").respond("eth_getCode", json!(code)));
    ActionContext {
        target,
        environment: DEFAULT_ENVIRONMENT.to_string(),
        named_parameter: named_parameter.map(str::to_string),
        connection: Arc::new(RpcConnection::new(target_id, transport, Vec::new())),
        endpoints: Vec::new(),
        dry_run: false,
        deployments: Arc::new(deployments),
    }
}

/// Records how many actions run at once on each target, or across all
/// targets when built with [`OverlapTracker::across_targets`].
#[derive(Default)]
pub struct OverlapTracker {
    across_targets: bool,
    in_flight: Mutex<HashMap<String, usize>>,
    max_in_flight: Mutex<HashMap<String, usize>>,
}

const ALL_TARGETS: &str = "*";

impl OverlapTracker {
    pub fn across_targets() -> Self {
        Self { across_targets: true, ..Self::default() }
    }

    fn key<'a>(&self, target_id: &'a str) -> &'a str {
        if self.across_targets {
            ALL_TARGETS
        } else {
            target_id
        }
    }

    fn enter(&self, target_id: &str) {
        let key = self.key(target_id);
        let mut in_flight = self.in_flight.lock().unwrap();
        let current = in_flight.entry(key.to_string()).or_default();
        *current += 1;
        let mut max = self.max_in_flight.lock().unwrap();
        let peak = max.entry(key.to_string()).or_default();
        *peak = (*peak).max(*current);
    }

    fn exit(&self, target_id: &str) {
        if let Some(current) = self.in_flight.lock().unwrap().get_mut(self.key(target_id)) {
            *current -= 1;
        }
    }

    pub fn max_in_flight(&self, target_id: &str) -> usize {
        self.max_in_flight.lock().unwrap().get(self.key(target_id)).copied().unwrap_or_default()
    }

    /// Peak number of targets in flight at once, for trackers built with `across_targets`.
    pub fn max_targets_in_flight(&self) -> usize {
        self.max_in_flight(ALL_TARGETS)
    }
}

#[derive(Debug, Clone)]
enum Behavior {
    Succeed,
    Fail(String),
    Error(String),
    Panic(String),
}

/// Action that counts its runs and behaves as configured.
pub struct CountingAction {
    id: String,
    mutates: bool,
    named: bool,
    behavior: Behavior,
    failing_targets: HashSet<String>,
    delay: Option<Duration>,
    tracker: Option<Arc<OverlapTracker>>,
    calls: AtomicUsize,
    targets_seen: Mutex<BTreeMap<String, usize>>,
}

impl CountingAction {
    pub fn new(id: &str, mutates: bool) -> Self {
        Self {
            id: id.to_string(),
            mutates,
            named: false,
            behavior: Behavior::Succeed,
            failing_targets: HashSet::new(),
            delay: None,
            tracker: None,
            calls: AtomicUsize::new(0),
            targets_seen: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn with_named_parameter(mut self) -> Self {
        self.named = true;
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.behavior = Behavior::Fail(message.to_string());
        self
    }

    pub fn erroring(mut self, message: &str) -> Self {
        self.behavior = Behavior::Error(message.to_string());
        self
    }

    pub fn panicking(mut self, message: &str) -> Self {
        self.behavior = Behavior::Panic(message.to_string());
        self
    }

    /// Fail only on `target_id`, succeed elsewhere
    pub fn failing_on(mut self, target_id: &str) -> Self {
        self.failing_targets.insert(target_id.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_tracker(mut self, tracker: Arc<OverlapTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_on(&self, target_id: &str) -> usize {
        self.targets_seen.lock().unwrap().get(target_id).copied().unwrap_or_default()
    }
}

#[async_trait]
impl Action for CountingAction {
    fn id(&self) -> &str {
        &self.id
    }

    fn label(&self) -> &str {
        &self.id
    }

    fn mutates_state(&self) -> bool {
        self.mutates
    }

    fn requires_named_parameter(&self) -> bool {
        self.named
    }

    async fn run(&self, ctx: &ActionContext) -> color_eyre::Result<ActionOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.targets_seen.lock().unwrap().entry(ctx.target.id.clone()).or_default() += 1;

        if let Some(tracker) = &self.tracker {
            tracker.enter(&ctx.target.id);
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(tracker) = &self.tracker {
            tracker.exit(&ctx.target.id);
        }

        if self.failing_targets.contains(&ctx.target.id) {
            return Ok(ActionOutcome::failed(format!("{} failed on {}", self.id, ctx.target.id)));
        }
        match &self.behavior {
            Behavior::Succeed => Ok(ActionOutcome::success()),
            Behavior::Fail(message) => Ok(ActionOutcome::failed(message.clone())),
            Behavior::Error(message) => Err(eyre!("{}", message)),
            Behavior::Panic(message) => panic!("{}", message),
        }
    }
}
