use serde::{Deserialize, Serialize};

/// Where an endpoint was discovered.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum EndpointOrigin {
    /// Primary endpoint read from the target's environment variable
    Direct,
    /// Recovered from a commented-out line of the local env file
    FallbackList,
    /// Returned by the external endpoint registry
    ExternalRegistry,
    /// The `rpcUrl` shipped with the target registry
    TargetDefault,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RpcEndpoint {
    pub url: String,
    pub origin: EndpointOrigin,
    pub priority: Option<i64>,
    pub active: Option<bool>,
}

impl RpcEndpoint {
    pub fn new(url: impl Into<String>, origin: EndpointOrigin) -> Self {
        Self { url: url.into(), origin, priority: None, active: None }
    }

    pub fn with_priority(mut self, priority: Option<i64>) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_active(mut self, active: Option<bool>) -> Self {
        self.active = active;
        self
    }
}

/// Drop endpoints whose URL was already seen, keeping the first occurrence.
pub fn dedup_by_url(endpoints: Vec<RpcEndpoint>) -> Vec<RpcEndpoint> {
    let mut seen = std::collections::HashSet::new();
    endpoints.into_iter().filter(|e| seen.insert(e.url.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_keeps_first_occurrence_order() {
        let endpoints = vec![
            RpcEndpoint::new("https://a", EndpointOrigin::Direct),
            RpcEndpoint::new("https://b", EndpointOrigin::FallbackList),
            RpcEndpoint::new("https://a", EndpointOrigin::FallbackList),
        ];
        let deduped = dedup_by_url(endpoints);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].origin, EndpointOrigin::Direct);
        assert_eq!(deduped[1].url, "https://b");
    }
}
