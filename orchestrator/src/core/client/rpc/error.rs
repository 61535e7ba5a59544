use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum RpcError {
    /// No endpoint could be resolved for the target
    #[error("missing endpoint for {target}: {reason}")]
    MissingEndpoint { target: String, reason: String },

    #[error("endpoint registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("request to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("HTTP {status} {reason} from {url}")]
    HttpStatus { status: u16, reason: String, url: String },

    #[error("transport error: {0}")]
    Transport(String),

    /// JSON-RPC error object returned by the node
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("all {endpoints} endpoint(s) exhausted, last error: {last}")]
    Exhausted { endpoints: usize, last: Box<RpcError> },
}

impl RpcError {
    pub fn is_transient(&self) -> bool {
        is_transient_message(&self.to_string())
    }
}

fn transient_markers() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"(?i)(timeout|timed out|etimedout|econnreset|connection reset|socket hang up",
            r"|econnrefused|connection refused|enotfound|eai_again|dns|getaddrinfo",
            r"|\b502\b|\b503\b|\b504\b|bad gateway|service unavailable|gateway timeout",
            r"|\b429\b|too many requests|rate limit|rate-limit)",
        ))
        .expect("transient marker pattern is valid")
    })
}

fn terminal_markers() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(execution reverted|revert|invalid argument|invalid params|invalid_argument)")
            .expect("terminal marker pattern is valid")
    })
}

/// Classify an error message as transient (worth retrying or failing over).
///
/// Terminal markers take precedence: a reverted call that also mentions a
/// timeout is still terminal.
pub fn is_transient_message(message: &str) -> bool {
    if terminal_markers().is_match(message) {
        return false;
    }
    transient_markers().is_match(message)
}
