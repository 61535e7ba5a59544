pub mod endpoint;
pub mod target;
pub mod tracking;

pub use endpoint::{EndpointOrigin, RpcEndpoint};
pub use target::{TargetConfig, TargetStatus};
pub use tracking::{TrackingEntry, TrackingStatus};

/// Environment whose deployment records are used when none is given
pub const DEFAULT_ENVIRONMENT: &str = "production";
