pub mod actions;
pub mod build_profile;
pub mod client;
pub mod deployments;
pub mod grouping;
pub mod registry;
pub mod selector;
pub mod tracking;
