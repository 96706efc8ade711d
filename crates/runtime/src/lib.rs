//! # Chassis Runtime
//!
//! The reconfigurator and runtime-level resource manager.
//!
//! This crate provides:
//! - [`ResourceManager`] — owns the resource graph, runs the reconfigure
//!   pipeline, serves lookups and status, and tears the machine down
//! - [`ConfigDiff`] — classifies a desired configuration against the live
//!   graph into additions, modifications, and removals
//! - per-resource build timeouts with an environment override
//!
//! The manager sits between the configuration source (which pushes desired
//! state) and the drivers (constructed through the registry). Partial
//! configuration is the norm: the pipeline always publishes a consistent
//! graph, with per-node failures observable through status rather than
//! aborting the run.

pub mod diff;
pub mod manager;
pub mod timeout;

pub use diff::{ConfigDiff, ProcessChanges};
pub use manager::{ManagerOptions, ResourceManager};
pub use timeout::{
    DEFAULT_RESOURCE_CONFIGURATION_TIMEOUT, RESOURCE_CONFIGURATION_TIMEOUT_ENV,
    resource_configuration_timeout,
};
