//! # Chassis Core
//!
//! Core types and traits for the chassis robotics runtime.
//! This crate provides the fundamental building blocks used by all other
//! chassis crates: resource names and models, the configuration data model,
//! the `Resource` trait family, per-API resource collections, and the shared
//! error taxonomy.

pub mod collection;
pub mod config;
pub mod context;
pub mod error;
pub mod name;
pub mod resource;

// Re-exports
pub use collection::Collection;
pub use config::{
    AssociatedResourceConfig, AttributeMap, FrameConfig, ProcessConfig, RemoteConfig,
    ResourceConfig, RuntimeConfig,
};
pub use context::Context;
pub use error::{Error, Result};
pub use name::{Api, ApiModel, ApiType, Model, Name};
pub use resource::{
    Actuator, AssociatedAttributes, AssociatedNameUpdater, Dependencies, DependencyMatcher,
    ModelFramer, Resource,
};
