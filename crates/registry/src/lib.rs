//! # Chassis Registry
//!
//! Process-wide mapping from `(Api, Model)` to driver constructors and
//! config converters, from `Api` to RPC/status adapters, and the ordered
//! list of associated-config adapters. Driver modules populate the global
//! registry at startup; the reconfigurator consults it when building
//! resources.

pub mod registration;
pub mod registry;

pub use registration::{
    ApiRegistration, AssociatedConfigRegistration, AttributeConverter, Constructor,
    MethodDescriptor, Registration, native_config,
};
pub use registry::{Registry, RegistryScope, global};
