//! Error taxonomy shared by the lifecycle graph, registry, and runtime.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::name::{Api, Name};

/// Result type for resource operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced while tracking, building, and serving resources.
///
/// Variants are `Clone` so a node can hold its last error while readers
/// receive the same value; nested causes are shared via `Arc` and folded
/// into `Display`, which pretty-prints dependency chains recursively.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// No such registered resource or runtime instance.
    #[error("resource \"{name}\" not found")]
    NotFound { name: Name },

    /// The instance exists but is unhealthy or being removed.
    #[error("resource \"{name}\" not available: {cause}")]
    NotAvailable { name: Name, cause: Arc<Error> },

    /// Returned from `reconfigure` to demand reconstruction.
    #[error("resource \"{name}\" must be rebuilt")]
    MustRebuild { name: Name },

    /// Construction or reconfiguration exceeded its deadline.
    #[error("building resource \"{name}\" exceeded the {timeout:?} deadline")]
    BuildTimeout { name: Name, timeout: Duration },

    /// A declared dependency references a name the graph does not know.
    #[error("resource \"{name}\" depends on unknown resource \"{dependency}\"")]
    DependencyNotFound { name: Name, dependency: String },

    /// A dependency exists but is itself unhealthy; the chain recurses
    /// through `cause`.
    #[error("resource \"{name}\" dependency not ready: {cause}")]
    DependencyNotReady { name: Name, cause: Arc<Error> },

    /// A dependency name matched more than one resource.
    #[error("resource \"{name}\" dependency \"{dependency}\" is ambiguous: matches {matches:?}")]
    AmbiguousDependency {
        name: Name,
        dependency: String,
        matches: Vec<Name>,
    },

    /// The retrieved resource does not implement the expected capability.
    #[error("expected resource to implement {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: String,
    },

    /// The identifier violates the name grammar.
    #[error("invalid name \"{name}\": {reason}")]
    InvalidName { name: String, reason: String },

    /// The model string violates the model grammar.
    #[error("invalid model \"{model}\": {reason}")]
    InvalidModel { model: String, reason: String },

    /// The reserved `:` appeared inside an identifier segment.
    #[error("reserved character \":\" in identifier segment \"{segment}\"")]
    ReservedCharacter { segment: String },

    /// The node has never held a constructed resource.
    #[error("resource \"{name}\" not initialized")]
    NotInitialized { name: Name },

    /// The node is marked for removal; reads are refused.
    #[error("resource \"{name}\" pending removal")]
    PendingRemoval { name: Name },

    /// More instances of an API than its registration permits.
    #[error("api \"{api}\" allows at most {max} instances")]
    MaxInstances { api: Api, max: usize },

    /// A graph node's parent set references a name not in the graph.
    #[error("resource \"{child}\" references unknown parent \"{parent}\"")]
    MissingParent { child: Name, parent: Name },

    /// Adding an edge (or sorting) found a dependency cycle.
    #[error("circular dependency detected at \"{name}\"")]
    CycleDetected { name: Name },

    /// A malformed configuration document or entry.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// A failure reported by the resource implementation itself.
    #[error("resource \"{name}\": {message}")]
    Resource { name: Name, message: String },
}

impl Error {
    /// Wrap a driver-supplied failure message against a resource.
    pub fn resource(name: Name, message: impl Into<String>) -> Self {
        Self::Resource {
            name,
            message: message.into(),
        }
    }

    /// A malformed-configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Wrap `cause` as the reason `name` cannot be served.
    #[must_use]
    pub fn not_available(name: Name, cause: Self) -> Self {
        Self::NotAvailable {
            name,
            cause: Arc::new(cause),
        }
    }

    /// Wrap `cause` as the reason a dependency of `name` is not ready.
    #[must_use]
    pub fn dependency_not_ready(name: Name, cause: Self) -> Self {
        Self::DependencyNotReady {
            name,
            cause: Arc::new(cause),
        }
    }

    /// Whether this error is the rebuild-demand signal.
    #[must_use]
    pub fn is_must_rebuild(&self) -> bool {
        matches!(self, Self::MustRebuild { .. })
    }

    /// The name this error is about, if it carries one.
    #[must_use]
    pub fn resource_name(&self) -> Option<&Name> {
        match self {
            Self::NotFound { name }
            | Self::NotAvailable { name, .. }
            | Self::MustRebuild { name }
            | Self::BuildTimeout { name, .. }
            | Self::DependencyNotFound { name, .. }
            | Self::DependencyNotReady { name, .. }
            | Self::AmbiguousDependency { name, .. }
            | Self::NotInitialized { name }
            | Self::PendingRemoval { name }
            | Self::Resource { name, .. } => Some(name),
            Self::CycleDetected { name } => Some(name),
            Self::MissingParent { child, .. } => Some(child),
            Self::TypeMismatch { .. }
            | Self::InvalidName { .. }
            | Self::InvalidModel { .. }
            | Self::ReservedCharacter { .. }
            | Self::MaxInstances { .. }
            | Self::Configuration { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::Api;

    fn name(local: &str) -> Name {
        Name::new(Api::new_component("motor"), local)
    }

    #[test]
    fn dependency_chain_pretty_prints_recursively() {
        let root = Error::resource(name("b"), "broken encoder");
        let mid = Error::dependency_not_ready(name("a"), root);
        let top = Error::dependency_not_ready(name("top"), mid);

        let rendered = top.to_string();
        assert!(rendered.contains("\"chassis:component:motor/top\""));
        assert!(rendered.contains("\"chassis:component:motor/a\""));
        assert!(rendered.contains("broken encoder"));
    }

    #[test]
    fn must_rebuild_is_detectable() {
        let err = Error::MustRebuild { name: name("m1") };
        assert!(err.is_must_rebuild());
        assert!(!Error::NotFound { name: name("m1") }.is_must_rebuild());
    }

    #[test]
    fn resource_name_present_for_instance_errors() {
        assert_eq!(
            Error::NotFound { name: name("x") }.resource_name(),
            Some(&name("x"))
        );
        assert!(Error::configuration("bad").resource_name().is_none());
    }

    #[test]
    fn errors_clone_shares_cause() {
        let err = Error::not_available(name("m1"), Error::resource(name("m1"), "boom"));
        let cloned = err.clone();
        assert_eq!(err.to_string(), cloned.to_string());
    }
}
