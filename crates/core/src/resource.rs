//! The `Resource` trait family and the dependency map handed to
//! constructors.
//!
//! A resource is any instantiated device or service tracked by the graph.
//! Capabilities beyond the base lifecycle — stopping, frame models,
//! associated-config updates — are independent traits queried at runtime,
//! because registries cannot statically enumerate the driver set.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{AttributeMap, ResourceConfig};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::name::Name;

/// Upcast support for every resource, so capability-typed handles can be
/// recovered from `Arc<dyn Resource>`.
pub trait AsAny: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Any instantiated device or service tracked by the graph.
///
/// Implementations keep their own interior mutability; the runtime only
/// ever holds shared handles. The default `reconfigure` demands a rebuild,
/// which is the correct behavior for drivers that cannot change in place.
#[async_trait]
pub trait Resource: AsAny {
    /// The canonical name this instance was constructed under.
    fn name(&self) -> Name;

    /// Apply a new configuration in place. Returning
    /// [`Error::MustRebuild`] tells the reconfigurator to tear this
    /// instance down and construct a replacement instead.
    async fn reconfigure(
        &self,
        ctx: &Context,
        deps: &Dependencies,
        config: &ResourceConfig,
    ) -> Result<()> {
        let _ = (ctx, deps, config);
        Err(Error::MustRebuild { name: self.name() })
    }

    /// Release everything the instance holds. Called exactly once per
    /// constructed handle; the owning node guarantees it never runs under
    /// the node lock.
    async fn close(&self, ctx: &Context) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// This instance's stoppable capability, if it has one. Only resources
    /// returning `Some` are halted by the session manager.
    fn as_actuator(&self) -> Option<&dyn Actuator> {
        None
    }

    /// Kinematic self-description for the frame system, if any.
    fn as_model_framer(&self) -> Option<&dyn ModelFramer> {
        None
    }

    /// Receiver for associated configs declared by other resources, if any.
    fn as_associated_name_updater(&self) -> Option<&dyn AssociatedNameUpdater> {
        None
    }
}

/// A resource that can be commanded to halt all motion.
#[async_trait]
pub trait Actuator: Send + Sync {
    /// Stop the actuator. `extra` carries transport-supplied hints and may
    /// be absent.
    async fn stop(&self, ctx: &Context, extra: Option<AttributeMap>) -> Result<()>;
}

/// A resource that can describe its own kinematic model. The payload is
/// opaque to the core; the kinematics library interprets it.
pub trait ModelFramer: Send + Sync {
    fn model_frame(&self) -> Option<serde_json::Value>;
}

/// Payload another resource's config attached to this one, already run
/// through the per-API adapter from the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct AssociatedAttributes {
    /// The resource whose config carried the payload.
    pub source: Name,
    pub attributes: AttributeMap,
}

/// A resource that consumes associated configs declared by other
/// resources' entries (e.g. a collector service told which components to
/// sample).
pub trait AssociatedNameUpdater: Send + Sync {
    fn update_associated_configs(&self, configs: Vec<AssociatedAttributes>);
}

// ---------------------------------------------------------------------------
// Weak dependencies
// ---------------------------------------------------------------------------

/// A dependency declared as a predicate over other resources rather than a
/// specific name (e.g. "every camera component"). The matching set is
/// recomputed whenever the graph changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyMatcher {
    /// Every resource of the given API.
    Api(crate::name::Api),
    /// Every resource of the given type regardless of subtype.
    ApiType(crate::name::ApiType),
}

impl DependencyMatcher {
    #[must_use]
    pub fn matches(&self, name: &Name) -> bool {
        match self {
            Self::Api(api) => &name.api == api,
            Self::ApiType(api_type) => name.api.api_type == *api_type,
        }
    }
}

// ---------------------------------------------------------------------------
// Dependencies
// ---------------------------------------------------------------------------

/// Concrete resource handles a constructor receives for every resolved
/// dependency. Keys are fully-qualified names; values are live handles,
/// never graph nodes.
#[derive(Default, Clone)]
pub struct Dependencies {
    map: HashMap<Name, Arc<dyn Resource>>,
}

impl Dependencies {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: Name, resource: Arc<dyn Resource>) {
        self.map.insert(name, resource);
    }

    /// Look up a dependency handle, failing with `NotFound`.
    pub fn lookup(&self, name: &Name) -> Result<Arc<dyn Resource>> {
        self.map
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound { name: name.clone() })
    }

    /// Look up a dependency and downcast it to its concrete type.
    pub fn lookup_as<T: Resource>(&self, name: &Name) -> Result<Arc<T>> {
        let resource = self.lookup(name)?;
        resource
            .into_any()
            .downcast::<T>()
            .map_err(|_| Error::TypeMismatch {
                expected: std::any::type_name::<T>(),
                actual: name.to_string(),
            })
    }

    #[must_use]
    pub fn get(&self, name: &Name) -> Option<&Arc<dyn Resource>> {
        self.map.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &Name> {
        self.map.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Name, &Arc<dyn Resource>)> {
        self.map.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl std::fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.map.keys()).finish()
    }
}

impl FromIterator<(Name, Arc<dyn Resource>)> for Dependencies {
    fn from_iter<I: IntoIterator<Item = (Name, Arc<dyn Resource>)>>(iter: I) -> Self {
        Self {
            map: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::Api;

    #[derive(Debug)]
    struct FakeMotor {
        name: Name,
    }

    #[async_trait]
    impl Resource for FakeMotor {
        fn name(&self) -> Name {
            self.name.clone()
        }

        fn as_actuator(&self) -> Option<&dyn Actuator> {
            Some(self)
        }
    }

    #[async_trait]
    impl Actuator for FakeMotor {
        async fn stop(&self, _ctx: &Context, _extra: Option<AttributeMap>) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Debug)]
    struct FakeCamera {
        name: Name,
    }

    #[async_trait]
    impl Resource for FakeCamera {
        fn name(&self) -> Name {
            self.name.clone()
        }
    }

    fn motor_name() -> Name {
        Name::new(Api::new_component("motor"), "m1")
    }

    fn deps() -> Dependencies {
        let mut deps = Dependencies::new();
        deps.insert(
            motor_name(),
            Arc::new(FakeMotor { name: motor_name() }) as Arc<dyn Resource>,
        );
        deps
    }

    #[test]
    fn lookup_returns_the_handle() {
        let deps = deps();
        let res = deps.lookup(&motor_name()).unwrap();
        assert_eq!(res.name(), motor_name());
    }

    #[test]
    fn lookup_missing_is_not_found() {
        let deps = Dependencies::new();
        let err = deps.lookup(&motor_name()).err().unwrap();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn typed_lookup_downcasts() {
        let deps = deps();
        let motor: Arc<FakeMotor> = deps.lookup_as(&motor_name()).unwrap();
        assert_eq!(motor.name, motor_name());
    }

    #[test]
    fn typed_lookup_mismatch_reports_expected_type() {
        let deps = deps();
        let err = deps.lookup_as::<FakeCamera>(&motor_name()).err().unwrap();
        match err {
            Error::TypeMismatch { expected, actual } => {
                assert!(expected.contains("FakeCamera"));
                assert_eq!(actual, motor_name().to_string());
            }
            other => panic!("expected TypeMismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn default_reconfigure_demands_rebuild() {
        let motor = FakeMotor { name: motor_name() };
        let cfg = ResourceConfig::new(
            Api::new_component("motor"),
            crate::name::Model::builtin("fake"),
            "m1",
        );
        let err = motor
            .reconfigure(&Context::new(), &Dependencies::new(), &cfg)
            .await
            .unwrap_err();
        assert!(err.is_must_rebuild());
    }

    #[test]
    fn capability_queries_default_to_none() {
        let cam = FakeCamera {
            name: Name::new(Api::new_component("camera"), "c1"),
        };
        assert!(cam.as_actuator().is_none());
        assert!(cam.as_model_framer().is_none());
        assert!(cam.as_associated_name_updater().is_none());
    }

    #[test]
    fn actuator_capability_is_queryable_through_dyn() {
        let res: Arc<dyn Resource> = Arc::new(FakeMotor { name: motor_name() });
        assert!(res.as_actuator().is_some());
    }

    #[test]
    fn matchers_select_by_api_and_type() {
        use crate::name::ApiType;

        let motor = motor_name();
        let camera = Name::new(Api::new_component("camera"), "c1");
        let motion = Name::new(Api::new_service("motion"), "builtin");

        let all_cameras = DependencyMatcher::Api(Api::new_component("camera"));
        assert!(all_cameras.matches(&camera));
        assert!(!all_cameras.matches(&motor));

        let all_components = DependencyMatcher::ApiType(ApiType::Component);
        assert!(all_components.matches(&motor));
        assert!(all_components.matches(&camera));
        assert!(!all_components.matches(&motion));
    }
}
