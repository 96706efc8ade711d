//! Registration records: what a driver module hands the registry.

use std::any::{Any, TypeId};
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;

use chassis_core::config::{AttributeMap, ResourceConfig};
use chassis_core::error::{Error, Result};
use chassis_core::name::{Api, Name};
use chassis_core::resource::{AssociatedAttributes, Dependencies, DependencyMatcher, Resource};
use chassis_core::Context;

/// Erased async constructor invoked by the reconfigurator with concrete
/// dependency handles.
pub type Constructor = Arc<
    dyn Fn(Context, Dependencies, ResourceConfig) -> BoxFuture<'static, Result<Arc<dyn Resource>>>
        + Send
        + Sync,
>;

/// Converts a raw attribute map into the driver's typed config, kept as an
/// erased `Any` so the registry stays driver-agnostic.
pub type AttributeConverter =
    Arc<dyn Fn(&AttributeMap) -> Result<Arc<dyn Any + Send + Sync>> + Send + Sync>;

/// Builds the transport-side service adapter for one API. The adapter is
/// opaque to the core; the RPC layer downcasts it.
pub type ServerConstructor =
    Arc<dyn Fn(chassis_core::Collection<Arc<dyn Resource>>) -> Box<dyn Any + Send + Sync> + Send + Sync>;

/// Builds a client-side handle for a resource served elsewhere.
pub type ClientConstructor =
    Arc<dyn Fn(Name) -> BoxFuture<'static, Result<Arc<dyn Resource>>> + Send + Sync>;

/// Produces an API-specific status payload for a live resource.
pub type StatusFunc = Arc<dyn Fn(&Arc<dyn Resource>) -> Result<Value> + Send + Sync>;

/// Converts one resource's associated-config payload for delivery to the
/// target API.
pub type AssociatedConverter =
    Arc<dyn Fn(&Name, &AttributeMap) -> Result<AssociatedAttributes> + Send + Sync>;

/// Deserialize a config's attribute map into the driver's typed config.
pub fn native_config<C: DeserializeOwned>(config: &ResourceConfig) -> Result<C> {
    serde_json::from_value(Value::Object(config.attributes.clone())).map_err(|err| {
        Error::configuration(format!(
            "parsing attributes for \"{}\": {err}",
            config.name
        ))
    })
}

// ---------------------------------------------------------------------------
// Resource registration
// ---------------------------------------------------------------------------

/// Everything the registry records for one `(Api, Model)` pair.
///
/// A nil or doubled constructor is unrepresentable here — the typed
/// builders below are the only way in, so those historical failure modes
/// are compile errors rather than registration-time panics. Duplicate keys
/// still panic at `register` time.
#[derive(Clone)]
pub struct Registration {
    pub constructor: Constructor,
    pub attribute_converter: Option<AttributeConverter>,
    pub weak_dependencies: Vec<DependencyMatcher>,
    /// Skip in-place reconfiguration entirely; the per-call `MustRebuild`
    /// signal from a live resource still takes precedence when both apply.
    pub always_rebuild: bool,
    /// Started automatically under the reserved `builtin` name.
    pub is_default: bool,
    /// `TypeId` of the typed config the converter produces, when the
    /// config is non-opaque.
    pub config_type: Option<TypeId>,
}

impl Registration {
    /// A registration whose typed config `C` deserializes from the raw
    /// attribute map; the default converter is installed automatically.
    pub fn new<C, F, Fut>(constructor: F) -> Self
    where
        C: DeserializeOwned + Send + Sync + 'static,
        F: Fn(Context, Dependencies, ResourceConfig) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Arc<dyn Resource>>> + Send + 'static,
    {
        let converter: AttributeConverter = Arc::new(|attributes: &AttributeMap| {
            let typed: C = serde_json::from_value(Value::Object(attributes.clone()))
                .map_err(|err| Error::configuration(format!("converting attributes: {err}")))?;
            Ok(Arc::new(typed) as Arc<dyn Any + Send + Sync>)
        });
        Self {
            constructor: Arc::new(move |ctx, deps, cfg| Box::pin(constructor(ctx, deps, cfg))),
            attribute_converter: Some(converter),
            weak_dependencies: Vec::new(),
            always_rebuild: false,
            is_default: false,
            config_type: Some(TypeId::of::<C>()),
        }
    }

    /// A registration whose driver consumes the raw attribute map
    /// directly; no converter is installed and no config type is recorded.
    pub fn new_opaque<F, Fut>(constructor: F) -> Self
    where
        F: Fn(Context, Dependencies, ResourceConfig) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Arc<dyn Resource>>> + Send + 'static,
    {
        Self {
            constructor: Arc::new(move |ctx, deps, cfg| Box::pin(constructor(ctx, deps, cfg))),
            attribute_converter: None,
            weak_dependencies: Vec::new(),
            always_rebuild: false,
            is_default: false,
            config_type: None,
        }
    }

    #[must_use]
    pub fn with_weak_dependencies(mut self, matchers: Vec<DependencyMatcher>) -> Self {
        self.weak_dependencies = matchers;
        self
    }

    #[must_use]
    pub fn with_always_rebuild(mut self) -> Self {
        self.always_rebuild = true;
        self
    }

    #[must_use]
    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    /// Run the attribute converter, if one is installed.
    pub fn convert_attributes(
        &self,
        attributes: &AttributeMap,
    ) -> Result<Option<Arc<dyn Any + Send + Sync>>> {
        self.attribute_converter
            .as_ref()
            .map(|convert| convert(attributes))
            .transpose()
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("has_converter", &self.attribute_converter.is_some())
            .field("weak_dependencies", &self.weak_dependencies)
            .field("always_rebuild", &self.always_rebuild)
            .field("is_default", &self.is_default)
            .field("config_type", &self.config_type)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// API registration
// ---------------------------------------------------------------------------

/// One RPC method of an API's service descriptor, as far as the core
/// cares: its name, whether it is safety-heartbeat monitored, and which
/// request field names the target resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    /// Fully-qualified method name, e.g.
    /// `/chassis.component.motor.v1.MotorService/SetPower`.
    pub method: String,
    pub safety_heartbeat_monitored: bool,
    /// Overrides the default `name` request field when set.
    pub resource_name_field: Option<String>,
}

impl MethodDescriptor {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            safety_heartbeat_monitored: false,
            resource_name_field: None,
        }
    }

    #[must_use]
    pub fn monitored(mut self) -> Self {
        self.safety_heartbeat_monitored = true;
        self
    }

    #[must_use]
    pub fn with_resource_name_field(mut self, field: impl Into<String>) -> Self {
        self.resource_name_field = Some(field.into());
        self
    }
}

/// Transport-facing adapters recorded per API.
#[derive(Clone, Default)]
pub struct ApiRegistration {
    pub server_constructor: Option<ServerConstructor>,
    pub client_constructor: Option<ClientConstructor>,
    pub method_descriptors: Vec<MethodDescriptor>,
    pub status: Option<StatusFunc>,
    /// Cap on concurrent instances of this API; unlimited when absent.
    pub max_instance: Option<usize>,
}

impl ApiRegistration {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_server_constructor(mut self, constructor: ServerConstructor) -> Self {
        self.server_constructor = Some(constructor);
        self
    }

    #[must_use]
    pub fn with_client_constructor(mut self, constructor: ClientConstructor) -> Self {
        self.client_constructor = Some(constructor);
        self
    }

    #[must_use]
    pub fn with_method_descriptors(mut self, descriptors: Vec<MethodDescriptor>) -> Self {
        self.method_descriptors = descriptors;
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: StatusFunc) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_max_instance(mut self, max: usize) -> Self {
        self.max_instance = Some(max);
        self
    }
}

impl std::fmt::Debug for ApiRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiRegistration")
            .field("has_server_constructor", &self.server_constructor.is_some())
            .field("has_client_constructor", &self.client_constructor.is_some())
            .field("method_descriptors", &self.method_descriptors.len())
            .field("has_status", &self.status.is_some())
            .field("max_instance", &self.max_instance)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Associated-config registration
// ---------------------------------------------------------------------------

/// Lets one resource's config embed payloads consumed by resources of
/// `api` (e.g. a component telling a collector service what to sample).
#[derive(Clone)]
pub struct AssociatedConfigRegistration {
    pub api: Api,
    pub convert: AssociatedConverter,
}

impl AssociatedConfigRegistration {
    pub fn new(api: Api, convert: AssociatedConverter) -> Self {
        Self { api, convert }
    }
}

impl std::fmt::Debug for AssociatedConfigRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssociatedConfigRegistration")
            .field("api", &self.api.to_string())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chassis_core::name::Model;
    use serde::Deserialize;

    #[derive(Debug)]
    struct NullResource {
        name: Name,
    }

    #[async_trait::async_trait]
    impl Resource for NullResource {
        fn name(&self) -> Name {
            self.name.clone()
        }
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct MotorConfig {
        max_rpm: f64,
        #[serde(default)]
        reversed: bool,
    }

    fn constructor() -> impl Fn(
        Context,
        Dependencies,
        ResourceConfig,
    ) -> futures::future::Ready<Result<Arc<dyn Resource>>>
    + Send
    + Sync
    + 'static {
        |_ctx, _deps, cfg| {
            futures::future::ready(Ok(Arc::new(NullResource {
                name: cfg.resource_name(),
            }) as Arc<dyn Resource>))
        }
    }

    #[test]
    fn typed_builder_installs_default_converter_and_records_type() {
        let reg = Registration::new::<MotorConfig, _, _>(constructor());
        assert!(reg.attribute_converter.is_some());
        assert_eq!(reg.config_type, Some(TypeId::of::<MotorConfig>()));
    }

    #[test]
    fn opaque_builder_skips_converter() {
        let reg = Registration::new_opaque(constructor());
        assert!(reg.attribute_converter.is_none());
        assert!(reg.config_type.is_none());
    }

    #[test]
    fn default_converter_round_trips_attributes() {
        let reg = Registration::new::<MotorConfig, _, _>(constructor());
        let mut attributes = AttributeMap::new();
        attributes.insert("max_rpm".to_string(), 600.0.into());

        let converted = reg.convert_attributes(&attributes).unwrap().unwrap();
        let typed = converted.downcast_ref::<MotorConfig>().unwrap();
        assert_eq!(
            typed,
            &MotorConfig {
                max_rpm: 600.0,
                reversed: false
            }
        );
    }

    #[test]
    fn default_converter_reports_bad_attributes() {
        let reg = Registration::new::<MotorConfig, _, _>(constructor());
        let mut attributes = AttributeMap::new();
        attributes.insert("max_rpm".to_string(), "not a number".into());
        assert!(reg.convert_attributes(&attributes).is_err());
    }

    /// The typed builders must carry every field of a fully-populated
    /// registration into the erased record. Adding a field to
    /// `Registration` means extending this assertion set.
    #[test]
    fn builders_preserve_every_field() {
        let matchers = vec![DependencyMatcher::Api(Api::new_component("camera"))];
        let reg = Registration::new::<MotorConfig, _, _>(constructor())
            .with_weak_dependencies(matchers.clone())
            .with_always_rebuild()
            .as_default();

        let Registration {
            constructor: _,
            attribute_converter,
            weak_dependencies,
            always_rebuild,
            is_default,
            config_type,
        } = &reg;
        assert!(attribute_converter.is_some());
        assert_eq!(weak_dependencies, &matchers);
        assert!(*always_rebuild);
        assert!(*is_default);
        assert_eq!(config_type, &Some(TypeId::of::<MotorConfig>()));
    }

    #[tokio::test]
    async fn erased_constructor_builds_the_resource() {
        let reg = Registration::new::<MotorConfig, _, _>(constructor());
        let cfg = ResourceConfig::new(Api::new_component("motor"), Model::builtin("fake"), "m1");
        let resource = (reg.constructor)(Context::new(), Dependencies::new(), cfg.clone())
            .await
            .unwrap();
        assert_eq!(resource.name(), cfg.resource_name());
    }

    #[test]
    fn native_config_deserializes_attributes() {
        let mut cfg = ResourceConfig::new(Api::new_component("motor"), Model::builtin("fake"), "m1");
        cfg.attributes.insert("max_rpm".to_string(), 300.0.into());
        cfg.attributes.insert("reversed".to_string(), true.into());

        let typed: MotorConfig = native_config(&cfg).unwrap();
        assert_eq!(
            typed,
            MotorConfig {
                max_rpm: 300.0,
                reversed: true
            }
        );
    }

    #[test]
    fn method_descriptor_builder() {
        let desc = MethodDescriptor::new("/chassis.component.motor.v1.MotorService/SetPower")
            .monitored()
            .with_resource_name_field("name");
        assert!(desc.safety_heartbeat_monitored);
        assert_eq!(desc.resource_name_field.as_deref(), Some("name"));
    }
}
