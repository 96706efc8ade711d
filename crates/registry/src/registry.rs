//! The registry proper: three sub-registries behind one lock, a process
//! global, and the test-isolation scope guard.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;

use chassis_core::name::{Api, ApiModel, Model, Name};

use crate::registration::{ApiRegistration, AssociatedConfigRegistration, Registration};

#[derive(Clone, Default)]
struct Inner {
    resources: HashMap<ApiModel, Registration>,
    apis: HashMap<Api, ApiRegistration>,
    /// Ordered: adapters are consulted in registration order.
    associated: Vec<AssociatedConfigRegistration>,
}

/// Process-wide mapping from `(Api, Model)` to constructors, from `Api` to
/// transport adapters, and the ordered associated-config adapters.
///
/// Read-mostly: lookups take the read lock; driver modules register at
/// startup. Duplicate registration is a programmer error and panics.
#[derive(Default)]
pub struct Registry {
    inner: RwLock<Inner>,
}

static GLOBAL: LazyLock<Arc<Registry>> = LazyLock::new(|| Arc::new(Registry::default()));

/// The process-wide registry driver modules populate at startup.
#[must_use]
pub fn global() -> Arc<Registry> {
    Arc::clone(&GLOBAL)
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a driver for `(api, model)`.
    ///
    /// # Panics
    /// On a duplicate key. Driver modules register exactly once at
    /// startup; colliding keys mean two modules claim the same model.
    pub fn register(&self, api: Api, model: Model, registration: Registration) {
        let key = ApiModel::new(api, model);
        let mut inner = self.inner.write();
        assert!(
            !inner.resources.contains_key(&key),
            "duplicate registration for {key}"
        );
        tracing::debug!(key = %key, "registered resource model");
        inner.resources.insert(key, registration);
    }

    /// O(1) lookup; absent keys return `None`.
    #[must_use]
    pub fn lookup(&self, api: &Api, model: &Model) -> Option<Registration> {
        self.inner
            .read()
            .resources
            .get(&ApiModel::new(api.clone(), model.clone()))
            .cloned()
    }

    /// Remove a driver registration. Returns whether it existed.
    pub fn deregister(&self, api: &Api, model: &Model) -> bool {
        self.inner
            .write()
            .resources
            .remove(&ApiModel::new(api.clone(), model.clone()))
            .is_some()
    }

    /// Record the transport adapters for `api`.
    ///
    /// # Panics
    /// On a duplicate API.
    pub fn register_api(&self, api: Api, registration: ApiRegistration) {
        let mut inner = self.inner.write();
        assert!(
            !inner.apis.contains_key(&api),
            "duplicate api registration for {api}"
        );
        inner.apis.insert(api, registration);
    }

    #[must_use]
    pub fn lookup_api(&self, api: &Api) -> Option<ApiRegistration> {
        self.inner.read().apis.get(api).cloned()
    }

    pub fn deregister_api(&self, api: &Api) -> bool {
        self.inner.write().apis.remove(api).is_some()
    }

    /// All APIs with transport adapters, deterministically ordered.
    #[must_use]
    pub fn registered_apis(&self) -> Vec<Api> {
        let mut apis: Vec<Api> = self.inner.read().apis.keys().cloned().collect();
        apis.sort();
        apis
    }

    /// Append an associated-config adapter.
    ///
    /// # Panics
    /// If an adapter for the same API is already present.
    pub fn register_associated_config(&self, registration: AssociatedConfigRegistration) {
        let mut inner = self.inner.write();
        assert!(
            !inner.associated.iter().any(|r| r.api == registration.api),
            "duplicate associated-config registration for {}",
            registration.api
        );
        inner.associated.push(registration);
    }

    /// The adapter for `api`, if one was registered.
    #[must_use]
    pub fn associated_config(&self, api: &Api) -> Option<AssociatedConfigRegistration> {
        self.inner
            .read()
            .associated
            .iter()
            .find(|r| &r.api == api)
            .cloned()
    }

    /// Every registration flagged default, named by its API with the
    /// reserved `builtin` local name.
    #[must_use]
    pub fn default_services(&self) -> Vec<(Name, Model)> {
        let inner = self.inner.read();
        let mut defaults: Vec<(Name, Model)> = inner
            .resources
            .iter()
            .filter(|(_, reg)| reg.is_default)
            .map(|(key, _)| (key.api.with_builtin_name(), key.model.clone()))
            .collect();
        defaults.sort_by_key(|(name, _)| name.to_string());
        defaults
    }

    /// All registered `(Api, Model)` keys, deterministically ordered.
    #[must_use]
    pub fn registered_models(&self) -> Vec<ApiModel> {
        let mut keys: Vec<ApiModel> = self.inner.read().resources.keys().cloned().collect();
        keys.sort_by_key(ToString::to_string);
        keys
    }

    fn snapshot(&self) -> Inner {
        self.inner.read().clone()
    }

    fn restore(&self, snapshot: Inner) {
        *self.inner.write() = snapshot;
    }
}

/// RAII guard snapshotting the global registry and restoring it on drop,
/// so tests can register freely without leaking into each other.
pub struct RegistryScope {
    registry: Arc<Registry>,
    snapshot: Option<Inner>,
}

impl RegistryScope {
    /// Capture the global registry's current contents.
    #[must_use]
    pub fn capture() -> Self {
        let registry = global();
        Self {
            snapshot: Some(registry.snapshot()),
            registry,
        }
    }
}

impl Drop for RegistryScope {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            self.registry.restore(snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registration::MethodDescriptor;
    use chassis_core::error::Result;
    use chassis_core::resource::{Dependencies, Resource};
    use chassis_core::{Context, ResourceConfig};
    use std::sync::Arc;

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

    fn registration() -> Registration {
        Registration::new_opaque(|_ctx: Context, _deps: Dependencies, cfg: ResourceConfig| {
            futures::future::ready(Ok(Arc::new(NullResource {
                name: cfg.resource_name(),
            }) as Arc<dyn Resource>))
        })
    }

    #[test]
    fn register_and_lookup() {
        let registry = Registry::new();
        registry.register(Api::new_component("motor"), Model::builtin("fake"), registration());

        assert!(registry
            .lookup(&Api::new_component("motor"), &Model::builtin("fake"))
            .is_some());
        assert!(registry
            .lookup(&Api::new_component("motor"), &Model::builtin("ghost"))
            .is_none());
    }

    #[test]
    #[should_panic(expected = "duplicate registration")]
    fn duplicate_key_panics() {
        let registry = Registry::new();
        registry.register(Api::new_component("motor"), Model::builtin("fake"), registration());
        registry.register(Api::new_component("motor"), Model::builtin("fake"), registration());
    }

    #[test]
    fn deregistration_is_atomic_and_observable() {
        let registry = Registry::new();
        registry.register(Api::new_component("motor"), Model::builtin("fake"), registration());
        assert!(registry.deregister(&Api::new_component("motor"), &Model::builtin("fake")));
        assert!(!registry.deregister(&Api::new_component("motor"), &Model::builtin("fake")));
        // The key is free for re-registration.
        registry.register(Api::new_component("motor"), Model::builtin("fake"), registration());
    }

    #[test]
    fn api_registration_round_trip() {
        let registry = Registry::new();
        let api = Api::new_component("motor");
        registry.register_api(
            api.clone(),
            ApiRegistration::new()
                .with_method_descriptors(vec![MethodDescriptor::new("SetPower").monitored()])
                .with_max_instance(8),
        );

        let reg = registry.lookup_api(&api).unwrap();
        assert_eq!(reg.max_instance, Some(8));
        assert_eq!(reg.method_descriptors.len(), 1);
        assert_eq!(registry.registered_apis(), vec![api.clone()]);
        assert!(registry.deregister_api(&api));
        assert!(registry.lookup_api(&api).is_none());
    }

    #[test]
    #[should_panic(expected = "duplicate api registration")]
    fn duplicate_api_panics() {
        let registry = Registry::new();
        registry.register_api(Api::new_component("motor"), ApiRegistration::new());
        registry.register_api(Api::new_component("motor"), ApiRegistration::new());
    }

    #[test]
    fn default_services_use_builtin_names() {
        let registry = Registry::new();
        registry.register(
            Api::new_service("motion"),
            Model::builtin("builtin"),
            registration().as_default(),
        );
        registry.register(Api::new_component("motor"), Model::builtin("fake"), registration());

        let defaults = registry.default_services();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].0.to_string(), "chassis:service:motion/builtin");
    }

    #[test]
    fn associated_config_adapters_keep_registration_order() {
        let registry = Registry::new();
        for subtype in ["collector", "recorder"] {
            registry.register_associated_config(AssociatedConfigRegistration::new(
                Api::new_service(subtype),
                Arc::new(|source, attributes| {
                    Ok(chassis_core::AssociatedAttributes {
                        source: source.clone(),
                        attributes: attributes.clone(),
                    })
                }),
            ));
        }
        assert!(registry.associated_config(&Api::new_service("collector")).is_some());
        assert!(registry.associated_config(&Api::new_service("recorder")).is_some());
        assert!(registry.associated_config(&Api::new_service("ghost")).is_none());
    }

    #[test]
    fn scope_guard_restores_the_global_registry() {
        let api = Api::new_component("scope-test-motor");
        let model = Model::builtin("scoped");
        {
            let _scope = RegistryScope::capture();
            global().register(api.clone(), model.clone(), registration());
            assert!(global().lookup(&api, &model).is_some());
        }
        assert!(global().lookup(&api, &model).is_none());
    }
}
