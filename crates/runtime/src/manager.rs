//! The runtime-level resource manager and its reconfigure pipeline.
//!
//! One pipeline runs at a time per manager; status and lookup reads
//! proceed in parallel with it. The pipeline never fails as a whole:
//! individual nodes end `Ready` or `Unhealthy` with their error, and the
//! graph it publishes is always consistent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;

use chassis_core::collection::Collection;
use chassis_core::config::{RemoteConfig, ResourceConfig, RuntimeConfig};
use chassis_core::error::{Error, Result};
use chassis_core::name::{Api, Name};
use chassis_core::resource::{AsAny, AssociatedAttributes, Dependencies, Resource};
use chassis_core::Context;
use chassis_framesystem::{FramePart, FrameSystemError, FrameTree};
use chassis_graph::{Graph, GraphNode, NodeState, NodeStatus};
use chassis_registry::Registry;

use crate::diff::{ConfigDiff, ProcessChanges};
use crate::timeout::resource_configuration_timeout;

/// Manager tunables.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Deadline applied to each construction or in-place reconfigure.
    pub build_timeout: Duration,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            build_timeout: resource_configuration_timeout(),
        }
    }
}

/// Owns the resource graph and the per-API directories of live instances,
/// and mutates them to match each pushed configuration.
pub struct ResourceManager {
    graph: Arc<Graph>,
    registry: Arc<Registry>,
    options: ManagerOptions,
    /// Per-API directories of live instances, rebuilt after each pipeline.
    collections: DashMap<Api, Collection<Arc<dyn Resource>>>,
    last_processes: Mutex<Vec<chassis_core::config::ProcessConfig>>,
    process_changes: Mutex<ProcessChanges>,
    remotes: Mutex<Vec<RemoteConfig>>,
    /// Serializes reconfigure pipelines; reads never take this.
    pipeline: tokio::sync::Mutex<()>,
}

impl ResourceManager {
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self::with_options(registry, ManagerOptions::default())
    }

    #[must_use]
    pub fn with_options(registry: Arc<Registry>, options: ManagerOptions) -> Self {
        Self {
            graph: Arc::new(Graph::new()),
            registry,
            options,
            collections: DashMap::new(),
            last_processes: Mutex::new(Vec::new()),
            process_changes: Mutex::new(ProcessChanges::default()),
            remotes: Mutex::new(Vec::new()),
            pipeline: tokio::sync::Mutex::new(()),
        }
    }

    #[must_use]
    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    /// Mutate the graph to match `config`. Always succeeds as a whole;
    /// per-node failures land on the nodes and are observable through
    /// [`ResourceManager::status`].
    pub async fn reconfigure(&self, ctx: &Context, config: &RuntimeConfig) {
        let _guard = self.pipeline.lock().await;
        let close_errors = self.run_pipeline(ctx, config, true).await;
        for err in close_errors {
            tracing::error!(error = %err, "closing removed resource failed");
        }
    }

    /// Tear everything down: reconfigure to the empty config, closing every
    /// node in reverse topological order. Close failures are aggregated,
    /// never short-circuiting.
    pub async fn close(&self, ctx: &Context) -> Result<()> {
        let _guard = self.pipeline.lock().await;
        let close_errors = self
            .run_pipeline(ctx, &RuntimeConfig::default(), false)
            .await;
        if close_errors.is_empty() {
            Ok(())
        } else {
            let summary = close_errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            Err(Error::configuration(format!(
                "{} resource(s) failed to close: {summary}",
                close_errors.len()
            )))
        }
    }

    // -- pipeline ------------------------------------------------------------

    async fn run_pipeline(
        &self,
        ctx: &Context,
        config: &RuntimeConfig,
        include_defaults: bool,
    ) -> Vec<Error> {
        // Per-entry validation: invalid entries are skipped, their nodes
        // (if any) surface the failure, and the rest of the pipeline runs.
        let mut desired: Vec<ResourceConfig> = Vec::new();
        for cfg in config.resource_configs() {
            match cfg.validate() {
                Ok(_) => desired.push(cfg.clone()),
                Err(err) => {
                    tracing::warn!(resource = %cfg.name, error = %err, "skipping invalid config entry");
                    if let Some(node) = self.graph.node(&cfg.resource_name()) {
                        node.log_and_set_last_error(err);
                    }
                }
            }
        }
        if include_defaults {
            for (name, model) in self.registry.default_services() {
                if !desired.iter().any(|c| c.resource_name() == name) {
                    desired.push(ResourceConfig::new(
                        name.api.clone(),
                        model,
                        name.name.clone(),
                    ));
                }
            }
        }
        // Over-cap entries keep their place in the desired set (so the
        // diff never reaps them) but are blocked from building below.
        let blocked = self.over_instance_caps(&desired);

        // 1. Diff.
        let diff = ConfigDiff::compute(&self.graph, &desired);

        // Mark every removal before propagating: a dependent that is
        // itself being removed must not bounce through Configuring first.
        for name in &diff.removed {
            let _ = self.graph.remove_node(name);
        }
        for name in &diff.removed {
            self.graph.propagate_needs_update(name);
        }
        for cfg in &diff.unchanged {
            if let Some(node) = self.graph.node(&cfg.resource_name()) {
                node.update_revision_if_unmodified(&config.revision);
            }
        }

        // 2. Graph update: adopt configs, record weak matchers.
        for cfg in diff.added.iter().chain(diff.modified.iter()) {
            let name = cfg.resource_name();
            let node = self.graph.add_node(&name);
            node.set_new_config(cfg.clone(), cfg.dependencies());
            node.set_pending_revision(&config.revision);
            let matchers = self
                .registry
                .lookup(&cfg.api, &cfg.model)
                .map(|r| r.weak_dependencies)
                .unwrap_or_default();
            node.set_weak_matchers(matchers);
        }
        for cfg in &diff.modified {
            self.graph.propagate_needs_update(&cfg.resource_name());
        }

        // A changed weak-matching set (a camera appeared, say) dirties the
        // dependent even when its own config is untouched.
        self.refresh_weak_dependencies();

        // 3. Dependency resolution.
        self.resolve_dependencies();

        for (name, err) in blocked {
            if let Some(node) = self.graph.node(&name) {
                node.log_and_set_last_error(err);
            }
        }

        // 4/5. Construct and reconfigure to a fixed point.
        self.build_loop(ctx).await;
        self.finalize_unresolved();

        self.deliver_associated_configs(&desired);

        // 6. Reap removed nodes, children before parents.
        let close_errors = self.reap(ctx).await;

        self.rebuild_collections();

        {
            let mut last = self.last_processes.lock();
            *self.process_changes.lock() = ProcessChanges::compute(&last, &config.processes);
            *last = config.processes.clone();
        }
        *self.remotes.lock() = config.remotes.clone();

        close_errors
    }

    /// Entries beyond an API's `max_instance` cap, in config order, paired
    /// with the error their node will carry instead of being built.
    fn over_instance_caps(&self, desired: &[ResourceConfig]) -> Vec<(Name, Error)> {
        let mut counts: HashMap<Api, usize> = HashMap::new();
        let mut blocked = Vec::new();
        for cfg in desired {
            let max = self
                .registry
                .lookup_api(&cfg.api)
                .and_then(|reg| reg.max_instance);
            let count = counts.entry(cfg.api.clone()).or_insert(0);
            *count += 1;
            if let Some(max) = max
                && *count > max
            {
                blocked.push((
                    cfg.resource_name(),
                    Error::MaxInstances {
                        api: cfg.api.clone(),
                        max,
                    },
                ));
            }
        }
        blocked
    }

    /// The concrete names a node's weak matchers select right now.
    fn evaluate_weak_matchers(&self, name: &Name, node: &GraphNode) -> Vec<Name> {
        let matchers = node.weak_matchers();
        if matchers.is_empty() {
            return Vec::new();
        }
        self.graph
            .names()
            .into_iter()
            .filter(|candidate| candidate != name && matchers.iter().any(|m| m.matches(candidate)))
            .filter(|candidate| {
                self.graph
                    .node(candidate)
                    .is_some_and(|n| !n.marked_for_removal())
            })
            .collect()
    }

    /// Re-evaluate every weak matcher against the updated vertex set and
    /// dirty any node whose matching set moved.
    fn refresh_weak_dependencies(&self) {
        for (name, node) in self.graph.all_nodes() {
            if node.marked_for_removal() {
                continue;
            }
            let current = self.evaluate_weak_matchers(&name, &node);
            let previous = node.set_weak_dependencies(current.clone());
            if previous != current {
                node.set_needs_update();
            }
        }
    }

    /// Translate each dirty node's declared dependency list into concrete
    /// parent edges, evaluating weak matchers as it goes.
    fn resolve_dependencies(&self) {
        for (name, node) in self.graph.all_nodes() {
            if !node.needs_dependency_resolution() || node.marked_for_removal() {
                continue;
            }
            self.graph.remove_parents_of(&name);
            let mut failure = None;
            for dep in node.unresolved_dependencies() {
                let resolved = self.resolve_dependency_name(&name, &dep);
                match resolved.and_then(|parent| {
                    self.graph.add_child(&name, &parent)?;
                    Ok(())
                }) {
                    Ok(()) => {}
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                }
            }
            if let Some(err) = failure {
                node.log_and_set_last_error(err);
                continue;
            }

            node.set_weak_dependencies(self.evaluate_weak_matchers(&name, &node));
        }
    }

    /// Resolve a declared dependency string: the fully-qualified wire form
    /// is parsed directly; anything else matches by short name.
    fn resolve_dependency_name(&self, dependent: &Name, dep: &str) -> Result<Name> {
        if dep.contains('/') {
            let name: Name = dep.parse()?;
            if self.graph.contains(&name) {
                return Ok(name);
            }
            return Err(Error::DependencyNotFound {
                name: dependent.clone(),
                dependency: dep.to_string(),
            });
        }
        let mut matches = self.graph.find_by_short_name(dep);
        matches.retain(|m| m != dependent);
        match matches.len() {
            0 => Err(Error::DependencyNotFound {
                name: dependent.clone(),
                dependency: dep.to_string(),
            }),
            1 => Ok(matches.remove(0)),
            _ => Err(Error::AmbiguousDependency {
                name: dependent.clone(),
                dependency: dep.to_string(),
                matches,
            }),
        }
    }

    /// Topologically iterate the configuring nodes, building each whose
    /// parents are all ready, until a pass makes no progress. Nodes whose
    /// parents lag are deferred to the next pass, so a newly readied
    /// parent unblocks its children within the same pipeline run. Each
    /// productive pass readies at least one node, which bounds the loop at
    /// the node count.
    async fn build_loop(&self, ctx: &Context) {
        let max_passes = self.graph.len() + 1;
        for _ in 0..max_passes {
            let order = match self.graph.topological_sort() {
                Ok(order) => order,
                Err(err) => {
                    tracing::error!(error = %err, "dependency graph is unsortable; aborting build");
                    return;
                }
            };
            let mut progressed = false;
            for name in order {
                let Some(node) = self.graph.node(&name) else {
                    continue;
                };
                if node.state() != NodeState::Configuring {
                    continue;
                }
                let parents_ready = self.graph.parents_of(&name).iter().all(|parent| {
                    self.graph
                        .node(parent)
                        .is_some_and(|p| p.state() == NodeState::Ready)
                });
                if !parents_ready {
                    continue;
                }
                if self.build_node(ctx, &name, &node).await {
                    progressed = true;
                }
            }
            if !progressed {
                return;
            }
        }
    }

    /// Build or reconfigure one node. Returns whether it transitioned
    /// `Ready`.
    async fn build_node(&self, ctx: &Context, name: &Name, node: &Arc<GraphNode>) -> bool {
        let Some(cfg) = node.config() else {
            return false;
        };
        let Some(registration) = self.registry.lookup(&cfg.api, &cfg.model) else {
            node.log_and_set_last_error(Error::configuration(format!(
                "model \"{}\" is not registered for \"{}\"",
                cfg.model, cfg.api
            )));
            return false;
        };
        // Malformed attributes never reach the driver.
        if let Err(err) = registration.convert_attributes(&cfg.attributes) {
            node.log_and_set_last_error(err);
            return false;
        }
        let deps = match self.dependencies_for(name, node) {
            Ok(deps) => deps,
            Err(err) => {
                node.log_and_set_last_error(err);
                return false;
            }
        };
        let timeout = self.options.build_timeout;
        let build_ctx = ctx.child().with_timeout(timeout);

        // In-place reconfiguration, unless the registration opted out. A
        // per-call `MustRebuild` (or any other failure) falls back to the
        // rebuild path below.
        if node.has_resource() && !registration.always_rebuild {
            let Ok(resource) = node.unsafe_resource() else {
                return false;
            };
            match tokio::time::timeout(timeout, resource.reconfigure(&build_ctx, &deps, &cfg)).await
            {
                Err(_) => {
                    node.log_and_set_last_error(Error::BuildTimeout {
                        name: name.clone(),
                        timeout,
                    });
                    return false;
                }
                Ok(Ok(())) => {
                    // Same handle: the swap only bumps revision, clock, and
                    // state; nothing gets closed.
                    node.swap_resource(resource, cfg.model.clone());
                    tracing::debug!(resource = %name, "reconfigured in place");
                    return true;
                }
                Ok(Err(err)) if err.is_must_rebuild() => {
                    tracing::debug!(resource = %name, "resource demands a rebuild");
                }
                Ok(Err(err)) => {
                    tracing::debug!(resource = %name, error = %err, "in-place reconfigure failed; rebuilding");
                }
            }
        }

        match tokio::time::timeout(timeout, (registration.constructor)(build_ctx, deps, cfg.clone()))
            .await
        {
            Err(_) => {
                node.log_and_set_last_error(Error::BuildTimeout {
                    name: name.clone(),
                    timeout,
                });
                false
            }
            Ok(Err(err)) => {
                node.log_and_set_last_error(err);
                false
            }
            Ok(Ok(resource)) => {
                let previous = node.swap_resource(resource, cfg.model.clone());
                if let Some(previous) = previous {
                    // The replaced handle closes off the pipeline's critical
                    // path; failures are logged, never fatal.
                    let close_name = name.clone();
                    tokio::spawn(async move {
                        if let Err(err) = previous.close(&Context::new()).await {
                            tracing::error!(
                                resource = %close_name,
                                error = %err,
                                "closing replaced resource failed"
                            );
                        }
                    });
                }
                tracing::info!(resource = %name, model = %cfg.model, "resource built");
                true
            }
        }
    }

    /// Concrete handles for a node's strong parents (all must be
    /// servable) plus whichever weak dependencies are currently ready.
    fn dependencies_for(&self, name: &Name, node: &GraphNode) -> Result<Dependencies> {
        let mut deps = Dependencies::new();
        for parent in self.graph.parents_of(name) {
            let parent_node =
                self.graph
                    .node(&parent)
                    .ok_or_else(|| Error::DependencyNotFound {
                        name: name.clone(),
                        dependency: parent.to_string(),
                    })?;
            let resource = parent_node
                .resource()
                .map_err(|err| Error::dependency_not_ready(name.clone(), err))?;
            deps.insert(parent, resource);
        }
        for weak in node.weak_dependencies() {
            if let Some(weak_node) = self.graph.node(&weak)
                && let Ok(resource) = weak_node.resource()
            {
                deps.insert(weak, resource);
            }
        }
        Ok(deps)
    }

    /// Anything still `Configuring` after the fixed point is blocked on a
    /// dependency; pin the blame on it.
    fn finalize_unresolved(&self) {
        for (name, node) in self.graph.all_nodes() {
            if node.state() != NodeState::Configuring {
                continue;
            }
            let cause = self.graph.parents_of(&name).into_iter().find_map(|parent| {
                self.graph
                    .node(&parent)
                    .and_then(|p| p.resource().err())
            });
            let err = match cause {
                Some(cause) => Error::dependency_not_ready(name.clone(), cause),
                None => Error::resource(name.clone(), "resource never became ready"),
            };
            node.log_and_set_last_error(err);
        }
    }

    /// Run every associated-config payload through its adapter and deliver
    /// the batch to the ready resources of the target API that accept them.
    fn deliver_associated_configs(&self, desired: &[ResourceConfig]) {
        let mut grouped: HashMap<Api, Vec<AssociatedAttributes>> = HashMap::new();
        for cfg in desired {
            for assoc in &cfg.associated_resource_configs {
                let Some(adapter) = self.registry.associated_config(&assoc.api) else {
                    tracing::warn!(
                        api = %assoc.api,
                        resource = %cfg.name,
                        "no associated-config adapter registered"
                    );
                    continue;
                };
                match (adapter.convert)(&cfg.resource_name(), &assoc.attributes) {
                    Ok(payload) => grouped.entry(assoc.api.clone()).or_default().push(payload),
                    Err(err) => {
                        tracing::warn!(
                            resource = %cfg.name,
                            error = %err,
                            "associated config conversion failed"
                        );
                    }
                }
            }
        }
        if grouped.is_empty() {
            return;
        }
        for (name, node) in self.graph.all_nodes() {
            let Some(payloads) = grouped.get(&name.api) else {
                continue;
            };
            let Ok(resource) = node.resource() else {
                continue;
            };
            if let Some(updater) = resource.as_associated_name_updater() {
                updater.update_associated_configs(payloads.clone());
            }
        }
    }

    /// Close and drop every node marked for removal, children before
    /// parents. Close errors are collected, never fatal.
    async fn reap(&self, ctx: &Context) -> Vec<Error> {
        let order = match self.graph.reverse_topological_sort() {
            Ok(order) => order,
            Err(err) => {
                tracing::error!(error = %err, "graph unsortable during reap");
                return Vec::new();
            }
        };
        let mut errors = Vec::new();
        for name in order {
            let Some(node) = self.graph.node(&name) else {
                continue;
            };
            if !node.marked_for_removal() {
                continue;
            }
            if let Err(err) = node.close(ctx).await {
                errors.push(err);
            }
            self.graph.reap_node(&name);
            tracing::debug!(resource = %name, "resource removed");
        }
        errors
    }

    /// Rebuild the per-API directories from the graph's servable nodes.
    fn rebuild_collections(&self) {
        let mut grouped: HashMap<Api, HashMap<Name, Arc<dyn Resource>>> = HashMap::new();
        for (name, node) in self.graph.all_nodes() {
            if let Ok(resource) = node.resource() {
                grouped
                    .entry(name.api.clone())
                    .or_default()
                    .insert(name, resource);
            }
        }
        self.collections.clear();
        for (api, entries) in grouped {
            let mut collection = Collection::new();
            collection.replace_all(entries);
            self.collections.insert(api, collection);
        }
    }

    // -- read surface --------------------------------------------------------

    /// Look up a live resource: exact graph hit first (so callers see the
    /// precise unavailability), short-name shortcut through the per-API
    /// directory otherwise.
    pub fn resource_by_name(&self, name: &Name) -> Result<Arc<dyn Resource>> {
        if let Some(node) = self.graph.node(name) {
            return node.resource();
        }
        self.collections
            .get(&name.api)
            .ok_or_else(|| Error::NotFound { name: name.clone() })?
            .resource(name)
            .cloned()
    }

    /// Look up a resource and downcast it to a concrete driver type.
    pub fn resource_by_name_as<T: Resource>(&self, name: &Name) -> Result<Arc<T>> {
        let resource = self.resource_by_name(name)?;
        resource
            .into_any()
            .downcast::<T>()
            .map_err(|_| Error::TypeMismatch {
                expected: std::any::type_name::<T>(),
                actual: name.to_string(),
            })
    }

    /// Names of every tracked resource not pending removal.
    #[must_use]
    pub fn resource_names(&self) -> Vec<Name> {
        self.graph
            .all_nodes()
            .into_iter()
            .filter(|(_, node)| !node.marked_for_removal())
            .map(|(name, _)| name)
            .collect()
    }

    /// APIs of live resources that carry a transport registration.
    #[must_use]
    pub fn resource_rpc_apis(&self) -> Vec<Api> {
        let mut apis: Vec<Api> = self
            .resource_names()
            .into_iter()
            .map(|name| name.api)
            .filter(|api| self.registry.lookup_api(api).is_some())
            .collect();
        apis.sort();
        apis.dedup();
        apis
    }

    /// Status snapshots for every node.
    #[must_use]
    pub fn status(&self) -> Vec<NodeStatus> {
        self.graph.statuses()
    }

    pub fn status_of(&self, name: &Name) -> Result<NodeStatus> {
        self.graph
            .node(name)
            .map(|node| node.status())
            .ok_or_else(|| Error::NotFound { name: name.clone() })
    }

    /// API-specific status payload for one resource, through the status
    /// adapter its API registered. APIs without an adapter report an
    /// empty payload.
    pub fn api_status(&self, name: &Name) -> Result<serde_json::Value> {
        let resource = self.resource_by_name(name)?;
        match self.registry.lookup_api(&name.api).and_then(|reg| reg.status) {
            Some(status) => status(&resource),
            None => Ok(serde_json::Value::Object(serde_json::Map::new())),
        }
    }

    /// The process delta computed by the last pipeline run.
    #[must_use]
    pub fn process_changes(&self) -> ProcessChanges {
        self.process_changes.lock().clone()
    }

    /// The remotes from the last applied configuration.
    #[must_use]
    pub fn remotes(&self) -> Vec<RemoteConfig> {
        self.remotes.lock().clone()
    }

    // -- framesystem ---------------------------------------------------------

    /// Frame parts contributed by live resources: their configured static
    /// offsets plus any kinematic self-description.
    #[must_use]
    pub fn frame_parts(&self) -> Vec<FramePart> {
        let mut parts = Vec::new();
        for (name, node) in self.graph.all_nodes() {
            let Some(cfg) = node.config() else {
                continue;
            };
            let Some(frame) = cfg.frame else {
                continue;
            };
            let Ok(resource) = node.resource() else {
                continue;
            };
            let mut part = FramePart::new(name.short_name(), frame);
            if let Some(framer) = resource.as_model_framer()
                && let Some(model) = framer.model_frame()
            {
                part = part.with_kinematic_model(model);
            }
            parts.push(part);
        }
        parts
    }

    /// Assemble the current transform tree, with any auxiliary transforms
    /// supplied by the caller.
    pub fn frame_system(
        &self,
        auxiliary: &[FramePart],
    ) -> std::result::Result<FrameTree, FrameSystemError> {
        FrameTree::assemble(&self.frame_parts(), auxiliary)
    }
}

impl chassis_session::ResourceFetcher for ResourceManager {
    fn resource(&self, name: &Name) -> Result<Arc<dyn Resource>> {
        self.resource_by_name(name)
    }
}

impl std::fmt::Debug for ResourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceManager")
            .field("resources", &self.graph.len())
            .field("clock", &self.graph.clock())
            .finish()
    }
}
