//! Per-resource lifecycle state: the mutable container each graph vertex
//! carries.
//!
//! Every public operation takes the node's lock internally and is safe to
//! call from concurrent tasks. The one hard rule: the lock is never held
//! across an external call — `close` extracts the handle under the lock and
//! invokes the resource's `close` after releasing it, because close
//! implementations are allowed to call back into the node.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use chassis_core::config::ResourceConfig;
use chassis_core::error::{Error, Result};
use chassis_core::name::{Model, Name};
use chassis_core::resource::{DependencyMatcher, Resource};
use chassis_core::Context;

// ---------------------------------------------------------------------------
// Logical clock
// ---------------------------------------------------------------------------

/// A 64-bit counter shared by every node of one graph, incremented exactly
/// once per successful [`GraphNode::swap_resource`]. Readers may load it
/// atomically at any time.
#[derive(Debug, Default)]
pub struct LogicalClock(AtomicU64);

impl LogicalClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The current clock value.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    /// Advance the clock and return the new value.
    pub(crate) fn tick(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

// ---------------------------------------------------------------------------
// Node state
// ---------------------------------------------------------------------------

/// Lifecycle state of one graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    Unknown,
    Unconfigured,
    Configuring,
    Ready,
    Removing,
    Unhealthy,
}

impl NodeState {
    /// Whether `self → next` is in the legal transition set. Anything else
    /// is applied anyway but logged as unexpected, except the two refusals
    /// handled in [`GraphNode`]: nothing leaves `Removing` silently, and
    /// `Removing → Unhealthy` is blocked outright.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Unconfigured, Self::Configuring | Self::Removing)
                | (Self::Configuring, Self::Ready | Self::Unhealthy)
                | (Self::Ready, Self::Configuring | Self::Removing)
                | (
                    Self::Unhealthy,
                    Self::Ready | Self::Removing | Self::Unhealthy
                )
        )
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Unconfigured => "unconfigured",
            Self::Configuring => "configuring",
            Self::Ready => "ready",
            Self::Removing => "removing",
            Self::Unhealthy => "unhealthy",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of a node, safe to hand to external readers.
/// Ready nodes never carry an error here; a leftover error on any state
/// other than `Unhealthy` is treated as stale and dropped.
#[derive(Debug, Clone)]
pub struct NodeStatus {
    pub name: Name,
    pub state: NodeState,
    pub transitioned_at: DateTime<Utc>,
    pub revision: String,
    pub error: Option<Error>,
}

// ---------------------------------------------------------------------------
// GraphNode
// ---------------------------------------------------------------------------

struct Inner {
    name: Name,
    state: NodeState,
    transitioned_at: DateTime<Utc>,
    /// The live handle. The node is its exclusive owner; collections hold
    /// shared views of the same `Arc`.
    current: Option<Arc<dyn Resource>>,
    current_model: Option<Model>,
    config: Option<ResourceConfig>,
    unresolved_deps: Vec<String>,
    needs_dependency_resolution: bool,
    weak_matchers: Vec<DependencyMatcher>,
    /// Concrete names the weak matchers resolved to last pass.
    weak_deps: Vec<Name>,
    last_error: Option<Error>,
    revision: String,
    pending_revision: String,
    updated_at: u64,
    last_reconfigured: Option<DateTime<Utc>>,
}

impl Inner {
    /// Apply a state transition, logging unexpected ones. `Removing` is
    /// terminal: the `Removing → Unhealthy` move is refused entirely.
    fn transition_to(&mut self, next: NodeState) {
        if self.state == next && next != NodeState::Unhealthy {
            return;
        }
        if self.state == NodeState::Removing && next == NodeState::Unhealthy {
            tracing::debug!(
                resource = %self.name,
                "ignoring unhealthy transition on a node pending removal"
            );
            return;
        }
        if !self.state.can_transition_to(next) {
            tracing::warn!(
                resource = %self.name,
                from = %self.state,
                to = %next,
                "unexpected state transition"
            );
        }
        self.state = next;
        self.transitioned_at = Utc::now();
    }
}

/// One vertex of the resource graph.
pub struct GraphNode {
    clock: Arc<LogicalClock>,
    inner: RwLock<Inner>,
}

impl GraphNode {
    /// A fresh, unconfigured node stamped against `clock`.
    #[must_use]
    pub fn new(name: Name, clock: Arc<LogicalClock>) -> Self {
        Self {
            clock,
            inner: RwLock::new(Inner {
                name,
                state: NodeState::Unconfigured,
                transitioned_at: Utc::now(),
                current: None,
                current_model: None,
                config: None,
                unresolved_deps: Vec::new(),
                needs_dependency_resolution: false,
                weak_matchers: Vec::new(),
                weak_deps: Vec::new(),
                last_error: None,
                revision: String::new(),
                pending_revision: String::new(),
                updated_at: 0,
                last_reconfigured: None,
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> Name {
        self.inner.read().name.clone()
    }

    #[must_use]
    pub fn state(&self) -> NodeState {
        self.inner.read().state
    }

    /// The live handle, refusing removal-pending, unhealthy, and
    /// never-populated nodes.
    pub fn resource(&self) -> Result<Arc<dyn Resource>> {
        let inner = self.inner.read();
        if inner.state == NodeState::Removing {
            return Err(Error::PendingRemoval {
                name: inner.name.clone(),
            });
        }
        if inner.state == NodeState::Unhealthy
            && let Some(err) = &inner.last_error
        {
            return Err(err.clone());
        }
        // A leftover error on any other state is stale; it is dropped, not
        // surfaced.
        inner.current.clone().ok_or_else(|| Error::NotInitialized {
            name: inner.name.clone(),
        })
    }

    /// The live handle regardless of removal or error state. Reserved for
    /// the reconfigurator, which needs unhealthy instances for teardown.
    pub fn unsafe_resource(&self) -> Result<Arc<dyn Resource>> {
        let inner = self.inner.read();
        inner.current.clone().ok_or_else(|| Error::NotInitialized {
            name: inner.name.clone(),
        })
    }

    /// Install a newly constructed (or freshly reconfigured) handle.
    ///
    /// Clears the last error, transitions to `Ready`, promotes the pending
    /// revision, advances the shared logical clock, and stamps
    /// `updated_at` with the new clock value. Returns the previous handle:
    /// closing it is the caller's job, the swap itself never closes
    /// anything.
    pub fn swap_resource(
        &self,
        resource: Arc<dyn Resource>,
        model: Model,
    ) -> Option<Arc<dyn Resource>> {
        let mut inner = self.inner.write();
        let previous = inner.current.replace(resource);
        inner.current_model = Some(model);
        inner.last_error = None;
        inner.transition_to(NodeState::Ready);
        inner.revision = inner.pending_revision.clone();
        inner.updated_at = self.clock.tick();
        inner.last_reconfigured = Some(Utc::now());
        inner.needs_dependency_resolution = false;
        previous
    }

    /// Record a failure: the node becomes `Unhealthy` holding `err`.
    /// Nodes pending removal ignore this entirely.
    pub fn log_and_set_last_error(&self, err: Error) {
        let mut inner = self.inner.write();
        if inner.state == NodeState::Removing {
            tracing::debug!(
                resource = %inner.name,
                error = %err,
                "dropping error on a node pending removal"
            );
            return;
        }
        tracing::error!(resource = %inner.name, error = %err, "resource errored");
        inner.last_error = Some(err);
        inner.transition_to(NodeState::Unhealthy);
    }

    /// Transition to `Removing`; subsequent [`GraphNode::resource`] reads
    /// fail with `PendingRemoval`.
    pub fn mark_for_removal(&self) {
        self.inner.write().transition_to(NodeState::Removing);
    }

    #[must_use]
    pub fn marked_for_removal(&self) -> bool {
        self.inner.read().state == NodeState::Removing
    }

    /// Adopt a new configuration: the node moves to `Configuring` with its
    /// dependency list awaiting resolution.
    pub fn set_new_config(&self, config: ResourceConfig, deps: Vec<String>) {
        let mut inner = self.inner.write();
        inner.config = Some(config);
        inner.unresolved_deps = deps;
        inner.needs_dependency_resolution = true;
        inner.transition_to(NodeState::Configuring);
    }

    /// Flag the node for re-resolution because something upstream changed.
    /// No effect on nodes pending removal.
    pub fn set_needs_update(&self) {
        let mut inner = self.inner.write();
        if inner.state == NodeState::Removing {
            return;
        }
        inner.needs_dependency_resolution = true;
        inner.transition_to(NodeState::Configuring);
    }

    /// Extract the handle and close it. The node lock is released before
    /// the external `close` runs; implementations may call back into this
    /// node. Idempotent: the underlying close runs at most once.
    pub async fn close(&self, ctx: &Context) -> Result<()> {
        let taken = self.inner.write().current.take();
        match taken {
            Some(resource) => resource.close(ctx).await,
            None => Ok(()),
        }
    }

    /// Move every lifecycle field out of `donor` into this node, which
    /// must never have held a resource. The donor is invalidated: its
    /// state becomes `Removing` and its `close` is a no-op. Node identity
    /// (the name) is not transferred.
    pub fn replace_from(&self, donor: &GraphNode) -> Result<()> {
        let mut target = self.inner.write();
        if target.current.is_some() {
            return Err(Error::resource(
                target.name.clone(),
                "refusing to replace a non-empty node",
            ));
        }
        let mut from = donor.inner.write();
        target.state = from.state;
        target.transitioned_at = from.transitioned_at;
        target.current = from.current.take();
        target.current_model = from.current_model.take();
        target.config = from.config.take();
        target.unresolved_deps = std::mem::take(&mut from.unresolved_deps);
        target.needs_dependency_resolution = from.needs_dependency_resolution;
        target.weak_matchers = std::mem::take(&mut from.weak_matchers);
        target.weak_deps = std::mem::take(&mut from.weak_deps);
        target.last_error = from.last_error.take();
        target.revision = std::mem::take(&mut from.revision);
        target.pending_revision = std::mem::take(&mut from.pending_revision);
        target.updated_at = from.updated_at;
        target.last_reconfigured = from.last_reconfigured.take();

        from.state = NodeState::Removing;
        from.needs_dependency_resolution = false;
        from.updated_at = 0;
        Ok(())
    }

    /// External status view; stale errors never leak past `Unhealthy`.
    #[must_use]
    pub fn status(&self) -> NodeStatus {
        let inner = self.inner.read();
        NodeStatus {
            name: inner.name.clone(),
            state: inner.state,
            transitioned_at: inner.transitioned_at,
            revision: inner.revision.clone(),
            error: if inner.state == NodeState::Unhealthy {
                inner.last_error.clone()
            } else {
                None
            },
        }
    }

    // -- configuration / revision bookkeeping --------------------------------

    #[must_use]
    pub fn config(&self) -> Option<ResourceConfig> {
        self.inner.read().config.clone()
    }

    #[must_use]
    pub fn unresolved_dependencies(&self) -> Vec<String> {
        self.inner.read().unresolved_deps.clone()
    }

    #[must_use]
    pub fn needs_dependency_resolution(&self) -> bool {
        self.inner.read().needs_dependency_resolution
    }

    #[must_use]
    pub fn current_model(&self) -> Option<Model> {
        self.inner.read().current_model.clone()
    }

    #[must_use]
    pub fn has_resource(&self) -> bool {
        self.inner.read().current.is_some()
    }

    #[must_use]
    pub fn updated_at(&self) -> u64 {
        self.inner.read().updated_at
    }

    #[must_use]
    pub fn revision(&self) -> String {
        self.inner.read().revision.clone()
    }

    #[must_use]
    pub fn last_reconfigured(&self) -> Option<DateTime<Utc>> {
        self.inner.read().last_reconfigured
    }

    /// Stage a revision to be adopted by the next successful swap.
    pub fn set_pending_revision(&self, revision: impl Into<String>) {
        self.inner.write().pending_revision = revision.into();
    }

    /// Adopt `revision` immediately when the node is Ready with nothing
    /// pending; otherwise stage it for the in-flight reconfigure.
    pub fn update_revision_if_unmodified(&self, revision: impl Into<String>) {
        let mut inner = self.inner.write();
        let revision = revision.into();
        if inner.state == NodeState::Ready && !inner.needs_dependency_resolution {
            inner.revision = revision.clone();
        }
        inner.pending_revision = revision;
    }

    pub fn set_weak_matchers(&self, matchers: Vec<DependencyMatcher>) {
        self.inner.write().weak_matchers = matchers;
    }

    #[must_use]
    pub fn weak_matchers(&self) -> Vec<DependencyMatcher> {
        self.inner.read().weak_matchers.clone()
    }

    /// Record the concrete names the weak matchers resolved to, returning
    /// the previous snapshot for change detection.
    pub fn set_weak_dependencies(&self, deps: Vec<Name>) -> Vec<Name> {
        std::mem::replace(&mut self.inner.write().weak_deps, deps)
    }

    #[must_use]
    pub fn weak_dependencies(&self) -> Vec<Name> {
        self.inner.read().weak_deps.clone()
    }
}

impl fmt::Debug for GraphNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("GraphNode")
            .field("name", &inner.name.to_string())
            .field("state", &inner.state)
            .field("updated_at", &inner.updated_at)
            .field("has_resource", &inner.current.is_some())
            .finish()
    }
}
