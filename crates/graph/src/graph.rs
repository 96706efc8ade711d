//! The directed acyclic resource graph.
//!
//! Edges run parent → child, where the child depends on the parent.
//! The vertex set and edges sit behind one reader/writer lock; each node
//! carries its own finer-grained lock. Lock discipline: the graph lock is
//! never held across node locks — traversals snapshot what they need,
//! release the graph lock, and only then touch nodes.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;

use chassis_core::error::{Error, Result};
use chassis_core::name::Name;

use crate::node::{GraphNode, LogicalClock, NodeStatus};

#[derive(Default)]
struct State {
    nodes: HashMap<Name, Arc<GraphNode>>,
    /// child → parents (what the child depends on).
    parents: HashMap<Name, BTreeSet<Name>>,
    /// parent → children (reverse index).
    children: HashMap<Name, BTreeSet<Name>>,
}

/// Concurrent DAG of resource nodes sharing one logical clock.
pub struct Graph {
    clock: Arc<LogicalClock>,
    inner: RwLock<State>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

/// Deterministic ordering key: local name first, full form as tiebreak.
fn sort_key(name: &Name) -> (String, String) {
    (name.name.clone(), name.to_string())
}

impl Graph {
    #[must_use]
    pub fn new() -> Self {
        Self {
            clock: Arc::new(LogicalClock::new()),
            inner: RwLock::new(State::default()),
        }
    }

    /// Current logical clock value.
    #[must_use]
    pub fn clock(&self) -> u64 {
        self.clock.value()
    }

    /// The clock handle shared with every node of this graph.
    #[must_use]
    pub fn clock_handle(&self) -> Arc<LogicalClock> {
        Arc::clone(&self.clock)
    }

    /// Fetch the node for `name`, creating an empty one if absent.
    pub fn add_node(&self, name: &Name) -> Arc<GraphNode> {
        let mut state = self.inner.write();
        Arc::clone(
            state
                .nodes
                .entry(name.clone())
                .or_insert_with(|| Arc::new(GraphNode::new(name.clone(), Arc::clone(&self.clock)))),
        )
    }

    #[must_use]
    pub fn node(&self, name: &Name) -> Option<Arc<GraphNode>> {
        self.inner.read().nodes.get(name).map(Arc::clone)
    }

    #[must_use]
    pub fn contains(&self, name: &Name) -> bool {
        self.inner.read().nodes.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().nodes.is_empty()
    }

    /// All names, deterministically ordered.
    #[must_use]
    pub fn names(&self) -> Vec<Name> {
        let mut names: Vec<Name> = self.inner.read().nodes.keys().cloned().collect();
        names.sort_by_key(sort_key);
        names
    }

    /// All nodes paired with their names, deterministically ordered.
    #[must_use]
    pub fn all_nodes(&self) -> Vec<(Name, Arc<GraphNode>)> {
        let mut nodes: Vec<(Name, Arc<GraphNode>)> = self
            .inner
            .read()
            .nodes
            .iter()
            .map(|(n, node)| (n.clone(), Arc::clone(node)))
            .collect();
        nodes.sort_by_key(|(n, _)| sort_key(n));
        nodes
    }

    /// Status snapshots for every node.
    #[must_use]
    pub fn statuses(&self) -> Vec<NodeStatus> {
        // Snapshot the arcs first; node locks are taken after the graph
        // lock is released.
        let nodes = self.all_nodes();
        nodes.into_iter().map(|(_, node)| node.status()).collect()
    }

    /// Record that `child` depends on `parent`. Both must already be in
    /// the graph; an edge that would close a cycle is refused.
    pub fn add_child(&self, child: &Name, parent: &Name) -> Result<()> {
        if child == parent {
            return Err(Error::CycleDetected { name: child.clone() });
        }
        let mut state = self.inner.write();
        if !state.nodes.contains_key(child) {
            return Err(Error::NotFound { name: child.clone() });
        }
        if !state.nodes.contains_key(parent) {
            return Err(Error::MissingParent {
                child: child.clone(),
                parent: parent.clone(),
            });
        }
        // Transitive check: if `parent` is reachable by descending from
        // `child`, this edge would close a cycle.
        if reachable(&state.children, child, parent) {
            return Err(Error::CycleDetected { name: child.clone() });
        }
        state
            .children
            .entry(parent.clone())
            .or_default()
            .insert(child.clone());
        state
            .parents
            .entry(child.clone())
            .or_default()
            .insert(parent.clone());
        Ok(())
    }

    /// Remove the `parent → child` edge if present.
    pub fn remove_child(&self, child: &Name, parent: &Name) {
        let mut state = self.inner.write();
        if let Some(set) = state.children.get_mut(parent) {
            set.remove(child);
        }
        if let Some(set) = state.parents.get_mut(child) {
            set.remove(parent);
        }
    }

    /// Detach every parent edge of `child` (used before re-resolving its
    /// dependencies or rebuilding it).
    pub fn remove_parents_of(&self, child: &Name) {
        let mut state = self.inner.write();
        if let Some(parents) = state.parents.remove(child) {
            for parent in parents {
                if let Some(set) = state.children.get_mut(&parent) {
                    set.remove(child);
                }
            }
        }
    }

    /// Mark `name` for removal. The node stays in the graph until the
    /// reconfigurator reaps it.
    pub fn remove_node(&self, name: &Name) -> Result<()> {
        let node = self
            .node(name)
            .ok_or_else(|| Error::NotFound { name: name.clone() })?;
        node.mark_for_removal();
        Ok(())
    }

    /// Drop `name` and all its edges from the graph, returning the node.
    pub fn reap_node(&self, name: &Name) -> Option<Arc<GraphNode>> {
        let mut state = self.inner.write();
        let node = state.nodes.remove(name)?;
        if let Some(parents) = state.parents.remove(name) {
            for parent in parents {
                if let Some(set) = state.children.get_mut(&parent) {
                    set.remove(name);
                }
            }
        }
        if let Some(children) = state.children.remove(name) {
            for child in children {
                if let Some(set) = state.parents.get_mut(&child) {
                    set.remove(name);
                }
            }
        }
        Some(node)
    }

    /// Move every lifecycle field of `old` into a fresh node under `new`,
    /// rewiring edges. The donor is reaped.
    pub fn rename_node(&self, old: &Name, new: &Name) -> Result<Arc<GraphNode>> {
        let donor = self
            .node(old)
            .ok_or_else(|| Error::NotFound { name: old.clone() })?;
        let target = self.add_node(new);
        target.replace_from(&donor)?;

        let mut state = self.inner.write();
        let parents = state.parents.remove(old).unwrap_or_default();
        for parent in &parents {
            if let Some(set) = state.children.get_mut(parent) {
                set.remove(old);
                set.insert(new.clone());
            }
        }
        if !parents.is_empty() {
            state.parents.insert(new.clone(), parents);
        }
        let children = state.children.remove(old).unwrap_or_default();
        for child in &children {
            if let Some(set) = state.parents.get_mut(child) {
                set.remove(old);
                set.insert(new.clone());
            }
        }
        if !children.is_empty() {
            state.children.insert(new.clone(), children);
        }
        state.nodes.remove(old);
        Ok(target)
    }

    /// Direct dependents of `name`, deterministically ordered.
    #[must_use]
    pub fn children_of(&self, name: &Name) -> Vec<Name> {
        self.inner
            .read()
            .children
            .get(name)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Direct dependencies of `name`, deterministically ordered.
    #[must_use]
    pub fn parents_of(&self, name: &Name) -> Vec<Name> {
        self.inner
            .read()
            .parents
            .get(name)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Nodes with no dependencies.
    #[must_use]
    pub fn roots(&self) -> Vec<Name> {
        let state = self.inner.read();
        let mut roots: Vec<Name> = state
            .nodes
            .keys()
            .filter(|n| state.parents.get(*n).is_none_or(BTreeSet::is_empty))
            .cloned()
            .collect();
        roots.sort_by_key(sort_key);
        roots
    }

    /// Every node whose remote-qualified or bare local name equals `short`.
    #[must_use]
    pub fn find_by_short_name(&self, short: &str) -> Vec<Name> {
        let mut matches: Vec<Name> = self
            .inner
            .read()
            .nodes
            .keys()
            .filter(|n| n.short_name() == short || n.name == short)
            .cloned()
            .collect();
        matches.sort_by_key(sort_key);
        matches
    }

    /// Kahn's algorithm with a deterministic frontier: parents always
    /// precede children, ties broken by local name. Fails on a parent
    /// reference to a node not in the graph, then on any cycle.
    pub fn topological_sort(&self) -> Result<Vec<Name>> {
        let state = self.inner.read();

        // Missing-parent detection comes first.
        for (child, parents) in &state.parents {
            for parent in parents {
                if !state.nodes.contains_key(parent) {
                    return Err(Error::MissingParent {
                        child: child.clone(),
                        parent: parent.clone(),
                    });
                }
            }
        }

        let mut in_degree: HashMap<&Name, usize> = state
            .nodes
            .keys()
            .map(|n| (n, state.parents.get(n).map_or(0, BTreeSet::len)))
            .collect();

        let mut frontier: BTreeSet<((String, String), &Name)> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(name, _)| (sort_key(name), *name))
            .collect();

        let mut sorted = Vec::with_capacity(state.nodes.len());
        while let Some((_, name)) = frontier.pop_first() {
            sorted.push(name.clone());
            if let Some(children) = state.children.get(name) {
                for child in children {
                    let Some(degree) = in_degree.get_mut(child) else {
                        continue;
                    };
                    *degree -= 1;
                    if *degree == 0 {
                        frontier.insert((sort_key(child), child));
                    }
                }
            }
        }

        if sorted.len() != state.nodes.len() {
            // Anything left has positive in-degree: a cycle. Name the
            // smallest member for a stable error.
            let culprit = in_degree
                .iter()
                .filter(|(_, degree)| **degree > 0)
                .map(|(name, _)| (*name).clone())
                .min_by_key(sort_key)
                .expect("unsorted nodes imply a positive in-degree");
            return Err(Error::CycleDetected { name: culprit });
        }
        Ok(sorted)
    }

    /// Teardown order: children before parents.
    pub fn reverse_topological_sort(&self) -> Result<Vec<Name>> {
        let mut sorted = self.topological_sort()?;
        sorted.reverse();
        Ok(sorted)
    }

    /// Propagate "needs update" to every dependent of `origin`: direct and
    /// transitive children, plus any node whose weak matchers match a
    /// member of the propagation set. Each node is visited at most once.
    /// Returns the updated names, deterministically ordered.
    pub fn propagate_needs_update(&self, origin: &Name) -> Vec<Name> {
        // Snapshot under the graph lock, then work lock-free: node locks
        // are never taken while the graph lock is held.
        let (children, nodes): (HashMap<Name, BTreeSet<Name>>, Vec<(Name, Arc<GraphNode>)>) = {
            let state = self.inner.read();
            (
                state.children.clone(),
                state
                    .nodes
                    .iter()
                    .map(|(n, node)| (n.clone(), Arc::clone(node)))
                    .collect(),
            )
        };
        let matchers: Vec<(Name, Vec<chassis_core::DependencyMatcher>)> = nodes
            .iter()
            .map(|(n, node)| (n.clone(), node.weak_matchers()))
            .collect();
        let by_name: HashMap<&Name, &Arc<GraphNode>> =
            nodes.iter().map(|(n, node)| (n, node)).collect();

        let mut visited: HashSet<Name> = HashSet::new();
        let mut queue: VecDeque<Name> = VecDeque::from([origin.clone()]);
        let mut updated = Vec::new();
        while let Some(current) = queue.pop_front() {
            let mut dependents: Vec<Name> = children
                .get(&current)
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default();
            for (name, node_matchers) in &matchers {
                if node_matchers.iter().any(|m| m.matches(&current)) {
                    dependents.push(name.clone());
                }
            }
            for dependent in dependents {
                if dependent == *origin || !visited.insert(dependent.clone()) {
                    continue;
                }
                if let Some(node) = by_name.get(&dependent) {
                    node.set_needs_update();
                    updated.push(dependent.clone());
                }
                queue.push_back(dependent);
            }
        }
        updated.sort_by_key(sort_key);
        updated
    }
}

/// Whether `to` is reachable from `from` by descending child edges.
fn reachable(children: &HashMap<Name, BTreeSet<Name>>, from: &Name, to: &Name) -> bool {
    let mut stack = vec![from];
    let mut seen: HashSet<&Name> = HashSet::new();
    while let Some(current) = stack.pop() {
        if current == to {
            return true;
        }
        if let Some(next) = children.get(current) {
            for child in next {
                if seen.insert(child) {
                    stack.push(child);
                }
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use chassis_core::name::{Api, Model};
    use chassis_core::resource::{DependencyMatcher, Resource};
    use chassis_core::Context;
    use pretty_assertions::assert_eq;

    #[derive(Debug)]
    struct Stub {
        name: Name,
    }

    #[async_trait::async_trait]
    impl Resource for Stub {
        fn name(&self) -> Name {
            self.name.clone()
        }
    }

    fn motor(local: &str) -> Name {
        Name::new(Api::new_component("motor"), local)
    }

    fn arm(local: &str) -> Name {
        Name::new(Api::new_component("arm"), local)
    }

    fn camera(local: &str) -> Name {
        Name::new(Api::new_component("camera"), local)
    }

    fn stub(name: &Name) -> Arc<dyn Resource> {
        Arc::new(Stub { name: name.clone() })
    }

    #[test]
    fn add_node_is_get_or_create() {
        let g = Graph::new();
        let a = g.add_node(&motor("m1"));
        let b = g.add_node(&motor("m1"));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn edges_index_both_directions() {
        let g = Graph::new();
        g.add_node(&motor("m1"));
        g.add_node(&arm("a1"));
        g.add_child(&arm("a1"), &motor("m1")).unwrap();

        assert_eq!(g.children_of(&motor("m1")), vec![arm("a1")]);
        assert_eq!(g.parents_of(&arm("a1")), vec![motor("m1")]);
        assert_eq!(g.roots(), vec![motor("m1")]);
    }

    #[test]
    fn self_edge_is_a_cycle() {
        let g = Graph::new();
        g.add_node(&motor("m1"));
        assert!(matches!(
            g.add_child(&motor("m1"), &motor("m1")).unwrap_err(),
            Error::CycleDetected { .. }
        ));
    }

    #[test]
    fn transitive_cycle_is_refused() {
        let g = Graph::new();
        for n in ["a", "b", "c"] {
            g.add_node(&motor(n));
        }
        g.add_child(&motor("b"), &motor("a")).unwrap();
        g.add_child(&motor("c"), &motor("b")).unwrap();
        let err = g.add_child(&motor("a"), &motor("c")).unwrap_err();
        assert!(matches!(err, Error::CycleDetected { .. }));
        // The refused edge left no residue.
        assert!(g.parents_of(&motor("a")).is_empty());
    }

    #[test]
    fn missing_parent_on_add_child() {
        let g = Graph::new();
        g.add_node(&arm("a1"));
        let err = g.add_child(&arm("a1"), &motor("ghost")).unwrap_err();
        assert!(matches!(err, Error::MissingParent { .. }));
    }

    #[test]
    fn topological_sort_orders_parents_first() {
        let g = Graph::new();
        // base ← mid ← tip, plus an isolated node.
        for n in [motor("base"), motor("mid"), motor("tip"), camera("iso")] {
            g.add_node(&n);
        }
        g.add_child(&motor("mid"), &motor("base")).unwrap();
        g.add_child(&motor("tip"), &motor("mid")).unwrap();

        let sorted = g.topological_sort().unwrap();
        let pos =
            |n: &Name| sorted.iter().position(|x| x == n).unwrap();
        assert!(pos(&motor("base")) < pos(&motor("mid")));
        assert!(pos(&motor("mid")) < pos(&motor("tip")));
        assert_eq!(sorted.len(), 4);

        let reversed = g.reverse_topological_sort().unwrap();
        let rpos = |n: &Name| reversed.iter().position(|x| x == n).unwrap();
        assert!(rpos(&motor("tip")) < rpos(&motor("mid")));
    }

    #[test]
    fn topological_sort_is_deterministic() {
        let g = Graph::new();
        for n in ["zeta", "alpha", "mike"] {
            g.add_node(&motor(n));
        }
        let sorted = g.topological_sort().unwrap();
        assert_eq!(sorted, vec![motor("alpha"), motor("mike"), motor("zeta")]);
    }

    #[test]
    fn clock_values_are_unique_across_nodes() {
        let g = Graph::new();
        let a = g.add_node(&motor("a"));
        let b = g.add_node(&motor("b"));
        a.swap_resource(stub(&motor("a")), Model::builtin("fake"));
        b.swap_resource(stub(&motor("b")), Model::builtin("fake"));
        a.swap_resource(stub(&motor("a")), Model::builtin("fake"));

        assert_eq!(g.clock(), 3);
        assert_ne!(a.updated_at(), b.updated_at());
        assert_eq!(a.updated_at(), 3);
        assert_eq!(b.updated_at(), 2);
    }

    #[test]
    fn find_by_short_name_matches_bare_and_qualified() {
        let g = Graph::new();
        let local = motor("m1");
        let remoted = Name::with_remote(Api::new_component("motor"), ["rover"], "m1");
        g.add_node(&local);
        g.add_node(&remoted);

        let matches = g.find_by_short_name("m1");
        assert_eq!(matches.len(), 2);
        assert_eq!(g.find_by_short_name("rover:m1"), vec![remoted]);
        assert!(g.find_by_short_name("ghost").is_empty());
    }

    #[test]
    fn reap_node_drops_edges() {
        let g = Graph::new();
        g.add_node(&motor("base"));
        g.add_node(&arm("a1"));
        g.add_child(&arm("a1"), &motor("base")).unwrap();

        g.reap_node(&motor("base")).unwrap();
        assert!(!g.contains(&motor("base")));
        assert!(g.parents_of(&arm("a1")).is_empty());
        g.topological_sort().unwrap();
    }

    #[test]
    fn remove_node_only_marks() {
        let g = Graph::new();
        let node = g.add_node(&motor("m1"));
        g.remove_node(&motor("m1")).unwrap();
        assert!(node.marked_for_removal());
        assert!(g.contains(&motor("m1")));
    }

    #[test]
    fn propagation_reaches_transitive_dependents_once() {
        let g = Graph::new();
        for n in ["base", "mid", "tip"] {
            g.add_node(&motor(n));
        }
        g.add_child(&motor("mid"), &motor("base")).unwrap();
        g.add_child(&motor("tip"), &motor("mid")).unwrap();
        // Diamond: tip also depends on base directly.
        g.add_child(&motor("tip"), &motor("base")).unwrap();

        let updated = g.propagate_needs_update(&motor("base"));
        assert_eq!(updated, vec![motor("mid"), motor("tip")]);
        assert!(g.node(&motor("mid")).unwrap().needs_dependency_resolution());
        assert!(g.node(&motor("tip")).unwrap().needs_dependency_resolution());
    }

    #[test]
    fn propagation_includes_weak_matches() {
        let g = Graph::new();
        let cam = camera("c1");
        let svc = Name::new(Api::new_service("vision"), "builtin");
        g.add_node(&cam);
        let svc_node = g.add_node(&svc);
        svc_node.set_weak_matchers(vec![DependencyMatcher::Api(Api::new_component("camera"))]);

        let updated = g.propagate_needs_update(&cam);
        assert_eq!(updated, vec![svc.clone()]);
        assert!(g.node(&svc).unwrap().needs_dependency_resolution());
    }

    #[test]
    fn propagation_never_updates_the_origin() {
        let g = Graph::new();
        let a = motor("a");
        g.add_node(&a);
        let node = g.add_node(&motor("b"));
        node.set_weak_matchers(vec![DependencyMatcher::ApiType(
            chassis_core::name::ApiType::Component,
        )]);
        g.add_child(&motor("b"), &a).unwrap();

        let updated = g.propagate_needs_update(&a);
        assert_eq!(updated, vec![motor("b")]);
        assert!(!g.node(&a).unwrap().needs_dependency_resolution());
    }

    #[test]
    fn rename_preserves_state_and_edges() {
        let g = Graph::new();
        let old = motor("m1");
        let renamed = Name::with_remote(Api::new_component("motor"), ["rover"], "m1");
        g.add_node(&motor("base"));
        let node = g.add_node(&old);
        g.add_child(&old, &motor("base")).unwrap();
        node.swap_resource(stub(&old), Model::builtin("fake"));

        let target = g.rename_node(&old, &renamed).unwrap();
        assert!(!g.contains(&old));
        assert!(target.resource().is_ok());
        assert_eq!(g.parents_of(&renamed), vec![motor("base")]);
        assert_eq!(g.children_of(&motor("base")), vec![renamed]);
    }

    #[tokio::test]
    async fn marked_nodes_still_close_through_unsafe_access() {
        let g = Graph::new();
        let node = g.add_node(&motor("m1"));
        node.swap_resource(stub(&motor("m1")), Model::builtin("fake"));
        g.remove_node(&motor("m1")).unwrap();

        assert!(node.resource().is_err());
        assert!(node.unsafe_resource().is_ok());
        node.close(&Context::new()).await.unwrap();
    }
}
