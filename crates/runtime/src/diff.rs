//! Classifying a desired configuration against the live graph.

use std::collections::HashSet;

use chassis_core::config::{ProcessConfig, ResourceConfig};
use chassis_core::name::Name;
use chassis_graph::{Graph, NodeState};

/// How each prospective resource relates to the graph's current state.
#[derive(Debug, Clone, Default)]
pub struct ConfigDiff {
    /// Entries with no corresponding node.
    pub added: Vec<ResourceConfig>,
    /// Entries whose config differs structurally, plus entries whose node
    /// never reached `Ready` (retried so a now-satisfiable build runs
    /// again).
    pub modified: Vec<ResourceConfig>,
    /// Entries identical to a `Ready` node's config.
    pub unchanged: Vec<ResourceConfig>,
    /// Live nodes the desired config no longer mentions.
    pub removed: Vec<Name>,
}

impl ConfigDiff {
    /// Classify `desired` against `graph`.
    #[must_use]
    pub fn compute(graph: &Graph, desired: &[ResourceConfig]) -> Self {
        let mut diff = Self::default();
        let desired_names: HashSet<Name> =
            desired.iter().map(ResourceConfig::resource_name).collect();

        for name in graph.names() {
            if desired_names.contains(&name) {
                continue;
            }
            let Some(node) = graph.node(&name) else {
                continue;
            };
            if !node.marked_for_removal() {
                diff.removed.push(name);
            }
        }

        for config in desired {
            let name = config.resource_name();
            match graph.node(&name) {
                None => diff.added.push(config.clone()),
                Some(node) => match node.config() {
                    Some(current) if current == *config => {
                        if node.state() == NodeState::Ready {
                            diff.unchanged.push(config.clone());
                        } else {
                            diff.modified.push(config.clone());
                        }
                    }
                    _ => diff.modified.push(config.clone()),
                },
            }
        }
        diff
    }

    /// Whether anything in the graph has to move.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }
}

/// Delta between two process lists. Processes are never graph resources;
/// the host supervisor acts on this summary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessChanges {
    pub added: Vec<ProcessConfig>,
    pub modified: Vec<ProcessConfig>,
    pub removed: Vec<ProcessConfig>,
}

impl ProcessChanges {
    #[must_use]
    pub fn compute(previous: &[ProcessConfig], desired: &[ProcessConfig]) -> Self {
        let mut changes = Self::default();
        for process in desired {
            match previous.iter().find(|p| p.id == process.id) {
                None => changes.added.push(process.clone()),
                Some(old) if old != process => changes.modified.push(process.clone()),
                Some(_) => {}
            }
        }
        for process in previous {
            if !desired.iter().any(|p| p.id == process.id) {
                changes.removed.push(process.clone());
            }
        }
        changes
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chassis_core::name::{Api, Model};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[derive(Debug)]
    struct Stub {
        name: Name,
    }

    #[async_trait::async_trait]
    impl chassis_core::Resource for Stub {
        fn name(&self) -> Name {
            self.name.clone()
        }
    }

    fn motor(name: &str) -> ResourceConfig {
        ResourceConfig::new(Api::new_component("motor"), Model::builtin("fake"), name)
    }

    fn ready_node(graph: &Graph, config: &ResourceConfig) {
        let name = config.resource_name();
        let node = graph.add_node(&name);
        node.set_new_config(config.clone(), config.dependencies());
        node.swap_resource(
            Arc::new(Stub { name: name.clone() }),
            config.model.clone(),
        );
    }

    #[test]
    fn fresh_config_is_all_additions() {
        let graph = Graph::new();
        let diff = ConfigDiff::compute(&graph, &[motor("m1"), motor("m2")]);
        assert_eq!(diff.added.len(), 2);
        assert!(diff.modified.is_empty());
        assert!(diff.removed.is_empty());
    }

    #[test]
    fn identical_ready_nodes_are_unchanged() {
        let graph = Graph::new();
        let config = motor("m1");
        ready_node(&graph, &config);
        let diff = ConfigDiff::compute(&graph, &[config]);
        assert_eq!(diff.unchanged.len(), 1);
        assert!(diff.is_empty());
    }

    #[test]
    fn attribute_change_is_a_modification() {
        let graph = Graph::new();
        ready_node(&graph, &motor("m1"));
        let mut changed = motor("m1");
        changed.attributes.insert("max_rpm".to_string(), 500.into());
        let diff = ConfigDiff::compute(&graph, &[changed]);
        assert_eq!(diff.modified.len(), 1);
    }

    #[test]
    fn unhealthy_nodes_are_retried_even_when_identical() {
        let graph = Graph::new();
        let config = motor("m1");
        let node = graph.add_node(&config.resource_name());
        node.set_new_config(config.clone(), vec![]);
        node.log_and_set_last_error(chassis_core::Error::resource(
            config.resource_name(),
            "boom",
        ));
        let diff = ConfigDiff::compute(&graph, &[config]);
        assert_eq!(diff.modified.len(), 1);
        assert!(diff.unchanged.is_empty());
    }

    #[test]
    fn dropped_entries_are_removals() {
        let graph = Graph::new();
        ready_node(&graph, &motor("m1"));
        ready_node(&graph, &motor("m2"));
        let diff = ConfigDiff::compute(&graph, &[motor("m1")]);
        assert_eq!(diff.removed, vec![motor("m2").resource_name()]);
    }

    #[test]
    fn already_removing_nodes_are_not_re_removed() {
        let graph = Graph::new();
        ready_node(&graph, &motor("m1"));
        graph.remove_node(&motor("m1").resource_name()).unwrap();
        let diff = ConfigDiff::compute(&graph, &[]);
        assert!(diff.removed.is_empty());
    }

    #[test]
    fn process_changes_track_ids() {
        let old = vec![
            ProcessConfig {
                id: "telemetry".to_string(),
                command: "telemetryd".to_string(),
                args: vec![],
                one_shot: false,
            },
            ProcessConfig {
                id: "sync".to_string(),
                command: "syncd".to_string(),
                args: vec![],
                one_shot: false,
            },
        ];
        let mut updated = old[0].clone();
        updated.args = vec!["--verbose".to_string()];
        let new = vec![
            updated.clone(),
            ProcessConfig {
                id: "camera-feed".to_string(),
                command: "feedd".to_string(),
                args: vec![],
                one_shot: true,
            },
        ];

        let changes = ProcessChanges::compute(&old, &new);
        assert_eq!(changes.added.len(), 1);
        assert_eq!(changes.added[0].id, "camera-feed");
        assert_eq!(changes.modified, vec![updated]);
        assert_eq!(changes.removed.len(), 1);
        assert_eq!(changes.removed[0].id, "sync");
    }
}
