//! # Chassis Graph
//!
//! The concurrent resource dependency graph at the heart of the chassis
//! runtime. Vertices are [`GraphNode`]s carrying per-resource lifecycle
//! state, configuration revisions, and the constructed handle; edges run
//! parent → child where the child depends on the parent. A shared logical
//! clock stamps every successful resource swap.

pub mod graph;
pub mod node;

pub use graph::Graph;
pub use node::{GraphNode, LogicalClock, NodeState, NodeStatus};
