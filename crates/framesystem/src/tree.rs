//! Tree assembly: validation, topological ordering, and pose queries.

use std::collections::{BTreeSet, HashMap};

use serde_json::Value;

use crate::error::{FrameSystemError, Result};
use crate::part::FramePart;
use crate::pose::Pose;
use crate::WORLD;

/// One placed frame: its static offset link against the parent already in
/// the tree, plus the part's kinematic model if it carried one.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub name: String,
    pub parent: String,
    pub offset: Pose,
    pub kinematic_model: Option<Value>,
}

/// A validated, world-rooted transform tree ready for pose queries.
#[derive(Debug, Clone, Default)]
pub struct FrameTree {
    frames: HashMap<String, Frame>,
    /// Topological order, parents before children; the world is implicit
    /// and not listed.
    order: Vec<String>,
}

impl FrameTree {
    /// Assemble `parts` plus any auxiliary transform parts into a tree.
    ///
    /// Validation order: world connectivity, missing parents, reserved
    /// names, empty parents, then cycle detection via the sort itself.
    /// Duplicate short names are caught while indexing.
    pub fn assemble(parts: &[FramePart], auxiliary: &[FramePart]) -> Result<Self> {
        let all: Vec<&FramePart> = parts.iter().chain(auxiliary.iter()).collect();
        if all.is_empty() {
            return Ok(Self::default());
        }

        // Index by name; collisions across the assembled set are fatal.
        let mut by_name: HashMap<&str, &FramePart> = HashMap::new();
        for part in &all {
            if by_name.insert(part.name.as_str(), part).is_some() {
                return Err(FrameSystemError::DuplicateShortName {
                    name: part.name.clone(),
                });
            }
        }

        // 1. Something must hang off the world.
        if !all.iter().any(|p| p.frame.parent == WORLD) {
            return Err(FrameSystemError::NoWorldConnection);
        }

        // 2. Every non-empty parent must exist (or be the world itself);
        //    empty parents get their own, later, check.
        for part in &all {
            let parent = part.frame.parent.as_str();
            if parent.is_empty() || parent == WORLD {
                continue;
            }
            if !by_name.contains_key(parent) {
                return Err(FrameSystemError::MissingParent {
                    child: part.name.clone(),
                    parent: parent.to_string(),
                });
            }
        }

        // 3. The root name is reserved.
        if by_name.contains_key(WORLD) {
            return Err(FrameSystemError::WorldFrameName);
        }

        // 4. Orphans.
        for part in &all {
            if part.frame.parent.is_empty() {
                return Err(FrameSystemError::EmptyParent {
                    frame: part.name.clone(),
                });
            }
        }

        // 5. Topological sort from the world; anything unreachable sits on
        //    a cycle.
        let mut children: HashMap<&str, BTreeSet<&str>> = HashMap::new();
        for part in &all {
            children
                .entry(part.frame.parent.as_str())
                .or_default()
                .insert(part.name.as_str());
        }
        let mut order = Vec::with_capacity(all.len());
        let mut stack: Vec<&str> = children
            .get(WORLD)
            .map(|set| set.iter().rev().copied().collect())
            .unwrap_or_default();
        let mut visited: BTreeSet<&str> = BTreeSet::new();
        while let Some(name) = stack.pop() {
            if !visited.insert(name) {
                return Err(FrameSystemError::CycleDetected {
                    frame: name.to_string(),
                });
            }
            order.push(name.to_string());
            if let Some(next) = children.get(name) {
                for child in next.iter().rev() {
                    stack.push(child);
                }
            }
        }
        if order.len() != all.len() {
            let culprit = all
                .iter()
                .map(|p| p.name.as_str())
                .filter(|name| !visited.contains(name))
                .min()
                .expect("unvisited parts exist when counts differ");
            return Err(FrameSystemError::CycleDetected {
                frame: culprit.to_string(),
            });
        }

        // 6. Attach each part to its already-placed parent, in order.
        let mut frames = HashMap::with_capacity(order.len());
        for name in &order {
            let part = by_name[name.as_str()];
            frames.insert(
                name.clone(),
                Frame {
                    name: name.clone(),
                    parent: part.frame.parent.clone(),
                    offset: Pose::from_frame_config(&part.frame),
                    kinematic_model: part.kinematic_model.clone(),
                },
            );
        }
        Ok(Self { frames, order })
    }

    /// Topological order, parents before children.
    #[must_use]
    pub fn order(&self) -> &[String] {
        &self.order
    }

    #[must_use]
    pub fn frame(&self, name: &str) -> Option<&Frame> {
        self.frames.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        name == WORLD || self.frames.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// The pose of `frame` in the world, composed down the parent chain.
    pub fn pose_in_world(&self, frame: &str) -> Result<Pose> {
        if frame == WORLD {
            return Ok(Pose::IDENTITY);
        }
        let mut chain = Vec::new();
        let mut current = frame;
        while current != WORLD {
            let node = self
                .frames
                .get(current)
                .ok_or_else(|| FrameSystemError::FrameNotFound {
                    frame: current.to_string(),
                })?;
            chain.push(&node.offset);
            current = node.parent.as_str();
        }
        let mut pose = Pose::IDENTITY;
        for offset in chain.into_iter().rev() {
            pose = pose.compose(offset);
        }
        Ok(pose)
    }

    /// The pose of `target` expressed in `source`'s frame.
    pub fn pose_between(&self, source: &str, target: &str) -> Result<Pose> {
        let world_source = self.pose_in_world(source)?;
        let world_target = self.pose_in_world(target)?;
        Ok(world_source.inverse().compose(&world_target))
    }
}
