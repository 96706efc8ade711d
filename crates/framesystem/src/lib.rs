//! # Chassis Framesystem
//!
//! Assembles an unordered set of frame parts into a world-rooted transform
//! tree: validates connectivity, topologically sorts, detects cycles, and
//! answers pose queries by composing static offsets up the parent chain.

pub mod error;
pub mod part;
pub mod pose;
pub mod tree;

pub use error::FrameSystemError;
pub use part::{FramePart, prefix_remote};
pub use pose::{Pose, Quaternion};
pub use tree::{Frame, FrameTree};

/// The reserved root identifier.
pub const WORLD: &str = chassis_core::config::WORLD_FRAME;
