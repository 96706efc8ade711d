//! Frame-tree assembly errors.

use thiserror::Error;

/// Result type for framesystem operations.
pub type Result<T, E = FrameSystemError> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameSystemError {
    /// A non-empty part set where nothing is parented on the world.
    #[error("frame system has no connection to the world frame")]
    NoWorldConnection,

    /// A part references a parent that is neither a part nor the world.
    #[error("frame \"{child}\" references unknown parent \"{parent}\"")]
    MissingParent { child: String, parent: String },

    /// A part tried to claim the reserved root name.
    #[error("\"world\" is reserved and cannot name a frame")]
    WorldFrameName,

    /// A part with no parent at all.
    #[error("frame \"{frame}\" has an empty parent")]
    EmptyParent { frame: String },

    /// The parent chain loops.
    #[error("cycle detected at frame \"{frame}\"")]
    CycleDetected { frame: String },

    /// Two parts assembled under the same short name.
    #[error("duplicate frame name \"{name}\"")]
    DuplicateShortName { name: String },

    /// A pose query named a frame the tree does not contain.
    #[error("frame \"{frame}\" not found in the tree")]
    FrameNotFound { frame: String },
}
