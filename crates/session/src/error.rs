//! Session-layer errors.

use thiserror::Error;

/// Result type for session operations.
pub type Result<T, E = SessionError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum SessionError {
    /// The session is absent, expired, or owned by a different subject —
    /// deliberately indistinguishable cases.
    #[error("no session found")]
    NoSession,

    /// The concurrent-session cap was hit.
    #[error("too many sessions (limit {max})")]
    TooManySessions { max: usize },

    /// The session metadata carried something that is not a UUID.
    #[error("invalid session id \"{value}\"")]
    InvalidSessionId { value: String },

    /// A failure from the intercepted handler itself.
    #[error(transparent)]
    Resource(#[from] chassis_core::Error),
}
