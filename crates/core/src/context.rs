//! Operation context with cancellation and deadline support.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

/// Context for long-running resource operations.
///
/// Carries a cooperative cancellation token and an optional deadline.
/// Passed to every external call the runtime makes — construct,
/// reconfigure, close, stop — so implementations can abort early.
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// Cooperative cancellation — operations should check this
    /// periodically and abort early when cancelled.
    pub cancellation: CancellationToken,
    /// Absolute deadline for the operation, if any.
    pub deadline: Option<Instant>,
}

impl Context {
    /// A context with a fresh token and no deadline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cancellation token with the provided one.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Set an absolute deadline `timeout` from now.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// A child context sharing cancellation lineage with this one; cancelling
    /// the parent cancels the child, never the reverse.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            cancellation: self.cancellation.child_token(),
            deadline: self.deadline,
        }
    }

    /// Whether the operation has been cancelled or its deadline passed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.cancellation.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Time remaining until the deadline, if one is set.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Resolve when the context is cancelled.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await;
    }
}
