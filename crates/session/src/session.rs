//! One client session.

use std::time::{Duration, Instant};

use uuid::Uuid;

/// A time-bounded conversation between a caller and the runtime, extended
/// by heartbeats.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    /// Authenticated subject that started the session. Empty when
    /// transport auth is disabled, in which case the session is shared
    /// among all unauthenticated callers.
    pub owner: String,
    pub created_at: Instant,
    pub deadline: Instant,
    pub heartbeat_window: Duration,
}

impl Session {
    /// A fresh session for `owner`, expiring one heartbeat window from now.
    #[must_use]
    pub fn new(owner: impl Into<String>, heartbeat_window: Duration) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4(),
            owner: owner.into(),
            created_at: now,
            deadline: now + heartbeat_window,
            heartbeat_window,
        }
    }

    /// Whether the session is still alive at `now`.
    #[must_use]
    pub fn active(&self, now: Instant) -> bool {
        now < self.deadline
    }

    /// Push the deadline one window past `now`.
    pub fn heartbeat(&mut self, now: Instant) {
        self.deadline = now + self.heartbeat_window;
    }

    /// Whether `subject` may see this session. Owners match exactly;
    /// the empty owner (auth disabled) is shared with every empty-subject
    /// caller.
    #[must_use]
    pub fn check_owner(&self, subject: &str) -> bool {
        self.owner == subject
    }
}
