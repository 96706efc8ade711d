//! The session manager: session map, resource associations, and the
//! expiry sweeper that halts abandoned actuators.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use chassis_core::name::Name;
use chassis_core::resource::Resource;
use chassis_core::Context;

use crate::error::{Result, SessionError};
use crate::session::Session;

/// Hard cap on concurrent sessions.
pub const MAX_SESSIONS: usize = 1024;

/// Default heartbeat window granted to new sessions.
pub const DEFAULT_HEARTBEAT_WINDOW: Duration = Duration::from_secs(2);

/// Sweeper tick period. A client that stops heartbeating is guaranteed to
/// have its resources stopped within one tick past its window.
pub const SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// How the session layer reaches live resources. Implemented by the
/// runtime's resource manager; the session crate never sees the graph.
pub trait ResourceFetcher: Send + Sync + 'static {
    fn resource(&self, name: &Name) -> chassis_core::Result<Arc<dyn Resource>>;
}

/// Tunables for [`SessionManager`].
#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    pub heartbeat_window: Duration,
    pub max_sessions: usize,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            heartbeat_window: DEFAULT_HEARTBEAT_WINDOW,
            max_sessions: MAX_SESSIONS,
        }
    }
}

#[derive(Default)]
struct State {
    sessions: HashMap<Uuid, Session>,
    /// Which session last touched each resource through a monitored call.
    resource_to_session: HashMap<Name, Uuid>,
}

/// Process-wide session tracker with a 10 ms expiry sweeper.
pub struct SessionManager {
    state: Arc<RwLock<State>>,
    config: SessionManagerConfig,
    cancel: CancellationToken,
    sweeper: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SessionManager {
    /// Start a manager and its sweeper task. Must run inside a tokio
    /// runtime.
    #[must_use]
    pub fn new(fetcher: Arc<dyn ResourceFetcher>) -> Self {
        Self::with_config(fetcher, SessionManagerConfig::default())
    }

    #[must_use]
    pub fn with_config(fetcher: Arc<dyn ResourceFetcher>, config: SessionManagerConfig) -> Self {
        let state = Arc::new(RwLock::new(State::default()));
        let cancel = CancellationToken::new();
        let sweeper = tokio::spawn(run_sweeper(
            Arc::clone(&state),
            fetcher,
            cancel.child_token(),
        ));
        Self {
            state,
            config,
            cancel,
            sweeper: parking_lot::Mutex::new(Some(sweeper)),
        }
    }

    /// Start a session for `subject`, optionally resuming `resume`.
    ///
    /// Resumption only succeeds when the session is still active and owned
    /// by the same subject; otherwise a fresh session (with a fresh id) is
    /// returned, never an error — the caller cannot distinguish a foreign
    /// session from an expired one.
    pub fn start(&self, subject: &str, resume: Option<Uuid>) -> Result<Session> {
        let now = Instant::now();
        let mut state = self.state.write();
        if let Some(id) = resume
            && let Some(session) = state.sessions.get_mut(&id)
            && session.active(now)
            && session.check_owner(subject)
        {
            session.heartbeat(now);
            return Ok(session.clone());
        }
        if state.sessions.len() >= self.config.max_sessions {
            return Err(SessionError::TooManySessions {
                max: self.config.max_sessions,
            });
        }
        let session = Session::new(subject, self.config.heartbeat_window);
        state.sessions.insert(session.id, session.clone());
        tracing::debug!(session = %session.id, "session started");
        Ok(session)
    }

    /// Find an active session owned by `subject`. Absence, expiry, and a
    /// foreign owner all yield the same `NoSession`.
    pub fn find_by_id(&self, id: Uuid, subject: &str) -> Result<Session> {
        let state = self.state.read();
        state
            .sessions
            .get(&id)
            .filter(|s| s.active(Instant::now()) && s.check_owner(subject))
            .cloned()
            .ok_or(SessionError::NoSession)
    }

    /// Service a heartbeat: push the deadline one window out.
    pub fn heartbeat(&self, id: Uuid, subject: &str) -> Result<()> {
        let now = Instant::now();
        let mut state = self.state.write();
        match state.sessions.get_mut(&id) {
            Some(session) if session.active(now) && session.check_owner(subject) => {
                session.heartbeat(now);
                Ok(())
            }
            _ => Err(SessionError::NoSession),
        }
    }

    /// Bind `name` to `session_id` so expiry stops it. The nil id
    /// disassociates; any previous binding is overwritten either way.
    pub fn associate_resource(&self, session_id: Uuid, name: Name) {
        let mut state = self.state.write();
        if session_id.is_nil() {
            state.resource_to_session.remove(&name);
        } else {
            state.resource_to_session.insert(name, session_id);
        }
    }

    /// The session currently bound to `name`, if any.
    #[must_use]
    pub fn association(&self, name: &Name) -> Option<Uuid> {
        self.state.read().resource_to_session.get(name).copied()
    }

    /// Snapshot of every session, expired ones included until the sweeper
    /// collects them.
    #[must_use]
    pub fn all(&self) -> Vec<Session> {
        self.state.read().sessions.values().cloned().collect()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().sessions.is_empty()
    }

    /// Signal the sweeper and wait for it to exit.
    pub async fn close(&self) {
        self.cancel.cancel();
        let handle = self.sweeper.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("SessionManager")
            .field("sessions", &state.sessions.len())
            .field("associations", &state.resource_to_session.len())
            .finish()
    }
}

/// The sweeper: every tick, collect expired sessions and the resources
/// they touched, delete the sessions, then — with the lock released —
/// stop each associated actuator under panic recovery.
async fn run_sweeper(
    state: Arc<RwLock<State>>,
    fetcher: Arc<dyn ResourceFetcher>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let now = Instant::now();
        let to_stop: Vec<Name> = {
            let mut guard = state.write();
            let expired: Vec<Uuid> = guard
                .sessions
                .iter()
                .filter(|(_, s)| !s.active(now))
                .map(|(id, _)| *id)
                .collect();
            if expired.is_empty() {
                continue;
            }
            for id in &expired {
                guard.sessions.remove(id);
            }
            let names: Vec<Name> = guard
                .resource_to_session
                .iter()
                .filter(|(_, id)| expired.contains(id))
                .map(|(name, _)| name.clone())
                .collect();
            for name in &names {
                guard.resource_to_session.remove(name);
            }
            tracing::debug!(
                expired = expired.len(),
                resources = names.len(),
                "collected expired sessions"
            );
            names
        };

        // Stop calls are external and unbounded; they run with no lock
        // held.
        for name in to_stop {
            let resource = match fetcher.resource(&name) {
                Ok(resource) => resource,
                Err(err) => {
                    if cancel.is_cancelled() {
                        // Shutdown race: the graph is being torn down.
                        return;
                    }
                    tracing::debug!(resource = %name, error = %err, "expired resource not found");
                    continue;
                }
            };
            let Some(actuator) = resource.as_actuator() else {
                continue;
            };
            let ctx = Context::new().with_cancellation(cancel.child_token());
            let outcome = std::panic::AssertUnwindSafe(actuator.stop(&ctx, None))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => {
                    tracing::info!(resource = %name, "stopped resource for expired session");
                }
                Ok(Err(err)) => {
                    tracing::error!(resource = %name, error = %err, "session-triggered stop failed");
                }
                Err(_) => {
                    tracing::error!(resource = %name, "session-triggered stop panicked");
                }
            }
        }
    }
}
