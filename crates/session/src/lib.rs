//! # Chassis Session
//!
//! Tracks client sessions under safety-heartbeat supervision. Sessions are
//! extended by heartbeats; when one expires, every resource it touched
//! through a safety-monitored RPC has its `stop` invoked, so losing the
//! caller halts actuators deterministically.

pub mod error;
pub mod interceptor;
pub mod manager;
pub mod session;

pub use error::SessionError;
pub use interceptor::{
    RequestMetadata, SESSION_METADATA_KEY, SafetyMonitoredMethods, SessionInterceptor,
    SessionRequest,
};
pub use manager::{ResourceFetcher, SessionManager, SessionManagerConfig};
pub use session::Session;
