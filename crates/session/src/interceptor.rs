//! Safety-heartbeat interception.
//!
//! The interceptor sits in front of every unary handler. Methods carrying
//! the safety-heartbeat annotation get their target resource extracted
//! from the request and bound to the caller's session, so abandoning the
//! session stops the resource. The method table is built once at startup
//! from the API registrations' service descriptors, never per call.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use uuid::Uuid;

use chassis_core::name::{Api, Name};
use chassis_registry::Registry;

use crate::error::{Result, SessionError};
use crate::manager::SessionManager;
use crate::session::Session;

/// Request-metadata key carrying the caller's session id. Kept exactly as
/// the deployed fleet sends it.
pub const SESSION_METADATA_KEY: &str = "viam-sid";

/// Request field holding the target resource's name unless the method's
/// descriptor overrides it.
pub const DEFAULT_RESOURCE_NAME_FIELD: &str = "name";

/// Management methods exempt from session logic entirely.
const EXEMPT_METHODS: &[&str] = &[
    "/chassis.robot.v1.RobotService/StartSession",
    "/chassis.robot.v1.RobotService/SendSessionHeartbeat",
    "/chassis.robot.v1.RobotService/ResourceNames",
    "/proto.rpc.v1.AuthService/Authenticate",
    "/grpc.reflection.v1.ServerReflection/ServerReflectionInfo",
];

/// Minimal view of an incoming unary request: named field access, enough
/// to pull the target resource's name out of the first message.
pub trait SessionRequest: Send + Sync {
    fn field(&self, name: &str) -> Option<String>;
}

impl SessionRequest for HashMap<String, String> {
    fn field(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Transport metadata accompanying a call.
#[derive(Debug, Clone, Default)]
pub struct RequestMetadata {
    /// Fully-qualified method name.
    pub method: String,
    /// Authenticated subject; empty when transport auth is disabled.
    pub subject: String,
    /// Raw value of [`SESSION_METADATA_KEY`], if the caller sent one.
    pub session_id: Option<String>,
}

impl RequestMetadata {
    /// Lift transport headers into call metadata, pulling the session id
    /// out of [`SESSION_METADATA_KEY`].
    #[must_use]
    pub fn from_headers(
        method: impl Into<String>,
        subject: impl Into<String>,
        headers: &HashMap<String, String>,
    ) -> Self {
        Self {
            method: method.into(),
            subject: subject.into(),
            session_id: headers.get(SESSION_METADATA_KEY).cloned(),
        }
    }
}

#[derive(Debug, Clone)]
struct MethodPolicy {
    api: Api,
    monitored: bool,
    resource_name_field: String,
}

/// Method-name → safety policy table, built by reflecting over every
/// registered API's service descriptors once at startup.
#[derive(Debug, Clone, Default)]
pub struct SafetyMonitoredMethods {
    methods: HashMap<String, MethodPolicy>,
    exempt: HashSet<&'static str>,
}

impl SafetyMonitoredMethods {
    /// Build the table from the registry's API registrations.
    #[must_use]
    pub fn from_registry(registry: &Registry) -> Self {
        let mut methods = HashMap::new();
        for api in registry.registered_apis() {
            let Some(registration) = registry.lookup_api(&api) else {
                continue;
            };
            for descriptor in registration.method_descriptors {
                methods.insert(
                    descriptor.method.clone(),
                    MethodPolicy {
                        api: api.clone(),
                        monitored: descriptor.safety_heartbeat_monitored,
                        resource_name_field: descriptor
                            .resource_name_field
                            .unwrap_or_else(|| DEFAULT_RESOURCE_NAME_FIELD.to_string()),
                    },
                );
            }
        }
        Self {
            methods,
            exempt: EXEMPT_METHODS.iter().copied().collect(),
        }
    }

    /// The policy for `method` when it is monitored and not exempt.
    fn monitored_policy(&self, method: &str) -> Option<&MethodPolicy> {
        if self.exempt.contains(method) {
            return None;
        }
        self.methods.get(method).filter(|policy| policy.monitored)
    }

    #[must_use]
    pub fn is_monitored(&self, method: &str) -> bool {
        self.monitored_policy(method).is_some()
    }
}

/// Builds the target resource name from a request-field value, which may
/// itself be remote-qualified (`"rover:m1"`).
fn name_from_short(api: &Api, short: &str) -> Name {
    let mut segments: Vec<&str> = short.split(':').collect();
    let local = segments.pop().unwrap_or_default();
    Name::with_remote(api.clone(), segments, local)
}

/// The unary interceptor: validates the caller's session on monitored
/// methods and records the `(session → resource)` binding once the
/// handler succeeds.
pub struct SessionInterceptor {
    manager: Arc<SessionManager>,
    methods: SafetyMonitoredMethods,
}

impl SessionInterceptor {
    #[must_use]
    pub fn new(manager: Arc<SessionManager>, methods: SafetyMonitoredMethods) -> Self {
        Self { manager, methods }
    }

    /// Wrap one unary call. The handler receives the caller's session when
    /// one was presented and validated; unannotated methods bypass session
    /// logic entirely, and a missing session id never blocks the call.
    pub async fn handle_unary<Req, T, F, Fut>(
        &self,
        metadata: &RequestMetadata,
        request: &Req,
        handler: F,
    ) -> Result<T>
    where
        Req: SessionRequest,
        F: FnOnce(Option<Session>) -> Fut,
        Fut: Future<Output = chassis_core::Result<T>>,
    {
        let Some(policy) = self.methods.monitored_policy(&metadata.method) else {
            return Ok(handler(None).await?);
        };

        let session = match &metadata.session_id {
            None => None,
            Some(raw) => {
                let id = Uuid::parse_str(raw).map_err(|_| SessionError::InvalidSessionId {
                    value: raw.clone(),
                })?;
                Some(self.manager.find_by_id(id, &metadata.subject)?)
            }
        };
        let target = request
            .field(&policy.resource_name_field)
            .filter(|value| !value.is_empty())
            .map(|value| name_from_short(&policy.api, &value));

        let output = handler(session.clone()).await?;

        // Associations are recorded only after a successful call, so the
        // sweeper never observes a binding older than the last completed
        // handler for the pair.
        if let (Some(session), Some(name)) = (session, target) {
            self.manager.associate_resource(session.id, name);
        }
        Ok(output)
    }
}
