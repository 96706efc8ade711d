//! End-to-end safety-heartbeat behavior: a client that stops heartbeating
//! has its touched actuators stopped, on time, exactly once.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use chassis_core::config::AttributeMap;
use chassis_core::error::Error;
use chassis_core::name::{Api, Name};
use chassis_core::resource::{Actuator, Resource};
use chassis_core::Context;
use chassis_registry::{ApiRegistration, MethodDescriptor, Registry};
use chassis_session::{
    RequestMetadata, ResourceFetcher, SafetyMonitoredMethods, SessionInterceptor, SessionManager,
    SessionManagerConfig,
};

const SET_POWER: &str = "/chassis.component.motor.v1.MotorService/SetPower";

#[derive(Debug)]
struct StoppableMotor {
    name: Name,
    stops: AtomicUsize,
    stopped_at: Mutex<Option<Instant>>,
    panic_on_stop: bool,
}

impl StoppableMotor {
    fn new(name: Name) -> Self {
        Self {
            name,
            stops: AtomicUsize::new(0),
            stopped_at: Mutex::new(None),
            panic_on_stop: false,
        }
    }

    fn panicking(name: Name) -> Self {
        Self {
            panic_on_stop: true,
            ..Self::new(name)
        }
    }
}

#[async_trait::async_trait]
impl Resource for StoppableMotor {
    fn name(&self) -> Name {
        self.name.clone()
    }

    fn as_actuator(&self) -> Option<&dyn Actuator> {
        Some(self)
    }
}

#[async_trait::async_trait]
impl Actuator for StoppableMotor {
    async fn stop(&self, _ctx: &Context, _extra: Option<AttributeMap>) -> chassis_core::Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        *self.stopped_at.lock() = Some(Instant::now());
        assert!(!self.panic_on_stop, "stop panicked on purpose");
        Ok(())
    }
}

#[derive(Default)]
struct MapFetcher {
    resources: HashMap<Name, Arc<dyn Resource>>,
}

impl ResourceFetcher for MapFetcher {
    fn resource(&self, name: &Name) -> chassis_core::Result<Arc<dyn Resource>> {
        self.resources
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound { name: name.clone() })
    }
}

fn motor_name(local: &str) -> Name {
    Name::new(Api::new_component("motor"), local)
}

fn methods() -> SafetyMonitoredMethods {
    let registry = Registry::new();
    registry.register_api(
        Api::new_component("motor"),
        ApiRegistration::new()
            .with_method_descriptors(vec![MethodDescriptor::new(SET_POWER).monitored()]),
    );
    SafetyMonitoredMethods::from_registry(&registry)
}

fn harness(
    motors: &[Arc<StoppableMotor>],
    window: Duration,
) -> (Arc<SessionManager>, SessionInterceptor) {
    let fetcher = MapFetcher {
        resources: motors
            .iter()
            .map(|m| (m.name(), Arc::clone(m) as Arc<dyn Resource>))
            .collect(),
    };
    let manager = Arc::new(SessionManager::with_config(
        Arc::new(fetcher),
        SessionManagerConfig {
            heartbeat_window: window,
            max_sessions: 64,
        },
    ));
    let interceptor = SessionInterceptor::new(Arc::clone(&manager), methods());
    (manager, interceptor)
}

async fn touch(interceptor: &SessionInterceptor, session_id: &str, motor: &str) {
    interceptor
        .handle_unary(
            &RequestMetadata {
                method: SET_POWER.to_string(),
                subject: String::new(),
                session_id: Some(session_id.to_string()),
            },
            &HashMap::from([("name".to_string(), motor.to_string())]),
            |_| async { Ok(()) },
        )
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn abandoned_session_stops_motor_within_latency_bounds() {
    let window = Duration::from_millis(200);
    let motor = Arc::new(StoppableMotor::new(motor_name("m1")));
    let (manager, interceptor) = harness(std::slice::from_ref(&motor), window);

    let session = manager.start("", None).unwrap();
    touch(&interceptor, &session.id.to_string(), "m1").await;
    let last_heartbeat = Instant::now();
    manager.heartbeat(session.id, "").unwrap();

    // Abrupt client disappearance: no more heartbeats.
    tokio::time::sleep(window * 2).await;

    assert_eq!(motor.stops.load(Ordering::SeqCst), 1, "stop exactly once");
    let stopped_at = motor.stopped_at.lock().expect("motor was stopped");
    let latency = stopped_at.duration_since(last_heartbeat);
    assert!(
        latency >= window.mul_f64(0.75) && latency <= window.mul_f64(1.5),
        "stop latency {latency:?} outside [0.75W, 1.5W] for W = {window:?}"
    );
    manager.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn every_associated_actuator_is_stopped() {
    let window = Duration::from_millis(100);
    let motors: Vec<Arc<StoppableMotor>> = ["m1", "m2", "m3"]
        .iter()
        .map(|n| Arc::new(StoppableMotor::new(motor_name(n))))
        .collect();
    let (manager, interceptor) = harness(&motors, window);

    let session = manager.start("", None).unwrap();
    for name in ["m1", "m2", "m3"] {
        touch(&interceptor, &session.id.to_string(), name).await;
    }
    tokio::time::sleep(window * 3).await;

    for motor in &motors {
        assert_eq!(motor.stops.load(Ordering::SeqCst), 1, "{}", motor.name());
    }
    manager.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn heartbeats_keep_the_session_and_motor_alive() {
    let window = Duration::from_millis(100);
    let motor = Arc::new(StoppableMotor::new(motor_name("m1")));
    let (manager, interceptor) = harness(std::slice::from_ref(&motor), window);

    let session = manager.start("", None).unwrap();
    touch(&interceptor, &session.id.to_string(), "m1").await;
    for _ in 0..6 {
        tokio::time::sleep(window / 4).await;
        manager.heartbeat(session.id, "").unwrap();
    }
    assert_eq!(motor.stops.load(Ordering::SeqCst), 0);
    manager.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn panicking_stop_is_recovered_and_the_sweeper_survives() {
    let window = Duration::from_millis(50);
    let bad = Arc::new(StoppableMotor::panicking(motor_name("bad")));
    let good = Arc::new(StoppableMotor::new(motor_name("good")));
    let (manager, interceptor) = harness(&[Arc::clone(&bad), Arc::clone(&good)], window);

    let session = manager.start("", None).unwrap();
    touch(&interceptor, &session.id.to_string(), "bad").await;
    tokio::time::sleep(window * 4).await;
    assert_eq!(bad.stops.load(Ordering::SeqCst), 1);

    // The sweeper is still alive: a second session's resources still stop.
    let session = manager.start("", None).unwrap();
    touch(&interceptor, &session.id.to_string(), "good").await;
    tokio::time::sleep(window * 4).await;
    assert_eq!(good.stops.load(Ordering::SeqCst), 1);
    manager.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn vanished_resource_is_skipped_without_stalling() {
    let window = Duration::from_millis(50);
    let motor = Arc::new(StoppableMotor::new(motor_name("m1")));
    // Fetcher only knows m1; the session also touched a ghost.
    let (manager, interceptor) = harness(std::slice::from_ref(&motor), window);

    let session = manager.start("", None).unwrap();
    touch(&interceptor, &session.id.to_string(), "ghost").await;
    touch(&interceptor, &session.id.to_string(), "m1").await;
    tokio::time::sleep(window * 4).await;

    assert_eq!(motor.stops.load(Ordering::SeqCst), 1);
    manager.close().await;
}
