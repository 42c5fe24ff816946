use crate::client::ClusterClient;
use chrono::Utc;
use corral_core::k8s_openapi::api::core::v1::{EventSource, ObjectReference};
use corral_core::k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use corral_core::{Event, ObjectMeta, Replica, Resource};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// Component name attached to every event this controller emits
pub const EVENT_COMPONENT: &str = "longhorn-replica-controller";

/// Severity of a recorded event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Normal,
    Warning,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Normal => "Normal",
            EventKind::Warning => "Warning",
        }
    }
}

/// Sink for replica lifecycle events. Recording never fails the caller.
pub trait EventRecorder: Send + Sync {
    fn record(&self, replica: &Replica, kind: EventKind, reason: &str, message: &str);
}

/// Build a core/v1 Event describing `replica`
pub fn build_event(replica: &Replica, kind: EventKind, reason: &str, message: &str) -> Event {
    let now = Time(Utc::now());
    let name = format!(
        "{}.{}",
        replica.name(),
        uuid::Uuid::new_v4().simple()
    );

    Event {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(replica.namespace().to_string()),
            ..Default::default()
        },
        involved_object: ObjectReference {
            api_version: Some(Replica::gvk().api_version()),
            kind: Some(Replica::gvk().kind),
            name: Some(replica.name().to_string()),
            namespace: Some(replica.namespace().to_string()),
            uid: replica.uid().map(str::to_string),
            resource_version: replica.resource_version().map(str::to_string),
            ..Default::default()
        },
        type_: Some(kind.as_str().to_string()),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        source: Some(EventSource {
            component: Some(EVENT_COMPONENT.to_string()),
            host: None,
        }),
        reporting_component: Some(EVENT_COMPONENT.to_string()),
        count: Some(1),
        first_timestamp: Some(now.clone()),
        last_timestamp: Some(now),
        ..Default::default()
    }
}

/// Publishes events to the cluster in the background
pub struct ClusterEventRecorder {
    client: Arc<dyn ClusterClient>,
}

impl ClusterEventRecorder {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self { client }
    }
}

impl EventRecorder for ClusterEventRecorder {
    fn record(&self, replica: &Replica, kind: EventKind, reason: &str, message: &str) {
        let event = build_event(replica, kind, reason, message);
        let namespace = replica.namespace().to_string();
        let client = self.client.clone();
        debug!(replica = %replica.name(), reason, "Recording event");

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(reason, "No runtime available, dropping event");
            return;
        };
        handle.spawn(async move {
            if let Err(e) = client.create_event(&namespace, &event).await {
                warn!("Failed to record event {:?}: {}", event.reason, e);
            }
        });
    }
}

/// A recorded event kept in memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub replica: String,
    pub kind: EventKind,
    pub reason: String,
    pub message: String,
}

/// Keeps events in memory for inspection
#[derive(Default)]
pub struct MemoryRecorder {
    events: Mutex<Vec<RecordedEvent>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    /// Reasons recorded so far, in order
    pub fn reasons(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.reason.clone()).collect()
    }
}

impl EventRecorder for MemoryRecorder {
    fn record(&self, replica: &Replica, kind: EventKind, reason: &str, message: &str) {
        self.events.lock().push(RecordedEvent {
            replica: replica.name().to_string(),
            kind,
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }
}
