use async_trait::async_trait;
use std::fmt;
use tracing::{info, warn};

/// Well-known event reason codes.
pub mod reasons {
    pub const NAT_SUBNET_CREATED: &str = "NatSubnetCreated";
    pub const NAT_SUBNET_CREATION_ERROR: &str = "NatSubnetCreationError";
    pub const PRIVATE_LINK_SERVICE_CREATED: &str = "PrivateLinkServiceCreated";
    pub const PRIVATE_LINK_SERVICE_CREATION_ERROR: &str = "PrivateLinkServiceCreationError";
    pub const PRIVATE_LINK_SERVICE_REMOVED: &str = "PrivateLinkServiceRemoved";
    pub const PRIVATE_LINK_SERVICE_REMOVAL_ERROR: &str = "PrivateLinkServiceRemovalError";
    pub const PRIVATE_ENDPOINT_CREATED: &str = "PrivateEndpointCreated";
    pub const PRIVATE_ENDPOINT_CREATION_ERROR: &str = "PrivateEndpointCreationError";
    pub const PRIVATE_ENDPOINT_SUBNET_ERROR: &str = "PrivateEndpointSubnetError";
    pub const NO_SERVICE_FOR_CONNECTION: &str = "NoServiceForPrivateConnection";
}

/// Identity of the intent object an event is recorded against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub kind: &'static str,
    pub namespace: String,
    pub name: String,
}

impl ObjectRef {
    pub fn service(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: "Service",
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn connection(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: "ServiceConnection",
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Severity of a recorded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLevel {
    Normal,
    Warning,
}

/// Sink for operational events attributed to an intent object.
///
/// Recording is fire and forget: reporter failures must never change the
/// outcome of the reconcile that emitted the event.
#[async_trait]
pub trait EventReporter: Send + Sync {
    async fn record(&self, object: &ObjectRef, level: EventLevel, reason: &str, message: &str);
}

/// Reporter that emits structured tracing events.
pub struct LogReporter;

#[async_trait]
impl EventReporter for LogReporter {
    async fn record(&self, object: &ObjectRef, level: EventLevel, reason: &str, message: &str) {
        match level {
            EventLevel::Normal => info!(object = %object, reason, "{}", message),
            EventLevel::Warning => warn!(object = %object, reason, "{}", message),
        }
    }
}

/// A single event captured by [`RecordingReporter`].
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub object: ObjectRef,
    pub level: EventLevel,
    pub reason: String,
    pub message: String,
}

/// Reporter that stores events in memory for assertions.
#[derive(Default)]
pub struct RecordingReporter {
    events: tokio::sync::Mutex<Vec<RecordedEvent>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().await.clone()
    }

    pub async fn reasons(&self) -> Vec<String> {
        self.events
            .lock()
            .await
            .iter()
            .map(|e| e.reason.clone())
            .collect()
    }
}

#[async_trait]
impl EventReporter for RecordingReporter {
    async fn record(&self, object: &ObjectRef, level: EventLevel, reason: &str, message: &str) {
        self.events.lock().await.push(RecordedEvent {
            object: object.clone(),
            level,
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }
}
