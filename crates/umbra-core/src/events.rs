use crate::connection::ServiceConnection;
use crate::error::Result;
use crate::key::ObjectKey;
use k8s_openapi::api::core::v1::Service;

/// Kind of change observed on an intent object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Added,
    Updated,
    Deleted,
}

/// The intent object an event carries.
#[derive(Debug, Clone)]
pub enum IntentObject {
    Service(Service),
    Connection(ServiceConnection),
}

impl IntentObject {
    pub fn key(&self) -> Result<ObjectKey> {
        match self {
            IntentObject::Service(svc) => ObjectKey::from_meta(&svc.metadata),
            IntentObject::Connection(conn) => ObjectKey::from_meta(&conn.metadata),
        }
    }
}

/// A tagged change event fanned out to controller subscribers.
///
/// `previous` holds the prior cached value for updates; the watch hub fills
/// it in when it applies the event to the cache, so predicate filters can
/// look at both sides of a transition.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub kind: EventKind,
    pub object: IntentObject,
    pub previous: Option<IntentObject>,
}

impl WatchEvent {
    /// Create an Added event
    pub fn added(object: IntentObject) -> Self {
        Self {
            kind: EventKind::Added,
            object,
            previous: None,
        }
    }

    /// Create an Updated event
    pub fn updated(object: IntentObject) -> Self {
        Self {
            kind: EventKind::Updated,
            object,
            previous: None,
        }
    }

    /// Create a Deleted event
    pub fn deleted(object: IntentObject) -> Self {
        Self {
            kind: EventKind::Deleted,
            object,
            previous: None,
        }
    }

    pub fn key(&self) -> Result<ObjectKey> {
        self.object.key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_key_follows_object_identity() {
        let mut svc = Service::default();
        svc.metadata.name = Some("web".to_string());
        svc.metadata.namespace = Some("prod".to_string());

        let event = WatchEvent::added(IntentObject::Service(svc));
        assert_eq!(event.kind, EventKind::Added);
        assert_eq!(event.key().unwrap(), ObjectKey::new("prod", "web"));
        assert!(event.previous.is_none());
    }
}
