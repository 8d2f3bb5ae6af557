//! Umbra Core - Shared vocabulary for the umbra private-link controllers
//!
//! This crate provides:
//! - The `ServiceConnection` intent type and namespaced object keys
//! - Tagged watch events shared by the intent cache and controllers
//! - The event reporter boundary and well-known reason codes
//! - Error types with miette diagnostics

pub mod connection;
pub mod error;
pub mod events;
pub mod key;
pub mod reporter;

// Re-export commonly used types
pub use connection::{ServiceConnection, ServiceConnectionSpec};
pub use error::{CoreError, Result};
pub use events::{EventKind, IntentObject, WatchEvent};
pub use key::ObjectKey;
pub use reporter::{
    reasons, EventLevel, EventReporter, LogReporter, ObjectRef, RecordedEvent, RecordingReporter,
};

// Re-export k8s-openapi types for convenience
pub use k8s_openapi;
pub use k8s_openapi::api::core::v1::Service;
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
