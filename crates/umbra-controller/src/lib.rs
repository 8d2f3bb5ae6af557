//! Umbra Controller - Event-driven reconciliation against cluster intent
//!
//! This crate provides:
//! - `WatchHub` and `IntentCache`: a cached, fanned-out view of the
//!   cluster's services and connections
//! - `WorkQueue`: deduplicating work queue with per-key retry backoff
//! - The deletion guard protocol that keeps intent objects alive until
//!   their cloud resources are gone
//! - `ServiceReconciler` and `ConnectionReconciler`, and the `Controller`
//!   runtime that drives them

pub mod cache;
pub mod cluster;
pub mod connection;
pub mod error;
pub mod guard;
pub mod queue;
pub mod runtime;
pub mod service;
pub mod watch;

// Re-export commonly used types
pub use cache::IntentCache;
pub use cluster::{ClusterClient, HttpClusterClient, MockCluster};
pub use connection::ConnectionReconciler;
pub use error::{ControllerError, Result};
pub use guard::{
    clear_connection_guard, clear_service_guard, ensure_connection_guard, ensure_service_guard,
    has_guard, GUARD_TOKEN,
};
pub use queue::WorkQueue;
pub use runtime::{Controller, ControllerConfig, Reconcile};
pub use service::{ServiceReconciler, DEFAULT_SELECTION_ANNOTATION, INTERNAL_LB_ANNOTATION};
pub use watch::{IntentSnapshot, IntentSource, WatchHub};
