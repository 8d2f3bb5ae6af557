use miette::Diagnostic;
use thiserror::Error;

/// Error type for controller operations
#[derive(Error, Debug, Diagnostic)]
pub enum ControllerError {
    /// Provider-side failure, bridged from the cloud crate
    #[error(transparent)]
    #[diagnostic(transparent)]
    Cloud(#[from] umbra_cloud::CloudError),

    /// Shared-vocabulary failure, bridged from the core crate
    #[error(transparent)]
    #[diagnostic(transparent)]
    Core(#[from] umbra_core::CoreError),

    /// The cluster API rejected or never answered a request
    #[error("Cluster API error: {message}")]
    #[diagnostic(
        code(umbra::controller::cluster_api),
        help("Check connectivity to the cluster API endpoint")
    )]
    ClusterApi { message: String },

    /// An update lost an optimistic-concurrency race
    #[error("Conflicting update for {object}")]
    #[diagnostic(
        code(umbra::controller::cluster_conflict),
        help("Another writer changed the object; the update is retried with a fresh copy")
    )]
    ClusterConflict { object: String },

    /// An object disappeared between a conflict and its retry fetch
    #[error("Object {object} not found")]
    #[diagnostic(code(umbra::controller::object_missing))]
    ObjectMissing { object: String },

    /// The intent source's event stream ended
    #[error("The watch stream ended unexpectedly")]
    #[diagnostic(
        code(umbra::controller::watch_closed),
        help("The intent source disconnected; restart the controller to resubscribe")
    )]
    WatchClosed,
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, ControllerError>;

impl ControllerError {
    /// Create a ClusterApi error
    pub fn cluster_api(message: impl Into<String>) -> Self {
        Self::ClusterApi {
            message: message.into(),
        }
    }

    /// Create a ClusterConflict error
    pub fn cluster_conflict(object: impl Into<String>) -> Self {
        Self::ClusterConflict {
            object: object.into(),
        }
    }

    /// Create an ObjectMissing error
    pub fn object_missing(object: impl Into<String>) -> Self {
        Self::ObjectMissing {
            object: object.into(),
        }
    }
}
