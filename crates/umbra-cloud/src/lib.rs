//! Umbra Cloud - Provider network resources behind the reconcilers
//!
//! This crate provides:
//! - The flattened provider resource model (subnets, link services, endpoints)
//! - The `NetworkApi` boundary: reads resolve absence, mutations submit
//!   long-running operations that are polled to a terminal state
//! - `ArmNetworkApi`, the REST implementation, and `MockCloud` for tests
//! - `CloudContext`, the orchestration layer both controllers drive

pub mod api;
pub mod arm;
pub mod context;
pub mod error;
pub mod mock;
pub mod types;

// Re-export commonly used types
pub use api::{NetworkApi, OperationHandle, OperationStatus};
pub use arm::{ArmNetworkApi, Credentials};
pub use context::{CloudContext, CloudSettings};
pub use error::{CloudError, Result};
pub use mock::{MockCloud, MutationCounts};
pub use types::{
    parse_resource_id, ConnectionState, ConnectionStatus, FrontendIpConfiguration, ParsedId,
    PolicyState, PrivateEndpoint, PrivateEndpointConnection, PrivateLinkService,
    PrivateLinkServiceConnection, Subnet, VirtualNetwork,
};
