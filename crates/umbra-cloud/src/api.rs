//! The asynchronous provider API boundary.
//!
//! Reads return `Ok(None)` (or an empty list) for absent resources; not-found
//! is never an error at this layer. Mutations follow the provider's
//! long-running-operation shape: `begin_*` submits the request and returns an
//! [`OperationHandle`], and the caller drives [`NetworkApi::poll_operation`]
//! until a terminal [`OperationStatus`] comes back. Completion ordering is the
//! caller's concern; see `CloudContext::await_operation`.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    FrontendIpConfiguration, PrivateEndpoint, PrivateEndpointConnection, PrivateLinkService,
    Subnet, VirtualNetwork,
};

/// Token for one submitted long-running operation.
#[derive(Clone, Debug)]
pub struct OperationHandle {
    /// Human-readable label, used in operation failure and timeout errors.
    pub operation: String,
    /// Where to poll for completion. `None` means the submission already
    /// reached a terminal success.
    pub poll_url: Option<String>,
}

impl OperationHandle {
    pub fn new(operation: impl Into<String>, poll_url: Option<String>) -> Self {
        Self {
            operation: operation.into(),
            poll_url,
        }
    }

    /// Handle for an operation that completed synchronously at submit time.
    pub fn completed(operation: impl Into<String>) -> Self {
        Self::new(operation, None)
    }
}

/// Observed state of a submitted operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OperationStatus {
    InProgress,
    Succeeded,
    Failed(String),
}

/// Provider network operations used by the reconcilers.
///
/// Implemented by the ARM REST client in production and by
/// [`crate::mock::MockCloud`] in tests.
#[async_trait]
pub trait NetworkApi: Send + Sync {
    async fn get_vnet(&self, resource_group: &str, name: &str) -> Result<Option<VirtualNetwork>>;

    async fn get_subnet(
        &self,
        resource_group: &str,
        vnet: &str,
        name: &str,
    ) -> Result<Option<Subnet>>;

    /// Create or replace a subnet. The subnet's `id` field is ignored; the
    /// provider derives it from the path.
    async fn begin_put_subnet(
        &self,
        resource_group: &str,
        vnet: &str,
        subnet: &Subnet,
    ) -> Result<OperationHandle>;

    /// Frontend IP configurations of a load balancer. Absent load balancer
    /// yields an empty list.
    async fn list_frontend_ip_configurations(
        &self,
        resource_group: &str,
        load_balancer: &str,
    ) -> Result<Vec<FrontendIpConfiguration>>;

    async fn get_private_link_service(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<Option<PrivateLinkService>>;

    async fn begin_put_private_link_service(
        &self,
        resource_group: &str,
        service: &PrivateLinkService,
    ) -> Result<OperationHandle>;

    async fn begin_delete_private_link_service(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<OperationHandle>;

    async fn get_private_endpoint(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<Option<PrivateEndpoint>>;

    async fn begin_put_private_endpoint(
        &self,
        resource_group: &str,
        endpoint: &PrivateEndpoint,
    ) -> Result<OperationHandle>;

    async fn begin_delete_private_endpoint(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<OperationHandle>;

    /// Endpoint connections attached to a private link service. Absent
    /// service yields an empty list.
    async fn list_endpoint_connections(
        &self,
        resource_group: &str,
        service: &str,
    ) -> Result<Vec<PrivateEndpointConnection>>;

    /// Set the named endpoint connection's status to `Approved`. The
    /// description is left untouched.
    async fn begin_approve_endpoint_connection(
        &self,
        resource_group: &str,
        service: &str,
        connection: &str,
    ) -> Result<OperationHandle>;

    async fn poll_operation(&self, handle: &OperationHandle) -> Result<OperationStatus>;
}
