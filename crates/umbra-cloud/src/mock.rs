//! In-memory [`NetworkApi`] for tests.
//!
//! Resources live in hash maps keyed by resource group path. Mutations are
//! not applied at submit time: each `begin_*` call parks a pending operation
//! that completes after a configurable number of polls, so callers that skip
//! the poll loop never observe their write. Applied mutations are counted
//! for idempotence assertions, and the next submitted operation can be made
//! to fail for error-path tests.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::api::{NetworkApi, OperationHandle, OperationStatus};
use crate::error::{CloudError, Result};
use crate::types::{
    ConnectionStatus, FrontendIpConfiguration, PrivateEndpoint, PrivateEndpointConnection,
    PrivateLinkService, Subnet, VirtualNetwork,
};

const MOCK_SUBSCRIPTION: &str = "00000000-0000-0000-0000-000000000000";
const OPERATION_URL_PREFIX: &str = "mock://operations/";

/// Number of mutations applied per resource kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MutationCounts {
    pub subnet_puts: usize,
    pub link_service_puts: usize,
    pub link_service_deletes: usize,
    pub endpoint_puts: usize,
    pub endpoint_deletes: usize,
    pub connection_updates: usize,
}

enum Mutation {
    PutSubnet {
        resource_group: String,
        vnet: String,
        subnet: Subnet,
    },
    PutLinkService {
        resource_group: String,
        service: PrivateLinkService,
    },
    DeleteLinkService {
        resource_group: String,
        name: String,
    },
    PutEndpoint {
        resource_group: String,
        endpoint: PrivateEndpoint,
    },
    DeleteEndpoint {
        resource_group: String,
        name: String,
    },
    ApproveConnection {
        resource_group: String,
        service: String,
        connection: String,
    },
}

struct PendingOperation {
    remaining_polls: u32,
    action: Option<Mutation>,
    failure: Option<String>,
    outcome: Option<OperationStatus>,
}

#[derive(Default)]
struct MockState {
    vnets: HashMap<String, VirtualNetwork>,
    subnets: HashMap<String, Subnet>,
    frontends: HashMap<String, Vec<FrontendIpConfiguration>>,
    link_services: HashMap<String, PrivateLinkService>,
    endpoints: HashMap<String, PrivateEndpoint>,
    pending: HashMap<u64, PendingOperation>,
    next_operation: u64,
    latency: u32,
    fail_next: Option<String>,
    counts: MutationCounts,
}

/// In-memory provider double.
#[derive(Default)]
pub struct MockCloud {
    state: RwLock<MockState>,
}

impl MockCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of polls an operation stays `InProgress` before completing.
    pub async fn set_latency(&self, polls: u32) {
        self.state.write().await.latency = polls;
    }

    /// Make the next submitted operation fail with `message` instead of
    /// applying its mutation.
    pub async fn fail_next_operation(&self, message: impl Into<String>) {
        self.state.write().await.fail_next = Some(message.into());
    }

    pub async fn insert_vnet(&self, resource_group: &str, vnet: VirtualNetwork) {
        self.state
            .write()
            .await
            .vnets
            .insert(format!("{resource_group}/{}", vnet.name), vnet);
    }

    pub async fn insert_subnet(&self, resource_group: &str, vnet: &str, subnet: Subnet) {
        self.state
            .write()
            .await
            .subnets
            .insert(format!("{resource_group}/{vnet}/{}", subnet.name), subnet);
    }

    pub async fn insert_frontends(
        &self,
        resource_group: &str,
        load_balancer: &str,
        frontends: Vec<FrontendIpConfiguration>,
    ) {
        self.state
            .write()
            .await
            .frontends
            .insert(format!("{resource_group}/{load_balancer}"), frontends);
    }

    pub async fn insert_link_service(&self, resource_group: &str, service: PrivateLinkService) {
        self.state
            .write()
            .await
            .link_services
            .insert(format!("{resource_group}/{}", service.name), service);
    }

    pub async fn insert_endpoint(&self, resource_group: &str, endpoint: PrivateEndpoint) {
        self.state
            .write()
            .await
            .endpoints
            .insert(format!("{resource_group}/{}", endpoint.name), endpoint);
    }

    pub async fn subnet(&self, resource_group: &str, vnet: &str, name: &str) -> Option<Subnet> {
        self.state
            .read()
            .await
            .subnets
            .get(&format!("{resource_group}/{vnet}/{name}"))
            .cloned()
    }

    pub async fn link_service(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Option<PrivateLinkService> {
        self.state
            .read()
            .await
            .link_services
            .get(&format!("{resource_group}/{name}"))
            .cloned()
    }

    pub async fn endpoint(&self, resource_group: &str, name: &str) -> Option<PrivateEndpoint> {
        self.state
            .read()
            .await
            .endpoints
            .get(&format!("{resource_group}/{name}"))
            .cloned()
    }

    /// Force an endpoint's connection status on both sides of the link, as
    /// if a party outside the controller changed it.
    pub async fn set_endpoint_status(
        &self,
        resource_group: &str,
        name: &str,
        status: ConnectionStatus,
    ) {
        let mut state = self.state.write().await;
        let Some(endpoint) = state.endpoints.get_mut(&format!("{resource_group}/{name}")) else {
            return;
        };
        for connection in &mut endpoint.manual_connections {
            connection.state.status = status.clone();
        }
        let endpoint_id = endpoint.id.clone();
        for service in state.link_services.values_mut() {
            for connection in &mut service.endpoint_connections {
                if connection.endpoint_id == endpoint_id {
                    connection.state.status = status.clone();
                }
            }
        }
    }

    pub async fn mutation_counts(&self) -> MutationCounts {
        self.state.read().await.counts
    }

    async fn submit(&self, operation: String, action: Mutation) -> Result<OperationHandle> {
        let mut state = self.state.write().await;
        let id = state.next_operation;
        state.next_operation += 1;
        let failure = state.fail_next.take();
        let pending = PendingOperation {
            remaining_polls: state.latency,
            action: Some(action),
            failure,
            outcome: None,
        };
        state.pending.insert(id, pending);
        debug!(operation = %operation, id, "mock operation submitted");
        Ok(OperationHandle::new(
            operation,
            Some(format!("{OPERATION_URL_PREFIX}{id}")),
        ))
    }
}

fn subnet_id(resource_group: &str, vnet: &str, name: &str) -> String {
    format!(
        "/subscriptions/{MOCK_SUBSCRIPTION}/resourceGroups/{resource_group}/providers/Microsoft.Network/virtualNetworks/{vnet}/subnets/{name}"
    )
}

fn link_service_id(resource_group: &str, name: &str) -> String {
    format!(
        "/subscriptions/{MOCK_SUBSCRIPTION}/resourceGroups/{resource_group}/providers/Microsoft.Network/privateLinkServices/{name}"
    )
}

fn endpoint_id(resource_group: &str, name: &str) -> String {
    format!(
        "/subscriptions/{MOCK_SUBSCRIPTION}/resourceGroups/{resource_group}/providers/Microsoft.Network/privateEndpoints/{name}"
    )
}

fn apply_mutation(state: &mut MockState, mutation: Mutation) {
    match mutation {
        Mutation::PutSubnet {
            resource_group,
            vnet,
            mut subnet,
        } => {
            subnet.id = subnet_id(&resource_group, &vnet, &subnet.name);
            debug!(subnet = %subnet.name, "mock subnet stored");
            state
                .subnets
                .insert(format!("{resource_group}/{vnet}/{}", subnet.name), subnet);
            state.counts.subnet_puts += 1;
        }
        Mutation::PutLinkService {
            resource_group,
            mut service,
        } => {
            service.id = link_service_id(&resource_group, &service.name);
            debug!(service = %service.name, "mock link service stored");
            state
                .link_services
                .insert(format!("{resource_group}/{}", service.name), service);
            state.counts.link_service_puts += 1;
        }
        Mutation::DeleteLinkService {
            resource_group,
            name,
        } => {
            state.link_services.remove(&format!("{resource_group}/{name}"));
            state.counts.link_service_deletes += 1;
        }
        Mutation::PutEndpoint {
            resource_group,
            mut endpoint,
        } => {
            endpoint.id = endpoint_id(&resource_group, &endpoint.name);
            // The provider mirrors each manual connection onto the target
            // service, under a name of its own choosing.
            for (index, manual) in endpoint.manual_connections.iter().enumerate() {
                let Some(service) = state
                    .link_services
                    .values_mut()
                    .find(|s| s.id == manual.service_id)
                else {
                    continue;
                };
                let mirror_name = format!("{}.{}", endpoint.name, index + 1);
                service.endpoint_connections.push(PrivateEndpointConnection {
                    id: format!("{}/privateEndpointConnections/{mirror_name}", service.id),
                    name: mirror_name,
                    endpoint_id: endpoint.id.clone(),
                    state: manual.state.clone(),
                });
            }
            debug!(endpoint = %endpoint.name, "mock endpoint stored");
            state
                .endpoints
                .insert(format!("{resource_group}/{}", endpoint.name), endpoint);
            state.counts.endpoint_puts += 1;
        }
        Mutation::DeleteEndpoint {
            resource_group,
            name,
        } => {
            if let Some(endpoint) = state.endpoints.remove(&format!("{resource_group}/{name}")) {
                for service in state.link_services.values_mut() {
                    service
                        .endpoint_connections
                        .retain(|c| c.endpoint_id != endpoint.id);
                }
            }
            state.counts.endpoint_deletes += 1;
        }
        Mutation::ApproveConnection {
            resource_group,
            service,
            connection,
        } => {
            let mut approved_endpoint = None;
            if let Some(target) = state
                .link_services
                .get_mut(&format!("{resource_group}/{service}"))
            {
                if let Some(entry) = target
                    .endpoint_connections
                    .iter_mut()
                    .find(|c| c.name == connection)
                {
                    entry.state.status = ConnectionStatus::Approved;
                    approved_endpoint = Some(entry.endpoint_id.clone());
                }
            }
            if let Some(endpoint_id) = approved_endpoint {
                if let Some(endpoint) = state.endpoints.values_mut().find(|e| e.id == endpoint_id)
                {
                    for manual in &mut endpoint.manual_connections {
                        manual.state.status = ConnectionStatus::Approved;
                    }
                }
            }
            state.counts.connection_updates += 1;
        }
    }
}

#[async_trait]
impl NetworkApi for MockCloud {
    async fn get_vnet(&self, resource_group: &str, name: &str) -> Result<Option<VirtualNetwork>> {
        Ok(self
            .state
            .read()
            .await
            .vnets
            .get(&format!("{resource_group}/{name}"))
            .cloned())
    }

    async fn get_subnet(
        &self,
        resource_group: &str,
        vnet: &str,
        name: &str,
    ) -> Result<Option<Subnet>> {
        Ok(self.subnet(resource_group, vnet, name).await)
    }

    async fn begin_put_subnet(
        &self,
        resource_group: &str,
        vnet: &str,
        subnet: &Subnet,
    ) -> Result<OperationHandle> {
        self.submit(
            format!("put subnet {}/{}", vnet, subnet.name),
            Mutation::PutSubnet {
                resource_group: resource_group.to_string(),
                vnet: vnet.to_string(),
                subnet: subnet.clone(),
            },
        )
        .await
    }

    async fn list_frontend_ip_configurations(
        &self,
        resource_group: &str,
        load_balancer: &str,
    ) -> Result<Vec<FrontendIpConfiguration>> {
        Ok(self
            .state
            .read()
            .await
            .frontends
            .get(&format!("{resource_group}/{load_balancer}"))
            .cloned()
            .unwrap_or_default())
    }

    async fn get_private_link_service(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<Option<PrivateLinkService>> {
        Ok(self.link_service(resource_group, name).await)
    }

    async fn begin_put_private_link_service(
        &self,
        resource_group: &str,
        service: &PrivateLinkService,
    ) -> Result<OperationHandle> {
        self.submit(
            format!("put link service {}", service.name),
            Mutation::PutLinkService {
                resource_group: resource_group.to_string(),
                service: service.clone(),
            },
        )
        .await
    }

    async fn begin_delete_private_link_service(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<OperationHandle> {
        self.submit(
            format!("delete link service {name}"),
            Mutation::DeleteLinkService {
                resource_group: resource_group.to_string(),
                name: name.to_string(),
            },
        )
        .await
    }

    async fn get_private_endpoint(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<Option<PrivateEndpoint>> {
        Ok(self.endpoint(resource_group, name).await)
    }

    async fn begin_put_private_endpoint(
        &self,
        resource_group: &str,
        endpoint: &PrivateEndpoint,
    ) -> Result<OperationHandle> {
        self.submit(
            format!("put endpoint {}", endpoint.name),
            Mutation::PutEndpoint {
                resource_group: resource_group.to_string(),
                endpoint: endpoint.clone(),
            },
        )
        .await
    }

    async fn begin_delete_private_endpoint(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<OperationHandle> {
        self.submit(
            format!("delete endpoint {name}"),
            Mutation::DeleteEndpoint {
                resource_group: resource_group.to_string(),
                name: name.to_string(),
            },
        )
        .await
    }

    async fn list_endpoint_connections(
        &self,
        resource_group: &str,
        service: &str,
    ) -> Result<Vec<PrivateEndpointConnection>> {
        Ok(self
            .link_service(resource_group, service)
            .await
            .map(|s| s.endpoint_connections)
            .unwrap_or_default())
    }

    async fn begin_approve_endpoint_connection(
        &self,
        resource_group: &str,
        service: &str,
        connection: &str,
    ) -> Result<OperationHandle> {
        self.submit(
            format!("approve connection {service}/{connection}"),
            Mutation::ApproveConnection {
                resource_group: resource_group.to_string(),
                service: service.to_string(),
                connection: connection.to_string(),
            },
        )
        .await
    }

    async fn poll_operation(&self, handle: &OperationHandle) -> Result<OperationStatus> {
        let Some(url) = &handle.poll_url else {
            return Ok(OperationStatus::Succeeded);
        };
        let id: u64 = url
            .strip_prefix(OPERATION_URL_PREFIX)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                CloudError::api_failure(400, format!("not a mock operation url: {url}"))
            })?;

        let mut state = self.state.write().await;
        let Some(mut op) = state.pending.remove(&id) else {
            return Err(CloudError::api_failure(404, format!("unknown operation: {id}")));
        };
        let status = if let Some(outcome) = op.outcome.clone() {
            outcome
        } else if op.remaining_polls > 0 {
            op.remaining_polls -= 1;
            OperationStatus::InProgress
        } else if let Some(message) = op.failure.take() {
            op.outcome = Some(OperationStatus::Failed(message.clone()));
            OperationStatus::Failed(message)
        } else {
            if let Some(action) = op.action.take() {
                apply_mutation(&mut state, action);
            }
            op.outcome = Some(OperationStatus::Succeeded);
            OperationStatus::Succeeded
        };
        state.pending.insert(id, op);
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConnectionState, PolicyState, PrivateLinkServiceConnection};

    fn sample_subnet(name: &str) -> Subnet {
        Subnet {
            id: String::new(),
            name: name.to_string(),
            address_prefix: Some("10.1.0.0/24".to_string()),
            private_endpoint_policies: PolicyState::Enabled,
            private_link_service_policies: PolicyState::Disabled,
        }
    }

    #[tokio::test]
    async fn test_mutation_applies_only_at_terminal_poll() {
        let mock = MockCloud::new();
        mock.set_latency(2).await;

        let handle = mock
            .begin_put_subnet("rg", "vnet", &sample_subnet("nat"))
            .await
            .unwrap();
        assert_eq!(
            mock.poll_operation(&handle).await.unwrap(),
            OperationStatus::InProgress
        );
        assert!(mock.subnet("rg", "vnet", "nat").await.is_none());
        assert_eq!(
            mock.poll_operation(&handle).await.unwrap(),
            OperationStatus::InProgress
        );
        assert_eq!(
            mock.poll_operation(&handle).await.unwrap(),
            OperationStatus::Succeeded
        );

        let stored = mock.subnet("rg", "vnet", "nat").await.unwrap();
        assert!(stored.id.contains("/subnets/nat"));
        assert_eq!(mock.mutation_counts().await.subnet_puts, 1);

        // Terminal polls are stable.
        assert_eq!(
            mock.poll_operation(&handle).await.unwrap(),
            OperationStatus::Succeeded
        );
        assert_eq!(mock.mutation_counts().await.subnet_puts, 1);
    }

    #[tokio::test]
    async fn test_injected_failure_skips_mutation() {
        let mock = MockCloud::new();
        mock.fail_next_operation("boom").await;

        let handle = mock
            .begin_put_subnet("rg", "vnet", &sample_subnet("nat"))
            .await
            .unwrap();
        assert_eq!(
            mock.poll_operation(&handle).await.unwrap(),
            OperationStatus::Failed("boom".to_string())
        );
        assert!(mock.subnet("rg", "vnet", "nat").await.is_none());
        assert_eq!(mock.mutation_counts().await.subnet_puts, 0);

        // Only the next operation fails; later ones are clean.
        let handle = mock
            .begin_put_subnet("rg", "vnet", &sample_subnet("nat"))
            .await
            .unwrap();
        assert_eq!(
            mock.poll_operation(&handle).await.unwrap(),
            OperationStatus::Succeeded
        );
    }

    #[tokio::test]
    async fn test_endpoint_create_mirrors_onto_service() {
        let mock = MockCloud::new();
        mock.insert_link_service(
            "cluster-rg",
            PrivateLinkService {
                id: link_service_id("cluster-rg", "web"),
                name: "web".to_string(),
                location: "eastus2".to_string(),
                frontend_ip_configuration_ids: vec![],
                nat_subnet_id: String::new(),
                endpoint_connections: vec![],
            },
        )
        .await;

        let endpoint = PrivateEndpoint {
            id: String::new(),
            name: "conn1".to_string(),
            location: "eastus2".to_string(),
            subnet_id: "subnet".to_string(),
            manual_connections: vec![PrivateLinkServiceConnection {
                name: "conn1".to_string(),
                service_id: link_service_id("cluster-rg", "web"),
                state: ConnectionState::pending(),
            }],
        };
        let handle = mock
            .begin_put_private_endpoint("team-rg", &endpoint)
            .await
            .unwrap();
        mock.poll_operation(&handle).await.unwrap();

        let service = mock.link_service("cluster-rg", "web").await.unwrap();
        assert_eq!(service.endpoint_connections.len(), 1);
        let mirrored = &service.endpoint_connections[0];
        assert_eq!(mirrored.endpoint_id, endpoint_id("team-rg", "conn1"));
        assert_eq!(mirrored.state.status, ConnectionStatus::Pending);
        // The provider picks its own connection name.
        assert_ne!(mirrored.name, "conn1");

        let handle = mock
            .begin_delete_private_endpoint("team-rg", "conn1")
            .await
            .unwrap();
        mock.poll_operation(&handle).await.unwrap();
        let service = mock.link_service("cluster-rg", "web").await.unwrap();
        assert!(service.endpoint_connections.is_empty());
    }
}
