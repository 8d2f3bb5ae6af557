//! Orchestration layer over [`NetworkApi`].
//!
//! `CloudContext` owns the provider client, the cloud-side settings, the
//! location resolved from the configured virtual network, and the event
//! reporter. Both reconcilers drive their cloud mutations through it. Every
//! mutation follows submit, await, re-fetch: the handle returned by a
//! `begin_*` call is polled to a terminal state before the result is read
//! back.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};
use umbra_core::{reasons, EventLevel, EventReporter, ObjectRef, ServiceConnection};

use crate::api::{NetworkApi, OperationHandle, OperationStatus};
use crate::error::{CloudError, Result};
use crate::types::{
    parse_resource_id, ConnectionState, ConnectionStatus, FrontendIpConfiguration, PolicyState,
    PrivateEndpoint, PrivateLinkService, PrivateLinkServiceConnection, Subnet,
};

/// Cloud-side configuration shared by both reconcilers.
#[derive(Clone, Debug)]
pub struct CloudSettings {
    /// Resource group holding the cluster load balancer and the link
    /// services created for it.
    pub lb_resource_group: String,
    pub load_balancer_name: String,
    /// Resource group and name of the virtual network hosting the NAT
    /// subnet.
    pub vnet_resource_group: String,
    pub vnet_name: String,
    /// Subnet carrying link-service NAT addresses, created on demand.
    pub nat_subnet_name: String,
    /// Address prefix used when the NAT subnet has to be created.
    pub nat_subnet_prefix: Option<String>,
    /// Interval between polls of a pending operation.
    pub poll_interval: Duration,
    /// Ceiling on how long one operation may stay non-terminal.
    pub operation_timeout: Duration,
}

/// Entry point for all provider mutations performed by the reconcilers.
pub struct CloudContext {
    api: Arc<dyn NetworkApi>,
    settings: CloudSettings,
    location: String,
    reporter: Arc<dyn EventReporter>,
}

impl std::fmt::Debug for CloudContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudContext")
            .field("settings", &self.settings)
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

impl CloudContext {
    /// Resolve the configured virtual network and pin its location for every
    /// resource created later. An absent vnet is fatal.
    pub async fn connect(
        api: Arc<dyn NetworkApi>,
        settings: CloudSettings,
        reporter: Arc<dyn EventReporter>,
    ) -> Result<Self> {
        let vnet = api
            .get_vnet(&settings.vnet_resource_group, &settings.vnet_name)
            .await?
            .ok_or_else(|| {
                CloudError::vnet_not_found(&settings.vnet_resource_group, &settings.vnet_name)
            })?;
        info!(
            vnet = %vnet.name,
            location = %vnet.location,
            "resolved virtual network"
        );
        Ok(Self {
            api,
            settings,
            location: vnet.location,
            reporter,
        })
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Drive a submitted operation to its terminal state, sleeping the
    /// configured poll interval between polls. The whole wait is bounded by
    /// the configured operation timeout; hitting it surfaces as an error and
    /// the owning key is retried by the queue.
    pub async fn await_operation(&self, handle: &OperationHandle) -> Result<()> {
        let wait = async {
            loop {
                match self.api.poll_operation(handle).await? {
                    OperationStatus::Succeeded => return Ok(()),
                    OperationStatus::Failed(message) => {
                        return Err(CloudError::operation_failed(&handle.operation, message))
                    }
                    OperationStatus::InProgress => {
                        tokio::time::sleep(self.settings.poll_interval).await
                    }
                }
            }
        };
        match tokio::time::timeout(self.settings.operation_timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(CloudError::operation_timeout(
                &handle.operation,
                self.settings.operation_timeout,
            )),
        }
    }

    /// Ensure a private link service fronts the exposed service.
    ///
    /// An existing link service with this name is left untouched; there is no
    /// field-level update path. Otherwise the NAT subnet is created if
    /// missing, the load balancer frontend carrying `ingress_ip` is located,
    /// and the link service is created bound to both.
    pub async fn add_update_private_service(
        &self,
        namespace: &str,
        name: &str,
        ingress_ip: &str,
    ) -> Result<()> {
        if self
            .api
            .get_private_link_service(&self.settings.lb_resource_group, name)
            .await?
            .is_some()
        {
            debug!(service = name, "private link service already exists");
            return Ok(());
        }

        let object = ObjectRef::service(namespace, name);
        let subnet = self.ensure_nat_subnet(&object).await?;
        let frontend = self.find_frontend(ingress_ip).await?;

        let desired = PrivateLinkService {
            id: String::new(),
            name: name.to_string(),
            location: self.location.clone(),
            frontend_ip_configuration_ids: vec![frontend.id],
            nat_subnet_id: subnet.id,
            endpoint_connections: Vec::new(),
        };
        match self.create_link_service(&desired).await {
            Ok(created) => {
                self.reporter
                    .record(
                        &object,
                        EventLevel::Normal,
                        reasons::PRIVATE_LINK_SERVICE_CREATED,
                        &format!("Created private link service: {}", created.id),
                    )
                    .await;
                Ok(())
            }
            Err(err) => {
                self.reporter
                    .record(
                        &object,
                        EventLevel::Warning,
                        reasons::PRIVATE_LINK_SERVICE_CREATION_ERROR,
                        &format!("Error creating private link service: {err}"),
                    )
                    .await;
                Err(err)
            }
        }
    }

    /// Tear down the private link service created for `name`, endpoints
    /// first. Returns `false` when there was nothing to remove.
    pub async fn remove_service(&self, namespace: &str, name: &str) -> Result<bool> {
        let Some(existing) = self
            .api
            .get_private_link_service(&self.settings.lb_resource_group, name)
            .await?
        else {
            debug!(service = name, "private link service already absent");
            return Ok(false);
        };

        let object = ObjectRef::service(namespace, name);
        match self.tear_down_service(&existing).await {
            Ok(()) => {
                self.reporter
                    .record(
                        &object,
                        EventLevel::Normal,
                        reasons::PRIVATE_LINK_SERVICE_REMOVED,
                        "Private link service deleted!",
                    )
                    .await;
                Ok(true)
            }
            Err(err) => {
                self.reporter
                    .record(
                        &object,
                        EventLevel::Warning,
                        reasons::PRIVATE_LINK_SERVICE_REMOVAL_ERROR,
                        &format!("Error deleting private link service: {err}"),
                    )
                    .await;
                Err(err)
            }
        }
    }

    /// Ensure an approved private endpoint exists for the connection
    /// request.
    ///
    /// Approval is one-way: a `Pending` connection is approved from the
    /// service side, an `Approved` one is done, and anything else is a hard
    /// error left for an operator.
    pub async fn add_update_private_connection(&self, conn: &ServiceConnection) -> Result<()> {
        let object = ObjectRef::connection(conn.namespace(), conn.name());

        let subnet = match self.ensure_endpoint_subnet(conn).await {
            Ok(subnet) => subnet,
            Err(err) => {
                self.reporter
                    .record(
                        &object,
                        EventLevel::Warning,
                        reasons::PRIVATE_ENDPOINT_SUBNET_ERROR,
                        &format!("Error configuring subnet for private endpoint: {err}"),
                    )
                    .await;
                return Err(err);
            }
        };

        let endpoint = self.ensure_endpoint(&object, conn, &subnet).await?;
        let connection = endpoint
            .manual_connections
            .first()
            .ok_or_else(|| CloudError::endpoint_without_connections(&endpoint.name))?;

        match &connection.state.status {
            ConnectionStatus::Approved => {
                debug!(endpoint = %endpoint.name, "endpoint connection already approved");
                Ok(())
            }
            ConnectionStatus::Pending => {
                self.approve_endpoint(&endpoint, &conn.spec.service_name)
                    .await
            }
            other => Err(CloudError::unexpected_status(&endpoint.name, other.as_str())),
        }
    }

    /// Delete the private endpoint backing a connection request. An endpoint
    /// that is already gone counts as removed.
    pub async fn remove_endpoint(&self, conn: &ServiceConnection) -> Result<()> {
        let handle = self
            .api
            .begin_delete_private_endpoint(&conn.spec.resource_group, conn.name())
            .await?;
        self.await_operation(&handle).await
    }

    /// Get or create the subnet that carries link-service NAT addresses.
    async fn ensure_nat_subnet(&self, object: &ObjectRef) -> Result<Subnet> {
        let s = &self.settings;
        if let Some(subnet) = self
            .api
            .get_subnet(&s.vnet_resource_group, &s.vnet_name, &s.nat_subnet_name)
            .await?
        {
            return Ok(subnet);
        }

        let desired = Subnet {
            id: String::new(),
            name: s.nat_subnet_name.clone(),
            address_prefix: s.nat_subnet_prefix.clone(),
            private_endpoint_policies: PolicyState::Enabled,
            private_link_service_policies: PolicyState::Disabled,
        };
        match self.put_and_fetch_subnet(&s.vnet_resource_group, &s.vnet_name, &desired).await {
            Ok(subnet) => {
                self.reporter
                    .record(
                        object,
                        EventLevel::Normal,
                        reasons::NAT_SUBNET_CREATED,
                        &format!("Created subnet for private link service: {}", subnet.id),
                    )
                    .await;
                Ok(subnet)
            }
            Err(err) => {
                self.reporter
                    .record(
                        object,
                        EventLevel::Warning,
                        reasons::NAT_SUBNET_CREATION_ERROR,
                        &format!("Error creating subnet for private link service: {err}"),
                    )
                    .await;
                Err(err)
            }
        }
    }

    async fn find_frontend(&self, ingress_ip: &str) -> Result<FrontendIpConfiguration> {
        let s = &self.settings;
        let frontends = self
            .api
            .list_frontend_ip_configurations(&s.lb_resource_group, &s.load_balancer_name)
            .await?;
        frontends
            .into_iter()
            .find(|f| f.private_ip_address.as_deref() == Some(ingress_ip))
            .ok_or_else(|| CloudError::frontend_not_found(ingress_ip, &s.load_balancer_name))
    }

    async fn create_link_service(&self, desired: &PrivateLinkService) -> Result<PrivateLinkService> {
        let rg = &self.settings.lb_resource_group;
        let handle = self.api.begin_put_private_link_service(rg, desired).await?;
        self.await_operation(&handle).await?;
        self.api
            .get_private_link_service(rg, &desired.name)
            .await?
            .ok_or_else(|| {
                CloudError::operation_failed(
                    &handle.operation,
                    "link service missing after successful create",
                )
            })
    }

    async fn tear_down_service(&self, existing: &PrivateLinkService) -> Result<()> {
        for connection in &existing.endpoint_connections {
            let parsed = parse_resource_id(&connection.endpoint_id)
                .ok_or_else(|| CloudError::malformed_resource_id(&connection.endpoint_id))?;
            debug!(endpoint = %parsed.name, "deleting attached private endpoint");
            let handle = self
                .api
                .begin_delete_private_endpoint(&parsed.resource_group, &parsed.name)
                .await?;
            self.await_operation(&handle).await?;
        }

        let handle = self
            .api
            .begin_delete_private_link_service(&self.settings.lb_resource_group, &existing.name)
            .await?;
        self.await_operation(&handle).await
    }

    /// Fetch the connection's target subnet and force its private-endpoint
    /// network policy to `Disabled`, preserving the rest of the subnet.
    /// Already-disabled subnets are returned without a write.
    async fn ensure_endpoint_subnet(&self, conn: &ServiceConnection) -> Result<Subnet> {
        let spec = &conn.spec;
        let subnet = self
            .api
            .get_subnet(&spec.resource_group, &spec.vnet_name, &spec.subnet_name)
            .await?
            .ok_or_else(|| CloudError::subnet_not_found(&spec.vnet_name, &spec.subnet_name))?;

        if subnet.private_endpoint_policies == PolicyState::Disabled {
            return Ok(subnet);
        }

        debug!(subnet = %subnet.name, "disabling private endpoint network policies");
        let desired = Subnet {
            private_endpoint_policies: PolicyState::Disabled,
            ..subnet
        };
        self.put_and_fetch_subnet(&spec.resource_group, &spec.vnet_name, &desired)
            .await
    }

    async fn put_and_fetch_subnet(
        &self,
        resource_group: &str,
        vnet: &str,
        desired: &Subnet,
    ) -> Result<Subnet> {
        let handle = self.api.begin_put_subnet(resource_group, vnet, desired).await?;
        self.await_operation(&handle).await?;
        self.api
            .get_subnet(resource_group, vnet, &desired.name)
            .await?
            .ok_or_else(|| {
                CloudError::operation_failed(
                    &handle.operation,
                    "subnet missing after successful update",
                )
            })
    }

    /// Get or create the private endpoint for a connection request. Creation
    /// requires the target private link service to exist already.
    async fn ensure_endpoint(
        &self,
        object: &ObjectRef,
        conn: &ServiceConnection,
        subnet: &Subnet,
    ) -> Result<PrivateEndpoint> {
        let spec = &conn.spec;
        if let Some(existing) = self
            .api
            .get_private_endpoint(&spec.resource_group, conn.name())
            .await?
        {
            return Ok(existing);
        }

        let service = self
            .api
            .get_private_link_service(&self.settings.lb_resource_group, &spec.service_name)
            .await?
            .ok_or_else(|| {
                CloudError::link_service_not_found(
                    &self.settings.lb_resource_group,
                    &spec.service_name,
                )
            })?;

        let desired = PrivateEndpoint {
            id: String::new(),
            name: conn.name().to_string(),
            location: self.location.clone(),
            subnet_id: subnet.id.clone(),
            manual_connections: vec![PrivateLinkServiceConnection {
                name: conn.name().to_string(),
                service_id: service.id.clone(),
                state: ConnectionState::pending(),
            }],
        };
        match self.create_endpoint(&spec.resource_group, &desired).await {
            Ok(created) => {
                self.reporter
                    .record(
                        object,
                        EventLevel::Normal,
                        reasons::PRIVATE_ENDPOINT_CREATED,
                        &format!("Created private endpoint: {}", created.id),
                    )
                    .await;
                Ok(created)
            }
            Err(err) => {
                self.reporter
                    .record(
                        object,
                        EventLevel::Warning,
                        reasons::PRIVATE_ENDPOINT_CREATION_ERROR,
                        &format!("Error creating private endpoint: {err}"),
                    )
                    .await;
                Err(err)
            }
        }
    }

    async fn create_endpoint(
        &self,
        resource_group: &str,
        desired: &PrivateEndpoint,
    ) -> Result<PrivateEndpoint> {
        let handle = self
            .api
            .begin_put_private_endpoint(resource_group, desired)
            .await?;
        self.await_operation(&handle).await?;
        self.api
            .get_private_endpoint(resource_group, &desired.name)
            .await?
            .ok_or_else(|| {
                CloudError::operation_failed(
                    &handle.operation,
                    "endpoint missing after successful create",
                )
            })
    }

    /// Approve the endpoint's connection from the service side. The entry is
    /// matched by private-endpoint id, never by name.
    async fn approve_endpoint(&self, endpoint: &PrivateEndpoint, service_name: &str) -> Result<()> {
        let rg = &self.settings.lb_resource_group;
        let connections = self.api.list_endpoint_connections(rg, service_name).await?;
        let target = connections
            .iter()
            .find(|c| c.endpoint_id == endpoint.id)
            .ok_or_else(|| CloudError::connection_not_found(service_name, &endpoint.name))?;

        info!(
            endpoint = %endpoint.name,
            service = service_name,
            connection = %target.name,
            "approving endpoint connection"
        );
        let handle = self
            .api
            .begin_approve_endpoint_connection(rg, service_name, &target.name)
            .await?;
        self.await_operation(&handle).await
    }
}
