//! ARM REST implementation of [`NetworkApi`].
//!
//! Authentication follows the SDK auth-file convention: a JSON file carrying
//! client id/secret, tenant and subscription, exchanged for a management
//! token via client credentials and cached until near expiry. Mutations are
//! PUT/DELETE calls whose `Azure-AsyncOperation` (or `Location`) response
//! header becomes the poll URL of the returned handle; a response without
//! either header is already terminal. 404 on reads maps to `Ok(None)`.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::api::{NetworkApi, OperationHandle, OperationStatus};
use crate::error::{CloudError, Result};
use crate::types::{
    ConnectionState, ConnectionStatus, FrontendIpConfiguration, PolicyState, PrivateEndpoint,
    PrivateEndpointConnection, PrivateLinkService, PrivateLinkServiceConnection, Subnet,
    VirtualNetwork,
};

const API_VERSION: &str = "2020-05-01";
const DEFAULT_MANAGEMENT_ENDPOINT: &str = "https://management.azure.com";
const DEFAULT_LOGIN_ENDPOINT: &str = "https://login.microsoftonline.com";
const TOKEN_REFRESH_MARGIN_SECS: i64 = 120;
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Service principal credentials plus the cloud endpoints they belong to.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub tenant_id: String,
    pub subscription_id: String,
    pub login_endpoint: String,
    pub management_endpoint: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthFile {
    client_id: String,
    client_secret: String,
    subscription_id: String,
    tenant_id: String,
    #[serde(default)]
    active_directory_endpoint_url: Option<String>,
    #[serde(default)]
    resource_manager_endpoint_url: Option<String>,
}

impl Credentials {
    /// Load credentials from an SDK auth file. Endpoint URLs in the file
    /// override the public-cloud defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|err| {
            CloudError::auth(format!("reading auth file {}: {err}", path.display()))
        })?;
        let auth: AuthFile = serde_json::from_str(&contents).map_err(|err| {
            CloudError::auth(format!("parsing auth file {}: {err}", path.display()))
        })?;
        Ok(Self {
            client_id: auth.client_id,
            client_secret: auth.client_secret,
            tenant_id: auth.tenant_id,
            subscription_id: auth.subscription_id,
            login_endpoint: normalize_endpoint(
                auth.active_directory_endpoint_url,
                DEFAULT_LOGIN_ENDPOINT,
            ),
            management_endpoint: normalize_endpoint(
                auth.resource_manager_endpoint_url,
                DEFAULT_MANAGEMENT_ENDPOINT,
            ),
        })
    }
}

fn normalize_endpoint(configured: Option<String>, default: &str) -> String {
    match configured {
        Some(url) if !url.is_empty() => url.trim_end_matches('/').to_string(),
        _ => default.to_string(),
    }
}

struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Production network client against the ARM management endpoint.
pub struct ArmNetworkApi {
    http: reqwest::Client,
    credentials: Credentials,
    token: Mutex<Option<CachedToken>>,
}

impl ArmNetworkApi {
    pub fn new(credentials: Credentials) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| CloudError::transport("building http client", Some(Box::new(err))))?;
        Ok(Self {
            http,
            credentials,
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            let margin = chrono::Duration::seconds(TOKEN_REFRESH_MARGIN_SECS);
            if token.expires_at - margin > Utc::now() {
                return Ok(token.value.clone());
            }
        }

        let url = format!(
            "{}/{}/oauth2/token",
            self.credentials.login_endpoint, self.credentials.tenant_id
        );
        let resource = format!("{}/", self.credentials.management_endpoint);
        debug!(%url, "requesting management token");
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("resource", resource.as_str()),
        ];
        let response = self
            .http
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|err| CloudError::auth(format!("token request failed: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CloudError::auth(format!(
                "token request returned {status}: {body}"
            )));
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|err| CloudError::auth(format!("decoding token response: {err}")))?;
        let lifetime = chrono::Duration::seconds(parse_token_lifetime(token.expires_in.as_ref()));
        let value = token.access_token;
        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at: Utc::now() + lifetime,
        });
        Ok(value)
    }

    fn network_url(&self, resource_group: &str, suffix: &str) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Network/{}?api-version={}",
            self.credentials.management_endpoint,
            self.credentials.subscription_id,
            resource_group,
            suffix,
            API_VERSION
        )
    }

    async fn request(&self, method: Method, url: &str) -> Result<reqwest::RequestBuilder> {
        let token = self.access_token().await?;
        debug!(%method, url, "provider request");
        Ok(self.http.request(method, url).bearer_auth(token))
    }

    async fn get_resource<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>> {
        let response = self
            .request(Method::GET, url)
            .await?
            .send()
            .await
            .map_err(|err| transport_failure(url, err))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response).await?;
        let value = response.json().await.map_err(|err| {
            CloudError::transport(format!("decoding response from {url}"), Some(Box::new(err)))
        })?;
        Ok(Some(value))
    }

    async fn begin_put<B: Serialize>(
        &self,
        url: &str,
        operation: String,
        body: &B,
    ) -> Result<OperationHandle> {
        let response = self
            .request(Method::PUT, url)
            .await?
            .json(body)
            .send()
            .await
            .map_err(|err| transport_failure(url, err))?;
        let response = check_status(response).await?;
        Ok(OperationHandle::new(operation, poll_url_from(&response)))
    }

    /// DELETE a resource. An already-absent resource completes immediately.
    async fn begin_delete(&self, url: &str, operation: String) -> Result<OperationHandle> {
        let response = self
            .request(Method::DELETE, url)
            .await?
            .send()
            .await
            .map_err(|err| transport_failure(url, err))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(OperationHandle::completed(operation));
        }
        let response = check_status(response).await?;
        Ok(OperationHandle::new(operation, poll_url_from(&response)))
    }
}

#[async_trait]
impl NetworkApi for ArmNetworkApi {
    async fn get_vnet(&self, resource_group: &str, name: &str) -> Result<Option<VirtualNetwork>> {
        let url = self.network_url(resource_group, &format!("virtualNetworks/{name}"));
        let resource: Option<VnetResource> = self.get_resource(&url).await?;
        Ok(resource.map(VnetResource::into_model))
    }

    async fn get_subnet(
        &self,
        resource_group: &str,
        vnet: &str,
        name: &str,
    ) -> Result<Option<Subnet>> {
        let url = self.network_url(resource_group, &format!("virtualNetworks/{vnet}/subnets/{name}"));
        let resource: Option<SubnetResource> = self.get_resource(&url).await?;
        Ok(resource.map(SubnetResource::into_model))
    }

    async fn begin_put_subnet(
        &self,
        resource_group: &str,
        vnet: &str,
        subnet: &Subnet,
    ) -> Result<OperationHandle> {
        let url = self.network_url(
            resource_group,
            &format!("virtualNetworks/{vnet}/subnets/{}", subnet.name),
        );
        self.begin_put(
            &url,
            format!("put subnet {vnet}/{}", subnet.name),
            &subnet_payload(subnet),
        )
        .await
    }

    async fn list_frontend_ip_configurations(
        &self,
        resource_group: &str,
        load_balancer: &str,
    ) -> Result<Vec<FrontendIpConfiguration>> {
        let url = self.network_url(resource_group, &format!("loadBalancers/{load_balancer}"));
        let resource: Option<LoadBalancerResource> = self.get_resource(&url).await?;
        Ok(resource
            .map(|lb| {
                lb.properties
                    .frontend_ip_configurations
                    .into_iter()
                    .map(FrontendResource::into_model)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_private_link_service(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<Option<PrivateLinkService>> {
        let url = self.network_url(resource_group, &format!("privateLinkServices/{name}"));
        let resource: Option<LinkServiceResource> = self.get_resource(&url).await?;
        Ok(resource.map(LinkServiceResource::into_model))
    }

    async fn begin_put_private_link_service(
        &self,
        resource_group: &str,
        service: &PrivateLinkService,
    ) -> Result<OperationHandle> {
        let url = self.network_url(resource_group, &format!("privateLinkServices/{}", service.name));
        self.begin_put(
            &url,
            format!("put link service {}", service.name),
            &link_service_payload(service),
        )
        .await
    }

    async fn begin_delete_private_link_service(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<OperationHandle> {
        let url = self.network_url(resource_group, &format!("privateLinkServices/{name}"));
        self.begin_delete(&url, format!("delete link service {name}")).await
    }

    async fn get_private_endpoint(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<Option<PrivateEndpoint>> {
        let url = self.network_url(resource_group, &format!("privateEndpoints/{name}"));
        let resource: Option<EndpointResource> = self.get_resource(&url).await?;
        Ok(resource.map(EndpointResource::into_model))
    }

    async fn begin_put_private_endpoint(
        &self,
        resource_group: &str,
        endpoint: &PrivateEndpoint,
    ) -> Result<OperationHandle> {
        let url = self.network_url(resource_group, &format!("privateEndpoints/{}", endpoint.name));
        self.begin_put(
            &url,
            format!("put endpoint {}", endpoint.name),
            &endpoint_payload(endpoint),
        )
        .await
    }

    async fn begin_delete_private_endpoint(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<OperationHandle> {
        let url = self.network_url(resource_group, &format!("privateEndpoints/{name}"));
        self.begin_delete(&url, format!("delete endpoint {name}")).await
    }

    async fn list_endpoint_connections(
        &self,
        resource_group: &str,
        service: &str,
    ) -> Result<Vec<PrivateEndpointConnection>> {
        let url = self.network_url(
            resource_group,
            &format!("privateLinkServices/{service}/privateEndpointConnections"),
        );
        let result: Option<ListResult<EndpointConnectionResource>> =
            self.get_resource(&url).await?;
        Ok(result
            .map(|list| {
                list.value
                    .into_iter()
                    .map(EndpointConnectionResource::into_model)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn begin_approve_endpoint_connection(
        &self,
        resource_group: &str,
        service: &str,
        connection: &str,
    ) -> Result<OperationHandle> {
        let url = self.network_url(
            resource_group,
            &format!("privateLinkServices/{service}/privateEndpointConnections/{connection}"),
        );
        self.begin_put(
            &url,
            format!("approve connection {service}/{connection}"),
            &approval_payload(connection),
        )
        .await
    }

    async fn poll_operation(&self, handle: &OperationHandle) -> Result<OperationStatus> {
        let Some(url) = &handle.poll_url else {
            return Ok(OperationStatus::Succeeded);
        };
        let response = self
            .request(Method::GET, url)
            .await?
            .send()
            .await
            .map_err(|err| transport_failure(url, err))?;
        if response.status() == StatusCode::ACCEPTED {
            return Ok(OperationStatus::InProgress);
        }
        let response = check_status(response).await?;
        let body = response.text().await.map_err(|err| {
            CloudError::transport("reading operation status", Some(Box::new(err)))
        })?;
        if body.trim().is_empty() {
            return Ok(OperationStatus::Succeeded);
        }
        let result: OperationResult = serde_json::from_str(&body).map_err(|err| {
            CloudError::transport(format!("decoding operation status: {err}"), None)
        })?;
        Ok(interpret_operation(result))
    }
}

fn transport_failure(url: &str, err: reqwest::Error) -> CloudError {
    CloudError::transport(format!("request to {url} failed"), Some(Box::new(err)))
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(CloudError::api_failure(status.as_u16(), message))
}

fn poll_url_from(response: &reqwest::Response) -> Option<String> {
    let headers = response.headers();
    headers
        .get("azure-asyncoperation")
        .or_else(|| headers.get(reqwest::header::LOCATION))
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn parse_token_lifetime(value: Option<&serde_json::Value>) -> i64 {
    match value {
        Some(serde_json::Value::String(s)) => s.parse().unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS),
        Some(serde_json::Value::Number(n)) => n.as_i64().unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS),
        _ => DEFAULT_TOKEN_LIFETIME_SECS,
    }
}

fn interpret_operation(result: OperationResult) -> OperationStatus {
    match result.status.as_deref() {
        Some("Succeeded") | None => OperationStatus::Succeeded,
        Some("Failed") | Some("Canceled") => {
            let fallback = format!("operation {}", result.status.as_deref().unwrap_or("Failed"));
            let message = result
                .error
                .and_then(|e| e.message.or(e.code))
                .unwrap_or(fallback);
            OperationStatus::Failed(message)
        }
        Some(_) => OperationStatus::InProgress,
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct OperationResult {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<OperationErrorBody>,
}

#[derive(Deserialize)]
struct OperationErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct ListResult<T> {
    #[serde(default)]
    value: Vec<T>,
}

#[derive(Default, Serialize, Deserialize)]
struct ResourceRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
}

#[derive(Deserialize)]
struct VnetResource {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    location: Option<String>,
}

impl VnetResource {
    fn into_model(self) -> VirtualNetwork {
        VirtualNetwork {
            id: self.id.unwrap_or_default(),
            name: self.name.unwrap_or_default(),
            location: self.location.unwrap_or_default(),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubnetResource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default)]
    properties: SubnetProperties,
}

#[derive(Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubnetProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    address_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    private_endpoint_network_policies: Option<PolicyState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    private_link_service_network_policies: Option<PolicyState>,
}

impl SubnetResource {
    fn into_model(self) -> Subnet {
        Subnet {
            id: self.id.unwrap_or_default(),
            name: self.name.unwrap_or_default(),
            address_prefix: self.properties.address_prefix,
            private_endpoint_policies: self
                .properties
                .private_endpoint_network_policies
                .unwrap_or_default(),
            private_link_service_policies: self
                .properties
                .private_link_service_network_policies
                .unwrap_or_default(),
        }
    }
}

fn subnet_payload(subnet: &Subnet) -> SubnetResource {
    SubnetResource {
        id: None,
        name: Some(subnet.name.clone()),
        properties: SubnetProperties {
            address_prefix: subnet.address_prefix.clone(),
            private_endpoint_network_policies: Some(subnet.private_endpoint_policies),
            private_link_service_network_policies: Some(subnet.private_link_service_policies),
        },
    }
}

#[derive(Deserialize)]
struct LoadBalancerResource {
    #[serde(default)]
    properties: LoadBalancerProperties,
}

#[derive(Default, Deserialize)]
struct LoadBalancerProperties {
    #[serde(default, rename = "frontendIPConfigurations")]
    frontend_ip_configurations: Vec<FrontendResource>,
}

#[derive(Deserialize)]
struct FrontendResource {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    properties: FrontendProperties,
}

#[derive(Default, Deserialize)]
struct FrontendProperties {
    #[serde(default, rename = "privateIPAddress")]
    private_ip_address: Option<String>,
}

impl FrontendResource {
    fn into_model(self) -> FrontendIpConfiguration {
        FrontendIpConfiguration {
            id: self.id.unwrap_or_default(),
            name: self.name.unwrap_or_default(),
            private_ip_address: self.properties.private_ip_address,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinkServiceResource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    location: Option<String>,
    #[serde(default)]
    properties: LinkServiceProperties,
}

#[derive(Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinkServiceProperties {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    load_balancer_frontend_ip_configurations: Vec<ResourceRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    ip_configurations: Vec<IpConfigurationResource>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    private_endpoint_connections: Vec<EndpointConnectionResource>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpConfigurationResource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default)]
    properties: IpConfigurationProperties,
}

#[derive(Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpConfigurationProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    subnet: Option<ResourceRef>,
}

impl LinkServiceResource {
    fn into_model(self) -> PrivateLinkService {
        PrivateLinkService {
            id: self.id.unwrap_or_default(),
            name: self.name.unwrap_or_default(),
            location: self.location.unwrap_or_default(),
            frontend_ip_configuration_ids: self
                .properties
                .load_balancer_frontend_ip_configurations
                .into_iter()
                .filter_map(|r| r.id)
                .collect(),
            nat_subnet_id: self
                .properties
                .ip_configurations
                .into_iter()
                .next()
                .and_then(|c| c.properties.subnet)
                .and_then(|s| s.id)
                .unwrap_or_default(),
            endpoint_connections: self
                .properties
                .private_endpoint_connections
                .into_iter()
                .map(EndpointConnectionResource::into_model)
                .collect(),
        }
    }
}

fn link_service_payload(service: &PrivateLinkService) -> LinkServiceResource {
    LinkServiceResource {
        id: None,
        name: None,
        location: Some(service.location.clone()),
        properties: LinkServiceProperties {
            load_balancer_frontend_ip_configurations: service
                .frontend_ip_configuration_ids
                .iter()
                .map(|id| ResourceRef { id: Some(id.clone()) })
                .collect(),
            ip_configurations: vec![IpConfigurationResource {
                name: Some(service.name.clone()),
                properties: IpConfigurationProperties {
                    subnet: Some(ResourceRef {
                        id: Some(service.nat_subnet_id.clone()),
                    }),
                },
            }],
            private_endpoint_connections: Vec::new(),
        },
    }
}

#[derive(Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EndpointConnectionResource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default)]
    properties: EndpointConnectionProperties,
}

#[derive(Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EndpointConnectionProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    private_endpoint: Option<ResourceRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    private_link_service_connection_state: Option<ConnectionStateResource>,
}

#[derive(Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionStateResource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

impl EndpointConnectionResource {
    fn into_model(self) -> PrivateEndpointConnection {
        let EndpointConnectionProperties {
            private_endpoint,
            private_link_service_connection_state,
        } = self.properties;
        let state = private_link_service_connection_state.unwrap_or_default();
        PrivateEndpointConnection {
            id: self.id.unwrap_or_default(),
            name: self.name.unwrap_or_default(),
            endpoint_id: private_endpoint.and_then(|r| r.id).unwrap_or_default(),
            state: ConnectionState {
                status: ConnectionStatus::from(state.status.unwrap_or_default()),
                description: state.description,
            },
        }
    }
}

/// Body for approving a connection: status only, the description is left
/// for the provider to keep.
fn approval_payload(connection: &str) -> EndpointConnectionResource {
    EndpointConnectionResource {
        id: None,
        name: Some(connection.to_string()),
        properties: EndpointConnectionProperties {
            private_endpoint: None,
            private_link_service_connection_state: Some(ConnectionStateResource {
                status: Some(ConnectionStatus::Approved.as_str().to_string()),
                description: None,
            }),
        },
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EndpointResource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    location: Option<String>,
    #[serde(default)]
    properties: EndpointProperties,
}

#[derive(Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EndpointProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    subnet: Option<ResourceRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    manual_private_link_service_connections: Vec<ManualConnectionResource>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManualConnectionResource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default)]
    properties: ManualConnectionProperties,
}

#[derive(Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManualConnectionProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    private_link_service_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    private_link_service_connection_state: Option<ConnectionStateResource>,
}

impl EndpointResource {
    fn into_model(self) -> PrivateEndpoint {
        PrivateEndpoint {
            id: self.id.unwrap_or_default(),
            name: self.name.unwrap_or_default(),
            location: self.location.unwrap_or_default(),
            subnet_id: self
                .properties
                .subnet
                .and_then(|r| r.id)
                .unwrap_or_default(),
            manual_connections: self
                .properties
                .manual_private_link_service_connections
                .into_iter()
                .map(|m| {
                    let state = m
                        .properties
                        .private_link_service_connection_state
                        .unwrap_or_default();
                    PrivateLinkServiceConnection {
                        name: m.name.unwrap_or_default(),
                        service_id: m
                            .properties
                            .private_link_service_id
                            .unwrap_or_default(),
                        state: ConnectionState {
                            status: ConnectionStatus::from(state.status.unwrap_or_default()),
                            description: state.description,
                        },
                    }
                })
                .collect(),
        }
    }
}

fn endpoint_payload(endpoint: &PrivateEndpoint) -> EndpointResource {
    EndpointResource {
        id: None,
        name: None,
        location: Some(endpoint.location.clone()),
        properties: EndpointProperties {
            subnet: Some(ResourceRef {
                id: Some(endpoint.subnet_id.clone()),
            }),
            manual_private_link_service_connections: endpoint
                .manual_connections
                .iter()
                .map(|c| ManualConnectionResource {
                    name: Some(c.name.clone()),
                    properties: ManualConnectionProperties {
                        private_link_service_id: Some(c.service_id.clone()),
                        private_link_service_connection_state: Some(ConnectionStateResource {
                            status: Some(c.state.status.as_str().to_string()),
                            description: c.state.description.clone(),
                        }),
                    },
                })
                .collect(),
        },
    }
}
