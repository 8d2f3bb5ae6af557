//! Provider-side network resource model.
//!
//! These are deliberately narrow views of the provider's wire types: only
//! the fields the reconcilers read or write. The ARM client maps the full
//! payloads into these, and [`crate::mock::MockCloud`] stores them directly.

use serde::{Deserialize, Serialize};

/// Subnet policy toggle. Private link placement requires `Disabled`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyState {
    Enabled,
    Disabled,
}

impl Default for PolicyState {
    fn default() -> Self {
        Self::Enabled
    }
}

/// A subnet within a virtual network.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Subnet {
    pub id: String,
    pub name: String,
    pub address_prefix: Option<String>,
    /// Must be `Disabled` before an endpoint can be placed here.
    pub private_endpoint_policies: PolicyState,
    /// Must be `Disabled` before a link service NAT address can live here.
    pub private_link_service_policies: PolicyState,
}

/// A load balancer frontend, the attachment point for a link service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrontendIpConfiguration {
    pub id: String,
    pub name: String,
    pub private_ip_address: Option<String>,
}

/// Connection state shared by both sides of a private link.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub description: Option<String>,
}

impl ConnectionState {
    pub fn pending() -> Self {
        Self {
            status: ConnectionStatus::Pending,
            description: Some("Awaiting approval".to_string()),
        }
    }
}

/// Approval status of a private link connection.
///
/// The provider treats this as an open string set, so unknown values are
/// preserved rather than rejected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ConnectionStatus {
    Pending,
    Approved,
    Rejected,
    Removed,
    Other(String),
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "Pending",
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
            Self::Removed => "Removed",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for ConnectionStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Pending" => Self::Pending,
            "Approved" => Self::Approved,
            "Rejected" => Self::Rejected,
            "Removed" => Self::Removed,
            _ => Self::Other(value),
        }
    }
}

impl From<ConnectionStatus> for String {
    fn from(value: ConnectionStatus) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Service-side record of an endpoint attached to a link service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrivateEndpointConnection {
    pub id: String,
    /// Connection name within the link service, used as the update target
    /// when approving.
    pub name: String,
    /// Resource id of the consumer's private endpoint.
    pub endpoint_id: String,
    pub state: ConnectionState,
}

/// A private link service fronting an internal load balancer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrivateLinkService {
    pub id: String,
    pub name: String,
    pub location: String,
    pub frontend_ip_configuration_ids: Vec<String>,
    /// Subnet carrying the service's NAT addresses.
    pub nat_subnet_id: String,
    pub endpoint_connections: Vec<PrivateEndpointConnection>,
}

/// Consumer-side request baked into a private endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrivateLinkServiceConnection {
    pub name: String,
    /// Resource id of the link service this endpoint wants to reach.
    pub service_id: String,
    pub state: ConnectionState,
}

/// A private endpoint: the consumer end of a private link.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrivateEndpoint {
    pub id: String,
    pub name: String,
    pub location: String,
    pub subnet_id: String,
    /// Manual connections require service-side approval before traffic flows.
    pub manual_connections: Vec<PrivateLinkServiceConnection>,
}

/// A virtual network, read for its location and as the parent of subnets.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VirtualNetwork {
    pub id: String,
    pub name: String,
    pub location: String,
}

/// Resource group and leaf name extracted from a provider resource id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedId {
    pub resource_group: String,
    pub name: String,
}

/// Extract the resource group and trailing resource name from an id such as
/// `/subscriptions/<sub>/resourceGroups/<rg>/providers/Microsoft.Network/privateEndpoints/<name>`.
///
/// Returns `None` when either segment is missing.
pub fn parse_resource_id(id: &str) -> Option<ParsedId> {
    let segments: Vec<&str> = id.split('/').filter(|s| !s.is_empty()).collect();
    let rg_index = segments
        .iter()
        .position(|s| s.eq_ignore_ascii_case("resourcegroups"))?;
    let resource_group = segments.get(rg_index + 1)?;
    let name = segments.last()?;
    if segments.len() < rg_index + 3 {
        return None;
    }
    Some(ParsedId {
        resource_group: (*resource_group).to_string(),
        name: (*name).to_string(),
    })
}
