use miette::Diagnostic;
use std::time::Duration;
use thiserror::Error;

/// Error type for provider network operations
#[derive(Error, Debug, Diagnostic)]
pub enum CloudError {
    /// Credential loading or token acquisition failed
    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(umbra::cloud::auth),
        help("Check the credentials file referenced by --auth-file")
    )]
    Auth { message: String },

    /// Request never produced a provider response
    #[error("Transport error: {message}")]
    #[diagnostic(
        code(umbra::cloud::transport),
        help("Verify network connectivity to the provider management endpoint")
    )]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Provider rejected the request
    #[error("Provider API returned {status}: {message}")]
    #[diagnostic(
        code(umbra::cloud::api_failure),
        help("Inspect the provider activity log for the failing request")
    )]
    ApiFailure { status: u16, message: String },

    /// A submitted operation reached a failed terminal state
    #[error("Operation {operation} failed: {message}")]
    #[diagnostic(code(umbra::cloud::operation_failed))]
    OperationFailed { operation: String, message: String },

    /// A submitted operation never reached a terminal state
    #[error("Operation {operation} did not reach a terminal state within {timeout:?}")]
    #[diagnostic(
        code(umbra::cloud::operation_timeout),
        help("The operation may still complete on the provider side; the key will be retried")
    )]
    OperationTimeout { operation: String, timeout: Duration },

    /// The configured virtual network does not exist
    #[error("Virtual network {name} was not found in resource group {resource_group}")]
    #[diagnostic(
        code(umbra::cloud::vnet_not_found),
        help("Check --vnet-name and --vnet-resource-group")
    )]
    VnetNotFound {
        resource_group: String,
        name: String,
    },

    /// A referenced subnet does not exist
    #[error("Subnet {name} was not found in virtual network {vnet}")]
    #[diagnostic(code(umbra::cloud::subnet_not_found))]
    SubnetNotFound { vnet: String, name: String },

    /// The private link service a connection points at does not exist yet
    #[error("Private link service {name} was not found in resource group {resource_group}")]
    #[diagnostic(
        code(umbra::cloud::link_service_not_found),
        help("The service reconciler may not have created it yet; the key will be retried")
    )]
    LinkServiceNotFound {
        resource_group: String,
        name: String,
    },

    /// No load balancer frontend carries the service's ingress address
    #[error("Could not find service ip {address} in load balancer {load_balancer}")]
    #[diagnostic(
        code(umbra::cloud::frontend_not_found),
        help("Confirm the internal load balancer owns a frontend with this private address")
    )]
    FrontendNotFound {
        address: String,
        load_balancer: String,
    },

    /// The link service lists no connection for the endpoint being approved
    #[error("Could not find connection in: {service} for endpoint: {endpoint}")]
    #[diagnostic(code(umbra::cloud::connection_not_found))]
    ConnectionNotFound { service: String, endpoint: String },

    /// An endpoint came back without its manual connection
    #[error("No connections found on endpoint {endpoint}")]
    #[diagnostic(
        code(umbra::cloud::endpoint_without_connections),
        help("Delete and recreate the endpoint; it cannot be approved in this state")
    )]
    EndpointWithoutConnections { endpoint: String },

    /// Connection left the Pending/Approved state machine
    #[error("The status of this connection is {status}")]
    #[diagnostic(
        code(umbra::cloud::unexpected_status),
        help("Connections leave Pending only via controller approval; resolve the {status} state manually")
    )]
    UnexpectedStatus {
        #[allow(unused)]
        endpoint: String,
        status: String,
    },

    /// A provider resource id did not parse
    #[error("Malformed resource id: {id}")]
    #[diagnostic(code(umbra::cloud::malformed_resource_id))]
    MalformedResourceId { id: String },
}

/// Result type alias for provider network operations
pub type Result<T> = std::result::Result<T, CloudError>;

impl CloudError {
    /// Create an Auth error
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    /// Create a Transport error
    pub fn transport(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Transport {
            message: message.into(),
            source,
        }
    }

    /// Create an ApiFailure error
    pub fn api_failure(status: u16, message: impl Into<String>) -> Self {
        Self::ApiFailure {
            status,
            message: message.into(),
        }
    }

    /// Create an OperationFailed error
    pub fn operation_failed(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create an OperationTimeout error
    pub fn operation_timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::OperationTimeout {
            operation: operation.into(),
            timeout,
        }
    }

    /// Create a VnetNotFound error
    pub fn vnet_not_found(resource_group: impl Into<String>, name: impl Into<String>) -> Self {
        Self::VnetNotFound {
            resource_group: resource_group.into(),
            name: name.into(),
        }
    }

    /// Create a SubnetNotFound error
    pub fn subnet_not_found(vnet: impl Into<String>, name: impl Into<String>) -> Self {
        Self::SubnetNotFound {
            vnet: vnet.into(),
            name: name.into(),
        }
    }

    /// Create a LinkServiceNotFound error
    pub fn link_service_not_found(
        resource_group: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::LinkServiceNotFound {
            resource_group: resource_group.into(),
            name: name.into(),
        }
    }

    /// Create a FrontendNotFound error
    pub fn frontend_not_found(
        address: impl Into<String>,
        load_balancer: impl Into<String>,
    ) -> Self {
        Self::FrontendNotFound {
            address: address.into(),
            load_balancer: load_balancer.into(),
        }
    }

    /// Create a ConnectionNotFound error
    pub fn connection_not_found(service: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self::ConnectionNotFound {
            service: service.into(),
            endpoint: endpoint.into(),
        }
    }

    /// Create an EndpointWithoutConnections error
    pub fn endpoint_without_connections(endpoint: impl Into<String>) -> Self {
        Self::EndpointWithoutConnections {
            endpoint: endpoint.into(),
        }
    }

    /// Create an UnexpectedStatus error
    pub fn unexpected_status(endpoint: impl Into<String>, status: impl Into<String>) -> Self {
        Self::UnexpectedStatus {
            endpoint: endpoint.into(),
            status: status.into(),
        }
    }

    /// Create a MalformedResourceId error
    pub fn malformed_resource_id(id: impl Into<String>) -> Self {
        Self::MalformedResourceId { id: id.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_match_wire_conventions() {
        let err = CloudError::frontend_not_found("10.0.0.5", "kube-lb");
        assert_eq!(
            err.to_string(),
            "Could not find service ip 10.0.0.5 in load balancer kube-lb"
        );

        let err = CloudError::unexpected_status("conn1", "Rejected");
        assert_eq!(err.to_string(), "The status of this connection is Rejected");
    }
}
