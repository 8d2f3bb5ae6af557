use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

/// Declared intent to reach an exposed service through a provider-side
/// private endpoint placed in the consumer's subnet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConnection {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ServiceConnectionSpec,
}

/// Where the private endpoint lands and which service it targets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConnectionSpec {
    pub resource_group: String,
    pub vnet_name: String,
    pub subnet_name: String,
    pub service_name: String,
}

impl ServiceConnection {
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or("default")
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_uses_camel_case_wire_form() {
        let conn: ServiceConnection = serde_json::from_str(
            r#"{
                "metadata": {"name": "conn1", "namespace": "default"},
                "spec": {
                    "resourceGroup": "consumer-rg",
                    "vnetName": "consumer-vnet",
                    "subnetName": "apl-subnet",
                    "serviceName": "web"
                }
            }"#,
        )
        .unwrap();

        assert_eq!(conn.name(), "conn1");
        assert_eq!(conn.spec.resource_group, "consumer-rg");
        assert_eq!(conn.spec.service_name, "web");

        let out = serde_json::to_value(&conn).unwrap();
        assert_eq!(out["spec"]["subnetName"], "apl-subnet");
    }

    #[test]
    fn test_deletion_flag() {
        let mut conn = ServiceConnection::default();
        assert!(!conn.is_deleting());
        conn.metadata.deletion_timestamp =
            Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(
                k8s_openapi::chrono::Utc::now(),
            ));
        assert!(conn.is_deleting());
    }
}
