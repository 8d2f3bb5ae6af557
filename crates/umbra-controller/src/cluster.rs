use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;
use umbra_core::{ObjectKey, ServiceConnection};

use crate::error::{ControllerError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Read and write access to the cluster's intent objects.
///
/// Updates use optimistic concurrency: the object carries the version it
/// was read at, and a stale write comes back as
/// [`ControllerError::ClusterConflict`].
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn get_service(&self, key: &ObjectKey) -> Result<Option<Service>>;
    async fn update_service(&self, service: &Service) -> Result<Service>;
    async fn get_connection(&self, key: &ObjectKey) -> Result<Option<ServiceConnection>>;
    async fn update_connection(&self, connection: &ServiceConnection) -> Result<ServiceConnection>;
}

/// Cluster client speaking the API server's REST conventions.
pub struct HttpClusterClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpClusterClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| ControllerError::cluster_api(format!("Building HTTP client: {err}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn service_url(&self, key: &ObjectKey) -> String {
        format!(
            "{}/api/v1/namespaces/{}/services/{}",
            self.base_url, key.namespace, key.name
        )
    }

    fn connection_url(&self, key: &ObjectKey) -> String {
        format!(
            "{}/apis/umbra.dev/v1/namespaces/{}/serviceconnections/{}",
            self.base_url, key.namespace, key.name
        )
    }

    async fn get<T: DeserializeOwned>(&self, url: String) -> Result<Option<T>> {
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|err| ControllerError::cluster_api(format!("GET {url} failed: {err}")))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ControllerError::cluster_api(format!(
                "GET {url} returned {status}: {body}"
            )));
        }
        let object = response.json().await.map_err(|err| {
            ControllerError::cluster_api(format!("GET {url} returned an unreadable body: {err}"))
        })?;
        Ok(Some(object))
    }

    async fn put<T>(&self, url: String, object: &T, key: &ObjectKey) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
    {
        let response = self
            .http
            .put(&url)
            .json(object)
            .send()
            .await
            .map_err(|err| ControllerError::cluster_api(format!("PUT {url} failed: {err}")))?;
        let status = response.status();
        if status == StatusCode::CONFLICT {
            return Err(ControllerError::cluster_conflict(key.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ControllerError::cluster_api(format!(
                "PUT {url} returned {status}: {body}"
            )));
        }
        response.json().await.map_err(|err| {
            ControllerError::cluster_api(format!("PUT {url} returned an unreadable body: {err}"))
        })
    }
}

#[async_trait]
impl ClusterClient for HttpClusterClient {
    async fn get_service(&self, key: &ObjectKey) -> Result<Option<Service>> {
        self.get(self.service_url(key)).await
    }

    async fn update_service(&self, service: &Service) -> Result<Service> {
        let key = ObjectKey::from_meta(&service.metadata)?;
        self.put(self.service_url(&key), service, &key).await
    }

    async fn get_connection(&self, key: &ObjectKey) -> Result<Option<ServiceConnection>> {
        self.get(self.connection_url(key)).await
    }

    async fn update_connection(&self, connection: &ServiceConnection) -> Result<ServiceConnection> {
        let key = ObjectKey::from_meta(&connection.metadata)?;
        self.put(self.connection_url(&key), connection, &key).await
    }
}

#[derive(Default)]
struct ClusterState {
    services: HashMap<ObjectKey, Service>,
    connections: HashMap<ObjectKey, ServiceConnection>,
    conflicts: u32,
    updates: usize,
}

/// In-memory cluster for exercising the reconcilers.
///
/// Updates bump `resource_version` like a real API server, and a conflict
/// budget lets tests force optimistic-concurrency retries.
#[derive(Default)]
pub struct MockCluster {
    state: RwLock<ClusterState>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_service(&self, service: Service) -> umbra_core::Result<()> {
        let key = ObjectKey::from_meta(&service.metadata)?;
        self.state.write().await.services.insert(key, service);
        Ok(())
    }

    pub async fn insert_connection(&self, connection: ServiceConnection) -> umbra_core::Result<()> {
        let key = ObjectKey::from_meta(&connection.metadata)?;
        self.state.write().await.connections.insert(key, connection);
        Ok(())
    }

    pub async fn remove_service(&self, key: &ObjectKey) {
        self.state.write().await.services.remove(key);
    }

    pub async fn remove_connection(&self, key: &ObjectKey) {
        self.state.write().await.connections.remove(key);
    }

    /// Make the next `count` updates fail with a conflict.
    pub async fn fail_updates(&self, count: u32) {
        self.state.write().await.conflicts = count;
    }

    pub async fn service(&self, key: &ObjectKey) -> Option<Service> {
        self.state.read().await.services.get(key).cloned()
    }

    pub async fn connection(&self, key: &ObjectKey) -> Option<ServiceConnection> {
        self.state.read().await.connections.get(key).cloned()
    }

    pub async fn update_calls(&self) -> usize {
        self.state.read().await.updates
    }
}

#[async_trait]
impl ClusterClient for MockCluster {
    async fn get_service(&self, key: &ObjectKey) -> Result<Option<Service>> {
        Ok(self.state.read().await.services.get(key).cloned())
    }

    async fn update_service(&self, service: &Service) -> Result<Service> {
        let key = ObjectKey::from_meta(&service.metadata)?;
        let mut state = self.state.write().await;
        state.updates += 1;
        if state.conflicts > 0 {
            state.conflicts -= 1;
            return Err(ControllerError::cluster_conflict(key.to_string()));
        }
        let mut stored = service.clone();
        stored.metadata.resource_version = Some(next_version(&service.metadata));
        state.services.insert(key, stored.clone());
        Ok(stored)
    }

    async fn get_connection(&self, key: &ObjectKey) -> Result<Option<ServiceConnection>> {
        Ok(self.state.read().await.connections.get(key).cloned())
    }

    async fn update_connection(&self, connection: &ServiceConnection) -> Result<ServiceConnection> {
        let key = ObjectKey::from_meta(&connection.metadata)?;
        let mut state = self.state.write().await;
        state.updates += 1;
        if state.conflicts > 0 {
            state.conflicts -= 1;
            return Err(ControllerError::cluster_conflict(key.to_string()));
        }
        let mut stored = connection.clone();
        stored.metadata.resource_version = Some(next_version(&connection.metadata));
        state.connections.insert(key, stored.clone());
        Ok(stored)
    }
}

fn next_version(meta: &ObjectMeta) -> String {
    meta.resource_version
        .as_deref()
        .and_then(|version| version.parse::<u64>().ok())
        .map(|version| (version + 1).to_string())
        .unwrap_or_else(|| "1".to_string())
}
