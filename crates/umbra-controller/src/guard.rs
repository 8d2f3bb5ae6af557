use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::debug;
use umbra_core::{ObjectKey, ServiceConnection};

use crate::cluster::ClusterClient;
use crate::error::{ControllerError, Result};

/// Deletion guard placed on intent objects that own cloud resources.
///
/// While the token sits in an object's finalizer list the cluster parks
/// deletion as a timestamp instead of removing the object, which gives the
/// controller a window to tear the cloud side down first.
pub const GUARD_TOKEN: &str = "umbra.dev/cloud-cleanup";

const CONFLICT_RETRIES: usize = 5;

/// Whether the deletion guard is present on an object.
pub fn has_guard(meta: &ObjectMeta) -> bool {
    meta.finalizers
        .as_ref()
        .map(|finalizers| finalizers.iter().any(|f| f == GUARD_TOKEN))
        .unwrap_or(false)
}

fn set_guard(meta: &mut ObjectMeta, present: bool) {
    let finalizers = meta.finalizers.get_or_insert_with(Vec::new);
    if present {
        if !finalizers.iter().any(|f| f == GUARD_TOKEN) {
            finalizers.push(GUARD_TOKEN.to_string());
        }
    } else {
        finalizers.retain(|f| f != GUARD_TOKEN);
    }
}

#[async_trait]
trait GuardTarget: Clone + Send + Sync {
    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;
    async fn fetch(client: &dyn ClusterClient, key: &ObjectKey) -> Result<Option<Self>>;
    async fn persist(client: &dyn ClusterClient, value: &Self) -> Result<Self>;
}

#[async_trait]
impl GuardTarget for Service {
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    async fn fetch(client: &dyn ClusterClient, key: &ObjectKey) -> Result<Option<Self>> {
        client.get_service(key).await
    }

    async fn persist(client: &dyn ClusterClient, value: &Self) -> Result<Self> {
        client.update_service(value).await
    }
}

#[async_trait]
impl GuardTarget for ServiceConnection {
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    async fn fetch(client: &dyn ClusterClient, key: &ObjectKey) -> Result<Option<Self>> {
        client.get_connection(key).await
    }

    async fn persist(client: &dyn ClusterClient, value: &Self) -> Result<Self> {
        client.update_connection(value).await
    }
}

/// Flip the guard to the requested state and persist, retrying around
/// optimistic-concurrency conflicts with a fresh copy each time. Writes
/// nothing when the guard is already in the requested state.
async fn persist_guard_change<T: GuardTarget>(
    client: &dyn ClusterClient,
    object: &T,
    present: bool,
) -> Result<T> {
    let mut current = object.clone();
    let mut attempt = 0;
    loop {
        if has_guard(current.meta()) == present {
            return Ok(current);
        }
        set_guard(current.meta_mut(), present);
        match T::persist(client, &current).await {
            Ok(stored) => return Ok(stored),
            Err(ControllerError::ClusterConflict { object })
                if attempt + 1 < CONFLICT_RETRIES =>
            {
                attempt += 1;
                debug!(
                    "Guard update for '{}' conflicted, retrying with a fresh copy ({attempt})",
                    object
                );
                let key = ObjectKey::from_meta(current.meta())?;
                current = T::fetch(client, &key)
                    .await?
                    .ok_or_else(|| ControllerError::object_missing(key.to_string()))?;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Make sure a service carries the deletion guard.
pub async fn ensure_service_guard(client: &dyn ClusterClient, service: &Service) -> Result<Service> {
    persist_guard_change(client, service, true).await
}

/// Remove the deletion guard from a service, unblocking its deletion.
pub async fn clear_service_guard(client: &dyn ClusterClient, service: &Service) -> Result<Service> {
    persist_guard_change(client, service, false).await
}

/// Make sure a connection carries the deletion guard.
pub async fn ensure_connection_guard(
    client: &dyn ClusterClient,
    connection: &ServiceConnection,
) -> Result<ServiceConnection> {
    persist_guard_change(client, connection, true).await
}

/// Remove the deletion guard from a connection, unblocking its deletion.
pub async fn clear_connection_guard(
    client: &dyn ClusterClient,
    connection: &ServiceConnection,
) -> Result<ServiceConnection> {
    persist_guard_change(client, connection, false).await
}
