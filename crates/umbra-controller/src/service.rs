use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use tracing::debug;
use umbra_cloud::CloudContext;
use umbra_core::{EventKind, IntentObject, ObjectKey, WatchEvent};

use crate::cache::IntentCache;
use crate::cluster::ClusterClient;
use crate::error::Result;
use crate::guard::{clear_service_guard, ensure_service_guard};
use crate::runtime::Reconcile;

/// Annotation that opts a service into private-link exposure. The value
/// must be exactly `"true"`.
pub const DEFAULT_SELECTION_ANNOTATION: &str = "umbra.dev/private-link";

/// Marks a service as fronted by the internal load balancer. Only internal
/// load balancers can back a private link service.
pub const INTERNAL_LB_ANNOTATION: &str =
    "service.beta.kubernetes.io/azure-load-balancer-internal";

/// Keeps cloud private link services in step with annotated cluster
/// services.
///
/// A service that is an internal load balancer, has an ingress address,
/// and carries the selection annotation gets a private link service on the
/// load balancer's frontend. Anything else with leftover cloud state gets
/// torn down.
pub struct ServiceReconciler {
    cloud: Arc<CloudContext>,
    cluster: Arc<dyn ClusterClient>,
    cache: Arc<IntentCache>,
    selection_annotation: String,
}

impl ServiceReconciler {
    pub fn new(
        cloud: Arc<CloudContext>,
        cluster: Arc<dyn ClusterClient>,
        cache: Arc<IntentCache>,
        selection_annotation: impl Into<String>,
    ) -> Self {
        Self {
            cloud,
            cluster,
            cache,
            selection_annotation: selection_annotation.into(),
        }
    }

    fn should_process(&self, service: &Service) -> bool {
        is_internal_load_balancer(service)
            && ingress_ip(service).is_some()
            && annotation(service, &self.selection_annotation) == Some("true")
    }

    /// Tear down the cloud side, then release the deletion guard. The order
    /// matters: the guard only comes off once the cloud no longer holds
    /// anything for this service.
    async fn cleanup(&self, key: &ObjectKey, service: &Service) -> Result<()> {
        self.cloud.remove_service(&key.namespace, &key.name).await?;
        clear_service_guard(self.cluster.as_ref(), service).await?;
        Ok(())
    }
}

#[async_trait]
impl Reconcile for ServiceReconciler {
    fn name(&self) -> &'static str {
        "service"
    }

    fn wants(&self, event: &WatchEvent) -> bool {
        let IntentObject::Service(service) = &event.object else {
            return false;
        };
        let previous = match &event.previous {
            Some(IntentObject::Service(previous)) => Some(previous),
            _ => None,
        };
        match event.kind {
            EventKind::Added => self.should_process(service),
            // A service leaving the processable set still needs a sync to
            // clean up, so either side of the transition counts.
            EventKind::Updated => {
                previous.map(|p| self.should_process(p)).unwrap_or(false)
                    || self.should_process(service)
            }
            EventKind::Deleted => self.should_process(previous.unwrap_or(service)),
        }
    }

    async fn sync(&self, key: &ObjectKey) -> Result<()> {
        let Some(service) = self.cache.service(key).await else {
            debug!("Service '{key}' is gone, removing any private link service");
            self.cloud.remove_service(&key.namespace, &key.name).await?;
            return Ok(());
        };

        match ingress_ip(&service) {
            Some(ip)
                if service.metadata.deletion_timestamp.is_none()
                    && self.should_process(&service) =>
            {
                ensure_service_guard(self.cluster.as_ref(), &service).await?;
                self.cloud
                    .add_update_private_service(&key.namespace, &key.name, ip)
                    .await?;
                Ok(())
            }
            _ => self.cleanup(key, &service).await,
        }
    }
}

fn annotation<'a>(service: &'a Service, name: &str) -> Option<&'a str> {
    service
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(name))
        .map(String::as_str)
}

pub fn is_internal_load_balancer(service: &Service) -> bool {
    let is_load_balancer = service
        .spec
        .as_ref()
        .and_then(|spec| spec.type_.as_deref())
        == Some("LoadBalancer");
    is_load_balancer && annotation(service, INTERNAL_LB_ANNOTATION) == Some("true")
}

/// First ingress address the load balancer reported, if any.
pub fn ingress_ip(service: &Service) -> Option<&str> {
    service
        .status
        .as_ref()?
        .load_balancer
        .as_ref()?
        .ingress
        .as_ref()?
        .first()?
        .ip
        .as_deref()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockCluster;
    use crate::guard::has_guard;
    use k8s_openapi::api::core::v1::{
        LoadBalancerIngress, LoadBalancerStatus, ServiceSpec, ServiceStatus,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
    use std::collections::BTreeMap;
    use std::time::Duration;
    use umbra_cloud::{
        CloudSettings, FrontendIpConfiguration, MockCloud, NetworkApi, VirtualNetwork,
    };
    use umbra_core::{EventReporter, RecordingReporter};

    fn exposed_service(name: &str) -> Service {
        let mut annotations = BTreeMap::new();
        annotations.insert(INTERNAL_LB_ANNOTATION.to_string(), "true".to_string());
        annotations.insert(
            DEFAULT_SELECTION_ANNOTATION.to_string(),
            "true".to_string(),
        );
        Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                annotations: Some(annotations),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                type_: Some("LoadBalancer".to_string()),
                ..Default::default()
            }),
            status: Some(ServiceStatus {
                load_balancer: Some(LoadBalancerStatus {
                    ingress: Some(vec![LoadBalancerIngress {
                        ip: Some("10.0.0.5".to_string()),
                        ..Default::default()
                    }]),
                }),
                ..Default::default()
            }),
        }
    }

    fn settings() -> CloudSettings {
        CloudSettings {
            lb_resource_group: "cluster-rg".to_string(),
            load_balancer_name: "kube-lb".to_string(),
            vnet_resource_group: "net-rg".to_string(),
            vnet_name: "vnet1".to_string(),
            nat_subnet_name: "apl-subnet".to_string(),
            nat_subnet_prefix: Some("10.1.0.0/24".to_string()),
            poll_interval: Duration::from_millis(10),
            operation_timeout: Duration::from_secs(30),
        }
    }

    async fn seeded_mock() -> Arc<MockCloud> {
        let mock = Arc::new(MockCloud::new());
        mock.insert_vnet(
            "net-rg",
            VirtualNetwork {
                id: "/subscriptions/sub0/resourceGroups/net-rg/providers/Microsoft.Network/virtualNetworks/vnet1".to_string(),
                name: "vnet1".to_string(),
                location: "eastus2".to_string(),
            },
        )
        .await;
        mock.insert_frontends(
            "cluster-rg",
            "kube-lb",
            vec![FrontendIpConfiguration {
                id: "/subscriptions/sub0/resourceGroups/cluster-rg/providers/Microsoft.Network/loadBalancers/kube-lb/frontendIPConfigurations/fe1".to_string(),
                name: "fe1".to_string(),
                private_ip_address: Some("10.0.0.5".to_string()),
            }],
        )
        .await;
        mock
    }

    struct Fixture {
        reconciler: ServiceReconciler,
        mock: Arc<MockCloud>,
        cluster: Arc<MockCluster>,
        cache: Arc<IntentCache>,
    }

    async fn fixture() -> Fixture {
        let mock = seeded_mock().await;
        let reporter = Arc::new(RecordingReporter::new());
        let cloud = Arc::new(
            CloudContext::connect(
                mock.clone() as Arc<dyn NetworkApi>,
                settings(),
                reporter as Arc<dyn EventReporter>,
            )
            .await
            .unwrap(),
        );
        let cluster = Arc::new(MockCluster::new());
        let cache = Arc::new(IntentCache::new());
        let reconciler = ServiceReconciler::new(
            cloud,
            cluster.clone() as Arc<dyn ClusterClient>,
            cache.clone(),
            DEFAULT_SELECTION_ANNOTATION,
        );
        Fixture {
            reconciler,
            mock,
            cluster,
            cache,
        }
    }

    async fn seed(fixture: &Fixture, service: Service) {
        fixture.cluster.insert_service(service.clone()).await.unwrap();
        fixture
            .cache
            .apply(&WatchEvent::added(IntentObject::Service(service)))
            .await
            .unwrap();
    }

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new("default".to_string(), name.to_string())
    }

    #[tokio::test]
    async fn selection_requires_every_condition() {
        let fixture = fixture().await;
        assert!(fixture.reconciler.should_process(&exposed_service("web")));

        let mut not_lb = exposed_service("web");
        not_lb.spec.as_mut().unwrap().type_ = Some("ClusterIP".to_string());
        assert!(!fixture.reconciler.should_process(&not_lb));

        let mut external = exposed_service("web");
        external
            .metadata
            .annotations
            .as_mut()
            .unwrap()
            .remove(INTERNAL_LB_ANNOTATION);
        assert!(!fixture.reconciler.should_process(&external));

        let mut shouting = exposed_service("web");
        shouting
            .metadata
            .annotations
            .as_mut()
            .unwrap()
            .insert(DEFAULT_SELECTION_ANNOTATION.to_string(), "True".to_string());
        assert!(
            !fixture.reconciler.should_process(&shouting),
            "annotation values are matched exactly"
        );

        let mut opted_out = exposed_service("web");
        opted_out
            .metadata
            .annotations
            .as_mut()
            .unwrap()
            .remove(DEFAULT_SELECTION_ANNOTATION);
        assert!(!fixture.reconciler.should_process(&opted_out));

        let mut no_ingress = exposed_service("web");
        no_ingress.status = None;
        assert!(!fixture.reconciler.should_process(&no_ingress));
    }

    #[tokio::test]
    async fn wants_follows_the_processable_transition() {
        let fixture = fixture().await;
        let reconciler = &fixture.reconciler;

        assert!(reconciler.wants(&WatchEvent::added(IntentObject::Service(
            exposed_service("web")
        ))));
        assert!(!reconciler.wants(&WatchEvent::added(IntentObject::Service(
            Service::default()
        ))));
        assert!(!reconciler.wants(&WatchEvent::added(IntentObject::Connection(
            umbra_core::ServiceConnection::default()
        ))));

        // Losing the annotation must still trigger a sync for cleanup.
        let mut opted_out = exposed_service("web");
        opted_out
            .metadata
            .annotations
            .as_mut()
            .unwrap()
            .remove(DEFAULT_SELECTION_ANNOTATION);
        let mut event = WatchEvent::updated(IntentObject::Service(opted_out.clone()));
        event.previous = Some(IntentObject::Service(exposed_service("web")));
        assert!(reconciler.wants(&event));

        let mut boring = WatchEvent::updated(IntentObject::Service(opted_out.clone()));
        boring.previous = Some(IntentObject::Service(opted_out.clone()));
        assert!(!reconciler.wants(&boring));

        let mut deleted = WatchEvent::deleted(IntentObject::Service(opted_out));
        deleted.previous = Some(IntentObject::Service(exposed_service("web")));
        assert!(reconciler.wants(&deleted));
    }

    #[tokio::test]
    async fn sync_builds_the_link_service_and_guards_the_object() {
        let fixture = fixture().await;
        seed(&fixture, exposed_service("web")).await;

        fixture.reconciler.sync(&key("web")).await.unwrap();

        let link = fixture.mock.link_service("cluster-rg", "web").await.unwrap();
        assert!(link.nat_subnet_id.contains("apl-subnet"));
        assert_eq!(link.frontend_ip_configuration_ids.len(), 1);
        assert!(has_guard(
            &fixture.cluster.service(&key("web")).await.unwrap().metadata
        ));

        // A second pass settles without touching the cloud again.
        let before = fixture.mock.mutation_counts().await;
        fixture.reconciler.sync(&key("web")).await.unwrap();
        assert_eq!(fixture.mock.mutation_counts().await, before);
    }

    #[tokio::test]
    async fn missing_service_tears_down_by_name() {
        let fixture = fixture().await;
        seed(&fixture, exposed_service("web")).await;
        fixture.reconciler.sync(&key("web")).await.unwrap();
        assert!(fixture.mock.link_service("cluster-rg", "web").await.is_some());

        // Drop it from the cache as a hard delete would.
        fixture
            .cache
            .apply(&WatchEvent::deleted(IntentObject::Service(
                exposed_service("web"),
            )))
            .await
            .unwrap();
        let updates_before = fixture.cluster.update_calls().await;

        fixture.reconciler.sync(&key("web")).await.unwrap();
        assert!(fixture.mock.link_service("cluster-rg", "web").await.is_none());
        assert_eq!(
            fixture.cluster.update_calls().await,
            updates_before,
            "nothing left to unguard"
        );
    }

    #[tokio::test]
    async fn deleting_service_is_cleaned_up_and_unguarded() {
        let fixture = fixture().await;
        seed(&fixture, exposed_service("web")).await;
        fixture.reconciler.sync(&key("web")).await.unwrap();

        let mut deleting = fixture.cluster.service(&key("web")).await.unwrap();
        deleting.metadata.deletion_timestamp =
            Some(Time(k8s_openapi::chrono::Utc::now()));
        fixture.cluster.insert_service(deleting.clone()).await.unwrap();
        fixture
            .cache
            .apply(&WatchEvent::updated(IntentObject::Service(deleting)))
            .await
            .unwrap();

        fixture.reconciler.sync(&key("web")).await.unwrap();
        assert!(fixture.mock.link_service("cluster-rg", "web").await.is_none());
        assert!(!has_guard(
            &fixture.cluster.service(&key("web")).await.unwrap().metadata
        ));
    }

    #[tokio::test]
    async fn guard_survives_a_failed_teardown() {
        let fixture = fixture().await;
        seed(&fixture, exposed_service("web")).await;
        fixture.reconciler.sync(&key("web")).await.unwrap();

        let mut deleting = fixture.cluster.service(&key("web")).await.unwrap();
        deleting.metadata.deletion_timestamp =
            Some(Time(k8s_openapi::chrono::Utc::now()));
        fixture.cluster.insert_service(deleting.clone()).await.unwrap();
        fixture
            .cache
            .apply(&WatchEvent::updated(IntentObject::Service(deleting)))
            .await
            .unwrap();

        fixture.mock.fail_next_operation("quota exhausted").await;
        assert!(fixture.reconciler.sync(&key("web")).await.is_err());
        assert!(
            has_guard(&fixture.cluster.service(&key("web")).await.unwrap().metadata),
            "the guard only comes off after the cloud side is gone"
        );
    }
}
