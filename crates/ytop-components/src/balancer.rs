//! Externally reachable service in front of a proxy tier or the UI.

use std::sync::Arc;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use tracing::info;

use ytop_common::crd::ServiceType;
use ytop_common::{Labeller, Result};

use crate::platform::PlatformClient;

/// A load-balancing service owned by one component.
///
/// Without a service type the service is unwanted, and a leftover from an
/// earlier spec is deleted.
pub struct BalancingService {
    name: String,
    labeller: Labeller,
    service_type: Option<ServiceType>,
    ports: Vec<(String, u16)>,
    platform: Arc<dyn PlatformClient>,
    observed: Option<Service>,
}

impl BalancingService {
    /// Balancer named `name` exposing `ports` with the given service type
    pub fn new(
        name: impl Into<String>,
        labeller: Labeller,
        service_type: Option<ServiceType>,
        ports: Vec<(String, u16)>,
        platform: Arc<dyn PlatformClient>,
    ) -> Self {
        Self {
            name: name.into(),
            labeller,
            service_type,
            ports,
            platform,
            observed: None,
        }
    }

    /// Service name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Load the service
    pub async fn fetch(&mut self) -> Result<()> {
        self.observed = self
            .platform
            .get_service(self.labeller.namespace(), &self.name)
            .await?;
        Ok(())
    }

    /// The service was found by the last fetch
    pub fn exists(&self) -> bool {
        self.observed.is_some()
    }

    /// The observed service matches the declared type, selector and ports,
    /// or is absent when none is declared
    pub fn is_in_sync(&self) -> bool {
        let Some(service_type) = self.service_type else {
            return self.observed.is_none();
        };
        let Some(spec) = self.observed.as_ref().and_then(|s| s.spec.as_ref()) else {
            return false;
        };

        let observed_ports: Vec<(Option<&str>, i32)> = spec
            .ports
            .iter()
            .flatten()
            .map(|p| (p.name.as_deref(), p.port))
            .collect();
        let desired_ports: Vec<(Option<&str>, i32)> = self
            .ports
            .iter()
            .map(|(name, port)| (Some(name.as_str()), i32::from(*port)))
            .collect();

        spec.type_.as_deref() == Some(service_type.as_str())
            && spec.selector.as_ref() == Some(&self.labeller.selector_labels())
            && observed_ports == desired_ports
    }

    /// Desired service object, `None` when no service is declared
    pub fn build(&self) -> Option<Service> {
        let service_type = self.service_type?;
        Some(Service {
            metadata: self.labeller.object_meta(&self.name),
            spec: Some(ServiceSpec {
                type_: Some(service_type.as_str().to_string()),
                selector: Some(self.labeller.selector_labels()),
                ports: Some(
                    self.ports
                        .iter()
                        .map(|(name, port)| ServicePort {
                            name: Some(name.clone()),
                            port: i32::from(*port),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    /// Create or update the declared service, or delete an unwanted one
    pub async fn sync(&self) -> Result<()> {
        let component = self.labeller.component_name();
        match self.build() {
            Some(service) => {
                info!(
                    component = %component,
                    service = %self.name,
                    ports = self.ports.len(),
                    "applying balancing service"
                );
                self.platform.apply_service(&service).await
            }
            None => {
                info!(
                    component = %component,
                    service = %self.name,
                    "deleting balancing service"
                );
                self.platform
                    .delete_service(self.labeller.namespace(), &self.name)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MockPlatformClient;
    use crate::testing::ytsaurus;
    use ytop_common::ComponentKind;

    fn labeller() -> Labeller {
        Labeller::new(&ytsaurus(), ComponentKind::RpcProxy, Some("edge"))
    }

    fn balancer(
        platform: MockPlatformClient,
        service_type: Option<ServiceType>,
    ) -> BalancingService {
        let labeller = labeller();
        BalancingService::new(
            labeller.balancer_service_name(),
            labeller,
            service_type,
            vec![("rpc".to_string(), 9013)],
            Arc::new(platform),
        )
    }

    /// Platform serving `service` for every lookup
    fn serving(service: Option<Service>) -> MockPlatformClient {
        let mut platform = MockPlatformClient::new();
        platform
            .expect_get_service()
            .returning(move |_, _| Ok(service.clone()));
        platform
    }

    fn deployed(ports: Vec<(&str, i32)>) -> Service {
        Service {
            spec: Some(ServiceSpec {
                type_: Some("NodePort".to_string()),
                selector: Some(labeller().selector_labels()),
                ports: Some(
                    ports
                        .into_iter()
                        .map(|(name, port)| ServicePort {
                            name: Some(name.to_string()),
                            port,
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn missing_service_is_not_in_sync() {
        let mut platform = MockPlatformClient::new();
        platform
            .expect_get_service()
            .withf(|ns, name| ns == "yt" && name == "rpc-proxies-lb-edge")
            .returning(|_, _| Ok(None));

        let mut b = balancer(platform, Some(ServiceType::NodePort));
        b.fetch().await.unwrap();
        assert!(!b.exists());
        assert!(!b.is_in_sync());
    }

    #[tokio::test]
    async fn matching_service_is_in_sync() {
        let mut b = balancer(
            serving(Some(deployed(vec![("rpc", 9013)]))),
            Some(ServiceType::NodePort),
        );
        b.fetch().await.unwrap();
        assert!(b.is_in_sync());
    }

    #[tokio::test]
    async fn wrong_service_type_is_not_in_sync() {
        let mut service = deployed(vec![("rpc", 9013)]);
        if let Some(spec) = service.spec.as_mut() {
            spec.type_ = Some("ClusterIP".to_string());
        }
        let mut b = balancer(serving(Some(service)), Some(ServiceType::NodePort));
        b.fetch().await.unwrap();
        assert!(b.exists());
        assert!(!b.is_in_sync());
    }

    #[tokio::test]
    async fn stale_ports_are_not_in_sync() {
        for ports in [
            vec![("rpc", 9014)],
            vec![("grpc", 9013)],
            vec![("rpc", 9013), ("rpc-extra", 9015)],
            vec![],
        ] {
            let platform = serving(Some(deployed(ports.clone())));
            let mut b = balancer(platform, Some(ServiceType::NodePort));
            b.fetch().await.unwrap();
            assert!(!b.is_in_sync(), "ports {:?}", ports);
        }
    }

    #[tokio::test]
    async fn foreign_selector_is_not_in_sync() {
        let mut service = deployed(vec![("rpc", 9013)]);
        if let Some(spec) = service.spec.as_mut() {
            spec.selector = Some([("app".to_string(), "other".to_string())].into());
        }
        let mut b = balancer(serving(Some(service)), Some(ServiceType::NodePort));
        b.fetch().await.unwrap();
        assert!(!b.is_in_sync());
    }

    #[tokio::test]
    async fn undeclared_service_must_be_absent() {
        let mut b = balancer(serving(None), None);
        b.fetch().await.unwrap();
        assert!(b.is_in_sync());
        assert!(b.build().is_none());

        let mut b = balancer(serving(Some(deployed(vec![("rpc", 9013)]))), None);
        b.fetch().await.unwrap();
        assert!(!b.is_in_sync());
    }

    #[tokio::test]
    async fn sync_applies_the_declared_type_and_selector() {
        let mut platform = MockPlatformClient::new();
        platform
            .expect_apply_service()
            .withf(|svc| {
                let spec = svc.spec.as_ref().unwrap();
                spec.type_.as_deref() == Some("NodePort")
                    && spec.ports.as_ref().unwrap()[0].port == 9013
                    && spec
                        .selector
                        .as_ref()
                        .unwrap()
                        .get("app.kubernetes.io/component")
                        .map(String::as_str)
                        == Some("yt-rpc-proxy-edge")
            })
            .times(1)
            .returning(|_| Ok(()));
        platform.expect_delete_service().never();

        balancer(platform, Some(ServiceType::NodePort))
            .sync()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn sync_deletes_an_undeclared_service() {
        let mut platform = MockPlatformClient::new();
        platform
            .expect_delete_service()
            .withf(|ns, name| ns == "yt" && name == "rpc-proxies-lb-edge")
            .times(1)
            .returning(|_, _| Ok(()));
        platform.expect_apply_service().never();

        balancer(platform, None).sync().await.unwrap();
    }
}
