//! One homogeneous fleet of server processes.
//!
//! A server owns three objects: the config map holding its generated
//! config, the headless service giving pods stable DNS names, and the
//! stateful set running the pods. Every predicate here is pure over the
//! state loaded by [`Server::fetch`].

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, Pod, PodSpec, PodTemplateSpec,
    Service, ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use tracing::{debug, info};

use ytop_common::consts::CONFIG_MOUNT_PATH;
use ytop_common::{Error, Labeller, Result};
use ytop_config::{ConfigGenerator, ConfigRole};

use crate::platform::PlatformClient;

const CONTAINER_NAME: &str = "ytserver";
const CONFIG_VOLUME: &str = "config";

/// State of the server's objects as last fetched
#[derive(Clone, Debug, Default)]
struct Observed {
    stateful_set: Option<StatefulSet>,
    headless_service: Option<Service>,
    config_map: Option<ConfigMap>,
    pods: Vec<Pod>,
}

/// Desired and observed state of one role's server fleet
pub struct Server {
    labeller: Labeller,
    replicas: i32,
    image: String,
    config_role: ConfigRole,
    generator: Arc<dyn ConfigGenerator>,
    platform: Arc<dyn PlatformClient>,
    observed: Observed,
}

impl Server {
    /// Server for a fleet of `replicas` pods running `image`
    pub fn new(
        labeller: Labeller,
        replicas: i32,
        image: impl Into<String>,
        config_role: ConfigRole,
        generator: Arc<dyn ConfigGenerator>,
        platform: Arc<dyn PlatformClient>,
    ) -> Self {
        Self {
            labeller,
            replicas,
            image: image.into(),
            config_role,
            generator,
            platform,
            observed: Observed::default(),
        }
    }

    /// Load the stateful set, headless service, config map and pods
    pub async fn fetch(&mut self) -> Result<()> {
        let ns = self.labeller.namespace().to_string();
        self.observed = Observed {
            stateful_set: self
                .platform
                .get_stateful_set(&ns, &self.labeller.stateful_set_name())
                .await?,
            headless_service: self
                .platform
                .get_service(&ns, &self.labeller.headless_service_name())
                .await?,
            config_map: self
                .platform
                .get_config_map(&ns, &self.labeller.config_map_name())
                .await?,
            pods: self
                .platform
                .list_pods(&ns, &self.labeller.selector())
                .await?,
        };
        debug!(
            component = %self.labeller.component_name(),
            pods = self.observed.pods.len(),
            "fetched server state"
        );
        Ok(())
    }

    fn config_key(&self) -> &'static str {
        self.labeller.kind().config_file()
    }

    fn observed_config(&self) -> Option<&str> {
        self.observed
            .config_map
            .as_ref()?
            .data
            .as_ref()?
            .get(self.config_key())
            .map(String::as_str)
    }

    fn observed_replicas(&self) -> Option<i32> {
        self.observed
            .stateful_set
            .as_ref()?
            .spec
            .as_ref()
            .map(|spec| spec.replicas.unwrap_or(1))
    }

    fn observed_image(&self) -> Option<&str> {
        self.observed
            .stateful_set
            .as_ref()?
            .spec
            .as_ref()?
            .template
            .spec
            .as_ref()?
            .containers
            .first()?
            .image
            .as_deref()
    }

    fn config_needs_reload(&self) -> Result<bool> {
        match self.observed_config() {
            Some(current) => self
                .generator
                .needs_reload(&self.config_role, current.as_bytes()),
            None => Ok(true),
        }
    }

    fn stateful_set_differs(&self) -> bool {
        self.observed_image() != Some(self.image.as_str())
            || self.observed_replicas() != Some(self.replicas)
    }

    fn resources_exist(&self) -> bool {
        self.observed.stateful_set.is_some()
            && self.observed.headless_service.is_some()
            && self.observed.config_map.is_some()
    }

    /// Deployed servers run an outdated config, image or replica count
    pub fn need_update(&self) -> Result<bool> {
        if !self.resources_exist() {
            return Ok(false);
        }
        Ok(self.config_needs_reload()? || self.stateful_set_differs())
    }

    /// Some owned object is absent or differs from desired
    pub fn need_sync(&self) -> Result<bool> {
        Ok(!self.resources_exist() || self.config_needs_reload()? || self.stateful_set_differs())
    }

    /// Every owned object matches desired
    pub fn is_in_sync(&self) -> Result<bool> {
        Ok(!self.need_sync()?)
    }

    /// All desired pods are running and ready
    pub fn are_pods_ready(&self) -> bool {
        let pods = &self.observed.pods;
        pods.len() == self.replicas.max(0) as usize && pods.iter().all(is_pod_ready)
    }

    /// No pods are left and none will be started
    pub fn are_pods_removed(&self) -> bool {
        self.observed.pods.is_empty() && self.is_scaled_down()
    }

    /// The stateful set is absent or already asks for zero replicas
    pub fn is_scaled_down(&self) -> bool {
        self.observed_replicas().map_or(true, |r| r == 0)
    }

    fn build_config_map(&self) -> Result<ConfigMap> {
        let payload = self.generator.generate(&self.config_role)?;
        let payload = String::from_utf8(payload).map_err(|e| {
            Error::serialization_for_kind("ConfigMap", format!("config is not UTF-8: {}", e))
        })?;
        Ok(ConfigMap {
            metadata: self.labeller.object_meta(self.labeller.config_map_name()),
            data: Some(BTreeMap::from([(self.config_key().to_string(), payload)])),
            ..Default::default()
        })
    }

    fn build_headless_service(&self) -> Service {
        let ports = self
            .labeller
            .kind()
            .ports()
            .into_iter()
            .map(|(name, port)| ServicePort {
                name: Some(name.to_string()),
                port: i32::from(port),
                ..Default::default()
            })
            .collect();
        Service {
            metadata: self
                .labeller
                .object_meta(self.labeller.headless_service_name()),
            spec: Some(ServiceSpec {
                cluster_ip: Some("None".to_string()),
                publish_not_ready_addresses: Some(true),
                selector: Some(self.labeller.selector_labels()),
                ports: Some(ports),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn build_stateful_set(&self) -> StatefulSet {
        let kind = self.labeller.kind();
        let ports = kind
            .ports()
            .into_iter()
            .map(|(name, port)| ContainerPort {
                name: Some(name.to_string()),
                container_port: i32::from(port),
                ..Default::default()
            })
            .collect();

        StatefulSet {
            metadata: self.labeller.object_meta(self.labeller.stateful_set_name()),
            spec: Some(StatefulSetSpec {
                replicas: Some(self.replicas),
                service_name: self.labeller.headless_service_name(),
                pod_management_policy: Some("Parallel".to_string()),
                selector: LabelSelector {
                    match_labels: Some(self.labeller.selector_labels()),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(self.labeller.labels()),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: CONTAINER_NAME.to_string(),
                            image: Some(self.image.clone()),
                            command: Some(kind.command()),
                            ports: Some(ports),
                            volume_mounts: Some(vec![VolumeMount {
                                name: CONFIG_VOLUME.to_string(),
                                mount_path: CONFIG_MOUNT_PATH.to_string(),
                                read_only: Some(true),
                                ..Default::default()
                            }]),
                            ..Default::default()
                        }],
                        volumes: Some(vec![Volume {
                            name: CONFIG_VOLUME.to_string(),
                            config_map: Some(ConfigMapVolumeSource {
                                name: self.labeller.config_map_name(),
                                ..Default::default()
                            }),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Apply the first owned object that is absent or outdated.
    ///
    /// Objects go in dependency order: config map, headless service,
    /// stateful set. A no-op when everything is in sync.
    pub async fn sync(&self) -> Result<()> {
        let component = self.labeller.component_name();

        if self.observed.config_map.is_none() || self.config_needs_reload()? {
            info!(component = %component, "applying config map");
            return self
                .platform
                .apply_config_map(&self.build_config_map()?)
                .await;
        }
        if self.observed.headless_service.is_none() {
            info!(component = %component, "applying headless service");
            return self
                .platform
                .apply_service(&self.build_headless_service())
                .await;
        }
        if self.observed.stateful_set.is_none() || self.stateful_set_differs() {
            info!(
                component = %component,
                replicas = self.replicas,
                image = %self.image,
                "applying stateful set"
            );
            return self
                .platform
                .apply_stateful_set(&self.build_stateful_set())
                .await;
        }
        Ok(())
    }

    /// Scale the fleet to zero, the first half of a two-phase update
    pub async fn remove_pods(&self) -> Result<()> {
        info!(component = %self.labeller.component_name(), "removing pods");
        self.platform
            .scale_stateful_set(
                self.labeller.namespace(),
                &self.labeller.stateful_set_name(),
                0,
            )
            .await
    }
}

fn is_pod_ready(pod: &Pod) -> bool {
    let Some(status) = pod.status.as_ref() else {
        return false;
    };
    status.phase.as_deref() == Some("Running")
        && status
            .conditions
            .as_ref()
            .is_some_and(|c| c.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ytsaurus, FakePlatform};
    use ytop_common::ComponentKind;
    use ytop_config::Generator;

    fn server(platform: Arc<FakePlatform>, replicas: i32, image: &str) -> Server {
        let yt = ytsaurus();
        Server::new(
            Labeller::new(&yt, ComponentKind::ControllerAgent, None),
            replicas,
            image,
            ConfigRole::ControllerAgent,
            Arc::new(Generator::new(&yt, "cluster.local")),
            platform,
        )
    }

    #[tokio::test]
    async fn a_fresh_server_needs_sync_but_not_update() {
        let platform = FakePlatform::new();
        let mut s = server(platform.clone(), 1, "img:1");
        s.fetch().await.unwrap();

        assert!(s.need_sync().unwrap());
        assert!(!s.need_update().unwrap());
        assert!(!s.are_pods_ready());
        assert!(s.are_pods_removed());
    }

    #[tokio::test]
    async fn sync_applies_one_object_per_call_in_order() {
        let platform = FakePlatform::new();
        let mut s = server(platform.clone(), 1, "img:1");

        for _ in 0..3 {
            s.fetch().await.unwrap();
            s.sync().await.unwrap();
        }
        assert_eq!(
            platform.mutations(),
            vec![
                "apply cm/yt-controller-agent-config",
                "apply svc/controller-agents",
                "apply sts/ca",
            ]
        );

        s.fetch().await.unwrap();
        assert!(s.is_in_sync().unwrap());
        s.sync().await.unwrap();
        assert_eq!(platform.mutation_count(), 3);
    }

    #[tokio::test]
    async fn pods_become_ready_once_the_fleet_settles() {
        let platform = FakePlatform::new();
        let mut s = server(platform.clone(), 2, "img:1");
        for _ in 0..3 {
            s.fetch().await.unwrap();
            s.sync().await.unwrap();
        }
        s.fetch().await.unwrap();
        assert!(!s.are_pods_ready());

        platform.settle();
        s.fetch().await.unwrap();
        assert!(s.are_pods_ready());

        platform.break_pod("yt", "ca-1");
        s.fetch().await.unwrap();
        assert!(!s.are_pods_ready());
    }

    #[tokio::test]
    async fn image_change_is_an_update_for_a_deployed_server() {
        let platform = FakePlatform::new();
        let mut s = server(platform.clone(), 1, "img:1");
        for _ in 0..3 {
            s.fetch().await.unwrap();
            s.sync().await.unwrap();
        }

        let mut upgraded = server(platform.clone(), 1, "img:2");
        upgraded.fetch().await.unwrap();
        assert!(upgraded.need_update().unwrap());
        assert!(upgraded.need_sync().unwrap());
    }

    #[tokio::test]
    async fn remove_pods_scales_to_zero() {
        let platform = FakePlatform::new();
        let mut s = server(platform.clone(), 2, "img:1");
        for _ in 0..3 {
            s.fetch().await.unwrap();
            s.sync().await.unwrap();
        }
        platform.settle();
        s.fetch().await.unwrap();
        assert!(!s.is_scaled_down());

        s.remove_pods().await.unwrap();
        s.fetch().await.unwrap();
        assert!(s.is_scaled_down());
        assert!(!s.are_pods_removed(), "pods linger until the fleet settles");

        platform.settle();
        s.fetch().await.unwrap();
        assert!(s.are_pods_removed());
    }

    #[test]
    fn pods_without_a_ready_condition_are_not_ready() {
        let pod = Pod {
            status: Some(k8s_openapi::api::core::v1::PodStatus {
                phase: Some("Running".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(!is_pod_ready(&pod));
        assert!(!is_pod_ready(&Pod::default()));
    }
}
