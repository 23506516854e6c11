//! In-memory platform and fixtures for multi-tick tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, PodCondition, PodStatus, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use ytop_common::crd::{
    InstanceSpec, MastersSpec, NodesSpec, ProxiesSpec, TcpProxiesSpec, Ytsaurus, YtsaurusSpec,
};
use ytop_common::{Error, Result};

use crate::platform::PlatformClient;

type Key = (String, String);

#[derive(Default)]
struct State {
    stateful_sets: BTreeMap<Key, StatefulSet>,
    services: BTreeMap<Key, Service>,
    config_maps: BTreeMap<Key, ConfigMap>,
    pods: BTreeMap<Key, Pod>,
    mutations: Vec<String>,
    fail_writes: bool,
}

/// Platform that keeps objects in memory.
///
/// Pods never change on their own; [`FakePlatform::settle`] plays the role
/// of the stateful set controller and kubelet.
#[derive(Default)]
pub(crate) struct FakePlatform {
    state: Mutex<State>,
}

fn key(meta: &ObjectMeta) -> Key {
    (
        meta.namespace.clone().unwrap_or_default(),
        meta.name.clone().unwrap_or_default(),
    )
}

fn matches_selector(pod: &Pod, selector: &str) -> bool {
    let labels = pod.labels();
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k).map(String::as_str) == Some(v),
            None => false,
        })
}

fn ready_pod(namespace: &str, name: String, labels: BTreeMap<String, String>) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        status: Some(PodStatus {
            phase: Some("Running".to_string()),
            conditions: Some(vec![PodCondition {
                type_: "Ready".to_string(),
                status: "True".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

impl FakePlatform {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every mutating call in order, as `verb kind/name`
    pub(crate) fn mutations(&self) -> Vec<String> {
        self.state.lock().unwrap().mutations.clone()
    }

    pub(crate) fn mutation_count(&self) -> usize {
        self.state.lock().unwrap().mutations.len()
    }

    pub(crate) fn fail_writes(&self, fail: bool) {
        self.state.lock().unwrap().fail_writes = fail;
    }

    pub(crate) fn stateful_set(&self, namespace: &str, name: &str) -> Option<StatefulSet> {
        let key = (namespace.to_string(), name.to_string());
        self.state.lock().unwrap().stateful_sets.get(&key).cloned()
    }

    pub(crate) fn service(&self, namespace: &str, name: &str) -> Option<Service> {
        let key = (namespace.to_string(), name.to_string());
        self.state.lock().unwrap().services.get(&key).cloned()
    }

    pub(crate) fn pod_count(&self) -> usize {
        self.state.lock().unwrap().pods.len()
    }

    /// Bring pods in line with every stateful set's replica count, all Ready
    pub(crate) fn settle(&self) {
        let mut state = self.state.lock().unwrap();
        let mut desired = BTreeMap::new();
        for ((namespace, name), sts) in &state.stateful_sets {
            let spec = sts.spec.clone().unwrap_or_default();
            let labels = spec.template.metadata.and_then(|m| m.labels).unwrap_or_default();
            for i in 0..spec.replicas.unwrap_or(1) {
                let pod_name = format!("{}-{}", name, i);
                desired.insert(
                    (namespace.clone(), pod_name.clone()),
                    ready_pod(namespace, pod_name, labels.clone()),
                );
            }
        }
        state.pods = desired;
    }

    /// Mark one pod as not ready
    pub(crate) fn break_pod(&self, namespace: &str, name: &str) {
        let key = (namespace.to_string(), name.to_string());
        if let Some(pod) = self.state.lock().unwrap().pods.get_mut(&key) {
            pod.status = Some(PodStatus {
                phase: Some("Pending".to_string()),
                ..Default::default()
            });
        }
    }

    fn record(&self, state: &mut State, mutation: String) -> Result<()> {
        if state.fail_writes {
            return Err(Error::platform("fake", format!("{} rejected", mutation)));
        }
        state.mutations.push(mutation);
        Ok(())
    }
}

#[async_trait]
impl PlatformClient for FakePlatform {
    async fn get_stateful_set(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>> {
        Ok(self.stateful_set(namespace, name))
    }

    async fn apply_stateful_set(&self, stateful_set: &StatefulSet) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        self.record(&mut state, format!("apply sts/{}", stateful_set.name_any()))?;
        state
            .stateful_sets
            .insert(key(&stateful_set.metadata), stateful_set.clone());
        Ok(())
    }

    async fn scale_stateful_set(&self, namespace: &str, name: &str, replicas: i32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        self.record(&mut state, format!("scale sts/{}={}", name, replicas))?;
        let key = (namespace.to_string(), name.to_string());
        match state.stateful_sets.get_mut(&key) {
            Some(sts) => {
                if let Some(spec) = sts.spec.as_mut() {
                    spec.replicas = Some(replicas);
                }
                Ok(())
            }
            None => Err(Error::platform(name, "stateful set not found")),
        }
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        Ok(self.service(namespace, name))
    }

    async fn apply_service(&self, service: &Service) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        self.record(&mut state, format!("apply svc/{}", service.name_any()))?;
        state.services.insert(key(&service.metadata), service.clone());
        Ok(())
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        self.record(&mut state, format!("delete svc/{}", name))?;
        state
            .services
            .remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        let key = (namespace.to_string(), name.to_string());
        Ok(self.state.lock().unwrap().config_maps.get(&key).cloned())
    }

    async fn apply_config_map(&self, config_map: &ConfigMap) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        self.record(&mut state, format!("apply cm/{}", config_map.name_any()))?;
        state
            .config_maps
            .insert(key(&config_map.metadata), config_map.clone());
        Ok(())
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .pods
            .iter()
            .filter(|((ns, _), pod)| ns == namespace && matches_selector(pod, selector))
            .map(|(_, pod)| pod.clone())
            .collect())
    }
}

/// A small cluster: masters, discovery, controller agents, one TCP proxy
/// tier with a balancer, and one tablet pool
pub(crate) fn ytsaurus() -> Ytsaurus {
    let mut yt = Ytsaurus::new(
        "prod",
        YtsaurusSpec {
            core_image: "ytsaurus/ytsaurus:23.2".to_string(),
            primary_masters: MastersSpec {
                instance: InstanceSpec::with_count(3),
                cell_tag: 1,
            },
            discovery: InstanceSpec::with_count(1),
            controller_agents: Some(InstanceSpec::with_count(1)),
            tcp_proxies: vec![TcpProxiesSpec {
                role: "default".to_string(),
                instance: InstanceSpec::with_count(2),
                service_type: Some(ytop_common::crd::ServiceType::LoadBalancer),
                min_port: 32000,
                port_count: 2,
            }],
            tablet_nodes: vec![NodesSpec {
                name: "default".to_string(),
                instance: InstanceSpec::with_count(3),
            }],
            ..Default::default()
        },
    );
    yt.metadata.namespace = Some("yt".to_string());
    yt.metadata.uid = Some("9d8a2c1e".to_string());
    yt
}

/// A default-role RPC proxy tier without a balancer
pub(crate) fn rpc_proxies(count: i32) -> ProxiesSpec {
    ProxiesSpec {
        role: "default".to_string(),
        instance: InstanceSpec::with_count(count),
        service_type: None,
    }
}
