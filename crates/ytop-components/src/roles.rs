//! Role descriptors: what distinguishes one role from another.
//!
//! Dependency edges are data here so the orchestrator can order evaluation
//! and tests can build arbitrary graphs.

use std::sync::Arc;

use ytop_common::consts::{HTTP_PROXY_HTTP_PORT, RPC_PROXY_RPC_PORT, UI_HTTP_PORT};
use ytop_common::crd::{InstanceSpec, ServiceType, Ytsaurus};
use ytop_common::{ComponentKind, Labeller};
use ytop_config::{ConfigGenerator, ConfigRole};

use crate::component::{Component, ComponentId, ServerComponent, SyncStatus};
use crate::platform::PlatformClient;

/// Which status a pending update is reported with
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateScope {
    /// Every component is restarted together
    Cluster,
    /// Only this component is restarted
    Local,
}

impl UpdateScope {
    /// Status reported while the update waits to be started
    pub fn status(self) -> SyncStatus {
        match self {
            Self::Cluster => SyncStatus::NeedUpdate,
            Self::Local => SyncStatus::NeedLocalUpdate,
        }
    }
}

/// Balancing service of a role that can expose one
#[derive(Clone, Debug, PartialEq)]
pub struct BalancerDescriptor {
    /// Service name
    pub name: String,
    /// Kubernetes service type; `None` means the service must not exist
    pub service_type: Option<ServiceType>,
    /// Named ports
    pub ports: Vec<(String, u16)>,
}

/// Everything the generic engine needs to run one role
#[derive(Clone, Debug)]
pub struct RoleDescriptor {
    /// Component identity
    pub id: ComponentId,
    /// Names and labels of the owned objects
    pub labeller: Labeller,
    /// Desired replica count
    pub instance_count: i32,
    /// Container image
    pub image: String,
    /// Role passed to the config generator
    pub config_role: ConfigRole,
    /// Balancing service, for roles that can expose one
    pub balancer: Option<BalancerDescriptor>,
    /// Components that must be Ready first
    pub dependencies: Vec<ComponentId>,
    /// How a pending update is reported
    pub update_scope: UpdateScope,
}

struct DescriptorBuilder<'a> {
    ytsaurus: &'a Ytsaurus,
    master: ComponentId,
}

impl<'a> DescriptorBuilder<'a> {
    fn role(
        &self,
        kind: ComponentKind,
        instance: Option<&str>,
        spec: &InstanceSpec,
        config_role: ConfigRole,
    ) -> RoleDescriptor {
        let id = match instance {
            Some(name) => ComponentId::with_instance(kind, name),
            None => ComponentId::new(kind),
        };
        let dependencies = match kind {
            ComponentKind::Master | ComponentKind::Discovery => vec![],
            _ => vec![self.master.clone()],
        };
        let update_scope = match kind {
            ComponentKind::HttpProxy
            | ComponentKind::RpcProxy
            | ComponentKind::TcpProxy
            | ComponentKind::Ui => UpdateScope::Local,
            _ => UpdateScope::Cluster,
        };
        RoleDescriptor {
            labeller: Labeller::new(self.ytsaurus, kind, instance),
            id,
            instance_count: spec.instance_count,
            image: spec
                .image
                .clone()
                .unwrap_or_else(|| self.ytsaurus.spec.core_image.clone()),
            config_role,
            balancer: None,
            dependencies,
            update_scope,
        }
    }
}

fn with_balancer(
    mut descriptor: RoleDescriptor,
    service_type: Option<ServiceType>,
    ports: Vec<(String, u16)>,
) -> RoleDescriptor {
    descriptor.balancer = Some(BalancerDescriptor {
        name: descriptor.labeller.balancer_service_name(),
        service_type,
        ports,
    });
    descriptor
}

/// Descriptors for every role present in the cluster spec
pub fn descriptors(ytsaurus: &Ytsaurus) -> Vec<RoleDescriptor> {
    let spec = &ytsaurus.spec;
    let b = DescriptorBuilder {
        ytsaurus,
        master: ComponentId::new(ComponentKind::Master),
    };
    let mut out = vec![
        b.role(
            ComponentKind::Master,
            None,
            &spec.primary_masters.instance,
            ConfigRole::Master,
        ),
        b.role(
            ComponentKind::Discovery,
            None,
            &spec.discovery,
            ConfigRole::Discovery,
        ),
    ];

    if let Some(s) = &spec.schedulers {
        out.push(b.role(ComponentKind::Scheduler, None, s, ConfigRole::Scheduler));
    }
    if let Some(s) = &spec.controller_agents {
        out.push(b.role(
            ComponentKind::ControllerAgent,
            None,
            s,
            ConfigRole::ControllerAgent,
        ));
    }

    for p in &spec.http_proxies {
        let d = b.role(
            ComponentKind::HttpProxy,
            Some(p.role.as_str()),
            &p.instance,
            ConfigRole::HttpProxy(p.clone()),
        );
        // HTTP proxies are the cluster's entry point and always get a balancer
        out.push(with_balancer(
            d,
            Some(p.service_type.unwrap_or_default()),
            vec![("http".to_string(), HTTP_PROXY_HTTP_PORT)],
        ));
    }
    for p in &spec.rpc_proxies {
        let d = b.role(
            ComponentKind::RpcProxy,
            Some(p.role.as_str()),
            &p.instance,
            ConfigRole::RpcProxy(p.clone()),
        );
        out.push(with_balancer(
            d,
            p.service_type,
            vec![("rpc".to_string(), RPC_PROXY_RPC_PORT)],
        ));
    }
    for p in &spec.tcp_proxies {
        let d = b.role(
            ComponentKind::TcpProxy,
            Some(p.role.as_str()),
            &p.instance,
            ConfigRole::TcpProxy(p.clone()),
        );
        let ports = (0..p.port_count)
            .filter_map(|i| p.min_port.checked_add(i))
            .map(|port| (format!("tcp-{}", port), port))
            .collect();
        out.push(with_balancer(d, p.service_type, ports));
    }

    for n in &spec.data_nodes {
        out.push(b.role(
            ComponentKind::DataNode,
            Some(n.name.as_str()),
            &n.instance,
            ConfigRole::DataNode(n.clone()),
        ));
    }
    for n in &spec.exec_nodes {
        out.push(b.role(
            ComponentKind::ExecNode,
            Some(n.name.as_str()),
            &n.instance,
            ConfigRole::ExecNode(n.clone()),
        ));
    }
    let mut tablet_pools = Vec::new();
    for n in &spec.tablet_nodes {
        let d = b.role(
            ComponentKind::TabletNode,
            Some(n.name.as_str()),
            &n.instance,
            ConfigRole::TabletNode(n.clone()),
        );
        tablet_pools.push(d.id.clone());
        out.push(d);
    }

    if let Some(s) = &spec.query_trackers {
        let mut d = b.role(ComponentKind::QueryTracker, None, s, ConfigRole::QueryTracker);
        d.dependencies.extend(tablet_pools);
        out.push(d);
    }
    if let Some(s) = &spec.yql_agents {
        out.push(b.role(ComponentKind::YqlAgent, None, s, ConfigRole::YqlAgent));
    }
    if let Some(ui) = &spec.ui {
        let instance = InstanceSpec {
            instance_count: ui.instance_count,
            image: Some(ui.image.clone()),
        };
        let d = b.role(ComponentKind::Ui, None, &instance, ConfigRole::Ui);
        out.push(with_balancer(
            d,
            ui.service_type,
            vec![("http".to_string(), UI_HTTP_PORT)],
        ));
    }

    out
}

/// Build one component per role, ready to be handed to the orchestrator
pub fn build_components(
    ytsaurus: &Ytsaurus,
    generator: Arc<dyn ConfigGenerator>,
    platform: Arc<dyn PlatformClient>,
) -> Vec<Box<dyn Component>> {
    descriptors(ytsaurus)
        .into_iter()
        .map(|d| {
            Box::new(ServerComponent::new(d, generator.clone(), platform.clone()))
                as Box<dyn Component>
        })
        .collect()
}
