//! Component naming and labelling
//!
//! Every owned Kubernetes object is named after a short per-role prefix and
//! carries the same four `app.kubernetes.io` labels, so one selector finds
//! all pods of a component.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};

use crate::consts::*;
use crate::crd::Ytsaurus;

/// Server role family
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ComponentKind {
    /// Primary master cell
    Master,
    /// Discovery servers
    Discovery,
    /// Scheduler
    Scheduler,
    /// Controller agent
    ControllerAgent,
    /// HTTP proxy tier
    HttpProxy,
    /// RPC proxy tier
    RpcProxy,
    /// TCP proxy tier
    TcpProxy,
    /// Data node pool
    DataNode,
    /// Exec node pool
    ExecNode,
    /// Tablet node pool
    TabletNode,
    /// Query tracker
    QueryTracker,
    /// YQL agent
    YqlAgent,
    /// Web UI
    Ui,
}

impl ComponentKind {
    /// Component name without the instance suffix
    pub fn base_name(&self) -> &'static str {
        match self {
            Self::Master => "Master",
            Self::Discovery => "Discovery",
            Self::Scheduler => "Scheduler",
            Self::ControllerAgent => "ControllerAgent",
            Self::HttpProxy => "HttpProxy",
            Self::RpcProxy => "RpcProxy",
            Self::TcpProxy => "TCPProxy",
            Self::DataNode => "DataNode",
            Self::ExecNode => "ExecNode",
            Self::TabletNode => "TabletNode",
            Self::QueryTracker => "QueryTracker",
            Self::YqlAgent => "YqlAgent",
            Self::Ui => "UI",
        }
    }

    /// `app.kubernetes.io/component` value without the instance suffix
    pub fn base_label(&self) -> &'static str {
        match self {
            Self::Master => "yt-master",
            Self::Discovery => "yt-discovery",
            Self::Scheduler => "yt-scheduler",
            Self::ControllerAgent => "yt-controller-agent",
            Self::HttpProxy => "yt-http-proxy",
            Self::RpcProxy => "yt-rpc-proxy",
            Self::TcpProxy => "yt-tcp-proxy",
            Self::DataNode => "yt-data-node",
            Self::ExecNode => "yt-exec-node",
            Self::TabletNode => "yt-tablet-node",
            Self::QueryTracker => "yt-query-tracker",
            Self::YqlAgent => "yt-yql-agent",
            Self::Ui => "yt-ui",
        }
    }

    /// Stateful set name prefix
    pub fn short_name(&self) -> &'static str {
        match self {
            Self::Master => "ms",
            Self::Discovery => "ds",
            Self::Scheduler => "sch",
            Self::ControllerAgent => "ca",
            Self::HttpProxy => "hp",
            Self::RpcProxy => "rp",
            Self::TcpProxy => "tp",
            Self::DataNode => "dnd",
            Self::ExecNode => "end",
            Self::TabletNode => "tnd",
            Self::QueryTracker => "qt",
            Self::YqlAgent => "yqla",
            Self::Ui => "ui",
        }
    }

    /// Headless service name prefix
    pub fn service_name(&self) -> &'static str {
        match self {
            Self::Master => "masters",
            Self::Discovery => "discovery",
            Self::Scheduler => "schedulers",
            Self::ControllerAgent => "controller-agents",
            Self::HttpProxy => "http-proxies",
            Self::RpcProxy => "rpc-proxies",
            Self::TcpProxy => "tcp-proxies",
            Self::DataNode => "data-nodes",
            Self::ExecNode => "exec-nodes",
            Self::TabletNode => "tablet-nodes",
            Self::QueryTracker => "query-trackers",
            Self::YqlAgent => "yql-agents",
            Self::Ui => "ui",
        }
    }

    /// Command line of the server process
    pub fn command(&self) -> Vec<String> {
        let binary = match self {
            Self::Master => "/usr/bin/ytserver-master",
            Self::Discovery => "/usr/bin/ytserver-discovery",
            Self::Scheduler => "/usr/bin/ytserver-scheduler",
            Self::ControllerAgent => "/usr/bin/ytserver-controller-agent",
            Self::HttpProxy => "/usr/bin/ytserver-http-proxy",
            Self::RpcProxy => "/usr/bin/ytserver-proxy",
            Self::TcpProxy => "/usr/bin/ytserver-tcp-proxy",
            Self::DataNode | Self::ExecNode | Self::TabletNode => "/usr/bin/ytserver-node",
            Self::QueryTracker => "/usr/bin/ytserver-query-tracker",
            Self::YqlAgent => "/usr/bin/ytserver-yql-agent",
            Self::Ui => {
                return vec![
                    "node".to_string(),
                    "dist/server/index.js".to_string(),
                    format!("{}/{}", CONFIG_MOUNT_PATH, self.config_file()),
                ]
            }
        };
        vec![
            binary.to_string(),
            "--config".to_string(),
            format!("{}/{}", CONFIG_MOUNT_PATH, self.config_file()),
        ]
    }

    /// File name of the config payload inside the config map
    pub fn config_file(&self) -> &'static str {
        match self {
            Self::Master => "ytserver-master.json",
            Self::Discovery => "ytserver-discovery.json",
            Self::Scheduler => "ytserver-scheduler.json",
            Self::ControllerAgent => "ytserver-controller-agent.json",
            Self::HttpProxy => "ytserver-http-proxy.json",
            Self::RpcProxy => "ytserver-rpc-proxy.json",
            Self::TcpProxy => "ytserver-tcp-proxy.json",
            Self::DataNode => "ytserver-data-node.json",
            Self::ExecNode => "ytserver-exec-node.json",
            Self::TabletNode => "ytserver-tablet-node.json",
            Self::QueryTracker => "ytserver-query-tracker.json",
            Self::YqlAgent => "ytserver-yql-agent.json",
            Self::Ui => "clusters-config.json",
        }
    }

    /// Monitoring port, if the role exposes one
    pub fn monitoring_port(&self) -> Option<u16> {
        match self {
            Self::Master => Some(MASTER_MONITORING_PORT),
            Self::Discovery => Some(DISCOVERY_MONITORING_PORT),
            Self::Scheduler => Some(SCHEDULER_MONITORING_PORT),
            Self::ControllerAgent => Some(CONTROLLER_AGENT_MONITORING_PORT),
            Self::HttpProxy => Some(HTTP_PROXY_MONITORING_PORT),
            Self::RpcProxy => Some(RPC_PROXY_MONITORING_PORT),
            Self::TcpProxy => Some(TCP_PROXY_MONITORING_PORT),
            Self::DataNode => Some(DATA_NODE_MONITORING_PORT),
            Self::ExecNode => Some(EXEC_NODE_MONITORING_PORT),
            Self::TabletNode => Some(TABLET_NODE_MONITORING_PORT),
            Self::QueryTracker => Some(QUERY_TRACKER_MONITORING_PORT),
            Self::YqlAgent => Some(YQL_AGENT_MONITORING_PORT),
            Self::Ui => None,
        }
    }

    /// Internal RPC port, if the role serves one
    pub fn rpc_port(&self) -> Option<u16> {
        match self {
            Self::Master => Some(MASTER_RPC_PORT),
            Self::Discovery => Some(DISCOVERY_RPC_PORT),
            Self::Scheduler => Some(SCHEDULER_RPC_PORT),
            Self::ControllerAgent => Some(CONTROLLER_AGENT_RPC_PORT),
            Self::RpcProxy => Some(RPC_PROXY_RPC_PORT),
            Self::TcpProxy => Some(TCP_PROXY_RPC_PORT),
            Self::DataNode => Some(DATA_NODE_RPC_PORT),
            Self::ExecNode => Some(EXEC_NODE_RPC_PORT),
            Self::TabletNode => Some(TABLET_NODE_RPC_PORT),
            Self::QueryTracker => Some(QUERY_TRACKER_RPC_PORT),
            Self::YqlAgent => Some(YQL_AGENT_RPC_PORT),
            Self::HttpProxy | Self::Ui => None,
        }
    }

    /// Plain HTTP port, for the HTTP proxy and the UI
    pub fn http_port(&self) -> Option<u16> {
        match self {
            Self::HttpProxy => Some(HTTP_PROXY_HTTP_PORT),
            Self::Ui => Some(UI_HTTP_PORT),
            _ => None,
        }
    }

    /// Named container ports, monitoring first
    pub fn ports(&self) -> Vec<(&'static str, u16)> {
        let mut ports = Vec::new();
        if let Some(p) = self.monitoring_port() {
            ports.push(("monitoring", p));
        }
        if let Some(p) = self.rpc_port() {
            ports.push(("rpc", p));
        }
        if let Some(p) = self.http_port() {
            ports.push(("http", p));
        }
        ports
    }
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.base_name())
    }
}

/// Append `-<name>` unless `name` is the default role
pub fn format_with_default(base: &str, name: &str) -> String {
    if name == DEFAULT_ROLE {
        base.to_string()
    } else {
        format!("{}-{}", base, name)
    }
}

/// Names and labels for the objects of one component of one cluster
#[derive(Clone, Debug, PartialEq)]
pub struct Labeller {
    cluster_name: String,
    namespace: String,
    owner: Option<OwnerReference>,
    kind: ComponentKind,
    instance: String,
}

impl Labeller {
    /// Labeller for a component; `instance` is the proxy role or node pool name
    pub fn new(ytsaurus: &Ytsaurus, kind: ComponentKind, instance: Option<&str>) -> Self {
        Self {
            cluster_name: ytsaurus.name_any(),
            namespace: ytsaurus.namespace().unwrap_or_else(|| "default".to_string()),
            owner: ytsaurus.controller_owner_ref(&()),
            kind,
            instance: instance.unwrap_or(DEFAULT_ROLE).to_string(),
        }
    }

    /// Role family
    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    /// Name of the owning Ytsaurus object
    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    /// Namespace of every owned object
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Component name, e.g. `TCPProxy-edge`
    pub fn component_name(&self) -> String {
        format_with_default(self.kind.base_name(), &self.instance)
    }

    /// Component label, e.g. `yt-tcp-proxy-edge`
    pub fn component_label(&self) -> String {
        format_with_default(self.kind.base_label(), &self.instance)
    }

    /// Stateful set name, e.g. `tp-edge`
    pub fn stateful_set_name(&self) -> String {
        format_with_default(self.kind.short_name(), &self.instance)
    }

    /// Headless service name, e.g. `tcp-proxies-edge`
    pub fn headless_service_name(&self) -> String {
        format_with_default(self.kind.service_name(), &self.instance)
    }

    /// Externally reachable balancer service name, e.g. `tcp-proxies-lb-edge`
    pub fn balancer_service_name(&self) -> String {
        format_with_default(&format!("{}-lb", self.kind.service_name()), &self.instance)
    }

    /// Config map name, e.g. `yt-tcp-proxy-edge-config`
    pub fn config_map_name(&self) -> String {
        format!("{}-config", self.component_label())
    }

    /// Labels that select the component's pods
    pub fn selector_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LABEL_INSTANCE.to_string(), self.cluster_name.clone()),
            (LABEL_COMPONENT.to_string(), self.component_label()),
        ])
    }

    /// Full label set for owned objects
    pub fn labels(&self) -> BTreeMap<String, String> {
        let mut labels = self.selector_labels();
        labels.insert(LABEL_NAME.to_string(), LABEL_NAME_VALUE.to_string());
        labels.insert(
            LABEL_MANAGED_BY.to_string(),
            LABEL_MANAGED_BY_VALUE.to_string(),
        );
        labels
    }

    /// Label selector string for pod listing
    pub fn selector(&self) -> String {
        self.selector_labels()
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Metadata for an owned object with the given name
    pub fn object_meta(&self, name: impl Into<String>) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.into()),
            namespace: Some(self.namespace.clone()),
            labels: Some(self.labels()),
            owner_references: self.owner.clone().map(|o| vec![o]),
            ..Default::default()
        }
    }
}
