//! Ytsaurus Custom Resource Definition
//!
//! The Ytsaurus CRD is the desired-state document for one cluster: which
//! server roles exist, how many instances each runs, and a few cluster-wide
//! feature flags. Most fields flow straight into config generation; the
//! reconciliation core only reads instance counts, service types and the
//! dependency-relevant presence of optional roles.

use std::collections::HashSet;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{ClusterState, Condition, ServiceType, UpdateStatus};
use crate::consts::DEFAULT_ROLE;
use crate::Error;

/// Specification for a Ytsaurus cluster
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cluster.ytsaurus.tech",
    version = "v1",
    kind = "Ytsaurus",
    plural = "ytsaurus",
    shortname = "yt",
    status = "YtsaurusStatus",
    namespaced,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Update","type":"string","jsonPath":".status.updateStatus.state"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct YtsaurusSpec {
    /// Default image for every server role
    pub core_image: String,

    /// Resolve and listen on IPv6 instead of IPv4
    #[serde(default)]
    pub use_ipv6: bool,

    /// Give controller agents and exec nodes in-memory scratch space
    #[serde(default)]
    pub enable_tmpfs: bool,

    /// Primary master cell
    pub primary_masters: MastersSpec,

    /// Discovery servers
    pub discovery: InstanceSpec,

    /// Schedulers (not deployed when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedulers: Option<InstanceSpec>,

    /// Controller agents (not deployed when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_agents: Option<InstanceSpec>,

    /// HTTP proxy tiers, one per role
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http_proxies: Vec<ProxiesSpec>,

    /// RPC proxy tiers, one per role
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rpc_proxies: Vec<ProxiesSpec>,

    /// TCP proxy tiers, one per role
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tcp_proxies: Vec<TcpProxiesSpec>,

    /// Data node pools
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_nodes: Vec<NodesSpec>,

    /// Exec node pools
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exec_nodes: Vec<NodesSpec>,

    /// Tablet node pools
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tablet_nodes: Vec<NodesSpec>,

    /// Query trackers (not deployed when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_trackers: Option<InstanceSpec>,

    /// YQL agents (not deployed when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yql_agents: Option<InstanceSpec>,

    /// Web UI (not deployed when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui: Option<UiSpec>,
}

/// Replica count and image override shared by every role
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSpec {
    /// Number of server processes
    pub instance_count: i32,

    /// Image override; `coreImage` is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl InstanceSpec {
    /// Instance spec with the given count and the core image
    pub fn with_count(instance_count: i32) -> Self {
        Self {
            instance_count,
            image: None,
        }
    }
}

/// Primary master cell
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MastersSpec {
    /// Master instances
    #[serde(flatten)]
    pub instance: InstanceSpec,

    /// Cell tag of the primary master cell
    pub cell_tag: u16,
}

/// An HTTP or RPC proxy tier
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProxiesSpec {
    /// Proxy role; the default role carries no name suffix
    #[serde(default = "default_role")]
    pub role: String,

    /// Proxy instances
    #[serde(flatten)]
    pub instance: InstanceSpec,

    /// Type of the balancing service in front of the tier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<ServiceType>,
}

/// A TCP proxy tier
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TcpProxiesSpec {
    /// Proxy role; the default role carries no name suffix
    #[serde(default = "default_role")]
    pub role: String,

    /// Proxy instances
    #[serde(flatten)]
    pub instance: InstanceSpec,

    /// Type of the balancing service; no service is created when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<ServiceType>,

    /// First port of the proxied range
    #[serde(default = "default_min_port")]
    pub min_port: u16,

    /// Number of proxied ports
    #[serde(default = "default_port_count")]
    pub port_count: u16,
}

/// A data, exec or tablet node pool
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodesSpec {
    /// Pool name; the default pool carries no name suffix
    #[serde(default = "default_role")]
    pub name: String,

    /// Node instances
    #[serde(flatten)]
    pub instance: InstanceSpec,
}

/// Web UI
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UiSpec {
    /// UI image
    pub image: String,

    /// Number of UI instances
    pub instance_count: i32,

    /// Type of the balancing service; no service is created when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<ServiceType>,
}

fn default_role() -> String {
    DEFAULT_ROLE.to_string()
}

fn default_min_port() -> u16 {
    32000
}

fn default_port_count() -> u16 {
    20
}

impl YtsaurusSpec {
    /// Validate the cluster specification
    pub fn validate(&self, cluster: &str) -> Result<(), Error> {
        if self.core_image.trim().is_empty() {
            return Err(Error::validation_for_field(
                cluster,
                "spec.coreImage",
                "core image cannot be empty",
            ));
        }

        let masters = self.primary_masters.instance.instance_count;
        if masters < 1 {
            return Err(Error::validation_for_field(
                cluster,
                "spec.primaryMasters.instanceCount",
                "at least one master is required",
            ));
        }
        if masters % 2 == 0 {
            return Err(Error::validation_for_field(
                cluster,
                "spec.primaryMasters.instanceCount",
                format!("master count must be odd for quorum, got {}", masters),
            ));
        }

        let counts = [
            ("spec.discovery", Some(&self.discovery)),
            ("spec.schedulers", self.schedulers.as_ref()),
            ("spec.controllerAgents", self.controller_agents.as_ref()),
            ("spec.queryTrackers", self.query_trackers.as_ref()),
            ("spec.yqlAgents", self.yql_agents.as_ref()),
        ];
        for (field, spec) in counts {
            if let Some(spec) = spec {
                check_count(cluster, field, spec.instance_count)?;
            }
        }
        if let Some(ui) = &self.ui {
            check_count(cluster, "spec.ui", ui.instance_count)?;
        }

        check_names(
            cluster,
            "spec.httpProxies",
            self.http_proxies.iter().map(|p| (&p.role, &p.instance)),
        )?;
        check_names(
            cluster,
            "spec.rpcProxies",
            self.rpc_proxies.iter().map(|p| (&p.role, &p.instance)),
        )?;
        check_names(
            cluster,
            "spec.tcpProxies",
            self.tcp_proxies.iter().map(|p| (&p.role, &p.instance)),
        )?;
        check_names(
            cluster,
            "spec.dataNodes",
            self.data_nodes.iter().map(|p| (&p.name, &p.instance)),
        )?;
        check_names(
            cluster,
            "spec.execNodes",
            self.exec_nodes.iter().map(|p| (&p.name, &p.instance)),
        )?;
        check_names(
            cluster,
            "spec.tabletNodes",
            self.tablet_nodes.iter().map(|p| (&p.name, &p.instance)),
        )?;

        Ok(())
    }
}

fn check_count(cluster: &str, field: &str, count: i32) -> Result<(), Error> {
    if count < 0 {
        return Err(Error::validation_for_field(
            cluster,
            format!("{}.instanceCount", field),
            format!("instance count cannot be negative, got {}", count),
        ));
    }
    Ok(())
}

fn check_names<'a>(
    cluster: &str,
    field: &str,
    entries: impl Iterator<Item = (&'a String, &'a InstanceSpec)>,
) -> Result<(), Error> {
    let mut seen = HashSet::new();
    for (name, instance) in entries {
        if let Err(msg) = validate_dns_label(name) {
            return Err(Error::validation_for_field(cluster, field, msg));
        }
        if !seen.insert(name.as_str()) {
            return Err(Error::validation_for_field(
                cluster,
                field,
                format!("duplicate name '{}'", name),
            ));
        }
        check_count(cluster, field, instance.instance_count)?;
    }
    Ok(())
}

/// Validate a DNS-label style identifier (lowercase alphanumeric with hyphens)
fn validate_dns_label(s: &str) -> Result<(), String> {
    if s.is_empty() {
        return Err("name cannot be empty".to_string());
    }
    if s.len() > 40 {
        return Err(format!("name '{}' is longer than 40 characters", s));
    }
    if !s.starts_with(|c: char| c.is_ascii_lowercase()) {
        return Err(format!("name '{}' must start with a lowercase letter", s));
    }
    if s.ends_with('-') {
        return Err(format!("name '{}' cannot end with a hyphen", s));
    }
    if !s
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(format!(
            "name '{}' may only contain lowercase letters, digits and hyphens",
            s
        ));
    }
    Ok(())
}

/// Status for a Ytsaurus cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct YtsaurusStatus {
    /// The generation of the spec that was last processed by the controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Current cluster state
    #[serde(default)]
    pub state: ClusterState,

    /// Update progress, meaningful while `state` is `Updating`
    #[serde(default)]
    pub update_status: UpdateStatus,

    /// Human-readable message about current state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Cluster `Ready` condition plus one condition per component
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl YtsaurusStatus {
    /// Create a new status in the given state
    pub fn with_state(state: ClusterState) -> Self {
        Self {
            state,
            ..Default::default()
        }
    }

    /// Add or replace a condition, keeping the old timestamp when nothing changed
    pub fn set_condition(&mut self, condition: Condition) {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.type_ == condition.type_)
        {
            Some(existing) if existing.same_as(&condition) => {}
            Some(existing) => *existing = condition,
            None => self.conditions.push(condition),
        }
    }

    /// Look up a condition by type
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }
}
