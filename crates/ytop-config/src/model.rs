//! Serialised shapes of the server configs.
//!
//! Field names are the keys the servers read, hence snake_case throughout.

use std::collections::BTreeMap;

use serde::Serialize;

#[derive(Clone, Debug, Serialize, PartialEq)]
pub(crate) struct AddressResolver {
    pub enable_ipv4: bool,
    pub enable_ipv6: bool,
    pub retries: u32,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub(crate) struct HydraPeer {
    pub address: String,
    pub voting: bool,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub(crate) struct MasterCell {
    pub addresses: Vec<String>,
    pub peers: Vec<HydraPeer>,
    pub cell_id: String,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub(crate) struct Addresses {
    pub addresses: Vec<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub(crate) struct ClusterConnection {
    pub cluster_name: String,
    pub primary_master: MasterCell,
    pub discovery_connection: Addresses,
}

/// Sections every server config starts with
#[derive(Clone, Debug, Serialize, PartialEq)]
pub(crate) struct CommonServer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpc_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitoring_port: Option<u16>,
    pub address_resolver: AddressResolver,
    pub cluster_connection: ClusterConnection,
    pub timestamp_providers: Addresses,
}

#[derive(Debug, Serialize)]
pub(crate) struct CypressManager {
    pub default_table_replication_factor: i32,
    pub default_file_replication_factor: i32,
    pub default_journal_replication_factor: i32,
    pub default_journal_read_quorum: i32,
    pub default_journal_write_quorum: i32,
}

#[derive(Debug, Serialize)]
pub(crate) struct MasterServer {
    #[serde(flatten)]
    pub common: CommonServer,
    pub primary_master: MasterCell,
    pub cypress_manager: CypressManager,
}

#[derive(Debug, Serialize)]
pub(crate) struct DiscoveryServer {
    #[serde(flatten)]
    pub common: CommonServer,
    pub discovery_server: Addresses,
}

#[derive(Debug, Serialize)]
pub(crate) struct OperationsCleaner {
    pub enable_operation_archivation: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct SchedulerSection {
    pub operations_cleaner: OperationsCleaner,
}

#[derive(Debug, Serialize)]
pub(crate) struct SchedulerServer {
    #[serde(flatten)]
    pub common: CommonServer,
    pub scheduler: SchedulerSection,
}

#[derive(Debug, Serialize)]
pub(crate) struct ControllerAgentSection {
    pub enable_tmpfs: bool,
    pub use_columnar_statistics_default: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct ControllerAgentServer {
    #[serde(flatten)]
    pub common: CommonServer,
    pub controller_agent: ControllerAgentSection,
}

#[derive(Debug, Serialize)]
pub(crate) struct Driver {
    pub primary_master: MasterCell,
    pub timestamp_providers: Addresses,
    pub api_version: u32,
}

#[derive(Debug, Serialize)]
pub(crate) struct HttpProxyServer {
    #[serde(flatten)]
    pub common: CommonServer,
    pub port: u16,
    pub role: String,
    pub driver: Driver,
}

#[derive(Debug, Serialize)]
pub(crate) struct RpcProxyServer {
    #[serde(flatten)]
    pub common: CommonServer,
    pub role: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct TcpProxySection {
    pub min_port: u16,
    pub port_count: u16,
}

#[derive(Debug, Serialize)]
pub(crate) struct TcpProxyServer {
    #[serde(flatten)]
    pub common: CommonServer,
    pub role: String,
    pub tcp_proxy: TcpProxySection,
}

#[derive(Debug, Serialize)]
pub(crate) struct SlotManager {
    pub enable_tmpfs: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct ExecAgent {
    pub slot_manager: SlotManager,
}

#[derive(Debug, Serialize)]
pub(crate) struct NodeServer {
    #[serde(flatten)]
    pub common: CommonServer,
    pub flavors: Vec<&'static str>,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exec_agent: Option<ExecAgent>,
}

#[derive(Debug, Serialize)]
pub(crate) struct QueryTrackerServer {
    #[serde(flatten)]
    pub common: CommonServer,
    pub user: &'static str,
}

#[derive(Debug, Serialize)]
pub(crate) struct YqlAgentSection {
    pub default_cluster: String,
    pub additional_clusters: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct YqlAgentServer {
    #[serde(flatten)]
    pub common: CommonServer,
    pub yql_agent: YqlAgentSection,
}

#[derive(Debug, Serialize)]
pub(crate) struct UiPrimaryMaster {
    #[serde(rename = "cellTag")]
    pub cell_tag: u16,
}

/// The UI reads camelCase JSON, unlike the servers
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UiCluster {
    pub id: String,
    pub name: String,
    pub proxy: String,
    pub secure: bool,
    pub authentication: &'static str,
    pub primary_master: UiPrimaryMaster,
}

#[derive(Debug, Serialize)]
pub(crate) struct WebUi {
    pub clusters: Vec<UiCluster>,
}
