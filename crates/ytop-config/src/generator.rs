//! The `ConfigGenerator` capability and its default implementation.

use std::collections::BTreeMap;

use kube::ResourceExt;
use serde::Serialize;
use tracing::trace;

use ytop_common::consts::{DEFAULT_ROLE, HTTP_PROXY_HTTP_PORT};
use ytop_common::crd::{NodesSpec, ProxiesSpec, TcpProxiesSpec, Ytsaurus, YtsaurusSpec};
use ytop_common::{ComponentKind, Error, Labeller, Result};

use crate::model::*;

/// Retry budget of the in-server address resolver
const ADDRESS_RESOLVER_RETRIES: u32 = 1000;

/// Replication factor ceiling for chunks written by the master
const MAX_REPLICATION_FACTOR: i32 = 3;

/// Driver API version served by HTTP proxies
const DRIVER_API_VERSION: u32 = 4;

/// A role whose config payload can be generated.
///
/// Families with several instances carry the instance's own spec.
#[derive(Clone, Debug, PartialEq)]
pub enum ConfigRole {
    /// Primary masters
    Master,
    /// Discovery servers
    Discovery,
    /// Scheduler
    Scheduler,
    /// Controller agents
    ControllerAgent,
    /// One HTTP proxy tier
    HttpProxy(ProxiesSpec),
    /// One RPC proxy tier
    RpcProxy(ProxiesSpec),
    /// One TCP proxy tier
    TcpProxy(TcpProxiesSpec),
    /// One data node pool
    DataNode(NodesSpec),
    /// One exec node pool
    ExecNode(NodesSpec),
    /// One tablet node pool
    TabletNode(NodesSpec),
    /// Query trackers
    QueryTracker,
    /// YQL agents
    YqlAgent,
    /// Web UI
    Ui,
}

impl ConfigRole {
    /// Role family
    pub fn kind(&self) -> ComponentKind {
        match self {
            Self::Master => ComponentKind::Master,
            Self::Discovery => ComponentKind::Discovery,
            Self::Scheduler => ComponentKind::Scheduler,
            Self::ControllerAgent => ComponentKind::ControllerAgent,
            Self::HttpProxy(_) => ComponentKind::HttpProxy,
            Self::RpcProxy(_) => ComponentKind::RpcProxy,
            Self::TcpProxy(_) => ComponentKind::TcpProxy,
            Self::DataNode(_) => ComponentKind::DataNode,
            Self::ExecNode(_) => ComponentKind::ExecNode,
            Self::TabletNode(_) => ComponentKind::TabletNode,
            Self::QueryTracker => ComponentKind::QueryTracker,
            Self::YqlAgent => ComponentKind::YqlAgent,
            Self::Ui => ComponentKind::Ui,
        }
    }

    /// Proxy role or node pool name, if the family has several instances
    pub fn instance(&self) -> Option<&str> {
        match self {
            Self::HttpProxy(p) | Self::RpcProxy(p) => Some(p.role.as_str()),
            Self::TcpProxy(p) => Some(p.role.as_str()),
            Self::DataNode(n) | Self::ExecNode(n) | Self::TabletNode(n) => Some(n.name.as_str()),
            _ => None,
        }
    }
}

/// Produces the config payload each server process is started with.
///
/// Implementations are deterministic and side-effect free.
pub trait ConfigGenerator: Send + Sync {
    /// Render the payload for a role; an absent role yields an empty payload
    fn generate(&self, role: &ConfigRole) -> Result<Vec<u8>>;

    /// Whether a server running with `current` must be restarted
    fn needs_reload(&self, role: &ConfigRole, current: &[u8]) -> Result<bool> {
        Ok(self.generate(role)?.as_slice() != current)
    }
}

/// Default generator rendering JSON configs from a `Ytsaurus` object
#[derive(Clone, Debug)]
pub struct Generator {
    ytsaurus: Ytsaurus,
    cluster_domain: String,
}

impl Generator {
    /// Generator for one cluster, addressing pods under `cluster_domain`
    pub fn new(ytsaurus: &Ytsaurus, cluster_domain: impl Into<String>) -> Self {
        Self {
            ytsaurus: ytsaurus.clone(),
            cluster_domain: cluster_domain.into(),
        }
    }

    fn spec(&self) -> &YtsaurusSpec {
        &self.ytsaurus.spec
    }

    fn cluster_name(&self) -> String {
        self.ytsaurus.name_any()
    }

    fn namespace(&self) -> String {
        self.ytsaurus
            .namespace()
            .unwrap_or_else(|| "default".to_string())
    }

    /// `<pod>.<headless>.<namespace>.svc.<domain>:<port>` for every replica
    fn pod_addresses(&self, kind: ComponentKind, count: i32, port: u16) -> Vec<String> {
        let labeller = Labeller::new(&self.ytsaurus, kind, None);
        let sts = labeller.stateful_set_name();
        let svc = labeller.headless_service_name();
        let ns = self.namespace();
        (0..count.max(0))
            .map(|i| {
                format!(
                    "{}-{}.{}.{}.svc.{}:{}",
                    sts, i, svc, ns, self.cluster_domain, port
                )
            })
            .collect()
    }

    fn master_addresses(&self) -> Vec<String> {
        self.pod_addresses(
            ComponentKind::Master,
            self.spec().primary_masters.instance.instance_count,
            ytop_common::consts::MASTER_RPC_PORT,
        )
    }

    fn discovery_addresses(&self) -> Vec<String> {
        self.pod_addresses(
            ComponentKind::Discovery,
            self.spec().discovery.instance_count,
            ytop_common::consts::DISCOVERY_RPC_PORT,
        )
    }

    /// Address of the default HTTP proxy balancer
    fn http_proxy_address(&self) -> String {
        let labeller = Labeller::new(&self.ytsaurus, ComponentKind::HttpProxy, Some(DEFAULT_ROLE));
        format!(
            "{}.{}.svc.{}",
            labeller.balancer_service_name(),
            self.namespace(),
            self.cluster_domain
        )
    }

    fn primary_master(&self) -> Result<MasterCell> {
        let addresses = self.master_addresses();
        if addresses.is_empty() {
            return Err(Error::config(
                ComponentKind::Master.base_name(),
                "primary master cell has no instances",
            ));
        }
        Ok(MasterCell {
            peers: addresses
                .iter()
                .map(|address| HydraPeer {
                    address: address.clone(),
                    voting: true,
                })
                .collect(),
            addresses,
            cell_id: cell_id(self.spec().primary_masters.cell_tag),
        })
    }

    fn common(&self, kind: ComponentKind) -> Result<CommonServer> {
        let use_ipv6 = self.spec().use_ipv6;
        Ok(CommonServer {
            rpc_port: kind.rpc_port(),
            monitoring_port: kind.monitoring_port(),
            address_resolver: AddressResolver {
                enable_ipv4: !use_ipv6,
                enable_ipv6: use_ipv6,
                retries: ADDRESS_RESOLVER_RETRIES,
            },
            cluster_connection: ClusterConnection {
                cluster_name: self.cluster_name(),
                primary_master: self.primary_master()?,
                discovery_connection: Addresses {
                    addresses: self.discovery_addresses(),
                },
            },
            timestamp_providers: Addresses {
                addresses: self.master_addresses(),
            },
        })
    }

    fn cypress_manager(&self) -> CypressManager {
        let data_nodes: i32 = self
            .spec()
            .data_nodes
            .iter()
            .map(|pool| pool.instance.instance_count.max(0))
            .sum();
        let replication = data_nodes.clamp(1, MAX_REPLICATION_FACTOR);
        let write_quorum = replication / 2 + 1;
        CypressManager {
            default_table_replication_factor: replication,
            default_file_replication_factor: replication,
            default_journal_replication_factor: replication,
            default_journal_read_quorum: replication - write_quorum + 1,
            default_journal_write_quorum: write_quorum,
        }
    }

    fn node(&self, kind: ComponentKind, pool: &NodesSpec) -> Result<NodeServer> {
        let (flavor, exec_agent) = match kind {
            ComponentKind::DataNode => ("data", None),
            ComponentKind::TabletNode => ("tablet", None),
            _ => (
                "exec",
                Some(ExecAgent {
                    slot_manager: SlotManager {
                        enable_tmpfs: self.spec().enable_tmpfs,
                    },
                }),
            ),
        };
        Ok(NodeServer {
            common: self.common(kind)?,
            flavors: vec![flavor],
            tags: vec![pool.name.clone()],
            exec_agent,
        })
    }

    fn ui(&self) -> WebUi {
        let name = self.cluster_name();
        WebUi {
            clusters: vec![UiCluster {
                id: name.clone(),
                name,
                proxy: self.http_proxy_address(),
                secure: false,
                authentication: "none",
                primary_master: UiPrimaryMaster {
                    cell_tag: self.spec().primary_masters.cell_tag,
                },
            }],
        }
    }
}

impl ConfigGenerator for Generator {
    fn generate(&self, role: &ConfigRole) -> Result<Vec<u8>> {
        let kind = role.kind();
        trace!(role = %kind, instance = ?role.instance(), "generating config");
        let spec = self.spec();

        match role {
            ConfigRole::Master => render(&MasterServer {
                common: self.common(kind)?,
                primary_master: self.primary_master()?,
                cypress_manager: self.cypress_manager(),
            }),
            ConfigRole::Discovery => render(&DiscoveryServer {
                common: self.common(kind)?,
                discovery_server: Addresses {
                    addresses: self.discovery_addresses(),
                },
            }),
            ConfigRole::Scheduler if spec.schedulers.is_none() => Ok(Vec::new()),
            ConfigRole::Scheduler => render(&SchedulerServer {
                common: self.common(kind)?,
                scheduler: SchedulerSection {
                    operations_cleaner: OperationsCleaner {
                        enable_operation_archivation: !spec.tablet_nodes.is_empty(),
                    },
                },
            }),
            ConfigRole::ControllerAgent if spec.controller_agents.is_none() => Ok(Vec::new()),
            ConfigRole::ControllerAgent => render(&ControllerAgentServer {
                common: self.common(kind)?,
                controller_agent: ControllerAgentSection {
                    enable_tmpfs: spec.enable_tmpfs,
                    use_columnar_statistics_default: true,
                },
            }),
            ConfigRole::HttpProxy(proxy) => render(&HttpProxyServer {
                common: self.common(kind)?,
                port: HTTP_PROXY_HTTP_PORT,
                role: proxy.role.clone(),
                driver: Driver {
                    primary_master: self.primary_master()?,
                    timestamp_providers: Addresses {
                        addresses: self.master_addresses(),
                    },
                    api_version: DRIVER_API_VERSION,
                },
            }),
            ConfigRole::RpcProxy(proxy) => render(&RpcProxyServer {
                common: self.common(kind)?,
                role: proxy.role.clone(),
            }),
            ConfigRole::TcpProxy(proxy) => {
                let end = u32::from(proxy.min_port) + u32::from(proxy.port_count);
                if end > u32::from(u16::MAX) + 1 {
                    return Err(Error::config(
                        kind.base_name(),
                        format!(
                            "port range {}+{} exceeds 65535",
                            proxy.min_port, proxy.port_count
                        ),
                    ));
                }
                render(&TcpProxyServer {
                    common: self.common(kind)?,
                    role: proxy.role.clone(),
                    tcp_proxy: TcpProxySection {
                        min_port: proxy.min_port,
                        port_count: proxy.port_count,
                    },
                })
            }
            ConfigRole::DataNode(pool)
            | ConfigRole::ExecNode(pool)
            | ConfigRole::TabletNode(pool) => render(&self.node(kind, pool)?),
            ConfigRole::QueryTracker if spec.query_trackers.is_none() => Ok(Vec::new()),
            ConfigRole::QueryTracker => render(&QueryTrackerServer {
                common: self.common(kind)?,
                user: "query_tracker",
            }),
            ConfigRole::YqlAgent if spec.yql_agents.is_none() => Ok(Vec::new()),
            ConfigRole::YqlAgent => {
                let name = self.cluster_name();
                render(&YqlAgentServer {
                    common: self.common(kind)?,
                    yql_agent: YqlAgentSection {
                        additional_clusters: BTreeMap::from([(
                            name.clone(),
                            self.http_proxy_address(),
                        )]),
                        default_cluster: name,
                    },
                })
            }
            ConfigRole::Ui if spec.ui.is_none() => Ok(Vec::new()),
            ConfigRole::Ui => render(&self.ui()),
        }
    }
}

fn render<T: Serialize>(config: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(config)?)
}

/// Cell id of the primary master cell, derived from its tag
fn cell_id(cell_tag: u16) -> String {
    format!("65726e65-ad6b7562-{:04x}0259-79747361", cell_tag)
}
