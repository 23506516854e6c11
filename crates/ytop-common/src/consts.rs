//! Well-known ports, label keys and defaults shared by every crate.

/// Role name used when a proxy tier or node pool does not name itself
pub const DEFAULT_ROLE: &str = "default";

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "ytop-operator";

/// Kubernetes cluster domain used when none is configured
pub const DEFAULT_CLUSTER_DOMAIN: &str = "cluster.local";

/// Mount path of the generated server config inside every pod
pub const CONFIG_MOUNT_PATH: &str = "/config";

/// Key of the payload inside each role's ConfigMap
pub const CONFIG_MAP_KEY_PREFIX: &str = "ytserver";

// Label keys

/// Standard `app.kubernetes.io/name` label
pub const LABEL_NAME: &str = "app.kubernetes.io/name";
/// Standard `app.kubernetes.io/instance` label (the Ytsaurus object name)
pub const LABEL_INSTANCE: &str = "app.kubernetes.io/instance";
/// Standard `app.kubernetes.io/component` label
pub const LABEL_COMPONENT: &str = "app.kubernetes.io/component";
/// Standard `app.kubernetes.io/managed-by` label
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
/// Value of the `app.kubernetes.io/name` label
pub const LABEL_NAME_VALUE: &str = "ytsaurus";
/// Value of the `app.kubernetes.io/managed-by` label
pub const LABEL_MANAGED_BY_VALUE: &str = "ytop-operator";

// Monitoring ports

/// Primary master monitoring port
pub const MASTER_MONITORING_PORT: u16 = 10010;
/// Scheduler monitoring port
pub const SCHEDULER_MONITORING_PORT: u16 = 10011;
/// Data node monitoring port
pub const DATA_NODE_MONITORING_PORT: u16 = 10012;
/// RPC proxy monitoring port
pub const RPC_PROXY_MONITORING_PORT: u16 = 10013;
/// Controller agent monitoring port
pub const CONTROLLER_AGENT_MONITORING_PORT: u16 = 10014;
/// HTTP proxy monitoring port
pub const HTTP_PROXY_MONITORING_PORT: u16 = 10016;
/// TCP proxy monitoring port
pub const TCP_PROXY_MONITORING_PORT: u16 = 10017;
/// YQL agent monitoring port
pub const YQL_AGENT_MONITORING_PORT: u16 = 10019;
/// Discovery monitoring port
pub const DISCOVERY_MONITORING_PORT: u16 = 10020;
/// Tablet node monitoring port
pub const TABLET_NODE_MONITORING_PORT: u16 = 10022;
/// Query tracker monitoring port
pub const QUERY_TRACKER_MONITORING_PORT: u16 = 10028;
/// Exec node monitoring port
pub const EXEC_NODE_MONITORING_PORT: u16 = 10029;

// RPC ports

/// Primary master RPC port
pub const MASTER_RPC_PORT: u16 = 9010;
/// Scheduler RPC port
pub const SCHEDULER_RPC_PORT: u16 = 9011;
/// Data node RPC port
pub const DATA_NODE_RPC_PORT: u16 = 9012;
/// RPC proxy port
pub const RPC_PROXY_RPC_PORT: u16 = 9013;
/// Controller agent RPC port
pub const CONTROLLER_AGENT_RPC_PORT: u16 = 9014;
/// TCP proxy RPC port
pub const TCP_PROXY_RPC_PORT: u16 = 9017;
/// YQL agent RPC port
pub const YQL_AGENT_RPC_PORT: u16 = 9019;
/// Discovery RPC port
pub const DISCOVERY_RPC_PORT: u16 = 9020;
/// Tablet node RPC port
pub const TABLET_NODE_RPC_PORT: u16 = 9022;
/// Query tracker RPC port
pub const QUERY_TRACKER_RPC_PORT: u16 = 9028;
/// Exec node RPC port
pub const EXEC_NODE_RPC_PORT: u16 = 9029;
/// HTTP proxy listening port
pub const HTTP_PROXY_HTTP_PORT: u16 = 80;
/// Web UI listening port
pub const UI_HTTP_PORT: u16 = 80;
