//! Custom Resource Definitions for the ytop operator

mod types;
mod ytsaurus;

pub use types::{
    ClusterState, Condition, ConditionStatus, ServiceType, UpdateState, UpdateStatus,
};
pub use ytsaurus::{
    InstanceSpec, MastersSpec, NodesSpec, ProxiesSpec, TcpProxiesSpec, UiSpec, Ytsaurus,
    YtsaurusSpec, YtsaurusStatus,
};
