//! The component contract and the generic role engine.
//!
//! Every role runs the same decision chain, implemented once in
//! [`ServerComponent::decide`]. `status` reports the decision without acting
//! on it; `sync` carries out the single action the decision planned.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use ytop_common::crd::{ClusterState, UpdateState};
use ytop_common::{format_with_default, ComponentKind, Result};
use ytop_config::ConfigGenerator;

use crate::balancer::BalancingService;
use crate::platform::PlatformClient;
use crate::roles::RoleDescriptor;
use crate::server::Server;

/// Convergence of one component in the current tick.
///
/// Variants are ordered from least to most converged, so the worst status
/// of a set is its minimum.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SyncStatus {
    /// A cluster-wide update must start before this component can proceed
    NeedUpdate,
    /// An update of this component alone must start
    NeedLocalUpdate,
    /// Taking part in an update, e.g. removing pods
    Updating,
    /// Waiting on a dependency or on its own pods
    Blocked,
    /// Work was just started or is in flight
    Pending,
    /// Converged and healthy
    Ready,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NeedUpdate => write!(f, "NeedUpdate"),
            Self::NeedLocalUpdate => write!(f, "NeedLocalUpdate"),
            Self::Updating => write!(f, "Updating"),
            Self::Blocked => write!(f, "Blocked"),
            Self::Pending => write!(f, "Pending"),
            Self::Ready => write!(f, "Ready"),
        }
    }
}

/// Identity of a component: role family plus instance name for families
/// with several instances
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentId {
    /// Role family
    pub kind: ComponentKind,
    /// Proxy role or pool name; `None` for the default instance
    pub instance: Option<String>,
}

impl ComponentId {
    /// Id of a single-instance role
    pub fn new(kind: ComponentKind) -> Self {
        Self {
            kind,
            instance: None,
        }
    }

    /// Id of one instance of a multi-instance role
    pub fn with_instance(kind: ComponentKind, instance: &str) -> Self {
        let instance =
            (instance != ytop_common::consts::DEFAULT_ROLE).then(|| instance.to_string());
        Self { kind, instance }
    }

    /// Display name, e.g. `TCPProxy-edge`; used as the designation key
    pub fn name(&self) -> String {
        match &self.instance {
            Some(instance) => format_with_default(self.kind.base_name(), instance),
            None => self.kind.base_name().to_string(),
        }
    }
}

impl std::fmt::Display for ComponentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name())
    }
}

/// Frozen input of one evaluation pass.
///
/// Holds the cluster-level state read at the start of the tick and the
/// statuses of components already evaluated in this tick.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClusterView {
    /// Cluster lifecycle state
    pub cluster_state: ClusterState,
    /// Update stage
    pub update_state: UpdateState,
    /// Names of designated components; empty designates every component
    pub designated: Vec<String>,
    statuses: BTreeMap<ComponentId, SyncStatus>,
}

impl ClusterView {
    /// View with no statuses recorded yet
    pub fn new(
        cluster_state: ClusterState,
        update_state: UpdateState,
        designated: Vec<String>,
    ) -> Self {
        Self {
            cluster_state,
            update_state,
            designated,
            statuses: BTreeMap::new(),
        }
    }

    /// Status of a component evaluated earlier in this tick
    pub fn status_of(&self, id: &ComponentId) -> Option<SyncStatus> {
        self.statuses.get(id).copied()
    }

    /// Record a component's status for its dependents
    pub fn record(&mut self, id: ComponentId, status: SyncStatus) {
        self.statuses.insert(id, status);
    }

    /// Whether the component takes part in the current update
    pub fn is_designated(&self, id: &ComponentId) -> bool {
        self.designated.is_empty() || self.designated.iter().any(|name| *name == id.name())
    }

    fn is_removing_pods(&self) -> bool {
        self.cluster_state == ClusterState::Updating
            && self.update_state == UpdateState::WaitingForPodsRemoval
    }
}

/// A cluster role driven by the orchestrator.
///
/// `fetch` must run before `status`/`sync` in a tick. `status` never
/// mutates anything; `sync` performs at most one mutation.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Component: Send + Sync {
    /// Component identity
    fn id(&self) -> ComponentId;

    /// Components that must be Ready before this one proceeds
    fn dependencies(&self) -> Vec<ComponentId>;

    /// Load observed state from the platform
    async fn fetch(&mut self) -> Result<()>;

    /// Convergence status, computed without side effects
    fn status(&self, view: &ClusterView) -> Result<SyncStatus>;

    /// Advance by at most one step and return the status that step was taken for
    async fn sync(&self, view: &ClusterView) -> Result<SyncStatus>;

    /// All pods are gone and none will be started
    fn are_pods_removed(&self) -> bool;
}

/// The one mutation a decision may ask for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlannedAction {
    /// Apply the server's next outdated object
    SyncServer,
    /// Apply the balancing service
    SyncBalancer,
    /// Scale the server to zero
    RemovePods,
}

/// Outcome of the decision chain
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Decision {
    /// Resulting status
    pub status: SyncStatus,
    /// Mutation to carry out in a wet run
    pub action: Option<PlannedAction>,
}

impl Decision {
    fn idle(status: SyncStatus) -> Self {
        Self {
            status,
            action: None,
        }
    }

    fn act(status: SyncStatus, action: PlannedAction) -> Self {
        Self {
            status,
            action: Some(action),
        }
    }
}

/// Generic engine shared by every role
pub struct ServerComponent {
    descriptor: RoleDescriptor,
    server: Server,
    balancer: Option<BalancingService>,
}

impl ServerComponent {
    /// Build the component described by `descriptor`
    pub fn new(
        descriptor: RoleDescriptor,
        generator: Arc<dyn ConfigGenerator>,
        platform: Arc<dyn PlatformClient>,
    ) -> Self {
        let server = Server::new(
            descriptor.labeller.clone(),
            descriptor.instance_count,
            descriptor.image.clone(),
            descriptor.config_role.clone(),
            generator,
            platform.clone(),
        );
        let balancer = descriptor.balancer.as_ref().map(|b| {
            BalancingService::new(
                b.name.clone(),
                descriptor.labeller.clone(),
                b.service_type,
                b.ports.clone(),
                platform,
            )
        });
        Self {
            descriptor,
            server,
            balancer,
        }
    }

    /// Role descriptor this component was built from
    pub fn descriptor(&self) -> &RoleDescriptor {
        &self.descriptor
    }

    /// Evaluate the decision chain; first matching rule wins
    pub fn decide(&self, view: &ClusterView) -> Result<Decision> {
        let id = &self.descriptor.id;

        if view.cluster_state == ClusterState::Running && self.server.need_update()? {
            return Ok(Decision::idle(self.descriptor.update_scope.status()));
        }

        if view.is_removing_pods() && view.is_designated(id) {
            if self.server.is_scaled_down() {
                return Ok(Decision::idle(SyncStatus::Updating));
            }
            return Ok(Decision::act(SyncStatus::Updating, PlannedAction::RemovePods));
        }

        if let Some(dep) = self
            .descriptor
            .dependencies
            .iter()
            .find(|dep| view.status_of(dep) != Some(SyncStatus::Ready))
        {
            debug!(component = %id, dependency = %dep, "blocked on dependency");
            return Ok(Decision::idle(SyncStatus::Blocked));
        }

        if self.server.need_sync()? {
            return Ok(Decision::act(SyncStatus::Pending, PlannedAction::SyncServer));
        }

        if let Some(balancer) = &self.balancer {
            if !balancer.is_in_sync() {
                return Ok(Decision::act(SyncStatus::Pending, PlannedAction::SyncBalancer));
            }
        }

        if !self.server.are_pods_ready() {
            return Ok(Decision::idle(SyncStatus::Blocked));
        }

        Ok(Decision::idle(SyncStatus::Ready))
    }
}

#[async_trait]
impl Component for ServerComponent {
    fn id(&self) -> ComponentId {
        self.descriptor.id.clone()
    }

    fn dependencies(&self) -> Vec<ComponentId> {
        self.descriptor.dependencies.clone()
    }

    async fn fetch(&mut self) -> Result<()> {
        self.server.fetch().await?;
        if let Some(balancer) = self.balancer.as_mut() {
            balancer.fetch().await?;
        }
        Ok(())
    }

    fn status(&self, view: &ClusterView) -> Result<SyncStatus> {
        Ok(self.decide(view)?.status)
    }

    async fn sync(&self, view: &ClusterView) -> Result<SyncStatus> {
        let decision = self.decide(view)?;
        let Some(action) = decision.action else {
            return Ok(decision.status);
        };

        info!(
            component = %self.descriptor.id,
            status = %decision.status,
            action = ?action,
            "syncing component"
        );
        match action {
            PlannedAction::SyncServer => self.server.sync().await?,
            PlannedAction::RemovePods => self.server.remove_pods().await?,
            PlannedAction::SyncBalancer => {
                if let Some(balancer) = &self.balancer {
                    balancer.sync().await?;
                }
            }
        }
        Ok(decision.status)
    }

    fn are_pods_removed(&self) -> bool {
        self.server.are_pods_removed()
    }
}
