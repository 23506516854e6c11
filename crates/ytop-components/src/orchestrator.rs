//! One reconcile tick over every component of a cluster.
//!
//! A tick fetches all components first, then evaluates them in dependency
//! order against a single [`ClusterView`]. The cluster-level state machine
//! either advances [`ClusterProgress`] without touching the platform, or
//! runs a sync pass that gives every non-Ready component one step.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ytop_common::crd::{ClusterState, UpdateState, UpdateStatus, YtsaurusStatus};
use ytop_common::{Error, Result};

use crate::component::{ClusterView, Component, ComponentId, SyncStatus};
use crate::graph::ComponentGraph;

/// Requeue interval once the cluster is running and converged
pub const STEADY_REQUEUE: Duration = Duration::from_secs(60);

/// Requeue interval while work remains
pub const CONVERGING_REQUEUE: Duration = Duration::from_secs(5);

/// Cluster-level state carried between ticks in the Ytsaurus status
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClusterProgress {
    /// Lifecycle state
    pub state: ClusterState,
    /// Update stage, `None` outside of updates
    pub update_state: UpdateState,
    /// Components taking part in the update; empty means all
    pub updating_components: Vec<String>,
}

impl ClusterProgress {
    /// Read progress from a stored status; a missing status is a new cluster
    pub fn from_status(status: Option<&YtsaurusStatus>) -> Self {
        match status {
            Some(status) => Self {
                state: status.state,
                update_state: status.update_status.state,
                updating_components: status.update_status.components.clone(),
            },
            None => Self::default(),
        }
    }

    /// Write progress into a status object
    pub fn apply_to(&self, status: &mut YtsaurusStatus) {
        status.state = self.state;
        status.update_status = UpdateStatus {
            state: self.update_state,
            components: self.updating_components.clone(),
        };
    }

    fn view(&self) -> ClusterView {
        ClusterView::new(self.state, self.update_state, self.updating_components.clone())
    }

    fn with(state: ClusterState, update_state: UpdateState, components: Vec<String>) -> Self {
        Self {
            state,
            update_state,
            updating_components: components,
        }
    }

    fn running() -> Self {
        Self::with(ClusterState::Running, UpdateState::None, Vec::new())
    }
}

/// Statuses of every component, in evaluation order
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StatusReport {
    statuses: Vec<(ComponentId, SyncStatus)>,
}

impl StatusReport {
    /// Every component is Ready
    pub fn all_ready(&self) -> bool {
        self.statuses.iter().all(|(_, s)| *s == SyncStatus::Ready)
    }

    /// Least converged status, `None` for an empty cluster
    pub fn worst(&self) -> Option<SyncStatus> {
        self.statuses.iter().map(|(_, s)| *s).min()
    }

    /// Status of one component
    pub fn get(&self, id: &ComponentId) -> Option<SyncStatus> {
        self.statuses
            .iter()
            .find(|(candidate, _)| candidate == id)
            .map(|(_, s)| *s)
    }

    /// Components with their statuses, dependencies first
    pub fn iter(&self) -> impl Iterator<Item = (&ComponentId, SyncStatus)> {
        self.statuses.iter().map(|(id, s)| (id, *s))
    }

    fn first_with(&self, status: SyncStatus) -> Option<&ComponentId> {
        self.statuses
            .iter()
            .find(|(_, s)| *s == status)
            .map(|(id, _)| id)
    }
}

/// Result of one tick
#[derive(Clone, Debug, PartialEq)]
pub struct TickOutcome {
    /// Progress to persist
    pub progress: ClusterProgress,
    /// Component statuses observed at the start of the tick
    pub report: StatusReport,
    /// Progress differs from what the tick started with
    pub transitioned: bool,
}

impl TickOutcome {
    /// When the next tick should run
    pub fn requeue_after(&self) -> Duration {
        if self.progress.state == ClusterState::Running && self.report.all_ready() {
            STEADY_REQUEUE
        } else {
            CONVERGING_REQUEUE
        }
    }
}

/// Drives the components of one cluster
pub struct Orchestrator {
    components: Vec<Box<dyn Component>>,
    graph: ComponentGraph,
}

impl Orchestrator {
    /// Order `components` so every dependency precedes its dependents
    pub fn new(components: Vec<Box<dyn Component>>) -> Result<Self> {
        let graph = ComponentGraph::new(components.iter().map(|c| (c.id(), c.dependencies())))?;
        let order = graph.topological_order()?;

        let mut slots: Vec<Option<Box<dyn Component>>> = components.into_iter().map(Some).collect();
        let mut ordered = Vec::with_capacity(slots.len());
        for id in &order {
            let slot = slots
                .iter_mut()
                .find(|slot| slot.as_ref().is_some_and(|c| &c.id() == id))
                .and_then(Option::take)
                .ok_or_else(|| {
                    Error::internal_with_context(
                        "orchestrator",
                        format!("component {} lost while ordering", id),
                    )
                })?;
            ordered.push(slot);
        }

        Ok(Self {
            components: ordered,
            graph,
        })
    }

    /// Evaluation order
    pub fn order(&self) -> Vec<ComponentId> {
        self.components.iter().map(|c| c.id()).collect()
    }

    /// Dependency graph the order was derived from
    pub fn graph(&self) -> &ComponentGraph {
        &self.graph
    }

    /// Fetch and evaluate every component without mutating anything
    pub async fn probe(
        &mut self,
        progress: &ClusterProgress,
        cancel: &CancellationToken,
    ) -> Result<StatusReport> {
        self.fetch_all(cancel).await?;
        let (_, report) = self.evaluate(progress)?;
        Ok(report)
    }

    /// Run one tick: advance the cluster state machine or give each
    /// non-Ready component one step
    pub async fn tick(
        &mut self,
        progress: &ClusterProgress,
        cancel: &CancellationToken,
    ) -> Result<TickOutcome> {
        self.fetch_all(cancel).await?;
        let (view, report) = self.evaluate(progress)?;

        let next = match (progress.state, progress.update_state) {
            (ClusterState::Created, _) => {
                info!("starting cluster initialization");
                Some(ClusterProgress::with(
                    ClusterState::Initializing,
                    UpdateState::None,
                    Vec::new(),
                ))
            }
            (ClusterState::Initializing, _) if report.all_ready() => {
                info!("cluster initialized");
                Some(ClusterProgress::running())
            }
            (ClusterState::Running, _) => self.plan_update(&report),
            (ClusterState::Updating, UpdateState::None) => {
                warn!("update without a stage, restarting pod removal");
                Some(ClusterProgress::with(
                    ClusterState::Updating,
                    UpdateState::WaitingForPodsRemoval,
                    progress.updating_components.clone(),
                ))
            }
            (ClusterState::Updating, UpdateState::WaitingForPodsRemoval)
                if self.designated_pods_removed(&view) =>
            {
                info!(components = ?progress.updating_components, "pods removed, recreating");
                Some(ClusterProgress::with(
                    ClusterState::Updating,
                    UpdateState::WaitingForPodsCreation,
                    progress.updating_components.clone(),
                ))
            }
            (ClusterState::Updating, UpdateState::WaitingForPodsCreation) if report.all_ready() => {
                info!("update complete");
                Some(ClusterProgress::running())
            }
            _ => None,
        };

        let next = match next {
            Some(next) => next,
            None => {
                if !report.all_ready() {
                    self.sync_pass(&view, &report, cancel).await?;
                }
                progress.clone()
            }
        };

        Ok(TickOutcome {
            transitioned: next != *progress,
            progress: next,
            report,
        })
    }

    /// Running cluster: start an update when some component asks for one
    fn plan_update(&self, report: &StatusReport) -> Option<ClusterProgress> {
        if report.first_with(SyncStatus::NeedUpdate).is_some() {
            info!("cluster update required");
            return Some(ClusterProgress::with(
                ClusterState::Updating,
                UpdateState::WaitingForPodsRemoval,
                Vec::new(),
            ));
        }
        let id = report.first_with(SyncStatus::NeedLocalUpdate)?;
        info!(component = %id, "local update required");
        Some(ClusterProgress::with(
            ClusterState::Updating,
            UpdateState::WaitingForPodsRemoval,
            vec![id.name()],
        ))
    }

    fn designated_pods_removed(&self, view: &ClusterView) -> bool {
        self.components
            .iter()
            .filter(|c| view.is_designated(&c.id()))
            .all(|c| c.are_pods_removed())
    }

    async fn fetch_all(&mut self, cancel: &CancellationToken) -> Result<()> {
        for component in self.components.iter_mut() {
            cancellable(cancel, component.fetch()).await?;
        }
        Ok(())
    }

    /// Evaluate in order, recording each status for later dependents
    fn evaluate(&self, progress: &ClusterProgress) -> Result<(ClusterView, StatusReport)> {
        let mut view = progress.view();
        let mut report = StatusReport::default();
        for component in &self.components {
            let id = component.id();
            let status = component.status(&view)?;
            debug!(component = %id, status = %status, "evaluated component");
            view.record(id.clone(), status);
            report.statuses.push((id, status));
        }
        Ok((view, report))
    }

    async fn sync_pass(
        &self,
        view: &ClusterView,
        report: &StatusReport,
        cancel: &CancellationToken,
    ) -> Result<()> {
        for component in &self.components {
            let id = component.id();
            if report.get(&id) == Some(SyncStatus::Ready) {
                continue;
            }
            cancellable(cancel, component.sync(view)).await?;
        }
        Ok(())
    }
}

/// Race `fut` against cancellation
async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = fut => result,
    }
}
