//! Ytsaurus controller implementation
//!
//! Each reconcile validates the spec, rebuilds the component set from it,
//! runs one orchestrator tick and writes the resulting progress and
//! per-component conditions back into the status.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use ytop_common::consts::{DEFAULT_CLUSTER_DOMAIN, FIELD_MANAGER};
use ytop_common::crd::{
    ClusterState, Condition, ConditionStatus, UpdateState, Ytsaurus, YtsaurusStatus,
};
use ytop_common::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use ytop_common::{Error, Result};
use ytop_components::{
    build_components, ClusterProgress, ComponentId, KubePlatform, Orchestrator, PlatformClient,
    SyncStatus, TickOutcome,
};
use ytop_config::Generator;

/// Type of the cluster-wide readiness condition
pub const READY_CONDITION: &str = "Ready";

/// Requeue delay after a retryable error
const RETRYABLE_ERROR_REQUEUE: Duration = Duration::from_secs(5);

/// Requeue delay after an error that needs outside intervention
const PERMANENT_ERROR_REQUEUE: Duration = Duration::from_secs(300);

/// Status writes for Ytsaurus objects
#[cfg_attr(test, automock)]
#[async_trait]
pub trait YtsaurusClient: Send + Sync {
    /// Replace the status of a Ytsaurus object
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &YtsaurusStatus,
    ) -> Result<()>;
}

/// [`YtsaurusClient`] backed by the Kubernetes API
pub struct YtsaurusClientImpl {
    client: Client,
}

impl YtsaurusClientImpl {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl YtsaurusClient for YtsaurusClientImpl {
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &YtsaurusStatus,
    ) -> Result<()> {
        let api: Api<Ytsaurus> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "status": status });
        api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

/// Shared state for every reconcile
///
/// Use [`ContextBuilder`] to construct instances:
///
/// ```text
/// let ctx = Context::builder(client)
///     .cluster_domain("cluster.local")
///     .build();
/// ```
pub struct Context {
    /// Platform operations used by components
    pub platform: Arc<dyn PlatformClient>,
    /// Status writes
    pub ytsaurus: Arc<dyn YtsaurusClient>,
    /// Kubernetes event sink
    pub events: Arc<dyn EventPublisher>,
    /// DNS suffix used in generated server addresses
    pub cluster_domain: String,
    /// Cancelled when the operator shuts down
    pub shutdown: CancellationToken,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Context over mocks, for unit tests
    #[cfg(test)]
    pub fn for_testing(
        platform: Arc<dyn PlatformClient>,
        ytsaurus: Arc<dyn YtsaurusClient>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            platform,
            ytsaurus,
            events,
            cluster_domain: DEFAULT_CLUSTER_DOMAIN.to_string(),
            shutdown: CancellationToken::new(),
        }
    }
}

/// Builder for [`Context`]
pub struct ContextBuilder {
    client: Client,
    platform: Option<Arc<dyn PlatformClient>>,
    ytsaurus: Option<Arc<dyn YtsaurusClient>>,
    events: Option<Arc<dyn EventPublisher>>,
    cluster_domain: String,
    shutdown: CancellationToken,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            platform: None,
            ytsaurus: None,
            events: None,
            cluster_domain: DEFAULT_CLUSTER_DOMAIN.to_string(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Override the platform client
    pub fn platform(mut self, platform: Arc<dyn PlatformClient>) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Override the status client
    pub fn ytsaurus_client(mut self, ytsaurus: Arc<dyn YtsaurusClient>) -> Self {
        self.ytsaurus = Some(ytsaurus);
        self
    }

    /// Override the event publisher
    pub fn events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Set the cluster DNS domain
    pub fn cluster_domain(mut self, domain: impl Into<String>) -> Self {
        self.cluster_domain = domain.into();
        self
    }

    /// Share a shutdown token with the caller
    pub fn shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        Context {
            platform: self
                .platform
                .unwrap_or_else(|| Arc::new(KubePlatform::new(self.client.clone()))),
            ytsaurus: self
                .ytsaurus
                .unwrap_or_else(|| Arc::new(YtsaurusClientImpl::new(self.client.clone()))),
            events: self.events.unwrap_or_else(|| {
                Arc::new(KubeEventPublisher::new(self.client.clone(), FIELD_MANAGER))
            }),
            cluster_domain: self.cluster_domain,
            shutdown: self.shutdown,
        }
    }
}

/// Reconcile a Ytsaurus cluster by one tick
#[instrument(skip(ytsaurus, ctx), fields(cluster = %ytsaurus.name_any()))]
pub async fn reconcile(ytsaurus: Arc<Ytsaurus>, ctx: Arc<Context>) -> Result<Action> {
    let name = ytsaurus.name_any();
    let namespace = ytsaurus
        .namespace()
        .ok_or_else(|| Error::validation_for(&name, "Ytsaurus must be namespaced"))?;
    let current = ytsaurus.status.clone().unwrap_or_default();
    debug!(state = %current.state, "reconciling cluster");

    if let Err(e) = ytsaurus.spec.validate(&name) {
        warn!(error = %e, "spec validation failed");
        let mut status = current.clone();
        status.observed_generation = ytsaurus.metadata.generation;
        status.message = Some(e.to_string());
        status.set_condition(Condition::new(
            READY_CONDITION,
            ConditionStatus::False,
            reasons::VALIDATION_FAILED,
            e.to_string(),
        ));
        if status != current {
            ctx.ytsaurus.patch_status(&namespace, &name, &status).await?;
            ctx.events
                .publish(
                    &ytsaurus.object_ref(&()),
                    EventType::Warning,
                    reasons::VALIDATION_FAILED,
                    actions::RECONCILE,
                    Some(e.to_string()),
                )
                .await;
        }
        // Requires a spec change
        return Ok(Action::await_change());
    }

    let progress = ClusterProgress::from_status(ytsaurus.status.as_ref());
    let generator = Arc::new(Generator::new(&ytsaurus, &ctx.cluster_domain));
    let components = build_components(&ytsaurus, generator, ctx.platform.clone());
    let mut orchestrator = Orchestrator::new(components)?;

    let outcome = match orchestrator.tick(&progress, &ctx.shutdown).await {
        Ok(outcome) => outcome,
        Err(e) => {
            record_failure(&ytsaurus, &ctx, &namespace, &current, &e).await;
            return Err(e);
        }
    };

    let status = desired_status(&ytsaurus, &current, &outcome);
    if status != current {
        ctx.ytsaurus.patch_status(&namespace, &name, &status).await?;
    }

    if outcome.transitioned {
        info!(
            from = %progress.state,
            to = %outcome.progress.state,
            update_state = %outcome.progress.update_state,
            "cluster state changed"
        );
        if let Some((reason, note)) = transition_event(&progress, &outcome.progress) {
            ctx.events
                .publish(
                    &ytsaurus.object_ref(&()),
                    EventType::Normal,
                    reason,
                    actions::UPDATE,
                    Some(note),
                )
                .await;
        }
    }

    Ok(Action::requeue(outcome.requeue_after()))
}

/// Requeue policy for failed reconciles
pub fn error_policy(ytsaurus: Arc<Ytsaurus>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        cluster = %ytsaurus.name_any(),
        "reconciliation failed"
    );
    if error.is_retryable() {
        Action::requeue(RETRYABLE_ERROR_REQUEUE)
    } else {
        Action::requeue(PERMANENT_ERROR_REQUEUE)
    }
}

fn condition_type(id: &ComponentId) -> String {
    format!("{}{}", id.name(), READY_CONDITION)
}

fn desired_status(
    ytsaurus: &Ytsaurus,
    current: &YtsaurusStatus,
    outcome: &TickOutcome,
) -> YtsaurusStatus {
    let mut status = current.clone();
    outcome.progress.apply_to(&mut status);
    status.observed_generation = ytsaurus.metadata.generation;

    let component_conditions: Vec<String> =
        outcome.report.iter().map(|(id, _)| condition_type(id)).collect();
    status
        .conditions
        .retain(|c| c.type_ == READY_CONDITION || component_conditions.contains(&c.type_));
    for (id, sync_status) in outcome.report.iter() {
        let condition_status = if sync_status == SyncStatus::Ready {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        };
        status.set_condition(Condition::new(
            condition_type(id),
            condition_status,
            sync_status.to_string(),
            "",
        ));
    }

    let ready_count = outcome
        .report
        .iter()
        .filter(|(_, s)| *s == SyncStatus::Ready)
        .count();
    let ready = outcome.progress.state == ClusterState::Running && outcome.report.all_ready();
    let (condition_status, reason, message) = if ready {
        (
            ConditionStatus::True,
            reasons::CLUSTER_READY.to_string(),
            "cluster is running".to_string(),
        )
    } else {
        (
            ConditionStatus::False,
            outcome.progress.state.to_string(),
            format!(
                "{}: {}/{} components ready",
                outcome.progress.state,
                ready_count,
                component_conditions.len()
            ),
        )
    };
    status.message = Some(message.clone());
    status.set_condition(Condition::new(READY_CONDITION, condition_status, reason, message));
    status
}

/// Best effort: put the error into the status and an event
async fn record_failure(
    ytsaurus: &Ytsaurus,
    ctx: &Context,
    namespace: &str,
    current: &YtsaurusStatus,
    error: &Error,
) {
    if matches!(error, Error::Cancelled) {
        return;
    }

    let mut status = current.clone();
    status.message = Some(error.to_string());
    status.set_condition(Condition::new(
        READY_CONDITION,
        ConditionStatus::False,
        reasons::RECONCILE_FAILED,
        error.to_string(),
    ));
    if status == *current {
        return;
    }

    if let Err(e) = ctx
        .ytsaurus
        .patch_status(namespace, &ytsaurus.name_any(), &status)
        .await
    {
        warn!(error = %e, "failed to record reconcile error in status");
    }
    ctx.events
        .publish(
            &ytsaurus.object_ref(&()),
            EventType::Warning,
            reasons::RECONCILE_FAILED,
            actions::RECONCILE,
            Some(error.to_string()),
        )
        .await;
}

/// Event reason and note for a progress change
fn transition_event(
    from: &ClusterProgress,
    to: &ClusterProgress,
) -> Option<(&'static str, String)> {
    match (to.state, to.update_state) {
        (ClusterState::Initializing, _) => Some((
            reasons::INITIALIZATION_STARTED,
            "creating cluster components".to_string(),
        )),
        (ClusterState::Running, _) if from.state == ClusterState::Updating => Some((
            reasons::UPDATE_COMPLETE,
            "all components run the new configuration".to_string(),
        )),
        (ClusterState::Running, _) => {
            Some((reasons::CLUSTER_READY, "all components are ready".to_string()))
        }
        (ClusterState::Updating, UpdateState::WaitingForPodsRemoval)
            if to.updating_components.is_empty() =>
        {
            Some((
                reasons::UPDATE_STARTED,
                "removing pods of every component".to_string(),
            ))
        }
        (ClusterState::Updating, UpdateState::WaitingForPodsRemoval) => Some((
            reasons::LOCAL_UPDATE_STARTED,
            format!("removing pods of {}", to.updating_components.join(", ")),
        )),
        (ClusterState::Updating, UpdateState::WaitingForPodsCreation) => Some((
            reasons::PODS_REMOVED,
            "recreating pods with the new configuration".to_string(),
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use k8s_openapi::api::apps::v1::StatefulSet;
    use k8s_openapi::api::core::v1::{ConfigMap, ObjectReference, Pod, Service};
    use mockall::mock;
    use ytop_common::crd::{InstanceSpec, MastersSpec, YtsaurusSpec};

    // The automock of PlatformClient only exists inside ytop-components tests
    mock! {
        pub Platform {}

        #[async_trait]
        impl PlatformClient for Platform {
            async fn get_stateful_set(
                &self,
                namespace: &str,
                name: &str,
            ) -> Result<Option<StatefulSet>>;
            async fn apply_stateful_set(&self, stateful_set: &StatefulSet) -> Result<()>;
            async fn scale_stateful_set(
                &self,
                namespace: &str,
                name: &str,
                replicas: i32,
            ) -> Result<()>;
            async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>>;
            async fn apply_service(&self, service: &Service) -> Result<()>;
            async fn delete_service(&self, namespace: &str, name: &str) -> Result<()>;
            async fn get_config_map(
                &self,
                namespace: &str,
                name: &str,
            ) -> Result<Option<ConfigMap>>;
            async fn apply_config_map(&self, config_map: &ConfigMap) -> Result<()>;
            async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>>;
        }
    }

    #[derive(Default)]
    struct RecordingPublisher {
        reasons: Mutex<Vec<String>>,
    }

    impl RecordingPublisher {
        fn reasons(&self) -> Vec<String> {
            self.reasons.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventPublisher for RecordingPublisher {
        async fn publish(
            &self,
            _resource_ref: &ObjectReference,
            _type_: EventType,
            reason: &str,
            _action: &str,
            _note: Option<String>,
        ) {
            self.reasons.lock().unwrap().push(reason.to_string());
        }
    }

    fn ytsaurus() -> Ytsaurus {
        let mut yt = Ytsaurus::new(
            "prod",
            YtsaurusSpec {
                core_image: "ytsaurus/ytsaurus:23.2".to_string(),
                primary_masters: MastersSpec {
                    instance: InstanceSpec::with_count(1),
                    cell_tag: 1,
                },
                discovery: InstanceSpec::with_count(1),
                ..Default::default()
            },
        );
        yt.metadata.namespace = Some("yt".to_string());
        yt.metadata.generation = Some(2);
        yt
    }

    fn with_progress(mut yt: Ytsaurus, state: ClusterState) -> Ytsaurus {
        yt.status = Some(YtsaurusStatus::with_state(state));
        yt
    }

    /// Platform with nothing deployed; writes are not expected
    fn empty_platform() -> MockPlatform {
        let mut platform = MockPlatform::new();
        platform.expect_get_stateful_set().returning(|_, _| Ok(None));
        platform.expect_get_service().returning(|_, _| Ok(None));
        platform.expect_get_config_map().returning(|_, _| Ok(None));
        platform.expect_list_pods().returning(|_, _| Ok(vec![]));
        platform
    }

    type Captured = Arc<Mutex<Vec<YtsaurusStatus>>>;

    fn capturing_client() -> (MockYtsaurusClient, Captured) {
        let captured: Captured = Arc::default();
        let sink = captured.clone();
        let mut client = MockYtsaurusClient::new();
        client
            .expect_patch_status()
            .withf(|ns, name, _| ns == "yt" && name == "prod")
            .returning(move |_, _, status| {
                sink.lock().unwrap().push(status.clone());
                Ok(())
            });
        (client, captured)
    }

    fn context(
        platform: MockPlatform,
        client: MockYtsaurusClient,
    ) -> (Arc<Context>, Arc<RecordingPublisher>) {
        let events = Arc::new(RecordingPublisher::default());
        let ctx = Context::for_testing(Arc::new(platform), Arc::new(client), events.clone());
        (Arc::new(ctx), events)
    }

    #[tokio::test]
    async fn invalid_spec_waits_for_a_change() {
        let mut yt = ytsaurus();
        yt.spec.primary_masters.instance.instance_count = 2;
        let (client, captured) = capturing_client();
        let (ctx, events) = context(MockPlatform::new(), client);

        let action = reconcile(Arc::new(yt), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());

        let status = captured.lock().unwrap().pop().unwrap();
        let ready = status.condition(READY_CONDITION).unwrap();
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason, reasons::VALIDATION_FAILED);
        assert_eq!(status.observed_generation, Some(2));
        assert_eq!(events.reasons(), vec![reasons::VALIDATION_FAILED.to_string()]);
    }

    /// Story: the first reconcile of a new cluster records that
    /// initialization started and creates nothing yet
    #[tokio::test]
    async fn story_new_cluster_starts_initializing() {
        let (client, captured) = capturing_client();
        let (ctx, events) = context(empty_platform(), client);

        let action = reconcile(Arc::new(ytsaurus()), ctx).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(5)));

        let status = captured.lock().unwrap().pop().unwrap();
        assert_eq!(status.state, ClusterState::Initializing);
        assert_eq!(
            status.condition("MasterReady").unwrap().reason,
            SyncStatus::Pending.to_string()
        );
        assert_eq!(
            status.condition(READY_CONDITION).unwrap().status,
            ConditionStatus::False
        );
        assert_eq!(events.reasons(), vec![reasons::INITIALIZATION_STARTED.to_string()]);
    }

    /// Story: while initializing, independent roles take their first step
    /// and an unchanged status is not written twice
    #[tokio::test]
    async fn story_initializing_cluster_creates_first_objects() {
        let yt = with_progress(ytsaurus(), ClusterState::Initializing);
        let mut platform = empty_platform();
        platform
            .expect_apply_config_map()
            .times(2)
            .returning(|_| Ok(()));
        let (client, captured) = capturing_client();
        let (ctx, events) = context(platform, client);

        reconcile(Arc::new(yt.clone()), ctx).await.unwrap();
        let status = captured.lock().unwrap().pop().unwrap();
        assert_eq!(status.state, ClusterState::Initializing);
        assert!(events.reasons().is_empty());

        let mut again = yt;
        again.status = Some(status);
        let mut platform = empty_platform();
        platform
            .expect_apply_config_map()
            .times(2)
            .returning(|_| Ok(()));
        let mut client = MockYtsaurusClient::new();
        client.expect_patch_status().never();
        let (ctx, _) = context(platform, client);
        reconcile(Arc::new(again), ctx).await.unwrap();
    }

    #[tokio::test]
    async fn tick_errors_are_recorded_and_returned() {
        let yt = with_progress(ytsaurus(), ClusterState::Initializing);
        let mut platform = MockPlatform::new();
        platform
            .expect_get_stateful_set()
            .returning(|_, _| Err(Error::platform_permanent("Master", "forbidden")));
        let (client, captured) = capturing_client();
        let (ctx, events) = context(platform, client);

        let err = reconcile(Arc::new(yt), ctx).await.unwrap_err();
        assert!(!err.is_retryable());

        let status = captured.lock().unwrap().pop().unwrap();
        let ready = status.condition(READY_CONDITION).unwrap();
        assert_eq!(ready.reason, reasons::RECONCILE_FAILED);
        assert!(ready.message.contains("forbidden"));
        assert_eq!(events.reasons(), vec![reasons::RECONCILE_FAILED.to_string()]);
    }

    #[tokio::test]
    async fn shutdown_cancels_without_touching_status() {
        let mut client = MockYtsaurusClient::new();
        client.expect_patch_status().never();
        let (ctx, events) = context(empty_platform(), client);
        ctx.shutdown.cancel();

        let err = reconcile(Arc::new(ytsaurus()), ctx).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(events.reasons().is_empty());
    }

    #[test]
    fn error_policy_backs_off_on_permanent_errors() {
        let (ctx, _) = context(MockPlatform::new(), MockYtsaurusClient::new());
        let yt = Arc::new(ytsaurus());

        let action = error_policy(yt.clone(), &Error::platform("Master", "timeout"), ctx.clone());
        assert_eq!(action, Action::requeue(Duration::from_secs(5)));

        let action = error_policy(yt, &Error::validation("bad spec"), ctx);
        assert_eq!(action, Action::requeue(Duration::from_secs(300)));
    }

    #[test]
    fn transitions_map_to_event_reasons() {
        let progress = |state, update_state, components: &[&str]| ClusterProgress {
            state,
            update_state,
            updating_components: components.iter().map(|c| c.to_string()).collect(),
        };
        let running = progress(ClusterState::Running, UpdateState::None, &[]);
        let initializing = progress(ClusterState::Initializing, UpdateState::None, &[]);

        let reason = |from: &ClusterProgress, to: &ClusterProgress| {
            transition_event(from, to).map(|(reason, _)| reason)
        };

        assert_eq!(
            reason(&ClusterProgress::default(), &initializing),
            Some(reasons::INITIALIZATION_STARTED)
        );
        assert_eq!(reason(&initializing, &running), Some(reasons::CLUSTER_READY));
        assert_eq!(
            reason(
                &running,
                &progress(ClusterState::Updating, UpdateState::WaitingForPodsRemoval, &[])
            ),
            Some(reasons::UPDATE_STARTED)
        );

        let local = progress(
            ClusterState::Updating,
            UpdateState::WaitingForPodsRemoval,
            &["TCPProxy"],
        );
        let (reason_local, note) = transition_event(&running, &local).unwrap();
        assert_eq!(reason_local, reasons::LOCAL_UPDATE_STARTED);
        assert!(note.contains("TCPProxy"));

        let creating = progress(
            ClusterState::Updating,
            UpdateState::WaitingForPodsCreation,
            &["TCPProxy"],
        );
        assert_eq!(reason(&local, &creating), Some(reasons::PODS_REMOVED));
        assert_eq!(reason(&creating, &running), Some(reasons::UPDATE_COMPLETE));
    }
}
