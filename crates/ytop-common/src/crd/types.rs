//! Shared status and spec building blocks for the Ytsaurus CRD

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Cluster-level lifecycle state
///
/// Owned by the Ytsaurus status and advanced only by the orchestrator
/// between ticks.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ClusterState {
    /// Resource was just created, nothing has been deployed yet
    #[default]
    Created,
    /// Components are being brought up for the first time
    Initializing,
    /// Every component converged; changes are detected here
    Running,
    /// A cluster-wide or component-local update is in progress
    Updating,
}

impl std::fmt::Display for ClusterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Initializing => write!(f, "Initializing"),
            Self::Running => write!(f, "Running"),
            Self::Updating => write!(f, "Updating"),
        }
    }
}

/// Stage of an update; only meaningful while the cluster is `Updating`
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum UpdateState {
    /// No update in progress
    #[default]
    None,
    /// Designated components are scaling their pods to zero
    WaitingForPodsRemoval,
    /// Components are recreating pods with the new configuration
    WaitingForPodsCreation,
}

impl std::fmt::Display for UpdateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::WaitingForPodsRemoval => write!(f, "WaitingForPodsRemoval"),
            Self::WaitingForPodsCreation => write!(f, "WaitingForPodsCreation"),
        }
    }
}

/// Update progress recorded in the Ytsaurus status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatus {
    /// Current update stage
    #[serde(default)]
    pub state: UpdateState,

    /// Names of the components designated for this update.
    /// Empty means every component takes part.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<String>,
}

/// Kubernetes Service type for externally exposed balancers
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ServiceType {
    /// Cluster-internal virtual IP
    #[default]
    ClusterIP,
    /// Exposed on every node's port
    NodePort,
    /// Exposed through a cloud load balancer
    LoadBalancer,
}

impl ServiceType {
    /// The value Kubernetes expects in `spec.type`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClusterIP => "ClusterIP",
            Self::NodePort => "NodePort",
            Self::LoadBalancer => "LoadBalancer",
        }
    }
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (e.g., Ready, ControllerAgentReady)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    /// True if type, status, reason and message match, ignoring the timestamp
    pub fn same_as(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_default_to_the_start_of_the_lifecycle() {
        assert_eq!(ClusterState::default(), ClusterState::Created);
        assert_eq!(UpdateState::default(), UpdateState::None);
        assert!(UpdateStatus::default().components.is_empty());
    }

    #[test]
    fn update_status_omits_empty_designation() {
        let json = serde_json::to_value(UpdateStatus {
            state: UpdateState::WaitingForPodsRemoval,
            components: vec![],
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"state": "WaitingForPodsRemoval"}));
    }

    #[test]
    fn conditions_compare_without_timestamps() {
        let a = Condition::new("Ready", ConditionStatus::False, "Blocked", "waiting");
        let mut b = a.clone();
        b.last_transition_time = a.last_transition_time - chrono::Duration::seconds(30);
        assert!(a.same_as(&b));

        b.message = "other".to_string();
        assert!(!a.same_as(&b));
    }

    #[test]
    fn service_type_matches_kubernetes_spelling() {
        assert_eq!(ServiceType::LoadBalancer.as_str(), "LoadBalancer");
        assert_eq!(ServiceType::default().to_string(), "ClusterIP");
    }
}
