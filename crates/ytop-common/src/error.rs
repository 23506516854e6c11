//! Error types for the ytop operator
//!
//! Errors are structured with fields to aid debugging in production.
//! Variants carry the component or resource they concern so the controller
//! can surface them in the cluster status without losing context.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for ytop operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Validation error for the Ytsaurus spec or the component graph
    #[error("validation error for {cluster}: {message}")]
    Validation {
        /// Name of the cluster with invalid configuration
        cluster: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.primaryMasters.instance")
        field: Option<String>,
    },

    /// Configuration payload generation failed for a role
    #[error("config generation error [{role}]: {message}")]
    Config {
        /// Role whose payload could not be produced
        role: String,
        /// Description of what failed
        message: String,
    },

    /// A platform operation (create/update/scale) failed for a component
    #[error("platform error [{component}]: {message}")]
    Platform {
        /// Component that owns the resource
        component: String,
        /// Description of what failed
        message: String,
        /// Whether this error is retryable
        retryable: bool,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "orchestrator", "controller")
        context: String,
    },

    /// The tick was cancelled before it completed
    #[error("reconcile tick cancelled")]
    Cancelled,
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            cluster: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with cluster context
    pub fn validation_for(cluster: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            cluster: cluster.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with cluster context and field path
    pub fn validation_for_field(
        cluster: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            cluster: cluster.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a config generation error for a role
    pub fn config(role: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Config {
            role: role.into(),
            message: msg.into(),
        }
    }

    /// Create a retryable platform error for a component
    pub fn platform(component: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Platform {
            component: component.into(),
            message: msg.into(),
            retryable: true,
        }
    }

    /// Create a non-retryable platform error (e.g., the API rejected the object)
    pub fn platform_permanent(component: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Platform {
            component: component.into(),
            message: msg.into(),
            retryable: false,
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation, config and serialization errors need a spec change.
    /// Kubernetes errors are retried unless the API returned a 4xx.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae)
                    if (400..500).contains(&ae.code) && ae.code != 409 && ae.code != 429
            ),
            Error::Validation { .. } => false,
            Error::Config { .. } => false,
            Error::Platform { retryable, .. } => *retryable,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
            Error::Cancelled => true,
        }
    }

    /// Get the component name if this error is tied to one component
    pub fn component(&self) -> Option<&str> {
        match self {
            Error::Platform { component, .. } => Some(component),
            Error::Config { role, .. } => Some(role),
            _ => None,
        }
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Story: a bad spec is reported with the cluster and the field at fault
    #[test]
    fn story_validation_errors_point_at_the_field() {
        let err = Error::validation_for_field(
            "prod",
            "spec.primaryMasters.instance.instanceCount",
            "master count must be odd",
        );
        assert!(err.to_string().contains("prod"));
        assert!(err.to_string().contains("must be odd"));
        match &err {
            Error::Validation { field, .. } => assert_eq!(
                field.as_deref(),
                Some("spec.primaryMasters.instance.instanceCount")
            ),
            _ => panic!("Expected Validation variant"),
        }
        assert!(!err.is_retryable());
    }

    /// Story: a failed apply names the component and is retried on the next tick
    #[test]
    fn story_platform_errors_carry_the_component() {
        let err = Error::platform("ControllerAgent", "statefulset apply timed out");
        assert!(err.to_string().contains("[ControllerAgent]"));
        assert_eq!(err.component(), Some("ControllerAgent"));
        assert!(err.is_retryable());

        let err = Error::platform_permanent("TCPProxy", "service type rejected");
        assert!(!err.is_retryable());
    }

    #[test]
    fn config_errors_need_a_spec_change() {
        let err = Error::config("Master", "cell tag out of range");
        assert!(err.to_string().contains("config generation error [Master]"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn cancelled_ticks_are_retried() {
        assert!(Error::Cancelled.is_retryable());
        assert_eq!(Error::Cancelled.to_string(), "reconcile tick cancelled");
    }

    #[test]
    fn test_internal_error_default_context() {
        let err = Error::internal("unexpected state");
        assert_eq!(err.context(), Some(UNKNOWN_CONTEXT));
        assert!(err.to_string().contains("[unknown]"));

        let err = Error::internal_with_context("orchestrator", "missing component");
        assert_eq!(err.context(), Some("orchestrator"));
    }

    #[test]
    fn test_serialization_from_serde_json() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Serialization { .. }));
        assert!(!err.is_retryable());
    }
}
