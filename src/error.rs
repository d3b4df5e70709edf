//! Error types for aiops-core.

use thiserror::Error;

/// Result type alias using aiops-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur across the incident pipeline.
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Transport-level failure connecting to the inference backend
    #[error("Backend connect error: {0}")]
    Connect(#[from] tonic::transport::Error),

    /// RPC to the inference backend failed
    #[error("Backend RPC error: {0}")]
    Rpc(#[from] tonic::Status),

    /// No inference backend is currently connected
    #[error("Inference backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A remediation action was malformed or unsupported
    #[error("Invalid action {action}: {reason}")]
    InvalidAction { action: String, reason: String },

    /// A plan violated the safety constraints
    #[error("Safety constraint violated: {0}")]
    SafetyViolation(String),

    /// A referenced object could not be found
    #[error("{kind} {name} not found")]
    MissingObject { kind: String, name: String },

    /// A resource quantity could not be parsed
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    /// Finalizer handling failed
    #[error("Finalizer error: {0}")]
    Finalizer(String),
}

impl Error {
    /// Create an invalid-action error.
    pub fn invalid_action(action: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAction {
            action: action.into(),
            reason: reason.into(),
        }
    }

    /// Create a safety-violation error.
    pub fn safety(reason: impl Into<String>) -> Self {
        Self::SafetyViolation(reason.into())
    }

    /// Create a missing-object error.
    pub fn missing(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::MissingObject {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a backend-unavailable error.
    pub fn backend_unavailable(message: impl Into<String>) -> Self {
        Self::BackendUnavailable(message.into())
    }

    /// Whether this error is a Kubernetes 404 (the object is gone).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Kube(kube::Error::Api(ae)) if ae.code == 404)
    }

    /// Whether this error is an optimistic-concurrency conflict (409).
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Kube(kube::Error::Api(ae)) if ae.code == 409)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> Error {
        Error::Kube(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".into(),
            message: "test".into(),
            reason: "test".into(),
            code,
        }))
    }

    #[test]
    fn test_not_found_classification() {
        assert!(api_error(404).is_not_found());
        assert!(!api_error(404).is_conflict());
        assert!(!api_error(500).is_not_found());
    }

    #[test]
    fn test_conflict_classification() {
        assert!(api_error(409).is_conflict());
        assert!(!api_error(409).is_not_found());
    }

    #[test]
    fn test_helper_constructors() {
        let err = Error::invalid_action("ScaleDeployment", "missing replicas");
        assert!(err.to_string().contains("ScaleDeployment"));

        let err = Error::missing("Issue", "payments-api-error-rate-1");
        assert!(err.to_string().contains("payments-api-error-rate-1"));
    }
}
