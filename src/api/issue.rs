//! Issue CRD: a correlated incident for one resource.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::common::{ResourceRef, Severity, SignalType};

/// Default cap on remediation attempts before escalation.
pub const DEFAULT_MAX_REMEDIATION_ATTEMPTS: u32 = 3;

/// A correlated incident grouping one or more anomalies on a resource.
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "platform.chatcli.io",
    version = "v1alpha1",
    kind = "Issue",
    namespaced,
    status = "IssueStatus",
    shortname = "inc",
    printcolumn = r#"{"name":"Severity","type":"string","jsonPath":".spec.severity"}"#,
    printcolumn = r#"{"name":"Risk","type":"integer","jsonPath":".spec.riskScore"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct IssueSpec {
    pub severity: Severity,
    /// Origin of the correlated signals (e.g. `watcher`).
    pub source: String,
    pub resource: ResourceRef,
    #[serde(default)]
    pub description: String,
    /// Namespace-scoped incident id of the form `INC-YYYYMMDD-NNN`.
    pub incident_id: String,
    /// Aggregate risk in [0, 100].
    pub risk_score: u32,
    pub signal_type: SignalType,
}

/// Issue lifecycle states. `Resolved`, `Escalated` and `Failed` are
/// terminal and write-once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum IssuePhase {
    Detected,
    Analyzing,
    Remediating,
    Resolved,
    Escalated,
    Failed,
}

impl IssuePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Escalated | Self::Failed)
    }
}

impl fmt::Display for IssuePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Detected => "Detected",
            Self::Analyzing => "Analyzing",
            Self::Remediating => "Remediating",
            Self::Resolved => "Resolved",
            Self::Escalated => "Escalated",
            Self::Failed => "Failed",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IssueStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<IssuePhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(default)]
    pub remediation_attempts: u32,
    #[serde(default)]
    pub max_remediation_attempts: u32,
}

impl Issue {
    /// Current lifecycle state; an Issue without status is still `Detected`.
    pub fn phase(&self) -> IssuePhase {
        self.status
            .as_ref()
            .and_then(|s| s.state)
            .unwrap_or(IssuePhase::Detected)
    }

    /// Whether the Issue is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.phase().is_terminal()
    }

    /// The attempt cap, falling back to the default when unset.
    pub fn max_attempts(&self) -> u32 {
        let configured = self
            .status
            .as_ref()
            .map(|s| s.max_remediation_attempts)
            .unwrap_or(0);
        if configured > 0 {
            configured
        } else {
            DEFAULT_MAX_REMEDIATION_ATTEMPTS
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_phases() {
        assert!(IssuePhase::Resolved.is_terminal());
        assert!(IssuePhase::Escalated.is_terminal());
        assert!(IssuePhase::Failed.is_terminal());
        assert!(!IssuePhase::Detected.is_terminal());
        assert!(!IssuePhase::Analyzing.is_terminal());
        assert!(!IssuePhase::Remediating.is_terminal());
    }

    #[test]
    fn test_phase_defaults_to_detected() {
        let issue = Issue::new(
            "payments-api-error-rate-1",
            IssueSpec {
                severity: Severity::Medium,
                source: "watcher".into(),
                resource: ResourceRef::deployment("payments-api", "default"),
                description: String::new(),
                incident_id: "INC-20260801-001".into(),
                risk_score: 30,
                signal_type: SignalType::ErrorRate,
            },
        );
        assert_eq!(issue.phase(), IssuePhase::Detected);
        assert_eq!(issue.max_attempts(), DEFAULT_MAX_REMEDIATION_ATTEMPTS);
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let status = IssueStatus {
            state: Some(IssuePhase::Analyzing),
            remediation_attempts: 1,
            max_remediation_attempts: 3,
            ..Default::default()
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "Analyzing");
        assert_eq!(json["remediationAttempts"], 1);
        assert_eq!(json["maxRemediationAttempts"], 3);
    }
}
