//! Runbook CRD: a reusable remediation recipe.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{ActionSpec, Severity, SignalType};

/// Label marking a runbook as machine-generated.
pub const AUTO_GENERATED_LABEL: &str = "auto-generated";
/// Label naming the Issue a generated runbook was learned from.
pub const SOURCE_ISSUE_LABEL: &str = "source-issue";
/// Label carrying the generation origin (`ai` or `agentic`).
pub const SOURCE_LABEL: &str = "source";

/// Signature a runbook fires on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunbookTrigger {
    pub signal_type: SignalType,
    pub severity: Severity,
    pub resource_kind: String,
}

/// A reusable remediation recipe keyed by `(signal, severity, kind)`.
///
/// Runbooks are either human-authored or promoted from successful AI
/// sessions; generated ones carry provenance labels.
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "platform.chatcli.io",
    version = "v1alpha1",
    kind = "Runbook",
    namespaced,
    shortname = "rb",
    printcolumn = r#"{"name":"Signal","type":"string","jsonPath":".spec.trigger.signalType"}"#,
    printcolumn = r#"{"name":"Severity","type":"string","jsonPath":".spec.trigger.severity"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RunbookSpec {
    #[serde(default)]
    pub description: String,
    pub trigger: RunbookTrigger,
    pub steps: Vec<ActionSpec>,
    /// Overrides the Issue's attempt cap when greater than zero.
    #[serde(default)]
    pub max_attempts: u32,
}

impl Runbook {
    /// Whether this runbook was generated rather than authored.
    pub fn is_auto_generated(&self) -> bool {
        self.metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(AUTO_GENERATED_LABEL))
            .map(|v| v == "true")
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_trigger_serializes_camel_case() {
        let trigger = RunbookTrigger {
            signal_type: SignalType::ErrorRate,
            severity: Severity::Medium,
            resource_kind: "Deployment".into(),
        };
        let json = serde_json::to_value(&trigger).unwrap();
        assert_eq!(json["signalType"], "error_rate");
        assert_eq!(json["resourceKind"], "Deployment");
    }

    #[test]
    fn test_auto_generated_label_detection() {
        let mut rb = Runbook::new(
            "auto-error-rate-medium-deployment",
            RunbookSpec {
                description: String::new(),
                trigger: RunbookTrigger {
                    signal_type: SignalType::ErrorRate,
                    severity: Severity::Medium,
                    resource_kind: "Deployment".into(),
                },
                steps: vec![],
                max_attempts: 0,
            },
        );
        assert!(!rb.is_auto_generated());

        rb.metadata.labels = Some(
            [(AUTO_GENERATED_LABEL.to_string(), "true".to_string())]
                .into_iter()
                .collect(),
        );
        assert!(rb.is_auto_generated());
    }
}
