//! AIInsight CRD: one analysis record per Issue.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::ActionSpec;

/// Annotation carrying failure evidence for a retry-triggered re-analysis.
/// Cleared once the analysis consuming it has been written.
pub const FAILURE_CONTEXT_ANNOTATION: &str = "failure-context";

/// Analysis artifact attached to an Issue, filled in by the insight
/// reconciler from the inference backend.
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "platform.chatcli.io",
    version = "v1alpha1",
    kind = "AIInsight",
    namespaced,
    status = "AIInsightStatus",
    printcolumn = r#"{"name":"Issue","type":"string","jsonPath":".spec.issueRef"}"#,
    printcolumn = r#"{"name":"Confidence","type":"number","jsonPath":".status.confidence"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AIInsightSpec {
    /// Name of the parent Issue in the same namespace.
    pub issue_ref: String,
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AIInsightStatus {
    /// Free-form root-cause analysis. Empty until the backend has answered;
    /// cleared again when a failed attempt forces re-analysis.
    #[serde(default)]
    pub analysis: String,
    /// Model confidence in [0.0, 1.0].
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub suggested_actions: Vec<ActionSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Utc>>,
}

impl AIInsight {
    /// Whether the backend has produced an analysis for this insight.
    pub fn is_analyzed(&self) -> bool {
        self.status
            .as_ref()
            .map(|s| !s.analysis.is_empty())
            .unwrap_or(false)
    }

    /// Suggested actions, empty when unanalyzed.
    pub fn suggested_actions(&self) -> &[ActionSpec] {
        self.status
            .as_ref()
            .map(|s| s.suggested_actions.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unanalyzed_until_text_present() {
        let mut insight = AIInsight::new(
            "issue-1-insight",
            AIInsightSpec {
                issue_ref: "issue-1".into(),
                provider: "openai".into(),
                model: "gpt-4o".into(),
            },
        );
        assert!(!insight.is_analyzed());

        insight.status = Some(AIInsightStatus {
            analysis: "error rate spike after rollout".into(),
            confidence: 0.8,
            ..Default::default()
        });
        assert!(insight.is_analyzed());
    }

    #[test]
    fn test_status_round_trip() {
        let status = AIInsightStatus {
            analysis: "a".into(),
            confidence: 0.5,
            recommendations: vec!["scale up".into()],
            suggested_actions: vec![ActionSpec {
                name: "scale".into(),
                action: "ScaleDeployment".into(),
                description: "scale to 4".into(),
                params: [("replicas".to_string(), "4".to_string())].into(),
            }],
            generated_at: None,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["suggestedActions"][0]["action"], "ScaleDeployment");
        let back: AIInsightStatus = serde_json::from_value(json).unwrap();
        assert_eq!(back, status);
    }
}
