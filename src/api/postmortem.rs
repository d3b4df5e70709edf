//! PostMortem CRD: post-incident review artifact.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::common::{ResourceRef, Severity};

/// Label pointing back to the reviewed Issue.
pub const ISSUE_LABEL: &str = "issue";
/// Label mirroring the Issue severity for selection.
pub const SEVERITY_LABEL: &str = "severity";

/// One entry in the chronological incident timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    pub timestamp: DateTime<Utc>,
    /// `detected`, `action_executed`, `action_failed`, or `resolved`.
    pub event: String,
    pub description: String,
}

/// An action taken during remediation and its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    pub name: String,
    pub action: String,
    /// `success` or `failed`.
    pub outcome: String,
    #[serde(default)]
    pub observation: String,
}

/// Review lifecycle; `Closed` is terminal. `InReview` and `Closed` are
/// driven by external actors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum PostMortemPhase {
    Open,
    InReview,
    Closed,
}

impl fmt::Display for PostMortemPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "Open",
            Self::InReview => "InReview",
            Self::Closed => "Closed",
        };
        write!(f, "{}", s)
    }
}

/// Post-resolution narrative artifact owned by its Issue.
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "platform.chatcli.io",
    version = "v1alpha1",
    kind = "PostMortem",
    namespaced,
    status = "PostMortemStatus",
    shortname = "pm",
    printcolumn = r#"{"name":"Issue","type":"string","jsonPath":".spec.issueRef"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PostMortemSpec {
    pub issue_ref: String,
    pub resource: ResourceRef,
    pub severity: Severity,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PostMortemStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<PostMortemPhase>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub root_cause: String,
    #[serde(default)]
    pub impact: String,
    #[serde(default)]
    pub timeline: Vec<TimelineEntry>,
    #[serde(default)]
    pub actions: Vec<ActionRecord>,
    #[serde(default)]
    pub lessons_learned: Vec<String>,
    #[serde(default)]
    pub prevention_actions: Vec<String>,
    /// Seconds between detection and resolution.
    #[serde(default)]
    pub duration_seconds: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_status_round_trip() {
        let status = PostMortemStatus {
            state: Some(PostMortemPhase::Open),
            summary: "resolved by scaling".into(),
            root_cause: "undersized deployment".into(),
            impact: "elevated error rate for 5m".into(),
            timeline: vec![TimelineEntry {
                timestamp: Utc::now(),
                event: "detected".into(),
                description: "error rate above threshold".into(),
            }],
            actions: vec![ActionRecord {
                name: "scale".into(),
                action: "ScaleDeployment".into(),
                outcome: "success".into(),
                observation: "SUCCESS: replicas set to 4".into(),
            }],
            lessons_learned: vec!["load test before launch".into()],
            prevention_actions: vec!["add HPA".into()],
            duration_seconds: 312,
            generated_at: Some(Utc::now()),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "Open");
        assert_eq!(json["durationSeconds"], 312);
        let back: PostMortemStatus = serde_json::from_value(json).unwrap();
        assert_eq!(back, status);
    }
}
