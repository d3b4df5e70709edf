//! RemediationPlan CRD: one remediation attempt for one Issue.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::common::ActionSpec;

/// Default hard cap on agentic steps per plan.
pub const DEFAULT_AGENTIC_MAX_STEPS: u32 = 10;

/// Annotations written by the agentic loop on resolution and consumed by
/// post-mortem generation.
pub const POSTMORTEM_SUMMARY_ANNOTATION: &str = "postmortem-summary";
pub const ROOT_CAUSE_ANNOTATION: &str = "root-cause";
pub const IMPACT_ANNOTATION: &str = "impact";
pub const LESSONS_LEARNED_ANNOTATION: &str = "lessons-learned";
pub const PREVENTION_ACTIONS_ANNOTATION: &str = "prevention-actions";

/// Separator between list items stored in a single annotation value.
pub const ANNOTATION_LIST_SEPARATOR: &str = "\n---\n";

/// One entry of the agentic conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AgenticStepRecord {
    pub step_number: u32,
    /// The model's reasoning for this step.
    #[serde(default)]
    pub ai_message: String,
    /// Action kind executed in this step, absent for observation-only steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<BTreeMap<String, String>>,
    /// `SUCCESS: ...` / `FAILED: ...` outcome, or a plain observation.
    #[serde(default)]
    pub observation: String,
    pub timestamp: DateTime<Utc>,
}

impl AgenticStepRecord {
    /// Whether the recorded action completed successfully.
    pub fn succeeded(&self) -> bool {
        self.action.is_some() && !self.observation.starts_with("FAILED:")
    }
}

/// A piece of evidence recorded during execution or verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceItem {
    /// What the evidence captures (`preflight`, `error`, `verification`).
    pub kind: String,
    pub data: String,
    pub captured_at: DateTime<Utc>,
}

impl EvidenceItem {
    pub fn new(kind: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            data: data.into(),
            captured_at: Utc::now(),
        }
    }
}

/// Plan lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum PlanPhase {
    Pending,
    Executing,
    Verifying,
    Completed,
    Failed,
    RolledBack,
}

impl PlanPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::RolledBack)
    }
}

impl fmt::Display for PlanPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Executing => "Executing",
            Self::Verifying => "Verifying",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::RolledBack => "RolledBack",
        };
        write!(f, "{}", s)
    }
}

/// One concrete attempt, scripted or agentic, to resolve an Issue.
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "platform.chatcli.io",
    version = "v1alpha1",
    kind = "RemediationPlan",
    namespaced,
    status = "RemediationPlanStatus",
    shortname = "rplan",
    printcolumn = r#"{"name":"Issue","type":"string","jsonPath":".spec.issueRef"}"#,
    printcolumn = r#"{"name":"Attempt","type":"integer","jsonPath":".spec.attempt"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RemediationPlanSpec {
    /// Name of the parent Issue in the same namespace.
    pub issue_ref: String,
    /// 1-based attempt number.
    pub attempt: u32,
    #[serde(default)]
    pub strategy: String,
    /// Ordered actions for scripted execution; empty in agentic mode.
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
    #[serde(default)]
    pub safety_constraints: Vec<String>,
    #[serde(default)]
    pub agentic_mode: bool,
    /// Conversation history of the agentic session, persisted spec-side so
    /// it survives status resets.
    #[serde(default)]
    pub agentic_history: Vec<AgenticStepRecord>,
    #[serde(default)]
    pub agentic_max_steps: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RemediationPlanStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<PlanPhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions_completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default)]
    pub evidence: Vec<EvidenceItem>,
    /// Number of agentic steps taken so far.
    #[serde(default)]
    pub agentic_step_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agentic_started_at: Option<DateTime<Utc>>,
}

impl RemediationPlan {
    /// Current lifecycle state; a plan without status is still `Pending`.
    pub fn phase(&self) -> PlanPhase {
        self.status
            .as_ref()
            .and_then(|s| s.state)
            .unwrap_or(PlanPhase::Pending)
    }

    /// The agentic step cap, falling back to the default when unset.
    pub fn agentic_max_steps(&self) -> u32 {
        if self.spec.agentic_max_steps > 0 {
            self.spec.agentic_max_steps
        } else {
            DEFAULT_AGENTIC_MAX_STEPS
        }
    }

    /// Read a list annotation split on the annotation separator.
    pub fn annotation_list(&self, key: &str) -> Vec<String> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(|v| {
                v.split(ANNOTATION_LIST_SEPARATOR)
                    .filter(|s| !s.is_empty())
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Read a plain annotation value.
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn plan() -> RemediationPlan {
        RemediationPlan::new(
            "issue-1-plan-1",
            RemediationPlanSpec {
                issue_ref: "issue-1".into(),
                attempt: 1,
                strategy: String::new(),
                actions: vec![],
                safety_constraints: vec![],
                agentic_mode: true,
                agentic_history: vec![],
                agentic_max_steps: 0,
            },
        )
    }

    #[test]
    fn test_phase_defaults_to_pending() {
        assert_eq!(plan().phase(), PlanPhase::Pending);
    }

    #[test]
    fn test_agentic_max_steps_default() {
        assert_eq!(plan().agentic_max_steps(), DEFAULT_AGENTIC_MAX_STEPS);
        let mut p = plan();
        p.spec.agentic_max_steps = 4;
        assert_eq!(p.agentic_max_steps(), 4);
    }

    #[test]
    fn test_step_record_outcome() {
        let mut rec = AgenticStepRecord {
            step_number: 1,
            ai_message: "scale it up".into(),
            action: Some("ScaleDeployment".into()),
            params: None,
            observation: "SUCCESS: replicas set to 4".into(),
            timestamp: Utc::now(),
        };
        assert!(rec.succeeded());

        rec.observation = "FAILED: deployment not found".into();
        assert!(!rec.succeeded());

        rec.action = None;
        rec.observation = "pods still pending".into();
        assert!(!rec.succeeded());
    }

    #[test]
    fn test_annotation_list_split() {
        let mut p = plan();
        p.metadata.annotations = Some(
            [(
                LESSONS_LEARNED_ANNOTATION.to_string(),
                format!("watch memory{}add alerts", ANNOTATION_LIST_SEPARATOR),
            )]
            .into_iter()
            .collect(),
        );
        assert_eq!(
            p.annotation_list(LESSONS_LEARNED_ANNOTATION),
            vec!["watch memory".to_string(), "add alerts".to_string()]
        );
        assert!(p.annotation_list(PREVENTION_ACTIONS_ANNOTATION).is_empty());
    }

    #[test]
    fn test_terminal_phases() {
        assert!(PlanPhase::Completed.is_terminal());
        assert!(PlanPhase::Failed.is_terminal());
        assert!(PlanPhase::RolledBack.is_terminal());
        assert!(!PlanPhase::Verifying.is_terminal());
    }
}
