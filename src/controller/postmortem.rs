//! PostMortem lifecycle and generation from resolved agentic sessions.
//!
//! The reconciler only opens fresh reviews; `InReview` and `Closed` are
//! driven by humans. Generation turns a resolved agentic plan's history
//! and annotations into the narrative artifact.

use chrono::{DateTime, Utc};
use kube::api::Api;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::api::{
    sanitize_name, ActionRecord, Issue, PostMortem, PostMortemPhase, PostMortemSpec,
    PostMortemStatus, RemediationPlan, TimelineEntry, IMPACT_ANNOTATION, ISSUE_LABEL,
    LESSONS_LEARNED_ANNOTATION, POSTMORTEM_SUMMARY_ANNOTATION, PREVENTION_ACTIONS_ANNOTATION,
    ROOT_CAUSE_ANNOTATION, SEVERITY_LABEL,
};
use crate::controller::{patch_status, requeue_for, Context};
use crate::error::{Error, Result};

#[instrument(skip(ctx, postmortem), fields(postmortem = %postmortem.name_any()))]
pub async fn reconcile(postmortem: Arc<PostMortem>, ctx: Arc<Context>) -> Result<Action> {
    let state = postmortem.status.as_ref().and_then(|s| s.state);
    if state.is_some() {
        // InReview/Closed transitions belong to external actors.
        return Ok(Action::await_change());
    }

    let namespace = postmortem.namespace().unwrap_or_else(|| "default".into());
    let api: Api<PostMortem> = Api::namespaced(ctx.client.clone(), &namespace);
    patch_status(
        &api,
        &postmortem.name_any(),
        json!({ "state": PostMortemPhase::Open }),
    )
    .await?;
    info!(postmortem = %postmortem.name_any(), "review opened");
    Ok(Action::await_change())
}

pub fn error_policy(_postmortem: Arc<PostMortem>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(error = %error, "postmortem reconcile failed");
    requeue_for(error)
}

/// Name of the review generated for an Issue.
pub fn postmortem_name(issue_name: &str) -> String {
    sanitize_name(&format!("pm-{}", issue_name))
}

/// Build the review object and its status from a resolved agentic plan.
pub fn build_postmortem(
    issue: &Issue,
    plan: &RemediationPlan,
    resolved_at: DateTime<Utc>,
) -> (PostMortem, PostMortemStatus) {
    let issue_name = issue.name_any();
    let detected_at = issue
        .status
        .as_ref()
        .and_then(|s| s.detected_at)
        .or_else(|| issue.creation_timestamp().map(|t| t.0))
        .unwrap_or(resolved_at);

    let mut timeline = vec![TimelineEntry {
        timestamp: detected_at,
        event: "detected".into(),
        description: issue.spec.description.clone(),
    }];
    for step in &plan.spec.agentic_history {
        let failed = step.observation.starts_with("FAILED:");
        let description = match &step.action {
            Some(action) => format!("{}: {}", action, step.observation),
            None => {
                if step.ai_message.is_empty() {
                    step.observation.clone()
                } else {
                    step.ai_message.clone()
                }
            }
        };
        timeline.push(TimelineEntry {
            timestamp: step.timestamp,
            event: if failed { "action_failed" } else { "action_executed" }.into(),
            description,
        });
    }
    timeline.push(TimelineEntry {
        timestamp: resolved_at,
        event: "resolved".into(),
        description: plan
            .status
            .as_ref()
            .and_then(|s| s.result.clone())
            .unwrap_or_else(|| "remediation completed".into()),
    });

    let actions: Vec<ActionRecord> = plan
        .spec
        .agentic_history
        .iter()
        .filter_map(|step| {
            step.action.as_ref().map(|action| ActionRecord {
                name: format!("step-{}", step.step_number),
                action: action.clone(),
                outcome: if step.observation.starts_with("FAILED:") {
                    "failed".into()
                } else {
                    "success".into()
                },
                observation: step.observation.clone(),
            })
        })
        .collect();

    let duration_ms = (resolved_at - detected_at).num_milliseconds();
    let duration_seconds = (duration_ms as f64 / 1000.0).round() as i64;

    let status = PostMortemStatus {
        state: None,
        summary: plan
            .annotation(POSTMORTEM_SUMMARY_ANNOTATION)
            .unwrap_or_default()
            .to_string(),
        root_cause: plan
            .annotation(ROOT_CAUSE_ANNOTATION)
            .unwrap_or_default()
            .to_string(),
        impact: plan
            .annotation(IMPACT_ANNOTATION)
            .unwrap_or_default()
            .to_string(),
        timeline,
        actions,
        lessons_learned: plan.annotation_list(LESSONS_LEARNED_ANNOTATION),
        prevention_actions: plan.annotation_list(PREVENTION_ACTIONS_ANNOTATION),
        duration_seconds,
        generated_at: Some(resolved_at),
    };

    let mut labels: BTreeMap<String, String> = BTreeMap::new();
    labels.insert(ISSUE_LABEL.into(), issue_name.clone());
    labels.insert(SEVERITY_LABEL.into(), issue.spec.severity.to_string());

    let mut postmortem = PostMortem::new(
        &postmortem_name(&issue_name),
        PostMortemSpec {
            issue_ref: issue_name,
            resource: issue.spec.resource.clone(),
            severity: issue.spec.severity,
        },
    );
    postmortem.metadata.namespace = issue.namespace();
    postmortem.metadata.labels = Some(labels);

    (postmortem, status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{
        AgenticStepRecord, IssueSpec, IssueStatus, RemediationPlanSpec, RemediationPlanStatus,
        ResourceRef, Severity, SignalType, ANNOTATION_LIST_SEPARATOR,
    };
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn fixture() -> (Issue, RemediationPlan, DateTime<Utc>) {
        let detected = Utc::now() - Duration::seconds(300);
        let resolved = detected + Duration::seconds(312);

        let mut issue = Issue::new(
            "payments-api-oom-kill-1754000000",
            IssueSpec {
                severity: Severity::Critical,
                source: "watcher".into(),
                resource: ResourceRef::deployment("payments-api", "default"),
                description: "container killed by the OOM killer".into(),
                incident_id: "INC-20260801-003".into(),
                risk_score: 40,
                signal_type: SignalType::OomKill,
            },
        );
        issue.metadata.namespace = Some("default".into());
        issue.status = Some(IssueStatus {
            detected_at: Some(detected),
            ..Default::default()
        });

        let mut plan = RemediationPlan::new(
            "payments-api-oom-kill-1754000000-plan-1",
            RemediationPlanSpec {
                issue_ref: issue.name_any(),
                attempt: 1,
                strategy: String::new(),
                actions: vec![],
                safety_constraints: vec![],
                agentic_mode: true,
                agentic_history: vec![
                    AgenticStepRecord {
                        step_number: 1,
                        ai_message: "raise the memory limit".into(),
                        action: Some("AdjustResources".into()),
                        params: None,
                        observation: "FAILED: limit below request".into(),
                        timestamp: detected + Duration::seconds(60),
                    },
                    AgenticStepRecord {
                        step_number: 2,
                        ai_message: "raise both limit and request".into(),
                        action: Some("AdjustResources".into()),
                        params: None,
                        observation: "SUCCESS: resources adjusted on container app".into(),
                        timestamp: detected + Duration::seconds(120),
                    },
                ],
                agentic_max_steps: 10,
            },
        );
        plan.status = Some(RemediationPlanStatus {
            result: Some("remediation verified: deployment healthy".into()),
            ..Default::default()
        });
        plan.metadata.annotations = Some(
            [
                (POSTMORTEM_SUMMARY_ANNOTATION.to_string(), "oom fixed".to_string()),
                (ROOT_CAUSE_ANNOTATION.to_string(), "memory limit too low".to_string()),
                (IMPACT_ANNOTATION.to_string(), "restarts for 5m".to_string()),
                (
                    LESSONS_LEARNED_ANNOTATION.to_string(),
                    format!("profile memory{}watch usage", ANNOTATION_LIST_SEPARATOR),
                ),
                (PREVENTION_ACTIONS_ANNOTATION.to_string(), "add alerts".to_string()),
            ]
            .into_iter()
            .collect(),
        );

        (issue, plan, resolved)
    }

    #[test]
    fn test_postmortem_name_truncated() {
        let long = "a".repeat(80);
        let name = postmortem_name(&long);
        assert!(name.starts_with("pm-"));
        assert!(name.len() <= crate::api::MAX_NAME_LEN);
    }

    #[test]
    fn test_timeline_composition() {
        let (issue, plan, resolved) = fixture();
        let (_, status) = build_postmortem(&issue, &plan, resolved);

        let events: Vec<&str> = status.timeline.iter().map(|e| e.event.as_str()).collect();
        assert_eq!(
            events,
            vec!["detected", "action_failed", "action_executed", "resolved"]
        );
        assert!(status.timeline[0]
            .description
            .contains("OOM killer"));
        assert_eq!(
            status.timeline[3].description,
            "remediation verified: deployment healthy"
        );
    }

    #[test]
    fn test_action_records_and_outcomes() {
        let (issue, plan, resolved) = fixture();
        let (_, status) = build_postmortem(&issue, &plan, resolved);

        assert_eq!(status.actions.len(), 2);
        assert_eq!(status.actions[0].outcome, "failed");
        assert_eq!(status.actions[1].outcome, "success");
        assert_eq!(status.actions[1].name, "step-2");
    }

    #[test]
    fn test_narrative_fields_and_duration() {
        let (issue, plan, resolved) = fixture();
        let (pm, status) = build_postmortem(&issue, &plan, resolved);

        assert_eq!(status.summary, "oom fixed");
        assert_eq!(status.root_cause, "memory limit too low");
        assert_eq!(status.impact, "restarts for 5m");
        assert_eq!(status.lessons_learned.len(), 2);
        assert_eq!(status.prevention_actions, vec!["add alerts".to_string()]);
        assert_eq!(status.duration_seconds, 312);

        let labels = pm.metadata.labels.as_ref().unwrap();
        assert_eq!(labels.get(ISSUE_LABEL).unwrap(), "payments-api-oom-kill-1754000000");
        assert_eq!(labels.get(SEVERITY_LABEL).unwrap(), "critical");
        assert_eq!(pm.name_any(), "pm-payments-api-oom-kill-1754000000");
    }

    #[test]
    fn test_state_left_for_lifecycle_reconciler() {
        let (issue, plan, resolved) = fixture();
        let (_, status) = build_postmortem(&issue, &plan, resolved);
        assert_eq!(status.state, None);
    }
}
