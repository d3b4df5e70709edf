//! Agentic remediation loop: one AI-chosen step per reconcile.
//!
//! Each reconcile of an executing agentic plan performs at most one step
//! until resolution or exhaustion. The conversation history lives in the
//! plan's spec and is persisted before any status write, so a conflict
//! never loses a step.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use kube::api::{Api, PostParams};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::api::{
    ActionSpec, AgenticStepRecord, Issue, PlanPhase, RemediationPlan, IMPACT_ANNOTATION,
    ANNOTATION_LIST_SEPARATOR, LESSONS_LEARNED_ANNOTATION, POSTMORTEM_SUMMARY_ANNOTATION,
    PREVENTION_ACTIONS_ANNOTATION, ROOT_CAUSE_ANNOTATION,
};
use crate::backend::{first_ready_instance, AgenticRequest, IssueSummary, PostMortemNotes};
use crate::context::build_workload_context;
use crate::controller::plan::{existing_evidence, fail_plan};
use crate::controller::{actions, patch_status, Context};
use crate::error::Result;

/// Wall-clock cap on one agentic session.
pub const SESSION_TIMEOUT_MINUTES: i64 = 10;

const CONNECTIVITY_RETRY: Duration = Duration::from_secs(15);
const RPC_RETRY: Duration = Duration::from_secs(30);
const OBSERVE_REQUEUE: Duration = Duration::from_secs(10);
const ACTION_REQUEUE: Duration = Duration::from_secs(5);

/// Why a session must stop before asking the model for another step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepGuard {
    Proceed,
    StepCapExceeded,
    SessionTimeout,
}

/// Safety caps checked before every step.
pub fn step_guard(
    next_step: u32,
    max_steps: u32,
    started_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> StepGuard {
    if next_step > max_steps {
        return StepGuard::StepCapExceeded;
    }
    if let Some(started) = started_at {
        if now - started > ChronoDuration::minutes(SESSION_TIMEOUT_MINUTES) {
            return StepGuard::SessionTimeout;
        }
    }
    StepGuard::Proceed
}

/// Observation string for an executed action.
pub fn observation_for(result: &Result<String>) -> String {
    match result {
        Ok(outcome) => format!("SUCCESS: {}", outcome),
        Err(err) => format!("FAILED: {}", err),
    }
}

#[instrument(skip(ctx, plan), fields(plan = %plan.name_any()))]
pub async fn step(plan: &RemediationPlan, ctx: &Context) -> Result<Action> {
    let namespace = plan.namespace().unwrap_or_else(|| "default".into());
    let api: Api<RemediationPlan> = Api::namespaced(ctx.client.clone(), &namespace);

    let step_count = plan
        .status
        .as_ref()
        .map(|s| s.agentic_step_count)
        .unwrap_or(0);
    let started_at = plan.status.as_ref().and_then(|s| s.agentic_started_at);
    let next_step = step_count + 1;

    match step_guard(next_step, plan.agentic_max_steps(), started_at, Utc::now()) {
        StepGuard::StepCapExceeded => {
            fail_plan(
                &api,
                plan,
                &format!("agentic session exhausted {} steps", plan.agentic_max_steps()),
                existing_evidence(plan),
            )
            .await?;
            return Ok(Action::await_change());
        }
        StepGuard::SessionTimeout => {
            fail_plan(
                &api,
                plan,
                &format!(
                    "agentic session exceeded {} minutes",
                    SESSION_TIMEOUT_MINUTES
                ),
                existing_evidence(plan),
            )
            .await?;
            return Ok(Action::await_change());
        }
        StepGuard::Proceed => {}
    }

    if !ctx.backend.connected().await {
        return Ok(Action::requeue(CONNECTIVITY_RETRY));
    }

    let issues: Api<Issue> = Api::namespaced(ctx.client.clone(), &namespace);
    let issue = match issues.get_opt(&plan.spec.issue_ref).await? {
        Some(issue) => issue,
        None => {
            fail_plan(&api, plan, "parent issue no longer exists", existing_evidence(plan))
                .await?;
            return Ok(Action::await_change());
        }
    };

    let (provider, model) = match first_ready_instance(ctx.client.clone()).await? {
        Some(instance) => (
            instance.spec.ai.provider.clone(),
            instance.spec.ai.model.clone(),
        ),
        None => return Ok(Action::requeue(CONNECTIVITY_RETRY)),
    };

    let k8s_context = build_workload_context(ctx.client.clone(), &issue.spec.resource).await?;
    let request = AgenticRequest {
        context: IssueSummary::from_issue(&issue),
        k8s_context,
        history: plan.spec.agentic_history.clone(),
        current_step: next_step,
        max_steps: plan.agentic_max_steps(),
        provider,
        model,
    };

    let outcome = match ctx.backend.agentic_step(request).await {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!(error = %err, "agentic step RPC failed, retrying");
            return Ok(Action::requeue(RPC_RETRY));
        }
    };

    if outcome.resolved {
        let record = AgenticStepRecord {
            step_number: next_step,
            ai_message: outcome.reasoning.clone(),
            action: None,
            params: None,
            observation: "session resolved".into(),
            timestamp: Utc::now(),
        };
        persist_step(&api, plan, record, Some(&outcome.postmortem)).await?;
        patch_status(
            &api,
            &plan.name_any(),
            json!({
                "state": PlanPhase::Verifying,
                "actionsCompletedAt": Utc::now(),
                "agenticStepCount": next_step,
                "result": "agentic session reports resolution",
            }),
        )
        .await?;
        info!(plan = %plan.name_any(), step = next_step, "agentic session resolved, verifying");
        return Ok(Action::requeue(OBSERVE_REQUEUE));
    }

    let (record, requeue) = match &outcome.next_action {
        None => (
            AgenticStepRecord {
                step_number: next_step,
                ai_message: outcome.reasoning.clone(),
                action: None,
                params: None,
                observation: "no action taken".into(),
                timestamp: Utc::now(),
            },
            OBSERVE_REQUEUE,
        ),
        Some(proposed) => {
            let action = ActionSpec {
                name: format!("step-{}", next_step),
                action: proposed.action.clone(),
                description: outcome.reasoning.clone(),
                params: proposed.params.clone(),
            };
            // Same handlers and safety dispatch as scripted mode.
            let result =
                actions::execute(ctx.client.clone(), &issue.spec.resource, &action).await;
            let observation = observation_for(&result);
            (
                AgenticStepRecord {
                    step_number: next_step,
                    ai_message: outcome.reasoning.clone(),
                    action: Some(proposed.action.clone()),
                    params: Some(proposed.params.clone()),
                    observation,
                    timestamp: Utc::now(),
                },
                ACTION_REQUEUE,
            )
        }
    };

    persist_step(&api, plan, record, None).await?;

    let mut status = json!({ "agenticStepCount": next_step });
    if started_at.is_none() {
        status["agenticStartedAt"] = json!(Utc::now());
    }
    patch_status(&api, &plan.name_any(), status).await?;

    Ok(Action::requeue(requeue))
}

/// Append a history entry (and post-mortem annotations on resolution) and
/// persist the spec. Spec goes first; a conflict here surfaces as an error
/// and requeues immediately with fresh state.
async fn persist_step(
    api: &Api<RemediationPlan>,
    plan: &RemediationPlan,
    record: AgenticStepRecord,
    postmortem: Option<&PostMortemNotes>,
) -> Result<RemediationPlan> {
    let mut updated = plan.clone();
    updated.spec.agentic_history.push(record);
    if let Some(notes) = postmortem {
        let annotations = updated
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new);
        annotations.insert(POSTMORTEM_SUMMARY_ANNOTATION.into(), notes.summary.clone());
        annotations.insert(ROOT_CAUSE_ANNOTATION.into(), notes.root_cause.clone());
        annotations.insert(IMPACT_ANNOTATION.into(), notes.impact.clone());
        annotations.insert(
            LESSONS_LEARNED_ANNOTATION.into(),
            notes.lessons_learned.join(ANNOTATION_LIST_SEPARATOR),
        );
        annotations.insert(
            PREVENTION_ACTIONS_ANNOTATION.into(),
            notes.prevention_actions.join(ANNOTATION_LIST_SEPARATOR),
        );
    }
    Ok(api
        .replace(&plan.name_any(), &PostParams::default(), &updated)
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_step_guard_cap() {
        let now = Utc::now();
        assert_eq!(step_guard(10, 10, None, now), StepGuard::Proceed);
        assert_eq!(step_guard(11, 10, None, now), StepGuard::StepCapExceeded);
    }

    #[test]
    fn test_step_guard_timeout() {
        let now = Utc::now();
        let fresh = now - ChronoDuration::minutes(5);
        let stale = now - ChronoDuration::minutes(11);
        assert_eq!(step_guard(2, 10, Some(fresh), now), StepGuard::Proceed);
        assert_eq!(step_guard(2, 10, Some(stale), now), StepGuard::SessionTimeout);
    }

    #[test]
    fn test_step_guard_cap_wins_over_timeout() {
        let now = Utc::now();
        let stale = now - ChronoDuration::minutes(30);
        assert_eq!(
            step_guard(11, 10, Some(stale), now),
            StepGuard::StepCapExceeded
        );
    }

    #[test]
    fn test_observation_prefixes() {
        let ok: Result<String> = Ok("replicas set to 4".into());
        assert_eq!(observation_for(&ok), "SUCCESS: replicas set to 4");

        let err: Result<String> = Err(Error::safety("no"));
        assert!(observation_for(&err).starts_with("FAILED:"));
    }
}
