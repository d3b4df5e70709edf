//! RemediationPlan reconciler: scripted execution and verification.
//!
//! State machine: `Pending -> Executing -> Verifying -> Completed |
//! Failed | RolledBack`. Scripted plans run their action list in order
//! behind the safety gate; agentic plans hand each `Executing` reconcile
//! to the agentic loop.

use chrono::Utc;
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::Api;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::api::{EvidenceItem, Issue, PlanPhase, RemediationPlan};
use crate::controller::{actions, agentic, patch_status, requeue_for, Context};
use crate::error::{Error, Result};

/// How long a plan may sit in Verifying before failing.
pub const VERIFY_TIMEOUT_SECS: i64 = 90;
/// Poll interval while waiting for rollout health.
const VERIFY_REQUEUE: Duration = Duration::from_secs(10);
/// Nudge after a state transition.
const TRANSITION_REQUEUE: Duration = Duration::from_secs(1);

#[instrument(skip(ctx, plan), fields(plan = %plan.name_any()))]
pub async fn reconcile(plan: Arc<RemediationPlan>, ctx: Arc<Context>) -> Result<Action> {
    match plan.phase() {
        PlanPhase::Pending => pending(&plan, &ctx).await,
        PlanPhase::Executing => {
            if plan.spec.agentic_mode {
                agentic::step(&plan, &ctx).await
            } else {
                execute_scripted(&plan, &ctx).await
            }
        }
        PlanPhase::Verifying => verify(&plan, &ctx).await,
        PlanPhase::Completed | PlanPhase::Failed | PlanPhase::RolledBack => {
            Ok(Action::await_change())
        }
    }
}

pub fn error_policy(_plan: Arc<RemediationPlan>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(error = %error, "plan reconcile failed");
    requeue_for(error)
}

fn plan_api(ctx: &Context, plan: &RemediationPlan) -> Api<RemediationPlan> {
    let namespace = plan.namespace().unwrap_or_else(|| "default".into());
    Api::namespaced(ctx.client.clone(), &namespace)
}

/// Load the parent Issue; a missing parent is fatal for the plan.
async fn parent_issue(ctx: &Context, plan: &RemediationPlan) -> Result<Option<Issue>> {
    let namespace = plan.namespace().unwrap_or_else(|| "default".into());
    let issues: Api<Issue> = Api::namespaced(ctx.client.clone(), &namespace);
    Ok(issues.get_opt(&plan.spec.issue_ref).await?)
}

/// Mark the plan failed with a result and the evidence collected so far.
pub(crate) async fn fail_plan(
    api: &Api<RemediationPlan>,
    plan: &RemediationPlan,
    reason: &str,
    evidence: Vec<EvidenceItem>,
) -> Result<()> {
    warn!(plan = %plan.name_any(), reason, "plan failed");
    patch_status(
        api,
        &plan.name_any(),
        json!({
            "state": PlanPhase::Failed,
            "result": reason,
            "completedAt": Utc::now(),
            "evidence": serde_json::to_value(&evidence)?,
        }),
    )
    .await?;
    Ok(())
}

/// Evidence already on the plan's status.
pub(crate) fn existing_evidence(plan: &RemediationPlan) -> Vec<EvidenceItem> {
    plan.status
        .as_ref()
        .map(|s| s.evidence.clone())
        .unwrap_or_default()
}

async fn pending(plan: &RemediationPlan, ctx: &Context) -> Result<Action> {
    let api = plan_api(ctx, plan);

    if !plan.spec.agentic_mode {
        if let Err(err) = actions::validate_safety(&plan.spec.actions) {
            let evidence = vec![EvidenceItem::new("error", err.to_string())];
            fail_plan(&api, plan, &format!("safety validation failed: {}", err), evidence)
                .await?;
            return Ok(Action::await_change());
        }
    }

    patch_status(
        &api,
        &plan.name_any(),
        json!({ "state": PlanPhase::Executing, "startedAt": Utc::now() }),
    )
    .await?;
    Ok(Action::requeue(TRANSITION_REQUEUE))
}

async fn execute_scripted(plan: &RemediationPlan, ctx: &Context) -> Result<Action> {
    let api = plan_api(ctx, plan);

    let issue = match parent_issue(ctx, plan).await? {
        Some(issue) => issue,
        None => {
            fail_plan(&api, plan, "parent issue no longer exists", existing_evidence(plan))
                .await?;
            return Ok(Action::await_change());
        }
    };
    let resource = &issue.spec.resource;

    let mut evidence = existing_evidence(plan);
    match actions::preflight_snapshot(ctx.client.clone(), resource).await {
        Ok(snapshot) => evidence.push(EvidenceItem::new("preflight", snapshot)),
        Err(err) => {
            evidence.push(EvidenceItem::new("error", err.to_string()));
            fail_plan(&api, plan, &format!("preflight failed: {}", err), evidence).await?;
            return Ok(Action::await_change());
        }
    }

    for action in &plan.spec.actions {
        match actions::execute(ctx.client.clone(), resource, action).await {
            Ok(outcome) => {
                evidence.push(EvidenceItem::new(
                    "action",
                    format!("{}: {}", action.action, outcome),
                ));
            }
            Err(err) => {
                evidence.push(EvidenceItem::new(
                    "error",
                    format!("{}: {}", action.action, err),
                ));
                fail_plan(
                    &api,
                    plan,
                    &format!("action {} failed: {}", action.action, err),
                    evidence,
                )
                .await?;
                return Ok(Action::await_change());
            }
        }
    }

    patch_status(
        &api,
        &plan.name_any(),
        json!({
            "state": PlanPhase::Verifying,
            "actionsCompletedAt": Utc::now(),
            "evidence": serde_json::to_value(&evidence)?,
        }),
    )
    .await?;
    info!(plan = %plan.name_any(), actions = plan.spec.actions.len(), "actions executed, verifying");
    Ok(Action::requeue(VERIFY_REQUEUE))
}

/// Rollout health predicate for verification.
pub fn deployment_healthy(deployment: &Deployment) -> bool {
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let status = match &deployment.status {
        Some(status) => status,
        None => return false,
    };
    status.ready_replicas.unwrap_or(0) >= desired
        && status.updated_replicas.unwrap_or(0) >= desired
        && status.unavailable_replicas.unwrap_or(0) == 0
}

async fn verify(plan: &RemediationPlan, ctx: &Context) -> Result<Action> {
    let api = plan_api(ctx, plan);

    let issue = match parent_issue(ctx, plan).await? {
        Some(issue) => issue,
        None => {
            fail_plan(&api, plan, "parent issue no longer exists", existing_evidence(plan))
                .await?;
            return Ok(Action::await_change());
        }
    };
    let resource = &issue.spec.resource;

    let deployments: Api<Deployment> = Api::namespaced(ctx.client.clone(), &resource.namespace);
    let deployment = match deployments.get_opt(&resource.name).await? {
        Some(deployment) => deployment,
        None => {
            let mut evidence = existing_evidence(plan);
            evidence.push(EvidenceItem::new(
                "error",
                format!("deployment {} disappeared during verification", resource.name),
            ));
            fail_plan(&api, plan, "target deployment missing", evidence).await?;
            return Ok(Action::await_change());
        }
    };

    if deployment_healthy(&deployment) {
        let mut evidence = existing_evidence(plan);
        evidence.push(EvidenceItem::new(
            "verification",
            format!(
                "deployment {} healthy: ready={} updated={} unavailable=0",
                resource.name,
                deployment
                    .status
                    .as_ref()
                    .and_then(|s| s.ready_replicas)
                    .unwrap_or(0),
                deployment
                    .status
                    .as_ref()
                    .and_then(|s| s.updated_replicas)
                    .unwrap_or(0),
            ),
        ));
        patch_status(
            &api,
            &plan.name_any(),
            json!({
                "state": PlanPhase::Completed,
                "completedAt": Utc::now(),
                "result": "remediation verified: deployment healthy",
                "evidence": serde_json::to_value(&evidence)?,
            }),
        )
        .await?;
        info!(plan = %plan.name_any(), "plan completed");
        return Ok(Action::await_change());
    }

    let anchor = plan
        .status
        .as_ref()
        .and_then(|s| s.actions_completed_at)
        .unwrap_or_else(Utc::now);
    if (Utc::now() - anchor).num_seconds() > VERIFY_TIMEOUT_SECS {
        fail_plan(
            &api,
            plan,
            &format!(
                "verification timed out after {}s: deployment not healthy",
                VERIFY_TIMEOUT_SECS
            ),
            existing_evidence(plan),
        )
        .await?;
        return Ok(Action::await_change());
    }

    Ok(Action::requeue(VERIFY_REQUEUE))
}
