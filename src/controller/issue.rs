//! Issue reconciler: the central incident state machine.
//!
//! `Detected -> Analyzing -> Remediating -> Resolved`, with re-analysis
//! back-edges on failed attempts and escalation once the attempt cap is
//! hit. Every transition is a durable status write, so the machine is
//! crash-safe at each edge.

use chrono::Utc;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::finalizer::{finalizer, Event as Finalizer};
use kube::{Resource, ResourceExt};
use serde_json::json;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::api::{
    sanitize_name, AIInsight, AIInsightSpec, AIInsightStatus, Issue, IssuePhase, PlanPhase,
    PostMortemStatus, RemediationPlan, RemediationPlanSpec, Runbook, DEFAULT_AGENTIC_MAX_STEPS,
    FAILURE_CONTEXT_ANNOTATION, ISSUE_FINALIZER,
};
use crate::backend::first_ready_instance;
use crate::controller::{create_if_absent, patch_status, postmortem, requeue_for, Context};
use crate::error::{Error, Result};
use crate::runbook::{find_matching_runbook, learned_runbook, synthesize_runbook};

/// Poll interval while waiting for analysis or remediation progress.
const PROGRESS_REQUEUE: Duration = Duration::from_secs(10);
/// Backoff while no inference instance is ready.
const CONNECTIVITY_RETRY: Duration = Duration::from_secs(15);

/// Constraints stamped on scripted plans.
pub const SCRIPTED_SAFETY_CONSTRAINTS: [&str; 3] = [
    "No delete operations",
    "No destructive changes",
    "Rollback on failure",
];

/// Constraints stamped on agentic plans.
pub const AGENTIC_SAFETY_CONSTRAINTS: [&str; 2] = [
    "No scaling to 0 replicas",
    "No delete operations without pod count check",
];

#[instrument(skip(ctx, issue), fields(issue = %issue.name_any()))]
pub async fn reconcile(issue: Arc<Issue>, ctx: Arc<Context>) -> Result<Action> {
    let namespace = issue.namespace().unwrap_or_else(|| "default".into());
    let api: Api<Issue> = Api::namespaced(ctx.client.clone(), &namespace);

    finalizer(&api, ISSUE_FINALIZER, issue, |event| async {
        match event {
            Finalizer::Apply(issue) => apply(issue, ctx.clone()).await,
            Finalizer::Cleanup(issue) => cleanup(issue).await,
        }
    })
    .await
    .map_err(|e| Error::Finalizer(e.to_string()))
}

pub fn error_policy(_issue: Arc<Issue>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(error = %error, "issue reconcile failed");
    requeue_for(error)
}

/// Owner garbage collection handles children; nothing else to release.
async fn cleanup(issue: Arc<Issue>) -> Result<Action> {
    info!(issue = %issue.name_any(), "issue deleted");
    Ok(Action::await_change())
}

async fn apply(issue: Arc<Issue>, ctx: Arc<Context>) -> Result<Action> {
    match issue.phase() {
        IssuePhase::Detected => detected(&issue, &ctx).await,
        IssuePhase::Analyzing => analyzing(&issue, &ctx).await,
        IssuePhase::Remediating => remediating(&issue, &ctx).await,
        IssuePhase::Resolved | IssuePhase::Escalated | IssuePhase::Failed => {
            Ok(Action::await_change())
        }
    }
}

/// Name of the Issue's analysis record.
pub fn insight_name(issue_name: &str) -> String {
    sanitize_name(&format!("{}-insight", issue_name))
}

/// Name of one remediation attempt's plan.
pub fn plan_name(issue_name: &str, attempt: u32) -> String {
    sanitize_name(&format!("{}-plan-{}", issue_name, attempt))
}

fn issue_api(ctx: &Context, issue: &Issue) -> Api<Issue> {
    let namespace = issue.namespace().unwrap_or_else(|| "default".into());
    Api::namespaced(ctx.client.clone(), &namespace)
}

fn insight_api(ctx: &Context, issue: &Issue) -> Api<AIInsight> {
    let namespace = issue.namespace().unwrap_or_else(|| "default".into());
    Api::namespaced(ctx.client.clone(), &namespace)
}

fn plan_api(ctx: &Context, issue: &Issue) -> Api<RemediationPlan> {
    let namespace = issue.namespace().unwrap_or_else(|| "default".into());
    Api::namespaced(ctx.client.clone(), &namespace)
}

fn owned_by(issue: &Issue, meta: &mut kube::api::ObjectMeta) {
    if let Some(owner) = issue.controller_owner_ref(&()) {
        meta.owner_references = Some(vec![owner]);
    }
}

/// Detected: stamp detection time, default the attempt cap, and ensure
/// the analysis record exists.
async fn detected(issue: &Issue, ctx: &Context) -> Result<Action> {
    let (provider, model) = match first_ready_instance(ctx.client.clone()).await? {
        Some(instance) => (
            instance.spec.ai.provider.clone(),
            instance.spec.ai.model.clone(),
        ),
        None => return Ok(Action::requeue(CONNECTIVITY_RETRY)),
    };

    let mut insight = AIInsight::new(
        &insight_name(&issue.name_any()),
        AIInsightSpec {
            issue_ref: issue.name_any(),
            provider,
            model,
        },
    );
    insight.metadata.namespace = issue.namespace();
    owned_by(issue, &mut insight.metadata);
    create_if_absent(&insight_api(ctx, issue), &insight).await?;

    let detected_at = issue
        .status
        .as_ref()
        .and_then(|s| s.detected_at)
        .unwrap_or_else(Utc::now);
    let max_attempts = issue.max_attempts();

    patch_status(
        &issue_api(ctx, issue),
        &issue.name_any(),
        json!({
            "state": IssuePhase::Analyzing,
            "detectedAt": detected_at,
            "maxRemediationAttempts": max_attempts,
        }),
    )
    .await?;
    info!(issue = %issue.name_any(), "analysis requested");
    Ok(Action::requeue(PROGRESS_REQUEUE))
}

/// Analyzing: wait for the analysis, then pick the plan source with
/// strict precedence (matching runbook, synthesized runbook, agentic).
async fn analyzing(issue: &Issue, ctx: &Context) -> Result<Action> {
    let insights = insight_api(ctx, issue);
    let insight = match insights.get_opt(&insight_name(&issue.name_any())).await? {
        Some(insight) => insight,
        // The record disappeared; fall back through Detected to recreate.
        None => return detected(issue, ctx).await,
    };
    if !insight.is_analyzed() {
        return Ok(Action::requeue(PROGRESS_REQUEUE));
    }
    let insight_status = insight.status.clone().unwrap_or_default();

    let attempt = issue
        .status
        .as_ref()
        .map(|s| s.remediation_attempts)
        .unwrap_or(0)
        + 1;

    let runbook = match find_matching_runbook(ctx.client.clone(), issue).await? {
        Some(runbook) => Some(runbook),
        None => match synthesize_runbook(issue, &insight_status) {
            Some(runbook) => {
                create_if_absent(
                    &Api::namespaced(
                        ctx.client.clone(),
                        &issue.namespace().unwrap_or_else(|| "default".into()),
                    ),
                    &runbook,
                )
                .await?;
                info!(runbook = %runbook.name_any(), "runbook synthesized from analysis");
                Some(runbook)
            }
            None => None,
        },
    };

    let plan = match &runbook {
        Some(runbook) => {
            if runbook.spec.max_attempts > 0 {
                patch_status(
                    &issue_api(ctx, issue),
                    &issue.name_any(),
                    json!({ "maxRemediationAttempts": runbook.spec.max_attempts }),
                )
                .await?;
            }
            build_scripted_plan(issue, runbook, &insight_status.analysis, attempt)
        }
        None => build_agentic_plan(issue, attempt),
    };

    let mut plan = plan;
    owned_by(issue, &mut plan.metadata);
    create_if_absent(&plan_api(ctx, issue), &plan).await?;

    patch_status(
        &issue_api(ctx, issue),
        &issue.name_any(),
        json!({ "state": IssuePhase::Remediating }),
    )
    .await?;
    info!(
        issue = %issue.name_any(),
        plan = %plan.name_any(),
        attempt,
        agentic = plan.spec.agentic_mode,
        "remediation started"
    );
    Ok(Action::requeue(PROGRESS_REQUEUE))
}

/// Build a scripted plan from a runbook's steps.
pub fn build_scripted_plan(
    issue: &Issue,
    runbook: &Runbook,
    analysis: &str,
    attempt: u32,
) -> RemediationPlan {
    let mut plan = RemediationPlan::new(
        &plan_name(&issue.name_any(), attempt),
        RemediationPlanSpec {
            issue_ref: issue.name_any(),
            attempt,
            strategy: format!("Runbook {}: {}", runbook.name_any(), analysis),
            actions: runbook.spec.steps.clone(),
            safety_constraints: SCRIPTED_SAFETY_CONSTRAINTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            agentic_mode: false,
            agentic_history: vec![],
            agentic_max_steps: 0,
        },
    );
    plan.metadata.namespace = issue.namespace();
    plan
}

/// Build an agentic plan for an incident no runbook covers.
pub fn build_agentic_plan(issue: &Issue, attempt: u32) -> RemediationPlan {
    let mut plan = RemediationPlan::new(
        &plan_name(&issue.name_any(), attempt),
        RemediationPlanSpec {
            issue_ref: issue.name_any(),
            attempt,
            strategy: "AI-driven step-by-step remediation".into(),
            actions: vec![],
            safety_constraints: AGENTIC_SAFETY_CONSTRAINTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            agentic_mode: true,
            agentic_history: vec![],
            agentic_max_steps: DEFAULT_AGENTIC_MAX_STEPS,
        },
    );
    plan.metadata.namespace = issue.namespace();
    plan
}

/// All plans belonging to an Issue, newest attempt first.
async fn plans_for_issue(ctx: &Context, issue: &Issue) -> Result<Vec<RemediationPlan>> {
    let api = plan_api(ctx, issue);
    let name = issue.name_any();
    let mut plans: Vec<RemediationPlan> = api
        .list(&ListParams::default())
        .await?
        .items
        .into_iter()
        .filter(|p| p.spec.issue_ref == name)
        .collect();
    plans.sort_by(|a, b| b.spec.attempt.cmp(&a.spec.attempt));
    Ok(plans)
}

/// Remediating: watch the latest plan and drive resolution, retry, or
/// escalation.
async fn remediating(issue: &Issue, ctx: &Context) -> Result<Action> {
    let plans = plans_for_issue(ctx, issue).await?;
    let latest = match plans.first() {
        Some(latest) => latest.clone(),
        None => {
            // The plan vanished; go back and recreate it.
            warn!(issue = %issue.name_any(), "no plan on record, returning to analysis");
            patch_status(
                &issue_api(ctx, issue),
                &issue.name_any(),
                json!({ "state": IssuePhase::Analyzing }),
            )
            .await?;
            return Ok(Action::requeue(PROGRESS_REQUEUE));
        }
    };

    match latest.phase() {
        PlanPhase::Completed => resolve(issue, ctx, &latest).await,
        PlanPhase::Failed | PlanPhase::RolledBack => {
            let attempt = latest.spec.attempt;
            if attempt >= issue.max_attempts() {
                escalate(issue, ctx, attempt).await
            } else {
                retry(issue, ctx, &plans, attempt).await
            }
        }
        _ => Ok(Action::requeue(PROGRESS_REQUEUE)),
    }
}

async fn resolve(issue: &Issue, ctx: &Context, plan: &RemediationPlan) -> Result<Action> {
    let resolved_at = Utc::now();
    let resolution = format!(
        "resolved on attempt {} by plan {}: {}",
        plan.spec.attempt,
        plan.name_any(),
        plan.status
            .as_ref()
            .and_then(|s| s.result.as_deref())
            .unwrap_or("completed")
    );

    patch_status(
        &issue_api(ctx, issue),
        &issue.name_any(),
        json!({
            "state": IssuePhase::Resolved,
            "resolvedAt": resolved_at,
            "resolution": resolution,
        }),
    )
    .await?;

    if plan.spec.agentic_mode && !plan.spec.agentic_history.is_empty() {
        emit_postmortem(issue, ctx, plan, resolved_at).await?;
        if let Some(mut runbook) = learned_runbook(issue, plan) {
            runbook.metadata.namespace = issue.namespace();
            let api = Api::namespaced(
                ctx.client.clone(),
                &issue.namespace().unwrap_or_else(|| "default".into()),
            );
            create_if_absent(&api, &runbook).await?;
            info!(runbook = %runbook.name_any(), "agentic session promoted to runbook");
        }
    }

    let resource = &issue.spec.resource;
    let dropped = ctx.dedup.invalidate(&resource.name, &resource.namespace);
    info!(
        issue = %issue.name_any(),
        dedup_dropped = dropped,
        "issue resolved"
    );
    Ok(Action::await_change())
}

async fn emit_postmortem(
    issue: &Issue,
    ctx: &Context,
    plan: &RemediationPlan,
    resolved_at: chrono::DateTime<Utc>,
) -> Result<()> {
    let (mut pm, status) = postmortem::build_postmortem(issue, plan, resolved_at);
    owned_by(issue, &mut pm.metadata);

    let namespace = issue.namespace().unwrap_or_else(|| "default".into());
    let api: Api<crate::api::PostMortem> = Api::namespaced(ctx.client.clone(), &namespace);
    create_if_absent(&api, &pm).await?;
    patch_status(&api, &pm.name_any(), postmortem_status_value(&status)?).await?;
    info!(postmortem = %pm.name_any(), "postmortem generated");
    Ok(())
}

fn postmortem_status_value(status: &PostMortemStatus) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(status)?)
}

async fn escalate(issue: &Issue, ctx: &Context, attempts: u32) -> Result<Action> {
    patch_status(
        &issue_api(ctx, issue),
        &issue.name_any(),
        json!({
            "state": IssuePhase::Escalated,
            "remediationAttempts": attempts,
            "resolution": format!(
                "escalated after {} failed remediation attempts", attempts
            ),
        }),
    )
    .await?;

    let resource = &issue.spec.resource;
    ctx.dedup.invalidate(&resource.name, &resource.namespace);
    warn!(issue = %issue.name_any(), attempts, "issue escalated");
    Ok(Action::await_change())
}

/// Failure evidence handed to the next analysis round.
pub fn failure_context(plans: &[RemediationPlan]) -> String {
    let mut out = String::new();
    for plan in plans.iter().rev() {
        if !plan.phase().is_terminal() || plan.phase() == PlanPhase::Completed {
            continue;
        }
        let _ = writeln!(
            out,
            "attempt {} ({}): {}",
            plan.spec.attempt,
            plan.spec.strategy,
            plan.status
                .as_ref()
                .and_then(|s| s.result.as_deref())
                .unwrap_or("failed without result"),
        );
        for action in &plan.spec.actions {
            let _ = writeln!(out, "  action {}: {:?}", action.action, action.params);
        }
        if let Some(status) = &plan.status {
            for evidence in &status.evidence {
                let _ = writeln!(out, "  {}: {}", evidence.kind, evidence.data);
            }
        }
    }
    out
}

async fn retry(
    issue: &Issue,
    ctx: &Context,
    plans: &[RemediationPlan],
    attempt: u32,
) -> Result<Action> {
    match request_reanalysis(issue, ctx, plans).await {
        Ok(()) => {
            patch_status(
                &issue_api(ctx, issue),
                &issue.name_any(),
                json!({
                    "state": IssuePhase::Analyzing,
                    "remediationAttempts": attempt,
                }),
            )
            .await?;
            info!(issue = %issue.name_any(), attempt, "re-analysis requested");
            Ok(Action::requeue(PROGRESS_REQUEUE))
        }
        Err(err) => {
            warn!(error = %err, "re-analysis unavailable, retrying with the known runbook");
            match find_matching_runbook(ctx.client.clone(), issue).await? {
                Some(runbook) => {
                    let mut plan =
                        build_scripted_plan(issue, &runbook, "retry without re-analysis", attempt + 1);
                    owned_by(issue, &mut plan.metadata);
                    create_if_absent(&plan_api(ctx, issue), &plan).await?;
                    patch_status(
                        &issue_api(ctx, issue),
                        &issue.name_any(),
                        json!({ "remediationAttempts": attempt }),
                    )
                    .await?;
                    Ok(Action::requeue(PROGRESS_REQUEUE))
                }
                None => escalate(issue, ctx, attempt).await,
            }
        }
    }
}

/// Clear the analysis and hand the failure evidence to the insight so the
/// next round reasons about what went wrong.
async fn request_reanalysis(
    issue: &Issue,
    ctx: &Context,
    plans: &[RemediationPlan],
) -> Result<()> {
    let insights = insight_api(ctx, issue);
    let name = insight_name(&issue.name_any());
    if insights.get_opt(&name).await?.is_none() {
        return Err(Error::missing("AIInsight", &name));
    }

    let context = failure_context(plans);
    insights
        .patch(
            &name,
            &PatchParams::default(),
            &Patch::Merge(&json!({
                "metadata": { "annotations": { FAILURE_CONTEXT_ANNOTATION: context } }
            })),
        )
        .await?;

    let cleared = AIInsightStatus::default();
    patch_status(
        &insights,
        &name,
        json!({
            "analysis": cleared.analysis,
            "confidence": cleared.confidence,
            "recommendations": cleared.recommendations,
            "suggestedActions": cleared.suggested_actions,
        }),
    )
    .await?;
    Ok(())
}
