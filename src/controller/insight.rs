//! AIInsight reconciler: fills analysis from the inference backend.
//!
//! This reconciler never reports fatal errors for backend trouble, so a
//! transient outage self-heals through requeues.

use chrono::Utc;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::api::{AIInsight, Issue, FAILURE_CONTEXT_ANNOTATION};
use crate::backend::{AnalysisRequest, IssueSummary};
use crate::context::build_workload_context;
use crate::controller::{patch_status, requeue_for, Context};
use crate::error::{Error, Result};

/// Backoff while the backend has no connection.
const CONNECTIVITY_RETRY: Duration = Duration::from_secs(15);
/// Backoff after a failed analysis RPC.
const RPC_RETRY: Duration = Duration::from_secs(30);
/// Backoff while the parent Issue has not materialized yet.
const ISSUE_WAIT: Duration = Duration::from_secs(10);

#[instrument(skip(ctx, insight), fields(insight = %insight.name_any()))]
pub async fn reconcile(insight: Arc<AIInsight>, ctx: Arc<Context>) -> Result<Action> {
    if insight.is_analyzed() {
        return Ok(Action::await_change());
    }

    if !ctx.backend.connected().await {
        return Ok(Action::requeue(CONNECTIVITY_RETRY));
    }

    let namespace = insight.namespace().unwrap_or_else(|| "default".into());
    let issues: Api<Issue> = Api::namespaced(ctx.client.clone(), &namespace);
    let issue = match issues.get_opt(&insight.spec.issue_ref).await? {
        Some(issue) => issue,
        None => return Ok(Action::requeue(ISSUE_WAIT)),
    };

    let k8s_context = build_workload_context(ctx.client.clone(), &issue.spec.resource).await?;
    let failure_context = insight
        .annotations()
        .get(FAILURE_CONTEXT_ANNOTATION)
        .cloned()
        .unwrap_or_default();

    let request = AnalysisRequest {
        context: IssueSummary::from_issue(&issue),
        k8s_context,
        failure_context: failure_context.clone(),
        provider: insight.spec.provider.clone(),
        model: insight.spec.model.clone(),
    };

    let analysis = match ctx.backend.analyze_issue(request).await {
        Ok(analysis) => analysis,
        Err(err) => {
            warn!(error = %err, "analysis RPC failed, retrying");
            return Ok(Action::requeue(RPC_RETRY));
        }
    };

    let api: Api<AIInsight> = Api::namespaced(ctx.client.clone(), &namespace);
    let name = insight.name_any();
    patch_status(
        &api,
        &name,
        json!({
            "analysis": analysis.analysis,
            "confidence": analysis.confidence,
            "recommendations": analysis.recommendations,
            "suggestedActions": serde_json::to_value(&analysis.suggested_actions)?,
            "generatedAt": Utc::now(),
        }),
    )
    .await?;

    if !failure_context.is_empty() {
        // Consumed: a merge-patch null removes the annotation.
        api.patch(
            &name,
            &PatchParams::default(),
            &Patch::Merge(&json!({
                "metadata": { "annotations": { FAILURE_CONTEXT_ANNOTATION: null } }
            })),
        )
        .await?;
    }

    info!(
        insight = %name,
        confidence = analysis.confidence,
        actions = analysis.suggested_actions.len(),
        "analysis persisted"
    );
    Ok(Action::await_change())
}

pub fn error_policy(_insight: Arc<AIInsight>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(error = %error, "insight reconcile failed");
    requeue_for(error)
}
