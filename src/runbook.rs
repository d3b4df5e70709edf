//! Runbook selection and generation.
//!
//! Matching is tiered: an exact `(signal, severity, kind)` hit wins
//! immediately; a `(severity, kind)` hit is kept as fallback. Successful
//! AI output is promoted into reusable runbooks so future incidents with
//! the same signature skip straight to a scripted plan.

use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
use std::collections::BTreeMap;

use crate::api::{
    sanitize_name, ActionSpec, AIInsightStatus, Issue, RemediationPlan, Runbook, RunbookSpec,
    RunbookTrigger, Severity, SignalType, AUTO_GENERATED_LABEL, SOURCE_ISSUE_LABEL, SOURCE_LABEL,
};
use crate::error::Result;

/// Attempt cap stamped on learned runbooks.
pub const LEARNED_MAX_ATTEMPTS: u32 = 3;

/// Find the best runbook for an Issue, searching its namespace and all
/// others.
pub async fn find_matching_runbook(client: Client, issue: &Issue) -> Result<Option<Runbook>> {
    let runbooks: Api<Runbook> = Api::all(client);
    let list = runbooks.list(&ListParams::default()).await?;
    Ok(match_runbook(
        list.items,
        issue.spec.signal_type,
        issue.spec.severity,
        &issue.spec.resource.kind,
    ))
}

/// Tiered matching over a candidate set.
pub fn match_runbook(
    candidates: Vec<Runbook>,
    signal: SignalType,
    severity: Severity,
    resource_kind: &str,
) -> Option<Runbook> {
    let mut fallback = None;
    for runbook in candidates {
        let trigger = &runbook.spec.trigger;
        if trigger.severity != severity || trigger.resource_kind != resource_kind {
            continue;
        }
        if trigger.signal_type == signal {
            return Some(runbook);
        }
        if fallback.is_none() {
            fallback = Some(runbook);
        }
    }
    fallback
}

/// Name of a runbook synthesized from one-shot AI suggestions.
pub fn synthesized_runbook_name(signal: SignalType, severity: Severity, kind: &str) -> String {
    sanitize_name(&format!("auto-{}-{}-{}", signal, severity, kind))
}

/// Name of a runbook learned from an agentic session.
pub fn learned_runbook_name(signal: SignalType, severity: Severity, kind: &str) -> String {
    sanitize_name(&format!("agentic-{}-{}-{}", signal, severity, kind))
}

fn generated_labels(issue: &Issue, origin: &str) -> BTreeMap<String, String> {
    [
        (AUTO_GENERATED_LABEL.to_string(), "true".to_string()),
        (SOURCE_LABEL.to_string(), origin.to_string()),
        (SOURCE_ISSUE_LABEL.to_string(), issue.name_any()),
    ]
    .into_iter()
    .collect()
}

/// Materialize a runbook from the analysis' suggested actions.
///
/// Returns None when the insight carries no actions to script.
pub fn synthesize_runbook(issue: &Issue, insight: &AIInsightStatus) -> Option<Runbook> {
    if insight.suggested_actions.is_empty() {
        return None;
    }

    let mut description = insight.analysis.clone();
    if !insight.recommendations.is_empty() {
        description.push_str("\n\nRecommendations:\n");
        for rec in &insight.recommendations {
            description.push_str("- ");
            description.push_str(rec);
            description.push('\n');
        }
    }

    let name = synthesized_runbook_name(
        issue.spec.signal_type,
        issue.spec.severity,
        &issue.spec.resource.kind,
    );
    let mut runbook = Runbook::new(
        &name,
        RunbookSpec {
            description,
            trigger: RunbookTrigger {
                signal_type: issue.spec.signal_type,
                severity: issue.spec.severity,
                resource_kind: issue.spec.resource.kind.clone(),
            },
            steps: insight.suggested_actions.clone(),
            max_attempts: 0,
        },
    );
    runbook.metadata.namespace = issue.namespace();
    runbook.metadata.labels = Some(generated_labels(issue, "ai"));
    Some(runbook)
}

/// Promote a resolved agentic session into a runbook, keeping only the
/// steps whose actions succeeded.
pub fn learned_runbook(issue: &Issue, plan: &RemediationPlan) -> Option<Runbook> {
    let steps: Vec<ActionSpec> = plan
        .spec
        .agentic_history
        .iter()
        .filter(|rec| rec.succeeded())
        .map(|rec| ActionSpec {
            name: format!("step-{}", rec.step_number),
            action: rec.action.clone().unwrap_or_default(),
            description: rec.ai_message.clone(),
            params: rec.params.clone().unwrap_or_default(),
        })
        .collect();
    if steps.is_empty() {
        return None;
    }

    let name = learned_runbook_name(
        issue.spec.signal_type,
        issue.spec.severity,
        &issue.spec.resource.kind,
    );
    let mut runbook = Runbook::new(
        &name,
        RunbookSpec {
            description: format!(
                "Learned from incident {} on {}",
                issue.spec.incident_id, issue.spec.resource
            ),
            trigger: RunbookTrigger {
                signal_type: issue.spec.signal_type,
                severity: issue.spec.severity,
                resource_kind: issue.spec.resource.kind.clone(),
            },
            steps,
            max_attempts: LEARNED_MAX_ATTEMPTS,
        },
    );
    runbook.metadata.namespace = issue.namespace();
    runbook.metadata.labels = Some(generated_labels(issue, "agentic"));
    Some(runbook)
}
