//! Anomaly reconciler: attach new signals to an active Issue or open one.

use chrono::{Duration, Utc};
use kube::api::Api;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::api::{
    sanitize_name, Anomaly, Issue, IssueSpec, INCIDENT_ID_LABEL_KEY, RESOURCE_LABEL_KEY,
    SIGNAL_LABEL_KEY,
};
use crate::controller::{patch_status, requeue_for, Context};
use crate::correlation;
use crate::error::{Error, Result};

/// Window for folding older uncorrelated anomalies into a new incident.
const CORRELATION_WINDOW_MINUTES: i64 = 10;

#[instrument(skip(ctx, anomaly), fields(anomaly = %anomaly.name_any()))]
pub async fn reconcile(anomaly: Arc<Anomaly>, ctx: Arc<Context>) -> Result<Action> {
    // Once correlated, never re-correlated.
    if anomaly.is_correlated() {
        return Ok(Action::await_change());
    }

    let resource = &anomaly.spec.resource;
    let window = Duration::minutes(CORRELATION_WINDOW_MINUTES);
    let related =
        correlation::find_related_anomalies(ctx.client.clone(), resource, window).await?;
    let risk = correlation::calculate_risk(&related);

    match correlation::find_active_issue(ctx.client.clone(), resource).await? {
        Some(issue) => {
            attach_to_issue(&ctx, &anomaly, &issue, risk).await?;
        }
        None => {
            let issue = open_issue(&ctx, &anomaly, risk).await?;
            mark_correlated(&ctx, &anomaly, &related, &issue.name_any()).await?;
        }
    }

    Ok(Action::await_change())
}

pub fn error_policy(_anomaly: Arc<Anomaly>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(error = %error, "anomaly reconcile failed");
    requeue_for(error)
}

/// Fold the anomaly into an existing incident, raising its risk when the
/// recomputed score is strictly higher.
async fn attach_to_issue(
    ctx: &Context,
    anomaly: &Anomaly,
    issue: &Issue,
    risk: u32,
) -> Result<()> {
    let namespace = issue.namespace().unwrap_or_else(|| "default".into());
    let issue_name = issue.name_any();

    let anomalies: Api<Anomaly> = Api::namespaced(ctx.client.clone(), &namespace);
    patch_status(
        &anomalies,
        &anomaly.name_any(),
        json!({ "correlated": true, "issueRef": issue_name }),
    )
    .await?;

    if risk > issue.spec.risk_score {
        let issues: Api<Issue> = Api::namespaced(ctx.client.clone(), &namespace);
        issues
            .patch(
                &issue_name,
                &kube::api::PatchParams::default(),
                &kube::api::Patch::Merge(&json!({ "spec": { "riskScore": risk } })),
            )
            .await?;
        info!(issue = %issue_name, risk, "risk score raised");
    }

    info!(issue = %issue_name, anomaly = %anomaly.name_any(), "anomaly attached");
    Ok(())
}

/// Build the Issue object a new incident opens with.
pub fn build_issue(anomaly: &Anomaly, risk: u32, incident_id: &str) -> Issue {
    let resource = &anomaly.spec.resource;
    let signal = anomaly.spec.signal_type;
    let severity = correlation::determine_severity(signal, risk);

    let description = if anomaly.spec.description.is_empty() {
        format!("{} detected on {}", signal, resource)
    } else {
        anomaly.spec.description.clone()
    };

    let name = sanitize_name(&format!(
        "{}-{}-{}",
        resource.name,
        signal,
        Utc::now().timestamp()
    ));

    let mut labels: BTreeMap<String, String> = BTreeMap::new();
    labels.insert(INCIDENT_ID_LABEL_KEY.into(), incident_id.to_string());
    labels.insert(RESOURCE_LABEL_KEY.into(), resource.name.clone());
    labels.insert(SIGNAL_LABEL_KEY.into(), signal.to_string());

    let mut issue = Issue::new(
        &name,
        IssueSpec {
            severity,
            source: anomaly.spec.source.clone(),
            resource: resource.clone(),
            description,
            incident_id: incident_id.to_string(),
            risk_score: risk,
            signal_type: signal,
        },
    );
    issue.metadata.namespace = Some(resource.namespace.clone());
    issue.metadata.labels = Some(labels);
    issue
}

async fn open_issue(ctx: &Context, anomaly: &Anomaly, risk: u32) -> Result<Issue> {
    let resource = &anomaly.spec.resource;
    let incident_id =
        correlation::generate_incident_id(ctx.client.clone(), &resource.namespace).await?;
    let issue = build_issue(anomaly, risk, &incident_id);

    let issues: Api<Issue> = Api::namespaced(ctx.client.clone(), &resource.namespace);
    // Concurrent creations (or an id collision) surface as a conflict and
    // retry with a freshly minted id.
    issues
        .create(&kube::api::PostParams::default(), &issue)
        .await?;

    info!(
        issue = %issue.name_any(),
        incident_id = %incident_id,
        risk,
        "issue opened"
    );
    Ok(issue)
}

/// Mark the triggering anomaly and all related ones as correlated.
async fn mark_correlated(
    ctx: &Context,
    anomaly: &Anomaly,
    related: &[Anomaly],
    issue_name: &str,
) -> Result<()> {
    let namespace = anomaly
        .namespace()
        .unwrap_or_else(|| anomaly.spec.resource.namespace.clone());
    let anomalies: Api<Anomaly> = Api::namespaced(ctx.client.clone(), &namespace);

    let status = json!({ "correlated": true, "issueRef": issue_name });

    let mut names: Vec<String> = related.iter().map(|a| a.name_any()).collect();
    let own = anomaly.name_any();
    if !names.contains(&own) {
        names.push(own);
    }
    for name in names {
        patch_status(&anomalies, &name, status.clone()).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{AnomalySpec, IssuePhase, ResourceRef, Severity, SignalType};
    use pretty_assertions::assert_eq;

    fn anomaly(signal: SignalType, description: &str) -> Anomaly {
        let mut a = Anomaly::new(
            "watcher-error-rate-payments-api-1754000000",
            AnomalySpec {
                source: "watcher".into(),
                signal_type: signal,
                resource: ResourceRef::deployment("payments-api", "default"),
                value: String::new(),
                threshold: String::new(),
                description: description.into(),
            },
        );
        a.metadata.namespace = Some("default".into());
        a
    }

    #[test]
    fn test_build_issue_labels_and_fields() {
        let a = anomaly(SignalType::ErrorRate, "error rate above threshold");
        let issue = build_issue(&a, 30, "INC-20260801-001");

        assert_eq!(issue.spec.severity, Severity::Medium);
        assert_eq!(issue.spec.risk_score, 30);
        assert_eq!(issue.spec.incident_id, "INC-20260801-001");
        assert_eq!(issue.spec.source, "watcher");
        assert_eq!(issue.phase(), IssuePhase::Detected);

        let labels = issue.metadata.labels.as_ref().unwrap();
        assert_eq!(labels.get(INCIDENT_ID_LABEL_KEY).unwrap(), "INC-20260801-001");
        assert_eq!(labels.get(RESOURCE_LABEL_KEY).unwrap(), "payments-api");
        assert_eq!(labels.get(SIGNAL_LABEL_KEY).unwrap(), "error_rate");

        let name = issue.name_any();
        assert!(name.starts_with("payments-api-error-rate-"));
        assert!(name.len() <= crate::api::MAX_NAME_LEN);
    }

    #[test]
    fn test_build_issue_oom_is_critical_regardless_of_risk() {
        let a = anomaly(SignalType::OomKill, "");
        let issue = build_issue(&a, 10, "INC-20260801-002");
        assert_eq!(issue.spec.severity, Severity::Critical);
        assert!(issue.spec.description.contains("oom_kill"));
    }
}
