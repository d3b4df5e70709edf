//! Correlation engine: risk scoring, severity, incident ids, and
//! related-anomaly lookup.
//!
//! Everything here is stateless; the async functions are thin list
//! wrappers around pure scoring helpers so correlation policy stays
//! testable without an API server.

use chrono::{DateTime, Duration, Utc};
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
use regex::Regex;

use crate::api::{
    Anomaly, Issue, ResourceRef, Severity, SignalType, INCIDENT_ID_LABEL_KEY,
};
use crate::error::Result;

/// Risk ceiling.
pub const MAX_RISK: u32 = 100;

/// Per-signal risk weight.
pub fn signal_weight(signal: SignalType) -> u32 {
    match signal {
        SignalType::OomKill => 40,
        SignalType::ErrorRate => 30,
        SignalType::PodRestart => 25,
        SignalType::DeployFailing => 25,
        SignalType::Latency => 20,
        SignalType::PodNotReady => 20,
        SignalType::CpuHigh => 15,
        SignalType::MemoryHigh => 15,
    }
}

/// Aggregate risk of a set of anomalies: sum of weights, capped at 100.
pub fn calculate_risk(anomalies: &[Anomaly]) -> u32 {
    anomalies
        .iter()
        .map(|a| signal_weight(a.spec.signal_type))
        .sum::<u32>()
        .min(MAX_RISK)
}

/// Map a signal and aggregate risk onto a severity.
///
/// OOM kills are always critical; everything else follows the risk bands.
pub fn determine_severity(signal: SignalType, risk: u32) -> Severity {
    if signal == SignalType::OomKill {
        return Severity::Critical;
    }
    match risk {
        r if r >= 80 => Severity::Critical,
        r if r >= 60 => Severity::High,
        r if r >= 30 => Severity::Medium,
        _ => Severity::Low,
    }
}

/// Return any non-terminal Issue for the exact (kind, name, namespace)
/// triple, or None.
pub async fn find_active_issue(client: Client, resource: &ResourceRef) -> Result<Option<Issue>> {
    let issues: Api<Issue> = Api::namespaced(client, &resource.namespace);
    let list = issues.list(&ListParams::default()).await?;
    Ok(list
        .items
        .into_iter()
        .find(|issue| &issue.spec.resource == resource && !issue.is_terminal()))
}

/// All uncorrelated anomalies for the resource created within the window,
/// ordered by creation time.
pub async fn find_related_anomalies(
    client: Client,
    resource: &ResourceRef,
    window: Duration,
) -> Result<Vec<Anomaly>> {
    let anomalies: Api<Anomaly> = Api::namespaced(client, &resource.namespace);
    let list = anomalies.list(&ListParams::default()).await?;
    let cutoff = Utc::now() - window;

    let mut related: Vec<Anomaly> = list
        .items
        .into_iter()
        .filter(|a| {
            !a.is_correlated()
                && &a.spec.resource == resource
                && creation_time(a).map(|t| t >= cutoff).unwrap_or(false)
        })
        .collect();
    related.sort_by_key(creation_time);
    Ok(related)
}

fn creation_time(anomaly: &Anomaly) -> Option<DateTime<Utc>> {
    anomaly.creation_timestamp().map(|t| t.0)
}

/// Mint the next incident id for a namespace: `INC-YYYYMMDD-NNN`.
///
/// Scans `inc-id` labels on existing Issues for same-day ids and takes
/// max + 1. Monotonic per process; concurrent creations are resolved by
/// the caller retrying the underlying create.
pub async fn generate_incident_id(client: Client, namespace: &str) -> Result<String> {
    let issues: Api<Issue> = Api::namespaced(client, namespace);
    let list = issues.list(&ListParams::default()).await?;
    let existing: Vec<String> = list
        .items
        .iter()
        .filter_map(|i| i.labels().get(INCIDENT_ID_LABEL_KEY).cloned())
        .collect();

    let today = Utc::now().format("%Y%m%d").to_string();
    Ok(mint_incident_id(&existing, &today))
}

/// Pure id minting over the set of already-used ids.
pub fn mint_incident_id(existing: &[String], date: &str) -> String {
    // Tolerates wider sequence fields written by older builds.
    let pattern = Regex::new(r"^INC-(\d{8})-(\d{3,})$").expect("static incident id pattern");
    let max_seq = existing
        .iter()
        .filter_map(|id| {
            let caps = pattern.captures(id)?;
            if &caps[1] == date {
                caps[2].parse::<u32>().ok()
            } else {
                None
            }
        })
        .max()
        .unwrap_or(0);
    format!("INC-{}-{:03}", date, max_seq + 1)
}
