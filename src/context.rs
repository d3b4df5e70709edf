//! Bounded textual snapshots of workload state for AI prompt enrichment.
//!
//! The builder assembles deployment status, pod health, recent events, and
//! revision history (with image diffs) into a single text blob capped at
//! 8,000 characters. Only Deployments get the full treatment; other kinds
//! produce a one-line placeholder.

use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::{Container, Event, Pod};
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::api::ResourceRef;
use crate::error::Result;

/// Character budget for one context blob.
pub const MAX_CONTEXT_CHARS: usize = 8_000;
/// How many pods the snapshot covers.
const MAX_PODS: usize = 5;
/// How many recent events the snapshot covers.
const MAX_EVENTS: usize = 15;
/// How many revisions the snapshot covers.
const MAX_REVISIONS: usize = 5;

const REVISION_ANNOTATION: &str = "deployment.kubernetes.io/revision";

/// Build the context snapshot for one workload.
pub async fn build_workload_context(client: Client, resource: &ResourceRef) -> Result<String> {
    if resource.kind != "Deployment" {
        return Ok(format!(
            "{}: context collection is only supported for Deployments\n",
            resource
        ));
    }

    let deployments: Api<Deployment> = Api::namespaced(client.clone(), &resource.namespace);
    let deployment = match deployments.get_opt(&resource.name).await? {
        Some(d) => d,
        None => return Ok(format!("{}: not found\n", resource)),
    };

    let pods: Api<Pod> = Api::namespaced(client.clone(), &resource.namespace);
    let selector = selector_of(&deployment);
    let pod_list = if selector.is_empty() {
        Vec::new()
    } else {
        pods.list(&ListParams::default().labels(&selector)).await?.items
    };

    let events: Api<Event> = Api::namespaced(client.clone(), &resource.namespace);
    let event_list = events.list(&ListParams::default()).await?.items;

    let replicasets: Api<ReplicaSet> = Api::namespaced(client, &resource.namespace);
    let rs_list = replicasets.list(&ListParams::default()).await?.items;
    let owned: Vec<ReplicaSet> = rs_list
        .into_iter()
        .filter(|rs| owned_by_deployment(rs, &resource.name))
        .collect();

    Ok(render_context(&deployment, pod_list, &event_list, owned))
}

/// Assemble all sections and apply the character budget.
pub fn render_context(
    deployment: &Deployment,
    mut pods: Vec<Pod>,
    events: &[Event],
    replicasets: Vec<ReplicaSet>,
) -> String {
    let name = deployment.name_any();
    let mut out = String::new();

    out.push_str(&render_deployment(deployment));

    sort_pods_for_report(&mut pods);
    out.push_str(&render_pods(&pods));

    out.push_str(&render_events(events, &name));
    out.push_str(&render_revisions(replicasets));

    truncate_context(out)
}

fn selector_of(deployment: &Deployment) -> String {
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.selector.match_labels.as_ref())
        .map(|labels| {
            labels
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(",")
        })
        .unwrap_or_default()
}

fn owned_by_deployment(rs: &ReplicaSet, deployment_name: &str) -> bool {
    rs.metadata
        .owner_references
        .as_ref()
        .map(|refs| {
            refs.iter()
                .any(|r| r.kind == "Deployment" && r.name == deployment_name)
        })
        .unwrap_or(false)
}

fn render_deployment(deployment: &Deployment) -> String {
    let mut out = String::new();
    let name = deployment.name_any();
    let ns = deployment.namespace().unwrap_or_default();
    let _ = writeln!(out, "Deployment {}/{}", ns, name);

    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    if let Some(status) = &deployment.status {
        let _ = writeln!(
            out,
            "  replicas: desired={} ready={} updated={} available={} unavailable={}",
            desired,
            status.ready_replicas.unwrap_or(0),
            status.updated_replicas.unwrap_or(0),
            status.available_replicas.unwrap_or(0),
            status.unavailable_replicas.unwrap_or(0),
        );
        let generation = deployment.metadata.generation.unwrap_or(0);
        let observed = status.observed_generation.unwrap_or(0);
        if generation != observed {
            let _ = writeln!(
                out,
                "  generation: {} (observed {}, rollout in progress)",
                generation, observed
            );
        }
        if let Some(conditions) = &status.conditions {
            for c in conditions {
                let _ = writeln!(
                    out,
                    "  condition {}={} reason={} {}",
                    c.type_,
                    c.status,
                    c.reason.as_deref().unwrap_or("-"),
                    c.message.as_deref().unwrap_or(""),
                );
            }
        }
    }

    for container in containers_of(deployment) {
        let _ = writeln!(
            out,
            "  container {} image={}",
            container.name,
            container.image.as_deref().unwrap_or("-"),
        );
        if let Some(resources) = &container.resources {
            let _ = writeln!(
                out,
                "    requests={} limits={}",
                render_quantities(resources.requests.as_ref()),
                render_quantities(resources.limits.as_ref()),
            );
        }
    }
    out
}

fn containers_of(deployment: &Deployment) -> &[Container] {
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .map(|p| p.containers.as_slice())
        .unwrap_or(&[])
}

fn render_quantities(
    quantities: Option<&BTreeMap<String, k8s_openapi::apimachinery::pkg::api::resource::Quantity>>,
) -> String {
    match quantities {
        Some(map) if !map.is_empty() => map
            .iter()
            .map(|(k, v)| format!("{}={}", k, v.0))
            .collect::<Vec<_>>()
            .join(","),
        _ => "none".to_string(),
    }
}

/// Total container restarts of a pod.
pub fn pod_restart_count(pod: &Pod) -> i32 {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .map(|cs| cs.iter().map(|c| c.restart_count).sum())
        .unwrap_or(0)
}

/// A pod is unhealthy when it is not Running or a container is not ready.
pub fn pod_is_unhealthy(pod: &Pod) -> bool {
    let status = match &pod.status {
        Some(s) => s,
        None => return true,
    };
    if status.phase.as_deref() != Some("Running") {
        return true;
    }
    status
        .container_statuses
        .as_ref()
        .map(|cs| cs.iter().any(|c| !c.ready))
        .unwrap_or(true)
}

/// Unhealthy pods first, then by descending restart count.
pub fn sort_pods_for_report(pods: &mut [Pod]) {
    pods.sort_by(|a, b| {
        let unhealthy = pod_is_unhealthy(b).cmp(&pod_is_unhealthy(a));
        unhealthy.then(pod_restart_count(b).cmp(&pod_restart_count(a)))
    });
}

fn render_pods(pods: &[Pod]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Pods ({} total, showing up to {}):", pods.len(), MAX_PODS);
    for pod in pods.iter().take(MAX_PODS) {
        let phase = pod
            .status
            .as_ref()
            .and_then(|s| s.phase.clone())
            .unwrap_or_else(|| "Unknown".into());
        let _ = writeln!(
            out,
            "  {} phase={} restarts={}",
            pod.name_any(),
            phase,
            pod_restart_count(pod),
        );
        let statuses = pod
            .status
            .as_ref()
            .and_then(|s| s.container_statuses.as_ref());
        if let Some(statuses) = statuses {
            for cs in statuses {
                if let Some(waiting) = cs.state.as_ref().and_then(|s| s.waiting.as_ref()) {
                    let _ = writeln!(
                        out,
                        "    {} waiting: {}",
                        cs.name,
                        waiting.reason.as_deref().unwrap_or("-"),
                    );
                }
                if let Some(term) = cs.state.as_ref().and_then(|s| s.terminated.as_ref()) {
                    let _ = writeln!(
                        out,
                        "    {} terminated: {} exit={}",
                        cs.name,
                        term.reason.as_deref().unwrap_or("-"),
                        term.exit_code,
                    );
                }
                if let Some(last) = cs.last_state.as_ref().and_then(|s| s.terminated.as_ref()) {
                    let _ = writeln!(
                        out,
                        "    {} last-termination: {} exit={}",
                        cs.name,
                        last.reason.as_deref().unwrap_or("-"),
                        last.exit_code,
                    );
                }
            }
        }
    }
    out
}

fn render_events(events: &[Event], name_prefix: &str) -> String {
    let mut matching: Vec<&Event> = events
        .iter()
        .filter(|e| {
            e.involved_object
                .name
                .as_deref()
                .map(|n| n.starts_with(name_prefix))
                .unwrap_or(false)
        })
        .collect();
    matching.sort_by(|a, b| {
        let ta = a.last_timestamp.as_ref().map(|t| t.0);
        let tb = b.last_timestamp.as_ref().map(|t| t.0);
        tb.cmp(&ta)
    });

    let mut out = String::new();
    let _ = writeln!(out, "Recent events:");
    if matching.is_empty() {
        let _ = writeln!(out, "  none");
    }
    for event in matching.iter().take(MAX_EVENTS) {
        let _ = writeln!(
            out,
            "  [{}] {} x{}: {}",
            event.type_.as_deref().unwrap_or("-"),
            event.reason.as_deref().unwrap_or("-"),
            event.count.unwrap_or(1),
            event.message.as_deref().unwrap_or(""),
        );
    }
    out
}

/// Revision number of a ReplicaSet from its rollout annotation.
pub fn rs_revision(rs: &ReplicaSet) -> u64 {
    rs.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(REVISION_ANNOTATION))
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

fn rs_images(rs: &ReplicaSet) -> BTreeMap<String, String> {
    rs.spec
        .as_ref()
        .and_then(|s| s.template.as_ref())
        .and_then(|t| t.spec.as_ref())
        .map(|p| {
            p.containers
                .iter()
                .map(|c| (c.name.clone(), c.image.clone().unwrap_or_default()))
                .collect()
        })
        .unwrap_or_default()
}

fn render_revisions(mut replicasets: Vec<ReplicaSet>) -> String {
    replicasets.sort_by(|a, b| rs_revision(b).cmp(&rs_revision(a)));
    replicasets.truncate(MAX_REVISIONS);

    let mut out = String::new();
    let _ = writeln!(out, "Revision history (newest first):");
    if replicasets.is_empty() {
        let _ = writeln!(out, "  none");
        return out;
    }

    for (idx, rs) in replicasets.iter().enumerate() {
        let images = rs_images(rs);
        let rendered: Vec<String> = images.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        let _ = writeln!(
            out,
            "  revision {} ready={} images: {}",
            rs_revision(rs),
            rs.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0),
            rendered.join(","),
        );

        // Image diff against the next-older revision.
        if let Some(older) = replicasets.get(idx + 1) {
            let older_images = rs_images(older);
            for (container, image) in &images {
                match older_images.get(container) {
                    Some(old) if old != image => {
                        let _ = writeln!(out, "    {} changed: {} -> {}", container, old, image);
                    }
                    None => {
                        let _ = writeln!(out, "    {} added: {}", container, image);
                    }
                    _ => {}
                }
            }
        }
    }
    out
}

/// Apply the character budget, appending an ellipsis when truncated.
pub fn truncate_context(text: String) -> String {
    if text.len() <= MAX_CONTEXT_CHARS {
        return text;
    }
    let mut cut = MAX_CONTEXT_CHARS - 3;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &text[..cut])
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        ContainerState, ContainerStateTerminated, ContainerStatus, PodStatus,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use pretty_assertions::assert_eq;

    fn pod(name: &str, phase: &str, ready: bool, restarts: i32) -> Pod {
        let mut p = Pod::default();
        p.metadata.name = Some(name.into());
        p.status = Some(PodStatus {
            phase: Some(phase.into()),
            container_statuses: Some(vec![ContainerStatus {
                name: "app".into(),
                ready,
                restart_count: restarts,
                ..Default::default()
            }]),
            ..Default::default()
        });
        p
    }

    fn replicaset(name: &str, revision: u64, image: &str) -> ReplicaSet {
        let mut rs = ReplicaSet::default();
        rs.metadata.name = Some(name.into());
        rs.metadata.annotations = Some(
            [(REVISION_ANNOTATION.to_string(), revision.to_string())]
                .into_iter()
                .collect(),
        );
        rs.spec = Some(k8s_openapi::api::apps::v1::ReplicaSetSpec {
            template: Some(k8s_openapi::api::core::v1::PodTemplateSpec {
                spec: Some(k8s_openapi::api::core::v1::PodSpec {
                    containers: vec![Container {
                        name: "app".into(),
                        image: Some(image.into()),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        });
        rs
    }

    #[test]
    fn test_pod_sort_unhealthy_first_then_restarts() {
        let mut pods = vec![
            pod("healthy-low", "Running", true, 0),
            pod("crashing", "Running", false, 12),
            pod("healthy-high", "Running", true, 3),
            pod("pending", "Pending", true, 0),
        ];
        sort_pods_for_report(&mut pods);
        let names: Vec<_> = pods.iter().map(|p| p.name_any()).collect();
        assert_eq!(names, vec!["crashing", "pending", "healthy-high", "healthy-low"]);
    }

    #[test]
    fn test_pod_without_status_is_unhealthy() {
        let mut p = Pod::default();
        p.metadata.name = Some("ghost".into());
        assert!(pod_is_unhealthy(&p));
    }

    #[test]
    fn test_last_termination_rendered() {
        let mut p = pod("oomed", "Running", false, 4);
        if let Some(status) = &mut p.status {
            if let Some(cs) = status.container_statuses.as_mut().and_then(|v| v.first_mut()) {
                cs.last_state = Some(ContainerState {
                    terminated: Some(ContainerStateTerminated {
                        exit_code: 137,
                        reason: Some("OOMKilled".into()),
                        ..Default::default()
                    }),
                    ..Default::default()
                });
            }
        }
        let text = render_pods(&[p]);
        assert!(text.contains("last-termination: OOMKilled exit=137"));
    }

    #[test]
    fn test_revision_image_diff() {
        let sets = vec![
            replicaset("api-7f", 2, "api:2.0"),
            replicaset("api-5d", 1, "api:1.9"),
        ];
        let text = render_revisions(sets);
        assert!(text.contains("revision 2"));
        assert!(text.contains("app changed: api:1.9 -> api:2.0"));
    }

    #[test]
    fn test_revisions_sorted_and_capped() {
        let sets: Vec<ReplicaSet> = (1..=8)
            .map(|r| replicaset(&format!("api-{}", r), r, "api:1"))
            .collect();
        let text = render_revisions(sets);
        assert!(text.contains("revision 8 "));
        assert!(text.contains("revision 4 "));
        assert!(!text.contains("revision 3 "));
    }

    #[test]
    fn test_event_prefix_filter() {
        let mut matching = Event::default();
        matching.involved_object.name = Some("payments-api-7f9c".into());
        matching.reason = Some("BackOff".into());
        matching.message = Some("restarting failed container".into());

        let mut other = Event::default();
        other.involved_object.name = Some("orders-api-1111".into());
        other.reason = Some("Scheduled".into());

        let text = render_events(&[matching, other], "payments-api");
        assert!(text.contains("BackOff"));
        assert!(!text.contains("Scheduled"));
    }

    #[test]
    fn test_truncation_with_ellipsis() {
        let long = "x".repeat(MAX_CONTEXT_CHARS + 500);
        let out = truncate_context(long);
        assert_eq!(out.len(), MAX_CONTEXT_CHARS);
        assert!(out.ends_with("..."));

        let short = "short".to_string();
        assert_eq!(truncate_context(short.clone()), short);
    }

    #[test]
    fn test_non_deployment_placeholder_owned_by() {
        let mut rs = ReplicaSet::default();
        rs.metadata.owner_references = Some(vec![OwnerReference {
            kind: "Deployment".into(),
            name: "payments-api".into(),
            ..Default::default()
        }]);
        assert!(owned_by_deployment(&rs, "payments-api"));
        assert!(!owned_by_deployment(&rs, "orders-api"));
    }
}
