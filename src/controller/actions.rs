//! Scripted remediation action handlers and the safety gate.
//!
//! Handlers operate on the Issue's resource reference; only Deployments
//! are valid targets. Each handler is idempotent up to the semantics of
//! the underlying Kubernetes operation.

use chrono::Utc;
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::{ConfigMap, Pod, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::info;

use crate::api::{ActionKind, ActionSpec, ResourceRef};
use crate::context::{pod_restart_count, rs_revision};
use crate::error::{Error, Result};

/// Annotation used to trigger a rolling restart.
pub const RESTARTED_AT_ANNOTATION: &str = "kubectl.kubernetes.io/restartedAt";

const POD_TEMPLATE_HASH_LABEL: &str = "pod-template-hash";

/// Per-action safety rules, shared by the scripted gate and the agentic
/// dispatch.
pub fn action_safety_check(action: &ActionSpec) -> Result<()> {
    match action.kind() {
        ActionKind::ScaleDeployment => {
            if action.params.get("replicas").map(String::as_str) == Some("0") {
                return Err(Error::safety(
                    "scaling to 0 replicas would take the workload down",
                ));
            }
        }
        ActionKind::AdjustResources => {
            let has_any = ["memory_limit", "memory_request", "cpu_limit", "cpu_request"]
                .iter()
                .any(|k| action.params.contains_key(*k));
            if !has_any {
                return Err(Error::safety(
                    "AdjustResources without any resource parameter",
                ));
            }
        }
        ActionKind::Custom => {
            return Err(Error::safety(format!(
                "custom action {:?} requires manual approval",
                action.action
            )));
        }
        _ => {}
    }
    Ok(())
}

/// Validate a whole scripted plan before anything executes.
pub fn validate_safety(actions: &[ActionSpec]) -> Result<()> {
    for action in actions {
        action_safety_check(action)?;
    }
    let delete_pods = actions
        .iter()
        .filter(|a| a.kind() == ActionKind::DeletePod)
        .count();
    if delete_pods > 1 {
        return Err(Error::safety(
            "more than one DeletePod action in a single plan",
        ));
    }
    Ok(())
}

/// Execute one action against the target workload. Returns a short
/// human-readable outcome used as evidence and agentic observations.
pub async fn execute(client: Client, resource: &ResourceRef, action: &ActionSpec) -> Result<String> {
    if resource.kind != "Deployment" {
        return Err(Error::invalid_action(
            &action.action,
            format!("unsupported resource kind {:?}", resource.kind),
        ));
    }
    action_safety_check(action)?;

    let outcome = match action.kind() {
        ActionKind::ScaleDeployment => scale_deployment(client, resource, action).await?,
        ActionKind::RestartDeployment => restart_deployment(client, resource).await?,
        ActionKind::RollbackDeployment => rollback_deployment(client, resource, action).await?,
        ActionKind::PatchConfig => patch_config(client, resource, action).await?,
        ActionKind::AdjustResources => adjust_resources(client, resource, action).await?,
        ActionKind::DeletePod => delete_pod(client, resource, action).await?,
        // Unreachable past the safety check, kept for dispatch totality.
        ActionKind::Custom => {
            return Err(Error::safety("custom action requires manual approval"))
        }
    };
    info!(action = %action.action, resource = %resource, outcome = %outcome, "action executed");
    Ok(outcome)
}

async fn get_deployment(client: Client, resource: &ResourceRef) -> Result<Deployment> {
    let api: Api<Deployment> = Api::namespaced(client, &resource.namespace);
    api.get_opt(&resource.name)
        .await?
        .ok_or_else(|| Error::missing("Deployment", &resource.name))
}

async fn scale_deployment(
    client: Client,
    resource: &ResourceRef,
    action: &ActionSpec,
) -> Result<String> {
    let replicas: i32 = action
        .params
        .get("replicas")
        .ok_or_else(|| Error::invalid_action(&action.action, "missing replicas parameter"))?
        .parse()
        .map_err(|_| Error::invalid_action(&action.action, "replicas is not an integer"))?;

    let api: Api<Deployment> = Api::namespaced(client, &resource.namespace);
    api.patch(
        &resource.name,
        &PatchParams::default(),
        &Patch::Merge(&json!({ "spec": { "replicas": replicas } })),
    )
    .await?;
    Ok(format!("replicas set to {}", replicas))
}

async fn restart_deployment(client: Client, resource: &ResourceRef) -> Result<String> {
    let now = Utc::now().to_rfc3339();
    let api: Api<Deployment> = Api::namespaced(client, &resource.namespace);
    api.patch(
        &resource.name,
        &PatchParams::default(),
        &Patch::Merge(&json!({
            "spec": { "template": { "metadata": { "annotations": {
                RESTARTED_AT_ANNOTATION: now,
            }}}}
        })),
    )
    .await?;
    Ok(format!("rolling restart triggered at {}", now))
}

/// A revision candidate for rollback selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevisionInfo {
    pub revision: u64,
    pub ready_replicas: i32,
}

/// Pick the rollback target from revisions sorted newest-first (index 0 is
/// the current revision).
pub fn select_rollback_target(revisions: &[RevisionInfo], to_revision: &str) -> Result<u64> {
    if revisions.len() < 2 {
        return Err(Error::invalid_action(
            "RollbackDeployment",
            "fewer than two revisions exist",
        ));
    }
    match to_revision {
        "" | "previous" => Ok(revisions[1].revision),
        "healthy" => Ok(revisions[1..]
            .iter()
            .find(|r| r.ready_replicas > 0)
            .map(|r| r.revision)
            .unwrap_or(revisions[1].revision)),
        exact => {
            let wanted: u64 = exact.parse().map_err(|_| {
                Error::invalid_action("RollbackDeployment", format!("bad toRevision {:?}", exact))
            })?;
            revisions
                .iter()
                .find(|r| r.revision == wanted)
                .map(|r| r.revision)
                .ok_or_else(|| {
                    Error::invalid_action(
                        "RollbackDeployment",
                        format!("revision {} does not exist", wanted),
                    )
                })
        }
    }
}

async fn rollback_deployment(
    client: Client,
    resource: &ResourceRef,
    action: &ActionSpec,
) -> Result<String> {
    let mut deployment = get_deployment(client.clone(), resource).await?;

    let replicasets: Api<ReplicaSet> = Api::namespaced(client.clone(), &resource.namespace);
    let mut owned: Vec<ReplicaSet> = replicasets
        .list(&ListParams::default())
        .await?
        .items
        .into_iter()
        .filter(|rs| {
            rs.metadata
                .owner_references
                .as_ref()
                .map(|refs| {
                    refs.iter()
                        .any(|r| r.kind == "Deployment" && r.name == resource.name)
                })
                .unwrap_or(false)
        })
        .collect();
    owned.sort_by(|a, b| rs_revision(b).cmp(&rs_revision(a)));

    let infos: Vec<RevisionInfo> = owned
        .iter()
        .map(|rs| RevisionInfo {
            revision: rs_revision(rs),
            ready_replicas: rs.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0),
        })
        .collect();
    let to_revision = action.params.get("toRevision").cloned().unwrap_or_default();
    let target_revision = select_rollback_target(&infos, &to_revision)?;

    let target = owned
        .iter()
        .find(|rs| rs_revision(rs) == target_revision)
        .ok_or_else(|| Error::missing("ReplicaSet", format!("revision {}", target_revision)))?;
    let template = target
        .spec
        .as_ref()
        .and_then(|s| s.template.clone())
        .ok_or_else(|| {
            Error::invalid_action("RollbackDeployment", "target revision has no pod template")
        })?;

    if let Some(spec) = deployment.spec.as_mut() {
        let current = &mut spec.template;
        if let Some(pod_spec) = template.spec {
            current.spec = Some(pod_spec);
        }
        let meta = current.metadata.get_or_insert_with(Default::default);
        if let Some(mut labels) = template.metadata.as_ref().and_then(|m| m.labels.clone()) {
            // The hash label belongs to the ReplicaSet, not the template.
            labels.remove(POD_TEMPLATE_HASH_LABEL);
            meta.labels = Some(labels);
        }
        if let Some(annotations) = template.metadata.as_ref().and_then(|m| m.annotations.clone()) {
            let merged = meta.annotations.get_or_insert_with(BTreeMap::new);
            for (k, v) in annotations {
                merged.insert(k, v);
            }
        }
    }

    let api: Api<Deployment> = Api::namespaced(client, &resource.namespace);
    api.replace(&resource.name, &PostParams::default(), &deployment)
        .await?;
    Ok(format!("rolled back to revision {}", target_revision))
}

async fn patch_config(
    client: Client,
    resource: &ResourceRef,
    action: &ActionSpec,
) -> Result<String> {
    let configmap = action
        .params
        .get("configmap")
        .ok_or_else(|| Error::invalid_action(&action.action, "missing configmap parameter"))?;

    let data: BTreeMap<&String, &String> = action
        .params
        .iter()
        .filter(|(k, _)| k.as_str() != "configmap")
        .collect();

    let api: Api<ConfigMap> = Api::namespaced(client, &resource.namespace);
    api.patch(
        configmap,
        &PatchParams::default(),
        &Patch::Merge(&json!({ "data": data })),
    )
    .await?;
    Ok(format!("configmap {} patched ({} keys)", configmap, data.len()))
}

/// Parse a Kubernetes quantity string into a comparable scalar.
pub fn parse_quantity(s: &str) -> Result<f64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::InvalidQuantity(s.into()));
    }
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+'))
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(split);
    let base: f64 = number
        .parse()
        .map_err(|_| Error::InvalidQuantity(s.into()))?;
    let multiplier = match suffix {
        "" => 1.0,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024f64,
        "Mi" => 1024f64.powi(2),
        "Gi" => 1024f64.powi(3),
        "Ti" => 1024f64.powi(4),
        "Pi" => 1024f64.powi(5),
        "Ei" => 1024f64.powi(6),
        _ => return Err(Error::InvalidQuantity(s.into())),
    };
    Ok(base * multiplier)
}

/// Apply resource params onto an existing requirements block, enforcing
/// limit >= request for every touched resource.
pub fn apply_resource_params(
    existing: Option<ResourceRequirements>,
    params: &BTreeMap<String, String>,
) -> Result<ResourceRequirements> {
    let mut requirements = existing.unwrap_or_default();
    let mut limits = requirements.limits.take().unwrap_or_default();
    let mut requests = requirements.requests.take().unwrap_or_default();

    let mapping = [
        ("memory_limit", "memory", true),
        ("memory_request", "memory", false),
        ("cpu_limit", "cpu", true),
        ("cpu_request", "cpu", false),
    ];
    for (param, key, is_limit) in mapping {
        if let Some(value) = params.get(param) {
            parse_quantity(value)?;
            let target = if is_limit { &mut limits } else { &mut requests };
            target.insert(key.to_string(), Quantity(value.clone()));
        }
    }

    for key in ["memory", "cpu"] {
        if let (Some(limit), Some(request)) = (limits.get(key), requests.get(key)) {
            if parse_quantity(&limit.0)? < parse_quantity(&request.0)? {
                return Err(Error::safety(format!(
                    "{} limit {} is below request {}",
                    key, limit.0, request.0
                )));
            }
        }
    }

    if !limits.is_empty() {
        requirements.limits = Some(limits);
    }
    if !requests.is_empty() {
        requirements.requests = Some(requests);
    }
    Ok(requirements)
}

async fn adjust_resources(
    client: Client,
    resource: &ResourceRef,
    action: &ActionSpec,
) -> Result<String> {
    let mut deployment = get_deployment(client.clone(), resource).await?;

    let wanted = action.params.get("container").cloned();
    let containers = deployment
        .spec
        .as_mut()
        .and_then(|s| s.template.spec.as_mut())
        .map(|p| &mut p.containers)
        .ok_or_else(|| Error::invalid_action(&action.action, "deployment has no pod template"))?;

    let container = match &wanted {
        Some(name) => containers.iter_mut().find(|c| &c.name == name).ok_or_else(|| {
            Error::invalid_action(&action.action, format!("no container named {:?}", name))
        })?,
        None => containers
            .first_mut()
            .ok_or_else(|| Error::invalid_action(&action.action, "deployment has no containers"))?,
    };

    let name = container.name.clone();
    container.resources = Some(apply_resource_params(
        container.resources.take(),
        &action.params,
    )?);

    let api: Api<Deployment> = Api::namespaced(client, &resource.namespace);
    api.replace(&resource.name, &PostParams::default(), &deployment)
        .await?;
    Ok(format!("resources adjusted on container {}", name))
}

/// Whether a pod has a container stuck in CrashLoopBackOff.
pub fn pod_in_crash_loop(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .map(|statuses| {
            statuses.iter().any(|cs| {
                cs.state
                    .as_ref()
                    .and_then(|s| s.waiting.as_ref())
                    .and_then(|w| w.reason.as_deref())
                    == Some("CrashLoopBackOff")
            })
        })
        .unwrap_or(false)
}

/// Choose the pod to delete: CrashLoopBackOff first, then by descending
/// total restart count.
pub fn select_victim(pods: &[Pod]) -> Option<&Pod> {
    pods.iter().max_by(|a, b| {
        pod_in_crash_loop(a)
            .cmp(&pod_in_crash_loop(b))
            .then(pod_restart_count(a).cmp(&pod_restart_count(b)))
    })
}

async fn delete_pod(client: Client, resource: &ResourceRef, action: &ActionSpec) -> Result<String> {
    let api: Api<Pod> = Api::namespaced(client, &resource.namespace);

    if let Some(pod) = action.params.get("pod") {
        api.delete(pod, &DeleteParams::default()).await?;
        return Ok(format!("deleted pod {}", pod));
    }

    let owner_prefix = format!("{}-", resource.name);
    let pods: Vec<Pod> = api
        .list(&ListParams::default())
        .await?
        .items
        .into_iter()
        .filter(|pod| {
            pod.metadata
                .owner_references
                .as_ref()
                .map(|refs| {
                    refs.iter()
                        .any(|r| r.kind == "ReplicaSet" && r.name.starts_with(&owner_prefix))
                })
                .unwrap_or(false)
        })
        .collect();

    if pods.len() <= 1 {
        return Err(Error::safety(format!(
            "refusing to delete the sole pod of {} (would cause an outage)",
            resource.name
        )));
    }

    let victim = select_victim(&pods)
        .map(|p| p.name_any())
        .ok_or_else(|| Error::missing("Pod", &resource.name))?;
    api.delete(&victim, &DeleteParams::default()).await?;
    Ok(format!("deleted pod {}", victim))
}

/// Capture the workload's pre-remediation state for manual rollback
/// reference.
pub async fn preflight_snapshot(client: Client, resource: &ResourceRef) -> Result<String> {
    let deployment = get_deployment(client, resource).await?;
    Ok(render_preflight(&deployment))
}

fn render_preflight(deployment: &Deployment) -> String {
    let mut out = format!(
        "replicas={}",
        deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1)
    );
    let containers = deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .map(|p| p.containers.as_slice())
        .unwrap_or(&[]);
    for c in containers {
        out.push_str(&format!(
            "; container {} image={}",
            c.name,
            c.image.as_deref().unwrap_or("-")
        ));
        if let Some(resources) = &c.resources {
            if let Some(requests) = &resources.requests {
                for (k, v) in requests {
                    out.push_str(&format!(" request.{}={}", k, v.0));
                }
            }
            if let Some(limits) = &resources.limits {
                for (k, v) in limits {
                    out.push_str(&format!(" limit.{}={}", k, v.0));
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        ContainerState, ContainerStateWaiting, ContainerStatus, PodStatus,
    };
    use pretty_assertions::assert_eq;

    fn action(kind: &str, params: &[(&str, &str)]) -> ActionSpec {
        ActionSpec {
            name: kind.to_lowercase(),
            action: kind.into(),
            description: String::new(),
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_safety_rejects_scale_to_zero() {
        let err = validate_safety(&[action("ScaleDeployment", &[("replicas", "0")])]).unwrap_err();
        assert!(matches!(err, Error::SafetyViolation(_)));
    }

    #[test]
    fn test_safety_rejects_custom() {
        let err = validate_safety(&[action("RunShellScript", &[])]).unwrap_err();
        assert!(matches!(err, Error::SafetyViolation(_)));
    }

    #[test]
    fn test_safety_rejects_empty_adjust() {
        let err = validate_safety(&[action("AdjustResources", &[("container", "app")])]).unwrap_err();
        assert!(matches!(err, Error::SafetyViolation(_)));
    }

    #[test]
    fn test_safety_rejects_double_delete_pod() {
        let plan = vec![action("DeletePod", &[]), action("DeletePod", &[])];
        let err = validate_safety(&plan).unwrap_err();
        assert!(matches!(err, Error::SafetyViolation(_)));
    }

    #[test]
    fn test_safety_accepts_reasonable_plan() {
        let plan = vec![
            action("ScaleDeployment", &[("replicas", "4")]),
            action("RestartDeployment", &[]),
            action("DeletePod", &[]),
            action("AdjustResources", &[("memory_limit", "512Mi")]),
        ];
        assert!(validate_safety(&plan).is_ok());
    }

    #[test]
    fn test_rollback_target_previous() {
        let revisions = [
            RevisionInfo { revision: 3, ready_replicas: 0 },
            RevisionInfo { revision: 2, ready_replicas: 0 },
            RevisionInfo { revision: 1, ready_replicas: 3 },
        ];
        assert_eq!(select_rollback_target(&revisions, "").unwrap(), 2);
        assert_eq!(select_rollback_target(&revisions, "previous").unwrap(), 2);
    }

    #[test]
    fn test_rollback_target_healthy() {
        let revisions = [
            RevisionInfo { revision: 2, ready_replicas: 0 },
            RevisionInfo { revision: 1, ready_replicas: 3 },
        ];
        assert_eq!(select_rollback_target(&revisions, "healthy").unwrap(), 1);

        // No healthy candidate falls back to previous.
        let unhealthy = [
            RevisionInfo { revision: 2, ready_replicas: 0 },
            RevisionInfo { revision: 1, ready_replicas: 0 },
        ];
        assert_eq!(select_rollback_target(&unhealthy, "healthy").unwrap(), 1);
    }

    #[test]
    fn test_rollback_target_exact_and_missing() {
        let revisions = [
            RevisionInfo { revision: 5, ready_replicas: 1 },
            RevisionInfo { revision: 4, ready_replicas: 1 },
        ];
        assert_eq!(select_rollback_target(&revisions, "4").unwrap(), 4);
        assert!(select_rollback_target(&revisions, "9").is_err());
        assert!(select_rollback_target(&revisions, "latest").is_err());
    }

    #[test]
    fn test_rollback_requires_two_revisions() {
        let one = [RevisionInfo { revision: 1, ready_replicas: 1 }];
        assert!(select_rollback_target(&one, "previous").is_err());
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("500m").unwrap(), 0.5);
        assert_eq!(parse_quantity("2").unwrap(), 2.0);
        assert_eq!(parse_quantity("128Mi").unwrap(), 128.0 * 1024.0 * 1024.0);
        assert_eq!(parse_quantity("1Gi").unwrap(), 1024f64.powi(3));
        assert_eq!(parse_quantity("2k").unwrap(), 2000.0);
        assert!(parse_quantity("five").is_err());
        assert!(parse_quantity("10Xi").is_err());
        assert!(parse_quantity("").is_err());
    }

    #[test]
    fn test_adjust_rejects_limit_below_request() {
        let params: BTreeMap<String, String> = [
            ("memory_limit".to_string(), "128Mi".to_string()),
            ("memory_request".to_string(), "256Mi".to_string()),
        ]
        .into();
        let err = apply_resource_params(None, &params).unwrap_err();
        assert!(matches!(err, Error::SafetyViolation(_)));
    }

    #[test]
    fn test_adjust_merges_onto_existing() {
        let existing = ResourceRequirements {
            requests: Some(
                [("memory".to_string(), Quantity("64Mi".into()))]
                    .into_iter()
                    .collect(),
            ),
            ..Default::default()
        };
        let params: BTreeMap<String, String> =
            [("memory_limit".to_string(), "256Mi".to_string())].into();
        let result = apply_resource_params(Some(existing), &params).unwrap();
        assert_eq!(result.limits.unwrap().get("memory").unwrap().0, "256Mi");
        assert_eq!(result.requests.unwrap().get("memory").unwrap().0, "64Mi");
    }

    fn pod(name: &str, crash_looping: bool, restarts: i32) -> Pod {
        let mut p = Pod::default();
        p.metadata.name = Some(name.into());
        let waiting = crash_looping.then(|| ContainerStateWaiting {
            reason: Some("CrashLoopBackOff".into()),
            ..Default::default()
        });
        p.status = Some(PodStatus {
            phase: Some("Running".into()),
            container_statuses: Some(vec![ContainerStatus {
                name: "app".into(),
                restart_count: restarts,
                state: Some(ContainerState {
                    waiting,
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        });
        p
    }

    #[test]
    fn test_victim_prefers_crash_loop() {
        let pods = vec![
            pod("busy", false, 20),
            pod("crashing", true, 2),
            pod("calm", false, 0),
        ];
        assert_eq!(select_victim(&pods).unwrap().name_any(), "crashing");
    }

    #[test]
    fn test_victim_falls_back_to_restarts() {
        let pods = vec![pod("calm", false, 0), pod("busy", false, 7)];
        assert_eq!(select_victim(&pods).unwrap().name_any(), "busy");
    }

    #[test]
    fn test_preflight_render() {
        let mut deployment = Deployment::default();
        deployment.spec = Some(k8s_openapi::api::apps::v1::DeploymentSpec {
            replicas: Some(2),
            template: k8s_openapi::api::core::v1::PodTemplateSpec {
                spec: Some(k8s_openapi::api::core::v1::PodSpec {
                    containers: vec![k8s_openapi::api::core::v1::Container {
                        name: "app".into(),
                        image: Some("api:2.0".into()),
                        resources: Some(ResourceRequirements {
                            limits: Some(
                                [("memory".to_string(), Quantity("512Mi".into()))]
                                    .into_iter()
                                    .collect(),
                            ),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        });
        let text = render_preflight(&deployment);
        assert!(text.contains("replicas=2"));
        assert!(text.contains("container app image=api:2.0"));
        assert!(text.contains("limit.memory=512Mi"));
    }
}
