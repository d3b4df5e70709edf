//! Shared types used across the CRD surface.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Closed set of anomaly signal types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    ErrorRate,
    Latency,
    PodRestart,
    CpuHigh,
    MemoryHigh,
    OomKill,
    PodNotReady,
    DeployFailing,
}

impl SignalType {
    /// Parse a detector-side signal string; unknown strings map to `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "error_rate" => Some(Self::ErrorRate),
            "latency" => Some(Self::Latency),
            "pod_restart" => Some(Self::PodRestart),
            "cpu_high" => Some(Self::CpuHigh),
            "memory_high" => Some(Self::MemoryHigh),
            "oom_kill" => Some(Self::OomKill),
            "pod_not_ready" => Some(Self::PodNotReady),
            "deploy_failing" => Some(Self::DeployFailing),
            _ => None,
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ErrorRate => "error_rate",
            Self::Latency => "latency",
            Self::PodRestart => "pod_restart",
            Self::CpuHigh => "cpu_high",
            Self::MemoryHigh => "memory_high",
            Self::OomKill => "oom_kill",
            Self::PodNotReady => "pod_not_ready",
            Self::DeployFailing => "deploy_failing",
        };
        write!(f, "{}", s)
    }
}

/// Incident severity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

/// Reference to the workload a signal or incident is about.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

impl ResourceRef {
    pub fn deployment(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            kind: "Deployment".into(),
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Closed set of remediation action kinds.
///
/// Unknown kinds coming back from the backend map to `Custom` and are
/// rejected by the safety gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ActionKind {
    ScaleDeployment,
    RestartDeployment,
    RollbackDeployment,
    PatchConfig,
    AdjustResources,
    DeletePod,
    Custom,
}

impl ActionKind {
    /// Map a free-form action string onto the closed set.
    pub fn parse(s: &str) -> Self {
        match s {
            "ScaleDeployment" => Self::ScaleDeployment,
            "RestartDeployment" => Self::RestartDeployment,
            "RollbackDeployment" => Self::RollbackDeployment,
            "PatchConfig" => Self::PatchConfig,
            "AdjustResources" => Self::AdjustResources,
            "DeletePod" => Self::DeletePod,
            _ => Self::Custom,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ScaleDeployment => "ScaleDeployment",
            Self::RestartDeployment => "RestartDeployment",
            Self::RollbackDeployment => "RollbackDeployment",
            Self::PatchConfig => "PatchConfig",
            Self::AdjustResources => "AdjustResources",
            Self::DeletePod => "DeletePod",
            Self::Custom => "Custom",
        };
        write!(f, "{}", s)
    }
}

/// One remediation step: a suggested action, runbook step, or plan action.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActionSpec {
    pub name: String,
    pub action: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl ActionSpec {
    /// The action kind, mapping unknown strings to `Custom`.
    pub fn kind(&self) -> ActionKind {
        ActionKind::parse(&self.action)
    }
}

/// Maximum length of a Kubernetes object name segment.
pub const MAX_NAME_LEN: usize = 63;

/// Sanitize a generated name into a DNS-1123 label.
///
/// Lowercases, collapses invalid characters into single dashes, strips
/// leading/trailing dashes, and truncates to 63 characters.
pub fn sanitize_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_dash = true;
    for c in raw.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() {
            out.push(c);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    if out.len() > MAX_NAME_LEN {
        out.truncate(MAX_NAME_LEN);
        while out.ends_with('-') {
            out.pop();
        }
    }
    out
}
