//! Anomaly CRD: one raw signal observation on a workload.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{ResourceRef, SignalType};

/// A single raw signal emitted by the anomaly detector.
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "platform.chatcli.io",
    version = "v1alpha1",
    kind = "Anomaly",
    namespaced,
    status = "AnomalyStatus",
    shortname = "anom",
    printcolumn = r#"{"name":"Signal","type":"string","jsonPath":".spec.signalType"}"#,
    printcolumn = r#"{"name":"Resource","type":"string","jsonPath":".spec.resource.name"}"#,
    printcolumn = r#"{"name":"Correlated","type":"boolean","jsonPath":".status.correlated"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AnomalySpec {
    /// Which detector produced the signal (e.g. `watcher`).
    pub source: String,
    pub signal_type: SignalType,
    pub resource: ResourceRef,
    /// Observed value at detection time, as reported by the detector.
    #[serde(default)]
    pub value: String,
    /// Threshold the observation crossed, when the detector reports one.
    #[serde(default)]
    pub threshold: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyStatus {
    /// Once true, the anomaly is never re-correlated.
    #[serde(default)]
    pub correlated: bool,
    /// Name of the Issue this anomaly was folded into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_ref: Option<String>,
}

impl Anomaly {
    /// Whether this anomaly has already been folded into an Issue.
    pub fn is_correlated(&self) -> bool {
        self.status.as_ref().map(|s| s.correlated).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_spec_serializes_camel_case() {
        let spec = AnomalySpec {
            source: "watcher".into(),
            signal_type: SignalType::OomKill,
            resource: ResourceRef::deployment("payments-api", "default"),
            value: "3".into(),
            threshold: "1".into(),
            description: "container killed".into(),
        };
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["signalType"], "oom_kill");
        assert_eq!(json["resource"]["namespace"], "default");
    }

    #[test]
    fn test_status_defaults() {
        let status: AnomalyStatus = serde_json::from_str("{}").unwrap();
        assert!(!status.correlated);
        assert_eq!(status.issue_ref, None);
    }
}
