//! Instance CRD, modeled read-only.
//!
//! Workload provisioning owns this kind; the incident pipeline only reads
//! it to discover a ready inference backend, its address, credentials, and
//! the provider/model pair to analyze with.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default gRPC port of a provisioned inference server.
pub const DEFAULT_INSTANCE_PORT: i32 = 50051;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AiBackendSpec {
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub model: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstanceTlsSpec {
    #[serde(default)]
    pub enabled: bool,
    /// Secret holding the CA certificate under the `ca.crt` key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstanceAuthSpec {
    /// Secret holding the bearer token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
    /// Key within the secret, defaulting to `token`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
}

/// A provisioned inference server instance (spec surface consumed here).
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "platform.chatcli.io",
    version = "v1alpha1",
    kind = "Instance",
    namespaced,
    status = "InstanceStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    #[serde(default)]
    pub ai: AiBackendSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<InstanceTlsSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<InstanceAuthSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatus {
    #[serde(default)]
    pub ready: bool,
}

impl Instance {
    /// Whether the workload reconciler has marked this instance ready.
    pub fn is_ready(&self) -> bool {
        self.status.as_ref().map(|s| s.ready).unwrap_or(false)
    }

    /// The gRPC port to dial, with the conventional default.
    pub fn port(&self) -> i32 {
        self.spec.port.unwrap_or(DEFAULT_INSTANCE_PORT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_and_port_defaults() {
        let mut inst = Instance::new("chatcli", InstanceSpec::default());
        assert!(!inst.is_ready());
        assert_eq!(inst.port(), DEFAULT_INSTANCE_PORT);

        inst.status = Some(InstanceStatus { ready: true });
        inst.spec.port = Some(6000);
        assert!(inst.is_ready());
        assert_eq!(inst.port(), 6000);
    }
}
