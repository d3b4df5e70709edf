//! Print the CRD manifests for all owned kinds as a YAML stream.

use kube::CustomResourceExt;

fn main() {
    let crds = [
        aiops_core::Anomaly::crd(),
        aiops_core::Issue::crd(),
        aiops_core::AIInsight::crd(),
        aiops_core::Runbook::crd(),
        aiops_core::RemediationPlan::crd(),
        aiops_core::PostMortem::crd(),
    ];
    for crd in crds {
        print!(
            "---\n{}",
            serde_yaml::to_string(&crd).expect("CRD serializes to YAML")
        );
    }
}
