//! Declarative API surface of the control plane.
//!
//! Every entity is a namespaced CRD under `platform.chatcli.io/v1alpha1`
//! with an immutable `spec` and a status subresource owned by exactly one
//! reconciler. Auto-generated names are sanitized DNS-1123 labels.

mod anomaly;
mod common;
mod insight;
mod instance;
mod issue;
mod plan;
mod postmortem;
mod runbook;

pub use anomaly::{Anomaly, AnomalySpec, AnomalyStatus};
pub use common::{
    sanitize_name, ActionKind, ActionSpec, ResourceRef, Severity, SignalType, MAX_NAME_LEN,
};
pub use insight::{AIInsight, AIInsightSpec, AIInsightStatus, FAILURE_CONTEXT_ANNOTATION};
pub use instance::{
    AiBackendSpec, Instance, InstanceAuthSpec, InstanceSpec, InstanceStatus, InstanceTlsSpec,
    DEFAULT_INSTANCE_PORT,
};
pub use issue::{
    Issue, IssuePhase, IssueSpec, IssueStatus, DEFAULT_MAX_REMEDIATION_ATTEMPTS,
};
pub use plan::{
    AgenticStepRecord, EvidenceItem, PlanPhase, RemediationPlan, RemediationPlanSpec,
    RemediationPlanStatus, ANNOTATION_LIST_SEPARATOR, DEFAULT_AGENTIC_MAX_STEPS,
    IMPACT_ANNOTATION, LESSONS_LEARNED_ANNOTATION, POSTMORTEM_SUMMARY_ANNOTATION,
    PREVENTION_ACTIONS_ANNOTATION, ROOT_CAUSE_ANNOTATION,
};
pub use postmortem::{
    ActionRecord, PostMortem, PostMortemPhase, PostMortemSpec, PostMortemStatus, TimelineEntry,
    ISSUE_LABEL, SEVERITY_LABEL,
};
pub use runbook::{
    Runbook, RunbookSpec, RunbookTrigger, AUTO_GENERATED_LABEL, SOURCE_ISSUE_LABEL, SOURCE_LABEL,
};

/// API group of all owned kinds.
pub const API_GROUP: &str = "platform.chatcli.io";

/// Finalizer placed on Issues.
pub const ISSUE_FINALIZER: &str = "issues.platform.chatcli.io";

// Provenance label keys (spec'd as bare names on the wire).
pub const SOURCE_LABEL_KEY: &str = "source";
pub const DEPLOYMENT_LABEL_KEY: &str = "deployment";
pub const INSTANCE_LABEL_KEY: &str = "instance";
pub const INSTANCE_NAMESPACE_LABEL_KEY: &str = "instance-namespace";
pub const INCIDENT_ID_LABEL_KEY: &str = "inc-id";
pub const RESOURCE_LABEL_KEY: &str = "resource";
pub const SIGNAL_LABEL_KEY: &str = "signal";
