//! # aiops-core
//!
//! An AIOps control plane for Kubernetes: anomalies are pulled from an
//! external detector, correlated into incidents, analyzed by an inference
//! backend, and remediated with safety constraints and verification,
//! all as declarative API objects driven by cooperating reconcilers.
//!
//! ## Core Components
//!
//! - **Correlation**: risk scoring, severity, incident ids
//! - **Bridge**: alert polling, dedup, Anomaly materialization
//! - **Controllers**: one reconciler per owned CR kind
//! - **Backend**: the gRPC seam to the inference service
//!
//! ## Pipeline
//!
//! ```text
//! WatcherBridge -> Anomaly -> Issue -> AIInsight -> RemediationPlan
//!                                   -> Runbook (matched, synthesized, learned)
//!                                   -> PostMortem
//! ```

pub mod api;
pub mod backend;
pub mod bridge;
pub mod context;
pub mod controller;
pub mod correlation;
pub mod error;
pub mod runbook;
pub mod telemetry;

// Re-exports for convenience
pub use api::{
    AIInsight, Anomaly, Instance, Issue, IssuePhase, PlanPhase, PostMortem, PostMortemPhase,
    RemediationPlan, Runbook, Severity, SignalType,
};
pub use backend::{GrpcBackend, InferenceBackend};
pub use bridge::{DedupInvalidator, DedupTable, WatcherBridge};
pub use controller::Context;
pub use error::{Error, Result};
