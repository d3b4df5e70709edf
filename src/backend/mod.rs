//! Outbound surface to the external inference service.
//!
//! `InferenceBackend` is the seam the reconcilers talk through; the gRPC
//! implementation holds one shared channel, established by the bridge and
//! re-established on the next poll after a failure. All RPCs carry the
//! instance's bearer token in metadata.

mod connect;
pub mod pb;

pub use connect::{connect, connection_opts, first_ready_instance, ConnectionOpts};

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tonic::metadata::MetadataValue;
use tonic::transport::Channel;
use tracing::debug;

use crate::api::{ActionSpec, AgenticStepRecord, Issue};
use crate::error::{Error, Result};
use pb::inference_service_client::InferenceServiceClient;

/// One alert pulled from the signal source.
#[derive(Debug, Clone, PartialEq)]
pub struct WatcherAlert {
    pub alert_type: String,
    pub severity: String,
    pub message: String,
    pub object: String,
    pub namespace: String,
    pub deployment: String,
    pub timestamp_unix: i64,
}

impl From<pb::Alert> for WatcherAlert {
    fn from(a: pb::Alert) -> Self {
        Self {
            alert_type: a.r#type,
            severity: a.severity,
            message: a.message,
            object: a.object,
            namespace: a.namespace,
            deployment: a.deployment,
            timestamp_unix: a.timestamp_unix,
        }
    }
}

/// Issue fields shipped to the backend with every analysis/step request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IssueSummary {
    pub issue_name: String,
    pub namespace: String,
    pub resource_kind: String,
    pub resource_name: String,
    pub signal_type: String,
    pub severity: String,
    pub description: String,
    pub risk_score: u32,
}

impl IssueSummary {
    pub fn from_issue(issue: &Issue) -> Self {
        use kube::ResourceExt;
        Self {
            issue_name: issue.name_any(),
            namespace: issue.namespace().unwrap_or_default(),
            resource_kind: issue.spec.resource.kind.clone(),
            resource_name: issue.spec.resource.name.clone(),
            signal_type: issue.spec.signal_type.to_string(),
            severity: issue.spec.severity.to_string(),
            description: issue.spec.description.clone(),
            risk_score: issue.spec.risk_score,
        }
    }

    fn into_pb(self) -> pb::IssueContext {
        pb::IssueContext {
            issue_name: self.issue_name,
            namespace: self.namespace,
            resource_kind: self.resource_kind,
            resource_name: self.resource_name,
            signal_type: self.signal_type,
            severity: self.severity,
            description: self.description,
            risk_score: self.risk_score.min(i32::MAX as u32) as i32,
        }
    }
}

/// Request for a one-shot root-cause analysis.
#[derive(Debug, Clone, Default)]
pub struct AnalysisRequest {
    pub context: IssueSummary,
    pub k8s_context: String,
    /// Evidence from failed attempts, present on retry-triggered re-analysis.
    pub failure_context: String,
    pub provider: String,
    pub model: String,
}

/// Analysis produced by the backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Analysis {
    pub analysis: String,
    pub confidence: f64,
    pub recommendations: Vec<String>,
    pub suggested_actions: Vec<ActionSpec>,
    pub provider: String,
    pub model: String,
}

fn action_from_pb(a: pb::SuggestedAction) -> ActionSpec {
    ActionSpec {
        name: a.name,
        action: a.action,
        description: a.description,
        params: a.params.into_iter().collect::<BTreeMap<_, _>>(),
    }
}

impl From<pb::AnalyzeIssueResponse> for Analysis {
    fn from(r: pb::AnalyzeIssueResponse) -> Self {
        Self {
            analysis: r.analysis,
            confidence: r.confidence.clamp(0.0, 1.0),
            recommendations: r.recommendations,
            suggested_actions: r.suggested_actions.into_iter().map(action_from_pb).collect(),
            provider: r.provider,
            model: r.model,
        }
    }
}

/// Request for one step of an agentic session.
#[derive(Debug, Clone, Default)]
pub struct AgenticRequest {
    pub context: IssueSummary,
    pub k8s_context: String,
    pub history: Vec<AgenticStepRecord>,
    pub current_step: u32,
    pub max_steps: u32,
    pub provider: String,
    pub model: String,
}

/// The action the backend wants executed next.
#[derive(Debug, Clone, PartialEq)]
pub struct ProposedAction {
    pub action: String,
    pub params: BTreeMap<String, String>,
}

/// Post-mortem narrative returned when a session resolves.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostMortemNotes {
    pub summary: String,
    pub root_cause: String,
    pub impact: String,
    pub lessons_learned: Vec<String>,
    pub prevention_actions: Vec<String>,
}

/// Outcome of one agentic step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgenticOutcome {
    pub reasoning: String,
    pub next_action: Option<ProposedAction>,
    pub resolved: bool,
    pub postmortem: PostMortemNotes,
}

impl From<pb::AgenticStepResponse> for AgenticOutcome {
    fn from(r: pb::AgenticStepResponse) -> Self {
        let next_action = r.next_action.filter(|a| !a.action.is_empty()).map(|a| {
            ProposedAction {
                action: a.action,
                params: a.params.into_iter().collect(),
            }
        });
        Self {
            reasoning: r.reasoning,
            next_action,
            resolved: r.resolved,
            postmortem: PostMortemNotes {
                summary: r.postmortem_summary,
                root_cause: r.root_cause,
                impact: r.impact,
                lessons_learned: r.lessons_learned,
                prevention_actions: r.prevention_actions,
            },
        }
    }
}

fn history_entry_to_pb(rec: &AgenticStepRecord) -> pb::AgenticHistoryEntry {
    pb::AgenticHistoryEntry {
        step_number: rec.step_number.min(i32::MAX as u32) as i32,
        ai_message: rec.ai_message.clone(),
        action: rec.action.clone().unwrap_or_default(),
        params: rec
            .params
            .clone()
            .unwrap_or_default()
            .into_iter()
            .collect(),
        observation: rec.observation.clone(),
    }
}

/// The RPC seam all reconcilers and the bridge talk through.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Whether a channel to the backend is currently established.
    async fn connected(&self) -> bool;

    /// Pull pending alerts from the signal source.
    async fn get_alerts(&self) -> Result<Vec<WatcherAlert>>;

    /// One-shot analysis of an Issue.
    async fn analyze_issue(&self, request: AnalysisRequest) -> Result<Analysis>;

    /// One step of an agentic remediation session.
    async fn agentic_step(&self, request: AgenticRequest) -> Result<AgenticOutcome>;
}

/// Identity of the Instance a connection was established against, kept
/// for provenance labeling.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceRef {
    pub name: String,
    pub namespace: String,
}

struct ConnectedBackend {
    client: InferenceServiceClient,
    token: Option<String>,
    instance: InstanceRef,
}

/// gRPC-backed implementation sharing one channel across the process.
#[derive(Default)]
pub struct GrpcBackend {
    state: RwLock<Option<ConnectedBackend>>,
}

impl GrpcBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a freshly dialed channel.
    pub async fn install(&self, channel: Channel, token: Option<String>, instance: InstanceRef) {
        let mut state = self.state.write().await;
        debug!(instance = %instance.name, "inference backend connected");
        *state = Some(ConnectedBackend {
            client: InferenceServiceClient::new(channel),
            token,
            instance,
        });
    }

    /// Drop the current channel; the bridge redials on its next tick.
    pub async fn reset(&self) {
        *self.state.write().await = None;
    }

    /// The Instance behind the current connection, for provenance labels.
    pub async fn instance(&self) -> Option<InstanceRef> {
        self.state.read().await.as_ref().map(|s| s.instance.clone())
    }

    async fn client(&self) -> Result<(InferenceServiceClient, Option<String>)> {
        let state = self.state.read().await;
        match state.as_ref() {
            Some(s) => Ok((s.client.clone(), s.token.clone())),
            None => Err(Error::backend_unavailable("no instance connected")),
        }
    }
}

fn authorize<T>(message: T, token: &Option<String>) -> Result<tonic::Request<T>> {
    let mut request = tonic::Request::new(message);
    if let Some(token) = token {
        let value = MetadataValue::try_from(format!("Bearer {}", token))
            .map_err(|_| Error::backend_unavailable("bearer token is not valid metadata"))?;
        request.metadata_mut().insert("authorization", value);
    }
    Ok(request)
}

#[async_trait]
impl InferenceBackend for GrpcBackend {
    async fn connected(&self) -> bool {
        self.state.read().await.is_some()
    }

    async fn get_alerts(&self) -> Result<Vec<WatcherAlert>> {
        let (mut client, token) = self.client().await?;
        let request = authorize(pb::GetAlertsRequest {}, &token)?;
        let response = client.get_alerts(request).await?;
        Ok(response
            .into_inner()
            .alerts
            .into_iter()
            .map(WatcherAlert::from)
            .collect())
    }

    async fn analyze_issue(&self, request: AnalysisRequest) -> Result<Analysis> {
        let (mut client, token) = self.client().await?;
        let wire = pb::AnalyzeIssueRequest {
            context: Some(request.context.into_pb()),
            k8s_context: request.k8s_context,
            previous_failure_context: request.failure_context,
            provider: request.provider,
            model: request.model,
        };
        let response = client.analyze_issue(authorize(wire, &token)?).await?;
        Ok(Analysis::from(response.into_inner()))
    }

    async fn agentic_step(&self, request: AgenticRequest) -> Result<AgenticOutcome> {
        let (mut client, token) = self.client().await?;
        let wire = pb::AgenticStepRequest {
            context: Some(request.context.into_pb()),
            k8s_context: request.k8s_context,
            history: request.history.iter().map(history_entry_to_pb).collect(),
            current_step: request.current_step.min(i32::MAX as u32) as i32,
            max_steps: request.max_steps.min(i32::MAX as u32) as i32,
            provider: request.provider,
            model: request.model,
        };
        let response = client.agentic_step(authorize(wire, &token)?).await?;
        Ok(AgenticOutcome::from(response.into_inner()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_outcome_ignores_empty_next_action() {
        let resp = pb::AgenticStepResponse {
            reasoning: "nothing to do yet".into(),
            next_action: Some(pb::NextAction {
                action: String::new(),
                params: Default::default(),
            }),
            ..Default::default()
        };
        let outcome = AgenticOutcome::from(resp);
        assert_eq!(outcome.next_action, None);
    }

    #[test]
    fn test_confidence_clamped() {
        let resp = pb::AnalyzeIssueResponse {
            analysis: "a".into(),
            confidence: 3.2,
            ..Default::default()
        };
        assert_eq!(Analysis::from(resp).confidence, 1.0);
    }

    #[test]
    fn test_history_entry_mapping() {
        let rec = AgenticStepRecord {
            step_number: 2,
            ai_message: "restart it".into(),
            action: Some("RestartDeployment".into()),
            params: None,
            observation: "SUCCESS: restarted".into(),
            timestamp: Utc::now(),
        };
        let wire = history_entry_to_pb(&rec);
        assert_eq!(wire.step_number, 2);
        assert_eq!(wire.action, "RestartDeployment");
        assert_eq!(wire.observation, "SUCCESS: restarted");
    }

    #[tokio::test]
    async fn test_disconnected_backend_errors() {
        let backend = GrpcBackend::new();
        assert!(!backend.connected().await);
        let err = backend.get_alerts().await.unwrap_err();
        assert!(matches!(err, Error::BackendUnavailable(_)));
    }
}
