//! Wire types and client stub for the inference service.
//!
//! Message and client definitions mirror `tonic-build` output for
//! `aiops.v1.InferenceService` and are kept vendored so the crate builds
//! without protoc.

use std::collections::HashMap;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetAlertsRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Alert {
    #[prost(string, tag = "1")]
    pub r#type: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub severity: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub message: ::prost::alloc::string::String,
    #[prost(string, tag = "4")]
    pub object: ::prost::alloc::string::String,
    #[prost(string, tag = "5")]
    pub namespace: ::prost::alloc::string::String,
    #[prost(string, tag = "6")]
    pub deployment: ::prost::alloc::string::String,
    #[prost(int64, tag = "7")]
    pub timestamp_unix: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetAlertsResponse {
    #[prost(message, repeated, tag = "1")]
    pub alerts: ::prost::alloc::vec::Vec<Alert>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IssueContext {
    #[prost(string, tag = "1")]
    pub issue_name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub namespace: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub resource_kind: ::prost::alloc::string::String,
    #[prost(string, tag = "4")]
    pub resource_name: ::prost::alloc::string::String,
    #[prost(string, tag = "5")]
    pub signal_type: ::prost::alloc::string::String,
    #[prost(string, tag = "6")]
    pub severity: ::prost::alloc::string::String,
    #[prost(string, tag = "7")]
    pub description: ::prost::alloc::string::String,
    #[prost(int32, tag = "8")]
    pub risk_score: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SuggestedAction {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub action: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub description: ::prost::alloc::string::String,
    #[prost(map = "string, string", tag = "4")]
    pub params: HashMap<::prost::alloc::string::String, ::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AnalyzeIssueRequest {
    #[prost(message, optional, tag = "1")]
    pub context: ::core::option::Option<IssueContext>,
    #[prost(string, tag = "2")]
    pub k8s_context: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub previous_failure_context: ::prost::alloc::string::String,
    #[prost(string, tag = "4")]
    pub provider: ::prost::alloc::string::String,
    #[prost(string, tag = "5")]
    pub model: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AnalyzeIssueResponse {
    #[prost(string, tag = "1")]
    pub analysis: ::prost::alloc::string::String,
    #[prost(double, tag = "2")]
    pub confidence: f64,
    #[prost(string, repeated, tag = "3")]
    pub recommendations: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(message, repeated, tag = "4")]
    pub suggested_actions: ::prost::alloc::vec::Vec<SuggestedAction>,
    #[prost(string, tag = "5")]
    pub model: ::prost::alloc::string::String,
    #[prost(string, tag = "6")]
    pub provider: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AgenticHistoryEntry {
    #[prost(int32, tag = "1")]
    pub step_number: i32,
    #[prost(string, tag = "2")]
    pub ai_message: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub action: ::prost::alloc::string::String,
    #[prost(map = "string, string", tag = "4")]
    pub params: HashMap<::prost::alloc::string::String, ::prost::alloc::string::String>,
    #[prost(string, tag = "5")]
    pub observation: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AgenticStepRequest {
    #[prost(message, optional, tag = "1")]
    pub context: ::core::option::Option<IssueContext>,
    #[prost(string, tag = "2")]
    pub k8s_context: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "3")]
    pub history: ::prost::alloc::vec::Vec<AgenticHistoryEntry>,
    #[prost(int32, tag = "4")]
    pub current_step: i32,
    #[prost(int32, tag = "5")]
    pub max_steps: i32,
    #[prost(string, tag = "6")]
    pub provider: ::prost::alloc::string::String,
    #[prost(string, tag = "7")]
    pub model: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NextAction {
    #[prost(string, tag = "1")]
    pub action: ::prost::alloc::string::String,
    #[prost(map = "string, string", tag = "2")]
    pub params: HashMap<::prost::alloc::string::String, ::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AgenticStepResponse {
    #[prost(string, tag = "1")]
    pub reasoning: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "2")]
    pub next_action: ::core::option::Option<NextAction>,
    #[prost(bool, tag = "3")]
    pub resolved: bool,
    #[prost(string, tag = "4")]
    pub postmortem_summary: ::prost::alloc::string::String,
    #[prost(string, tag = "5")]
    pub root_cause: ::prost::alloc::string::String,
    #[prost(string, tag = "6")]
    pub impact: ::prost::alloc::string::String,
    #[prost(string, repeated, tag = "7")]
    pub lessons_learned: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(string, repeated, tag = "8")]
    pub prevention_actions: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

pub mod inference_service_client {
    #![allow(unused_variables, dead_code, missing_docs, clippy::let_unit_value)]

    use tonic::codegen::http::uri::PathAndQuery;
    use tonic::transport::Channel;

    /// Unary client for the inference service.
    #[derive(Debug, Clone)]
    pub struct InferenceServiceClient {
        inner: tonic::client::Grpc<Channel>,
    }

    impl InferenceServiceClient {
        pub fn new(channel: Channel) -> Self {
            Self {
                inner: tonic::client::Grpc::new(channel),
            }
        }

        async fn ready(&mut self) -> Result<(), tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::unknown(format!("Service was not ready: {}", e))
            })
        }

        pub async fn get_alerts(
            &mut self,
            request: tonic::Request<super::GetAlertsRequest>,
        ) -> Result<tonic::Response<super::GetAlertsResponse>, tonic::Status> {
            self.ready().await?;
            let codec = tonic::codec::ProstCodec::default();
            let path = PathAndQuery::from_static("/aiops.v1.InferenceService/GetAlerts");
            self.inner.unary(request, path, codec).await
        }

        pub async fn analyze_issue(
            &mut self,
            request: tonic::Request<super::AnalyzeIssueRequest>,
        ) -> Result<tonic::Response<super::AnalyzeIssueResponse>, tonic::Status> {
            self.ready().await?;
            let codec = tonic::codec::ProstCodec::default();
            let path = PathAndQuery::from_static("/aiops.v1.InferenceService/AnalyzeIssue");
            self.inner.unary(request, path, codec).await
        }

        pub async fn agentic_step(
            &mut self,
            request: tonic::Request<super::AgenticStepRequest>,
        ) -> Result<tonic::Response<super::AgenticStepResponse>, tonic::Status> {
            self.ready().await?;
            let codec = tonic::codec::ProstCodec::default();
            let path = PathAndQuery::from_static("/aiops.v1.InferenceService/AgenticStep");
            self.inner.unary(request, path, codec).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_alert_round_trip() {
        let alert = Alert {
            r#type: "OOMKilled".into(),
            severity: "critical".into(),
            message: "container killed".into(),
            object: "payments-api-7f9c".into(),
            namespace: "default".into(),
            deployment: "payments-api".into(),
            timestamp_unix: 1_754_000_000,
        };
        let bytes = alert.encode_to_vec();
        let back = Alert::decode(bytes.as_slice()).unwrap();
        assert_eq!(back, alert);
    }

    #[test]
    fn test_agentic_response_defaults() {
        let resp = AgenticStepResponse::default();
        assert!(!resp.resolved);
        assert!(resp.next_action.is_none());
        assert!(resp.lessons_learned.is_empty());
    }
}
