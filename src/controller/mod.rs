//! Reconcilers for the incident pipeline.
//!
//! Each owned CR kind has exactly one reconciler driving its status;
//! other reconcilers only create or read it. All of them share the same
//! `Context` (API client, inference backend seam, dedup invalidator) and
//! are wired through `kube::runtime::Controller` with per-object
//! serialization and optimistic-concurrency requeues.

pub mod actions;
pub mod agentic;
pub mod anomaly;
pub mod insight;
pub mod issue;
pub mod plan;
pub mod postmortem;

use futures::StreamExt;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::api::{AIInsight, Anomaly, Issue, PostMortem, RemediationPlan};
use crate::backend::{GrpcBackend, InferenceBackend};
use crate::bridge::{DedupInvalidator, DedupTable};
use crate::error::{Error, Result};

/// Shared state handed to every reconciler.
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Seam to the external inference service
    pub backend: Arc<dyn InferenceBackend>,
    /// Bridge dedup contract, invalidated on terminal Issue transitions
    pub dedup: Arc<dyn DedupInvalidator>,
}

impl Context {
    pub fn new(
        client: Client,
        backend: Arc<GrpcBackend>,
        dedup: Arc<DedupTable>,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            backend,
            dedup,
        })
    }
}

/// Requeue policy applied by every controller's error hook: conflicts
/// retry immediately against fresh state, everything else backs off.
pub(crate) fn requeue_for(error: &Error) -> Action {
    if error.is_conflict() {
        Action::requeue(Duration::ZERO)
    } else {
        Action::requeue(Duration::from_secs(30))
    }
}

/// Merge-patch an object's status subresource.
pub(crate) async fn patch_status<K>(
    api: &Api<K>,
    name: &str,
    status: serde_json::Value,
) -> Result<K>
where
    K: Clone + DeserializeOwned + Debug,
{
    api.patch_status(
        name,
        &PatchParams::default(),
        &Patch::Merge(&json!({ "status": status })),
    )
    .await
    .map_err(Error::from)
}

/// Create an object, treating an existing one as success.
pub(crate) async fn create_if_absent<K>(api: &Api<K>, obj: &K) -> Result<()>
where
    K: Clone + Serialize + DeserializeOwned + Debug,
{
    match api.create(&PostParams::default(), obj).await {
        Ok(_) => Ok(()),
        Err(err) => {
            let err = Error::from(err);
            if err.is_conflict() {
                Ok(())
            } else {
                Err(err)
            }
        }
    }
}

/// Run all controllers until shutdown.
pub async fn run(ctx: Arc<Context>) {
    let client = ctx.client.clone();
    let cfg = || watcher::Config::default().any_semantic();

    let anomalies = Controller::new(Api::<Anomaly>::all(client.clone()), cfg())
        .shutdown_on_signal()
        .run(anomaly::reconcile, anomaly::error_policy, ctx.clone())
        .filter_map(|r| async move { r.ok() })
        .for_each(|_| futures::future::ready(()));

    let insights = Controller::new(Api::<AIInsight>::all(client.clone()), cfg())
        .shutdown_on_signal()
        .run(insight::reconcile, insight::error_policy, ctx.clone())
        .filter_map(|r| async move { r.ok() })
        .for_each(|_| futures::future::ready(()));

    let issues = Controller::new(Api::<Issue>::all(client.clone()), cfg())
        .shutdown_on_signal()
        .run(issue::reconcile, issue::error_policy, ctx.clone())
        .filter_map(|r| async move { r.ok() })
        .for_each(|_| futures::future::ready(()));

    let plans = Controller::new(Api::<RemediationPlan>::all(client.clone()), cfg())
        .shutdown_on_signal()
        .run(plan::reconcile, plan::error_policy, ctx.clone())
        .filter_map(|r| async move { r.ok() })
        .for_each(|_| futures::future::ready(()));

    let postmortems = Controller::new(Api::<PostMortem>::all(client), cfg())
        .shutdown_on_signal()
        .run(postmortem::reconcile, postmortem::error_policy, ctx)
        .filter_map(|r| async move { r.ok() })
        .for_each(|_| futures::future::ready(()));

    info!("controllers started");
    tokio::join!(anomalies, insights, issues, plans, postmortems);
}
