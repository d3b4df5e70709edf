//! Watcher bridge: polls the signal source and materializes Anomaly
//! objects with provenance labels.
//!
//! A single cooperative task (the deployment runs one replica, so only one
//! poller exists). Each tick connects if needed, pulls alerts, creates one
//! Anomaly per unseen alert, and prunes the dedup table. All bridge state
//! is advisory and rebuilt after restart.

mod dedup;

pub use dedup::{dedup_hash, dedup_key, DedupInvalidator, DedupTable, BUCKET_SECS};

use chrono::Utc;
use kube::api::{Api, PostParams};
use kube::{Client, ResourceExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::api::{
    sanitize_name, Anomaly, AnomalySpec, ResourceRef, SignalType, DEPLOYMENT_LABEL_KEY,
    INSTANCE_LABEL_KEY, INSTANCE_NAMESPACE_LABEL_KEY, SOURCE_LABEL_KEY,
};
use crate::backend::{
    connect, connection_opts, first_ready_instance, GrpcBackend, InferenceBackend, InstanceRef,
    WatcherAlert,
};
use crate::error::{Error, Result};

/// How often the bridge polls the signal source.
pub const POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Map a detector alert type onto the closed signal set.
///
/// Unknown types fall back to parsing their lowercased form; alerts that
/// still do not map are skipped.
pub fn map_alert_signal(alert_type: &str) -> Option<SignalType> {
    match alert_type {
        "HighRestartCount" | "CrashLoopBackOff" => Some(SignalType::PodRestart),
        "OOMKilled" => Some(SignalType::OomKill),
        "PodNotReady" => Some(SignalType::PodNotReady),
        "DeploymentFailing" => Some(SignalType::DeployFailing),
        other => SignalType::parse(&other.to_lowercase()),
    }
}

/// Generated Anomaly name for one alert.
pub fn anomaly_name(alert: &WatcherAlert) -> String {
    let ts = if alert.timestamp_unix > 0 {
        alert.timestamp_unix
    } else {
        Utc::now().timestamp()
    };
    sanitize_name(&format!(
        "watcher-{}-{}-{}",
        alert.alert_type, alert.deployment, ts
    ))
}

/// Build the Anomaly object for an alert, stamping provenance labels.
pub fn build_anomaly(
    alert: &WatcherAlert,
    signal: SignalType,
    instance: Option<&InstanceRef>,
) -> Anomaly {
    let namespace = if alert.namespace.is_empty() {
        "default".to_string()
    } else {
        alert.namespace.clone()
    };

    let mut labels: BTreeMap<String, String> = BTreeMap::new();
    labels.insert(SOURCE_LABEL_KEY.into(), "watcher".into());
    labels.insert(DEPLOYMENT_LABEL_KEY.into(), alert.deployment.clone());
    if let Some(instance) = instance {
        labels.insert(INSTANCE_LABEL_KEY.into(), instance.name.clone());
        labels.insert(
            INSTANCE_NAMESPACE_LABEL_KEY.into(),
            instance.namespace.clone(),
        );
    }

    let mut anomaly = Anomaly::new(
        &anomaly_name(alert),
        AnomalySpec {
            source: "watcher".into(),
            signal_type: signal,
            resource: ResourceRef::deployment(&alert.deployment, &namespace),
            value: alert.object.clone(),
            threshold: String::new(),
            description: alert.message.clone(),
        },
    );
    anomaly.metadata.namespace = Some(namespace);
    anomaly.metadata.labels = Some(labels);
    anomaly
}

/// The polling bridge between the signal source and the Anomaly API.
pub struct WatcherBridge {
    client: Client,
    backend: Arc<GrpcBackend>,
    dedup: Arc<DedupTable>,
    poll_interval: Duration,
}

impl WatcherBridge {
    pub fn new(client: Client, backend: Arc<GrpcBackend>, dedup: Arc<DedupTable>) -> Self {
        Self {
            client,
            backend,
            dedup,
            poll_interval: POLL_INTERVAL,
        }
    }

    /// Run the polling loop until the surrounding task is dropped.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("watcher bridge started");
        loop {
            ticker.tick().await;
            if let Err(err) = self.tick().await {
                warn!(error = %err, "watcher bridge tick failed");
            }
        }
    }

    /// One poll cycle: connect, pull, materialize, prune.
    pub async fn tick(&self) -> Result<()> {
        if !self.backend.connected().await {
            if !self.try_connect().await? {
                return Ok(());
            }
        }

        let alerts = match self.backend.get_alerts().await {
            Ok(alerts) => alerts,
            Err(err) => {
                // Drop the channel so the next tick rediscovers and redials.
                self.backend.reset().await;
                return Err(err);
            }
        };

        let instance = self.backend.instance().await;
        for alert in &alerts {
            if !self.dedup.observe(alert) {
                continue;
            }
            if let Err(err) = self.create_anomaly(alert, instance.as_ref()).await {
                warn!(alert_type = %alert.alert_type, error = %err, "failed to create anomaly");
            }
        }

        let pruned = self.dedup.prune();
        if pruned > 0 {
            debug!(pruned, "expired dedup entries");
        }
        Ok(())
    }

    async fn try_connect(&self) -> Result<bool> {
        let instance = match first_ready_instance(self.client.clone()).await? {
            Some(instance) => instance,
            None => {
                debug!("no ready instance to connect to");
                return Ok(false);
            }
        };
        let opts = connection_opts(self.client.clone(), &instance).await?;
        let channel = connect(&opts).await?;
        let instance_ref = InstanceRef {
            name: instance.name_any(),
            namespace: instance.namespace().unwrap_or_else(|| "default".into()),
        };
        info!(address = %opts.address, instance = %instance_ref.name, "connected to inference backend");
        self.backend.install(channel, opts.token, instance_ref).await;
        Ok(true)
    }

    async fn create_anomaly(&self, alert: &WatcherAlert, instance: Option<&InstanceRef>) -> Result<()> {
        let signal = match map_alert_signal(&alert.alert_type) {
            Some(signal) => signal,
            None => {
                warn!(alert_type = %alert.alert_type, "alert type does not map to a signal, skipping");
                return Ok(());
            }
        };

        let anomaly = build_anomaly(alert, signal, instance);
        let namespace = anomaly.namespace().unwrap_or_else(|| "default".into());
        let api: Api<Anomaly> = Api::namespaced(self.client.clone(), &namespace);
        match api.create(&PostParams::default(), &anomaly).await {
            Ok(created) => {
                info!(anomaly = %created.name_any(), signal = %signal, "anomaly created");
                Ok(())
            }
            // Same alert raced in from a previous tick.
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn alert(alert_type: &str) -> WatcherAlert {
        WatcherAlert {
            alert_type: alert_type.into(),
            severity: "warning".into(),
            message: "container restarting".into(),
            object: "payments-api-7f9c".into(),
            namespace: "default".into(),
            deployment: "payments-api".into(),
            timestamp_unix: 1_754_000_123,
        }
    }

    #[test]
    fn test_alert_type_mapping() {
        assert_eq!(map_alert_signal("HighRestartCount"), Some(SignalType::PodRestart));
        assert_eq!(map_alert_signal("CrashLoopBackOff"), Some(SignalType::PodRestart));
        assert_eq!(map_alert_signal("OOMKilled"), Some(SignalType::OomKill));
        assert_eq!(map_alert_signal("PodNotReady"), Some(SignalType::PodNotReady));
        assert_eq!(map_alert_signal("DeploymentFailing"), Some(SignalType::DeployFailing));
        assert_eq!(map_alert_signal("error_rate"), Some(SignalType::ErrorRate));
        assert_eq!(map_alert_signal("Error_Rate"), Some(SignalType::ErrorRate));
        assert_eq!(map_alert_signal("SolarFlare"), None);
    }

    #[test]
    fn test_anomaly_name_is_sanitized() {
        let name = anomaly_name(&alert("OOMKilled"));
        assert_eq!(name, "watcher-oomkilled-payments-api-1754000123");
        assert!(name.len() <= crate::api::MAX_NAME_LEN);
    }

    #[test]
    fn test_build_anomaly_labels_and_defaults() {
        let mut a = alert("OOMKilled");
        a.namespace = String::new();
        let instance = InstanceRef {
            name: "chatcli".into(),
            namespace: "chatcli-system".into(),
        };
        let anomaly = build_anomaly(&a, SignalType::OomKill, Some(&instance));

        assert_eq!(anomaly.namespace().as_deref(), Some("default"));
        assert_eq!(anomaly.spec.resource.namespace, "default");
        let labels = anomaly.metadata.labels.as_ref().unwrap();
        assert_eq!(labels.get(SOURCE_LABEL_KEY).unwrap(), "watcher");
        assert_eq!(labels.get(DEPLOYMENT_LABEL_KEY).unwrap(), "payments-api");
        assert_eq!(labels.get(INSTANCE_LABEL_KEY).unwrap(), "chatcli");
        assert_eq!(labels.get(INSTANCE_NAMESPACE_LABEL_KEY).unwrap(), "chatcli-system");
    }

    #[test]
    fn test_build_anomaly_without_instance() {
        let anomaly = build_anomaly(&alert("PodNotReady"), SignalType::PodNotReady, None);
        let labels = anomaly.metadata.labels.as_ref().unwrap();
        assert!(!labels.contains_key(INSTANCE_LABEL_KEY));
        assert_eq!(anomaly.spec.description, "container restarting");
        assert_eq!(anomaly.spec.value, "payments-api-7f9c");
    }
}
