//! Alert deduplication for the watcher bridge.
//!
//! The table is process-local and advisory: a fresh process rebuilds it on
//! the next poll. Entries collapse identical alerts inside a 60-second
//! bucket and expire after two hours.

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::backend::WatcherAlert;

/// Width of one dedup bucket in seconds.
pub const BUCKET_SECS: i64 = 60;

/// Lets the Issue reconciler tell the bridge to forget dedup entries for a
/// resource when the incident closes.
pub trait DedupInvalidator: Send + Sync {
    /// Remove every entry for the deployment/namespace pair, returning how
    /// many were dropped.
    fn invalidate(&self, deployment: &str, namespace: &str) -> usize;
}

/// Compose the dedup key for an alert.
///
/// The minute bucket truncates the alert's UNIX timestamp to 60 s; alerts
/// without a timestamp bucket on the current time.
pub fn dedup_key(alert: &WatcherAlert) -> String {
    let ts = if alert.timestamp_unix > 0 {
        alert.timestamp_unix
    } else {
        Utc::now().timestamp()
    };
    let bucket = ts - ts.rem_euclid(BUCKET_SECS);
    format!(
        "{}|{}|{}|{}|{}",
        alert.alert_type, alert.object, alert.deployment, alert.namespace, bucket
    )
}

/// First 8 bytes of SHA-256 over the composed key.
pub fn dedup_hash(key: &str) -> u64 {
    let digest = Sha256::digest(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

#[derive(Debug, Clone)]
struct DedupEntry {
    deployment: String,
    namespace: String,
    seen_at: DateTime<Utc>,
}

/// In-memory dedup table, mutex-guarded for use from the bridge task and
/// the Issue reconciler.
pub struct DedupTable {
    entries: Mutex<HashMap<u64, DedupEntry>>,
    ttl: Duration,
}

impl Default for DedupTable {
    fn default() -> Self {
        Self::new()
    }
}

impl DedupTable {
    pub fn new() -> Self {
        Self::with_ttl(Duration::hours(2))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Record an alert sighting. Returns true when the alert is new for
    /// its bucket.
    pub fn observe(&self, alert: &WatcherAlert) -> bool {
        let hash = dedup_hash(&dedup_key(alert));
        let mut entries = self.entries.lock().expect("dedup mutex poisoned");
        if entries.contains_key(&hash) {
            return false;
        }
        entries.insert(
            hash,
            DedupEntry {
                deployment: alert.deployment.clone(),
                namespace: alert.namespace.clone(),
                seen_at: Utc::now(),
            },
        );
        true
    }

    /// Drop entries older than the TTL.
    pub fn prune(&self) -> usize {
        let cutoff = Utc::now() - self.ttl;
        let mut entries = self.entries.lock().expect("dedup mutex poisoned");
        let before = entries.len();
        entries.retain(|_, e| e.seen_at >= cutoff);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("dedup mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DedupInvalidator for DedupTable {
    fn invalidate(&self, deployment: &str, namespace: &str) -> usize {
        let mut entries = self.entries.lock().expect("dedup mutex poisoned");
        let before = entries.len();
        entries.retain(|_, e| !(e.deployment == deployment && e.namespace == namespace));
        before - entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn alert(alert_type: &str, deployment: &str, namespace: &str, ts: i64) -> WatcherAlert {
        WatcherAlert {
            alert_type: alert_type.into(),
            severity: "warning".into(),
            message: "m".into(),
            object: format!("{}-pod", deployment),
            namespace: namespace.into(),
            deployment: deployment.into(),
            timestamp_unix: ts,
        }
    }

    #[test]
    fn test_identical_burst_collapses() {
        let table = DedupTable::new();
        let a = alert("OOMKilled", "payments-api", "default", 1_754_000_000);
        assert!(table.observe(&a));
        assert!(!table.observe(&a));
        assert!(!table.observe(&a));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_same_minute_bucket_collapses() {
        let table = DedupTable::new();
        let first = alert("OOMKilled", "payments-api", "default", 1_754_000_000);
        // 1_754_000_000 is a bucket start; +59 stays inside it.
        let again = alert("OOMKilled", "payments-api", "default", 1_754_000_059);
        assert!(table.observe(&first));
        assert!(!table.observe(&again));
    }

    #[test]
    fn test_next_bucket_is_new() {
        let table = DedupTable::new();
        let first = alert("OOMKilled", "payments-api", "default", 1_754_000_000);
        let later = alert("OOMKilled", "payments-api", "default", 1_754_000_060);
        assert!(table.observe(&first));
        assert!(table.observe(&later));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_invalidate_by_deployment() {
        let table = DedupTable::new();
        table.observe(&alert("OOMKilled", "payments-api", "default", 1_754_000_000));
        table.observe(&alert("PodNotReady", "payments-api", "default", 1_754_000_000));
        table.observe(&alert("OOMKilled", "orders-api", "default", 1_754_000_000));

        let removed = table.invalidate("payments-api", "default");
        assert_eq!(removed, 2);
        assert_eq!(table.len(), 1);

        // Same name in a different namespace is untouched.
        assert_eq!(table.invalidate("orders-api", "staging"), 0);
    }

    #[test]
    fn test_prune_expires_entries() {
        let table = DedupTable::with_ttl(Duration::seconds(-1));
        table.observe(&alert("OOMKilled", "payments-api", "default", 1_754_000_000));
        assert_eq!(table.prune(), 1);
        assert!(table.is_empty());
    }

    proptest! {
        #[test]
        fn prop_key_stable_within_bucket(offset in 0i64..BUCKET_SECS) {
            let base = 1_754_000_000; // bucket-aligned
            let a = alert("OOMKilled", "payments-api", "default", base);
            let b = alert("OOMKilled", "payments-api", "default", base + offset);
            prop_assert_eq!(dedup_key(&a), dedup_key(&b));
            prop_assert_eq!(dedup_hash(&dedup_key(&a)), dedup_hash(&dedup_key(&b)));
        }

        #[test]
        fn prop_distinct_deployments_distinct_keys(name in "[a-z]{1,12}") {
            let a = alert("OOMKilled", &name, "default", 1_754_000_000);
            let b = alert("OOMKilled", &format!("{}x", name), "default", 1_754_000_000);
            prop_assert_ne!(dedup_key(&a), dedup_key(&b));
        }
    }
}
