//! aiops-operator: run the incident pipeline against the current cluster.

use std::sync::Arc;

use aiops_core::{telemetry, Context, DedupTable, GrpcBackend, WatcherBridge};
use tracing::info;

#[tokio::main]
async fn main() -> aiops_core::Result<()> {
    telemetry::init();

    let client = kube::Client::try_default().await?;
    let backend = Arc::new(GrpcBackend::new());
    let dedup = Arc::new(DedupTable::new());

    let bridge = WatcherBridge::new(client.clone(), backend.clone(), dedup.clone());
    let ctx = Context::new(client, backend, dedup);

    info!("starting aiops operator");
    tokio::select! {
        _ = bridge.run() => {}
        _ = aiops_core::controller::run(ctx) => {}
    }
    info!("shutting down");
    Ok(())
}
