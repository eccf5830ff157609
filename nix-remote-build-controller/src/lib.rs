pub mod config;
pub mod health;
pub mod pod;
pub mod reconciler;

use crate::config::ControllerConfig;
use crate::health::{run_health_server, ReadinessFlag};
use anyhow::Context;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub async fn run(config: ControllerConfig, cancel: CancellationToken) -> anyhow::Result<()> {
    let client = kube::Client::try_default()
        .await
        .context("failed to build kube client")?;

    let readiness = ReadinessFlag::new();
    let mut tasks = JoinSet::new();

    {
        let readiness = readiness.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            readiness.mark_not_ready();
        });
    }

    {
        let health_port = config.health_port;
        let readiness = readiness.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move { run_health_server(health_port, readiness, cancel).await });
    }

    {
        let client = client.clone();
        let cancel = cancel.clone();
        let config = config.clone();
        tasks.spawn(async move {
            reconciler::run(client, config, cancel).await;
            Ok(())
        });
    }

    while let Some(result) = tasks.join_next().await {
        result.context("controller task panicked")??;
    }

    let shutdown_timeout = Duration::from_secs(config.shutdown_timeout_secs);
    let fail_pending = reconciler::fail_pending_records(&client, &config.namespace);
    if tokio::time::timeout(shutdown_timeout, fail_pending)
        .await
        .is_err()
    {
        tracing::warn!("timed out marking pending records failed during shutdown");
    }

    info!("controller shutdown complete");
    Ok(())
}
