pub mod config;
pub mod error;
pub mod health;
pub mod keys;
pub mod session_registry;
pub mod splice;
pub mod ssh_server;
pub mod worker_client;
pub mod worker_lifecycle;

use crate::config::ProxyConfig;
use crate::health::{run_health_server, ReadinessFlag};
use crate::keys::KeyMaterial;
use crate::session_registry::SessionRegistry;
use crate::ssh_server::ProxyServer;
use anyhow::Context;
use russh::server::Server as _;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Wires up the proxy's services and runs them to completion or cancellation, the same
/// `Bootstrap`-and-`run` split the cloud services use between construction and serving.
///
/// Graceful shutdown follows §4.3 in order: mark not-ready, stop accepting new connections,
/// drain in-flight sessions up to `shutdown_timeout_secs`, then tear down the health endpoint
/// with its own 5s deadline so `/readyz` keeps answering 503 throughout the drain.
pub async fn run(config: ProxyConfig, cancel: CancellationToken) -> anyhow::Result<()> {
    let config = Arc::new(config);

    let keys = Arc::new(
        KeyMaterial::load_or_generate(config.host_key_path.as_deref())
            .context("failed to establish signing keys")?,
    );

    let kube_client = kube::Client::try_default()
        .await
        .context("failed to build kube client")?;

    keys.publish_authorized_keys(kube_client.clone(), &config.namespace, &config.ssh_key_secret)
        .await
        .context("failed to publish authorized_keys secret")?;

    let registry = SessionRegistry::new();
    let readiness = ReadinessFlag::new();
    let tracker = TaskTracker::new();

    let mut russh_config = russh::server::Config::default();
    russh_config.keys.push(keys.host_key.clone());
    let russh_config = Arc::new(russh_config);

    let mut server = ProxyServer {
        config: config.clone(),
        keys: keys.clone(),
        kube_client: kube_client.clone(),
        registry: registry.clone(),
        cancel: cancel.clone(),
        tracker: tracker.clone(),
    };

    // The health endpoint gets its own shutdown signal so it keeps serving `/readyz: 503`
    // through the drain below, independent of the ambient cancellation that stops the
    // accept loop.
    let health_cancel = CancellationToken::new();
    let health_task = {
        let health_port = config.health_port;
        let readiness = readiness.clone();
        let health_cancel = health_cancel.clone();
        tokio::spawn(async move { run_health_server(health_port, readiness, health_cancel).await })
    };

    {
        let readiness = readiness.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            readiness.mark_not_ready();
        });
    }

    let bind_addr = ("0.0.0.0", config.port);
    info!(port = config.port, "ssh ingress listening");
    let ssh_result = tokio::select! {
        result = server.run_on_address(russh_config, bind_addr) => result.map_err(anyhow::Error::from),
        _ = cancel.cancelled() => Ok(()),
    };

    tracker.close();
    let shutdown_timeout = Duration::from_secs(config.shutdown_timeout_secs);
    if tokio::time::timeout(shutdown_timeout, tracker.wait())
        .await
        .is_err()
    {
        warn!(
            pending_sessions = registry.count().await,
            "timed out waiting for in-flight sessions to drain"
        );
    }

    health_cancel.cancel();
    if tokio::time::timeout(Duration::from_secs(5), health_task)
        .await
        .is_err()
    {
        warn!("timed out shutting down health endpoint");
    }

    info!("proxy shutdown complete");
    ssh_result
}
