use crate::error::ProxyError;
use kube::api::{DeleteParams, PostParams};
use kube::{Api, Client};
use nix_remote_build_common::crd::{WorkerPhase, WorkerRecord, WorkerRecordSpec};
use nix_remote_build_common::error::is_not_found;
use nix_remote_build_common::session::worker_record_name;
use serde_json::json;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Creates the `WorkerRecord` for `session_id` and arranges for it to be deleted on every
/// exit path (§4.3 step 3 of the original design: record teardown must survive a cancelled
/// parent context, so callers should always invoke [`delete`] in a `finally`-style guard).
pub async fn create(
    client: &Client,
    namespace: &str,
    session_id: &str,
) -> Result<String, ProxyError> {
    let name = worker_record_name(session_id);
    let records: Api<WorkerRecord> = Api::namespaced(client.clone(), namespace);

    let record: WorkerRecord = serde_json::from_value(json!({
        "apiVersion": "nixbuild.dev/v1alpha1",
        "kind": "WorkerRecord",
        "metadata": { "name": name },
        "spec": WorkerRecordSpec {
            session_id: session_id.to_string(),
            image: None,
            resources: None,
            timeout_seconds: None,
            node_selector: None,
        },
    }))?;

    records.create(&PostParams::default(), &record).await?;
    info!(session_id, name = %name, "created worker record");
    Ok(name)
}

/// Polls the record once per second until it is `Running` with a non-empty pod IP, up to
/// `timeout`, honoring `cancel`. A missing record or a transient read error is retried
/// silently; only the wall-clock ceiling or cancellation end the wait early.
pub async fn await_routable(
    client: &Client,
    namespace: &str,
    record_name: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<String, ProxyError> {
    let records: Api<WorkerRecord> = Api::namespaced(client.clone(), namespace);
    let deadline = Instant::now() + timeout;
    let mut ticker = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Err(ProxyError::WorkerReadyTimeout),
            _ = ticker.tick() => {
                if Instant::now() >= deadline {
                    return Err(ProxyError::WorkerReadyTimeout);
                }
                match records.get(record_name).await {
                    Ok(record) => {
                        let status = record.status.unwrap_or_default();
                        if status.phase == WorkerPhase::Running {
                            if let Some(ip) = status.pod_ip {
                                if !ip.is_empty() {
                                    debug!(record_name, pod_ip = %ip, "worker routable");
                                    return Ok(ip);
                                }
                            }
                        }
                    }
                    Err(err) if is_not_found(&err) => {
                        debug!(record_name, "worker record not yet visible");
                    }
                    Err(err) => {
                        warn!(record_name, error = %err, "transient error polling worker record");
                    }
                }
            }
        }
    }
}

/// Deletes the record with an independent deadline, since the session's own context may
/// already be cancelled by the time teardown runs.
pub async fn delete(client: &Client, namespace: &str, record_name: &str, timeout: Duration) {
    let records: Api<WorkerRecord> = Api::namespaced(client.clone(), namespace);
    let result = tokio::time::timeout(
        timeout,
        records.delete(record_name, &DeleteParams::default()),
    )
    .await;

    match result {
        Ok(Ok(_)) => info!(record_name, "deleted worker record"),
        Ok(Err(err)) if is_not_found(&err) => {
            debug!(record_name, "worker record already gone");
        }
        Ok(Err(err)) => warn!(record_name, error = %err, "failed to delete worker record"),
        Err(_) => warn!(record_name, "timed out deleting worker record"),
    }
}
