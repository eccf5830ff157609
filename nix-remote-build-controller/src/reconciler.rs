use futures::StreamExt;
use k8s_openapi::api::core::v1::{Pod, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{DeleteParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::finalizer::{finalizer, Event as FinalizerEvent};
use kube::runtime::{watcher, Controller};
use kube::{Api, Client, ResourceExt};
use nix_remote_build_common::crd::{
    WorkerCondition, WorkerPhase, WorkerRecord, WorkerRecordStatus, CLEANUP_FINALIZER,
};
use nix_remote_build_common::error::is_not_found;
use nix_remote_build_common::session::{validate_session_id, worker_container_name};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::ControllerConfig;
use crate::pod;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("kube api error: {0}")]
    Kube(#[from] kube::Error),
    #[error("failed to build pod manifest: {0}")]
    PodSpec(#[from] anyhow::Error),
    #[error("finalizer error: {0}")]
    Finalizer(#[source] Box<kube::runtime::finalizer::Error<ReconcileError>>),
}

impl From<kube::runtime::finalizer::Error<ReconcileError>> for ReconcileError {
    fn from(err: kube::runtime::finalizer::Error<ReconcileError>) -> Self {
        ReconcileError::Finalizer(Box::new(err))
    }
}

pub struct Ctx {
    pub client: Client,
    pub config: ControllerConfig,
}

/// Runs the level-triggered controller loop until `cancel` fires. Watches `WorkerRecord`
/// plus the Pods it owns, so a change to either side triggers a fresh reconcile.
pub async fn run(client: Client, config: ControllerConfig, cancel: CancellationToken) {
    let records: Api<WorkerRecord> = Api::namespaced(client.clone(), &config.namespace);
    let pods: Api<Pod> = Api::namespaced(client.clone(), &config.namespace);
    let ctx = Arc::new(Ctx {
        client: client.clone(),
        config: config.clone(),
    });

    let controller = Controller::new(records, watcher::Config::default())
        .owns(pods, watcher::Config::default())
        .concurrency(config.concurrency)
        .shutdown_on_signal()
        .graceful_shutdown_on(cancel.cancelled());

    controller
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(record) => info!(?record, "reconciled"),
                Err(err) => warn!(error = %err, "reconcile error"),
            }
        })
        .await;
}

/// Requeue cadence by error kind, matching the per-failure-mode timings in the error
/// handling table (e.g. a pod manifest that fails to build is retried sooner than a
/// general apiserver hiccup, which may need longer to clear).
fn error_policy(record: Arc<WorkerRecord>, err: &ReconcileError, _ctx: Arc<Ctx>) -> Action {
    let name = record.name_any();
    let requeue_after = requeue_after_for(err);
    warn!(record = %name, error = %err, requeue_after = ?requeue_after, "reconcile failed");
    Action::requeue(requeue_after)
}

fn requeue_after_for(err: &ReconcileError) -> Duration {
    match err {
        ReconcileError::PodSpec(_) => Duration::from_secs(2),
        ReconcileError::Kube(_) => Duration::from_secs(5),
        ReconcileError::Finalizer(inner) => match inner.as_ref() {
            kube::runtime::finalizer::Error::ApplyFailed(inner)
            | kube::runtime::finalizer::Error::CleanupFailed(inner) => requeue_after_for(inner),
            _ => Duration::from_secs(5),
        },
    }
}

async fn reconcile(record: Arc<WorkerRecord>, ctx: Arc<Ctx>) -> Result<Action, ReconcileError> {
    let records: Api<WorkerRecord> = Api::namespaced(ctx.client.clone(), &ctx.config.namespace);

    let action = finalizer(&records, CLEANUP_FINALIZER, record, |event| async {
        match event {
            FinalizerEvent::Apply(record) => apply(record, &ctx).await,
            FinalizerEvent::Cleanup(record) => cleanup(record, &ctx).await,
        }
    })
    .await?;

    Ok(action)
}

async fn apply(record: Arc<WorkerRecord>, ctx: &Ctx) -> Result<Action, ReconcileError> {
    let records: Api<WorkerRecord> = Api::namespaced(ctx.client.clone(), &ctx.config.namespace);
    let name = record.name_any();

    if let Err(err) = validate_session_id(&record.spec.session_id) {
        warn!(record = %name, error = %err, "invalid sessionId, failing record");
        complete(&records, &name, WorkerPhase::Failed, &err.to_string()).await?;
        return Ok(Action::await_change());
    }

    let status = record.status.clone().unwrap_or_default();
    let pod_name = worker_container_name(&record.spec.session_id);
    let existing_pod = pod::get(&ctx.client, &ctx.config.namespace, &pod_name).await?;

    match status.phase {
        WorkerPhase::Pending => {
            if existing_pod.is_none() {
                let manifest = pod::build_pod(&ctx.config, &record)?;
                let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), &ctx.config.namespace);
                match pods.create(&Default::default(), &manifest).await {
                    Ok(_) => {}
                    Err(err) if nix_remote_build_common::error::is_already_exists(&err) => {}
                    Err(err) => return Err(err.into()),
                }
            }
            patch_status(
                &records,
                &name,
                WorkerPhase::Creating,
                Some(pod_name),
                None,
                Some("worker container created".to_string()),
            )
            .await?;
            Ok(Action::requeue(Duration::from_secs(5)))
        }
        WorkerPhase::Creating => match existing_pod {
            None => {
                warn!(record = %name, "pod disappeared while creating, resetting to pending");
                reset_to_pending(&records, &name).await?;
                Ok(Action::requeue(Duration::from_secs(2)))
            }
            Some(pod) => {
                let pod_status = pod.status.unwrap_or_default();
                match classify_pod_phase(&pod_status) {
                    PodClass::Running => {
                        let ip = pod_status.pod_ip.unwrap_or_default();
                        if ip.is_empty() {
                            Ok(Action::requeue(Duration::from_secs(2)))
                        } else {
                            patch_status(
                                &records,
                                &name,
                                WorkerPhase::Running,
                                Some(pod_name),
                                Some(ip),
                                Some("worker running".to_string()),
                            )
                            .await?;
                            Ok(Action::requeue(Duration::from_secs(10)))
                        }
                    }
                    PodClass::Failed => {
                        complete(&records, &name, WorkerPhase::Failed, "worker failed to start")
                            .await?;
                        Ok(Action::await_change())
                    }
                    PodClass::Other => Ok(Action::requeue(Duration::from_secs(2))),
                }
            }
        },
        WorkerPhase::Running => match existing_pod {
            None => {
                complete(&records, &name, WorkerPhase::Failed, "Build failed - pod was deleted")
                    .await?;
                Ok(Action::await_change())
            }
            Some(pod) => {
                let pod_status = pod.status.unwrap_or_default();
                match classify_pod_phase(&pod_status) {
                    PodClass::Succeeded => {
                        complete(&records, &name, WorkerPhase::Completed, "build completed")
                            .await?;
                        Ok(Action::await_change())
                    }
                    PodClass::Failed => {
                        complete(&records, &name, WorkerPhase::Failed, "build failed").await?;
                        Ok(Action::await_change())
                    }
                    _ => Ok(Action::requeue(Duration::from_secs(15))),
                }
            }
        },
        WorkerPhase::Completed | WorkerPhase::Failed => {
            let pod_present = existing_pod.is_some();
            maybe_gc(ctx, &record, &pod_name, pod_present).await?;
            if pod_present {
                // The container may still be within its GC grace period, or the delete
                // above may have just been issued; either way poll again rather than
                // going quiet until some unrelated watch event wakes this record back up.
                Ok(Action::requeue(Duration::from_secs(ctx.config.terminal_gc_after_secs)))
            } else {
                Ok(Action::await_change())
            }
        }
    }
}

enum PodClass {
    Running,
    Succeeded,
    Failed,
    Other,
}

fn classify_pod_phase(status: &PodStatus) -> PodClass {
    match status.phase.as_deref() {
        Some("Running") => PodClass::Running,
        Some("Succeeded") => PodClass::Succeeded,
        Some("Failed") => PodClass::Failed,
        _ => PodClass::Other,
    }
}

async fn cleanup(record: Arc<WorkerRecord>, ctx: &Ctx) -> Result<Action, ReconcileError> {
    let pod_name = worker_container_name(&record.spec.session_id);
    let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), &ctx.config.namespace);
    match pods.delete(&pod_name, &DeleteParams::default()).await {
        Ok(_) => info!(pod = %pod_name, "deleted worker pod during finalizer cleanup"),
        Err(err) if is_not_found(&err) => {}
        Err(err) => return Err(err.into()),
    }
    Ok(Action::await_change())
}

/// Terminal-record garbage collection: once a record has been terminal for more than
/// `terminal_gc_after_secs`, its container (if somehow still present) is deleted.
async fn maybe_gc(
    ctx: &Ctx,
    record: &WorkerRecord,
    pod_name: &str,
    pod_present: bool,
) -> Result<(), ReconcileError> {
    if !pod_present {
        return Ok(());
    }
    let Some(completion) = record
        .status
        .as_ref()
        .and_then(|status| status.completion_time.as_ref())
    else {
        return Ok(());
    };

    let age = age_secs(completion);
    if age >= ctx.config.terminal_gc_after_secs {
        let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), &ctx.config.namespace);
        match pods.delete(pod_name, &DeleteParams::default()).await {
            Ok(_) => info!(pod = %pod_name, "garbage collected terminal worker pod"),
            Err(err) if is_not_found(&err) => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn age_secs(time: &Time) -> u64 {
    let elapsed = chrono::Utc::now().signed_duration_since(time.0);
    elapsed.num_seconds().max(0) as u64
}

async fn complete(
    records: &Api<WorkerRecord>,
    name: &str,
    phase: WorkerPhase,
    message: &str,
) -> Result<(), ReconcileError> {
    patch_status(records, name, phase, None, None, Some(message.to_string())).await?;
    let now = Time(chrono::Utc::now());
    let patch = json!({ "status": { "completionTime": now } });
    records
        .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

async fn patch_status(
    records: &Api<WorkerRecord>,
    name: &str,
    phase: WorkerPhase,
    pod_name: Option<String>,
    pod_ip: Option<String>,
    message: Option<String>,
) -> Result<(), ReconcileError> {
    let mut status = WorkerRecordStatus {
        phase,
        message,
        ..Default::default()
    };
    if let Some(pod_name) = pod_name {
        status.pod_name = Some(pod_name);
    }
    if let Some(pod_ip) = pod_ip {
        status.pod_ip = Some(pod_ip);
    }
    if phase == WorkerPhase::Creating {
        status.start_time = Some(Time(chrono::Utc::now()));
    }
    status.conditions.push(WorkerCondition {
        type_: "Progressing".to_string(),
        status: nix_remote_build_common::crd::ConditionStatus::True,
        last_transition_time: Time(chrono::Utc::now()),
        reason: Some(format!("{phase:?}")),
        message: status.message.clone(),
    });

    let patch = json!({ "status": status });
    records
        .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Rolls a record back to `Pending` and actually clears `podName`/`podIP`. A merge patch
/// built from `WorkerRecordStatus` can only ever set fields, never unset them, because
/// `Option::is_none` fields are skipped rather than serialized as `null` — so this writes
/// the nulls by hand instead of going through [`patch_status`].
async fn reset_to_pending(records: &Api<WorkerRecord>, name: &str) -> Result<(), ReconcileError> {
    let patch = pending_reset_patch();
    records
        .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

fn pending_reset_patch() -> serde_json::Value {
    json!({
        "status": {
            "phase": "Pending",
            "podName": null,
            "podIP": null,
        }
    })
}

/// Marks every non-terminal record Failed during graceful shutdown, per §4.4.
pub async fn fail_pending_records(client: &Client, namespace: &str) {
    let records: Api<WorkerRecord> = Api::namespaced(client.clone(), namespace);
    let list = match records.list(&Default::default()).await {
        Ok(list) => list,
        Err(err) => {
            error!(error = %err, "failed to list worker records during shutdown");
            return;
        }
    };

    for record in list.items {
        let phase = record
            .status
            .as_ref()
            .map(|s| s.phase)
            .unwrap_or(WorkerPhase::Pending);
        if matches!(phase, WorkerPhase::Pending | WorkerPhase::Creating) {
            let name = record.name_any();
            if let Err(err) = complete(
                &records,
                &name,
                WorkerPhase::Failed,
                "controller shutdown during processing",
            )
            .await
            {
                warn!(record = %name, error = %err, "failed to mark record failed during shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PodStatus;

    #[test]
    fn classifies_running_pod() {
        let status = PodStatus {
            phase: Some("Running".to_string()),
            pod_ip: Some("10.0.0.1".to_string()),
            ..Default::default()
        };
        assert!(matches!(classify_pod_phase(&status), PodClass::Running));
    }

    #[test]
    fn classifies_succeeded_pod() {
        let status = PodStatus {
            phase: Some("Succeeded".to_string()),
            ..Default::default()
        };
        assert!(matches!(classify_pod_phase(&status), PodClass::Succeeded));
    }

    #[test]
    fn classifies_unknown_phase_as_other() {
        let status = PodStatus::default();
        assert!(matches!(classify_pod_phase(&status), PodClass::Other));
    }

    #[test]
    fn requeue_cadence_differs_by_error_kind() {
        let pod_err = ReconcileError::PodSpec(anyhow::anyhow!("bad manifest"));
        assert_eq!(requeue_after_for(&pod_err), Duration::from_secs(2));

        let kube_err = ReconcileError::Kube(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "internal error".to_string(),
            reason: "InternalError".to_string(),
            code: 500,
        }));
        assert_eq!(requeue_after_for(&kube_err), Duration::from_secs(5));
    }

    #[test]
    fn pending_reset_patch_nulls_pod_fields_explicitly() {
        // A JSON merge patch only unsets a field when it is present with an explicit
        // `null`; omitting it (as `WorkerRecordStatus`'s `skip_serializing_if` would)
        // leaves the previous podName/podIP in place instead of clearing them.
        let patch = pending_reset_patch();
        assert!(patch["status"]["podName"].is_null());
        assert!(patch["status"]["podIP"].is_null());
        assert_eq!(patch["status"]["phase"], "Pending");
    }
}
