use thiserror::Error;

/// Errors from the worker-record side of a session: record creation and the await-routable
/// poll loop. Handshake, dial, and splice failures are reported as plain `anyhow::Error`
/// since they originate from `russh` and already carry a descriptive message.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("failed to create worker record: {0}")]
    RecordCreate(#[from] kube::Error),

    #[error("failed to build worker record manifest: {0}")]
    RecordSpec(#[from] serde_json::Error),

    #[error("timed out waiting for worker to become routable")]
    WorkerReadyTimeout,
}
