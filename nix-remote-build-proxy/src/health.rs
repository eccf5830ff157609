pub use nix_remote_build_common::health::ReadinessFlag;
use nix_remote_build_common::health::health_router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Runs the `/healthz`/`/readyz` endpoints until `cancel` fires, independently of the
/// ambient cancellation that stops the SSH accept loop, so `/readyz` keeps answering 503
/// through the rest of the drain instead of disappearing the moment the listener closes.
pub async fn run_health_server(
    port: u16,
    readiness: ReadinessFlag,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let app = health_router(readiness);

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "health server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    Ok(())
}
