use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Flips from ready to not-ready the moment graceful shutdown begins, shared by both
/// binaries' `/readyz` endpoint so a load balancer or orchestrator stops routing new work
/// before the process actually stops accepting it.
#[derive(Clone, Default)]
pub struct ReadinessFlag(Arc<AtomicBool>);

impl ReadinessFlag {
    pub fn new() -> Self {
        ReadinessFlag(Arc::new(AtomicBool::new(true)))
    }

    pub fn mark_not_ready(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// `/healthz` always answers 200 while the process is alive; `/readyz` mirrors `readiness`.
pub fn health_router(readiness: ReadinessFlag) -> Router {
    Router::new()
        .route("/healthz", get(|| async { StatusCode::OK }))
        .route(
            "/readyz",
            get(move || {
                let readiness = readiness.clone();
                async move {
                    if readiness.is_ready() {
                        StatusCode::OK
                    } else {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                }
            }),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_ready_and_flips_once() {
        let flag = ReadinessFlag::new();
        assert!(flag.is_ready());
        flag.mark_not_ready();
        assert!(!flag.is_ready());
    }

    #[test]
    fn clones_share_state() {
        let flag = ReadinessFlag::new();
        let clone = flag.clone();
        clone.mark_not_ready();
        assert!(!flag.is_ready());
    }
}
