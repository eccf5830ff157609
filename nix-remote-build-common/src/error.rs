use thiserror::Error;

/// Errors shared by both binaries: validation and record-store classification.
#[derive(Debug, Error)]
pub enum CommonError {
    #[error("invalid sessionId '{0}': {1}")]
    InvalidSessionId(String, &'static str),

    #[error("kube api error: {0}")]
    Kube(#[from] kube::Error),

    #[error("config error: {0}")]
    Config(#[from] figment::Error),
}

/// Classifies a `kube::Error` the way the reconciler and proxy need to: most call sites only
/// care whether the server said "not found", "already exists", or something else went wrong.
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404)
}

pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 409)
}
