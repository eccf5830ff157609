use crate::error::CommonError;
use once_cell::sync::Lazy;
use std::fmt;
use uuid::Uuid;

static SESSION_ID_RE: Lazy<regex::Regex> =
    Lazy::new(|| regex::Regex::new(r"^[a-z0-9]([a-z0-9\-]{0,61}[a-z0-9])?$").unwrap());

const MAX_SESSION_ID_LEN: usize = 240;

/// A time-ordered session identifier (UUIDv7), rendered as an RFC-1123 DNS label.
///
/// v7 is monotonic enough to sort by creation time in logs while still being a single
/// opaque token, which is what lets it double as the `WorkerRecord`'s `spec.sessionId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        SessionId(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Validates an externally observed sessionId string against the RFC-1123 DNS label rule
/// the reconciler enforces on every reconcile. Separate from `SessionId` because the
/// reconciler must also accept (and reject) strings that were never generated by us.
pub fn validate_session_id(raw: &str) -> Result<(), CommonError> {
    if raw.is_empty() {
        return Err(CommonError::InvalidSessionId(
            raw.to_string(),
            "must not be empty",
        ));
    }
    if raw.len() > MAX_SESSION_ID_LEN {
        return Err(CommonError::InvalidSessionId(
            raw.to_string(),
            "exceeds 240 characters",
        ));
    }
    if !SESSION_ID_RE.is_match(raw) {
        return Err(CommonError::InvalidSessionId(
            raw.to_string(),
            "must be a lowercase RFC-1123 DNS label",
        ));
    }
    Ok(())
}

/// Deterministic worker container name for a given session, the single source of truth
/// the reconciler's at-most-one-worker invariant relies on.
pub fn worker_container_name(session_id: &str) -> String {
    format!("nix-builder-{session_id}")
}

/// Deterministic `WorkerRecord` name for a given session.
pub fn worker_record_name(session_id: &str) -> String {
    format!("build-{session_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_label() {
        assert!(validate_session_id("018f7e2a-abcd-7000-8000-0123456789ab").is_ok());
    }

    #[test]
    fn rejects_empty() {
        assert!(validate_session_id("").is_err());
    }

    #[test]
    fn rejects_uppercase() {
        assert!(validate_session_id("Bad-Id").is_err());
    }

    #[test]
    fn rejects_leading_hyphen() {
        assert!(validate_session_id("-abc").is_err());
    }

    #[test]
    fn rejects_too_long() {
        let long = "a".repeat(241);
        assert!(validate_session_id(&long).is_err());
    }

    #[test]
    fn worker_names_are_deterministic() {
        assert_eq!(worker_container_name("abc"), "nix-builder-abc");
        assert_eq!(worker_record_name("abc"), "build-abc");
    }
}
