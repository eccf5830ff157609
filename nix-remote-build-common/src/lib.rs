pub mod config;
pub mod crd;
pub mod error;
pub mod health;
pub mod session;
pub mod tracing;

pub use error::CommonError;

/// Implemented by config types that should never leak secret fields through `Debug`/`Display`.
///
/// Mirrors the redaction trait used throughout the cloud services: every config struct
/// renders itself through this instead of deriving `Display`, so a stray `info!("{config}")`
/// can never leak a private key or token.
pub trait SafeDisplay {
    fn to_safe_string(&self) -> String;

    fn to_safe_string_indented(&self) -> String {
        self.to_safe_string()
            .lines()
            .map(|line| format!("  {line}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
