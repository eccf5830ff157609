use crate::SafeDisplay;
use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TracingConfig {
    pub service_name: String,
    pub ansi: bool,
    pub json: bool,
    pub default_filter: String,
}

impl TracingConfig {
    /// A sensible local-development default: ANSI colors on, pretty text, info level.
    pub fn local_dev(service_name: &str) -> Self {
        TracingConfig {
            service_name: service_name.to_string(),
            ansi: true,
            json: false,
            default_filter: "info".to_string(),
        }
    }
}

impl SafeDisplay for TracingConfig {
    fn to_safe_string(&self) -> String {
        format!(
            "service: {}, ansi: {}, json: {}, filter: {}",
            self.service_name, self.ansi, self.json, self.default_filter
        )
    }
}

/// Initializes the global `tracing` subscriber from `config`, honoring `RUST_LOG` when set
/// and falling back to `config.default_filter` otherwise. Must be called exactly once, as
/// the very first thing in `main`, before any other code might emit a tracing event.
pub fn init_tracing_with_default_env_filter(config: &TracingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_filter.clone()));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_ansi(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_ansi(config.ansi)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
