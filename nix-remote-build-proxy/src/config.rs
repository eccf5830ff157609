use nix_remote_build_common::config::{ConfigExample, ConfigLoader, HasConfigExamples};
use nix_remote_build_common::tracing::TracingConfig;
use nix_remote_build_common::SafeDisplay;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::path::PathBuf;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub tracing: TracingConfig,
    pub port: u16,
    pub host_key_path: Option<PathBuf>,
    pub namespace: String,
    pub remote_user: String,
    pub remote_port: u16,
    pub health_port: u16,
    pub ssh_key_secret: String,
    pub worker_ready_timeout_secs: u64,
    pub worker_dial_timeout_secs: u64,
    pub record_delete_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            tracing: TracingConfig::local_dev("nix-remote-build-proxy"),
            port: 2222,
            host_key_path: None,
            namespace: "default".to_string(),
            remote_user: "nixbld".to_string(),
            remote_port: 22,
            health_port: 8080,
            ssh_key_secret: "nix-builder-keys".to_string(),
            worker_ready_timeout_secs: 120,
            worker_dial_timeout_secs: 10,
            record_delete_timeout_secs: 5,
            shutdown_timeout_secs: 30,
        }
    }
}

impl SafeDisplay for ProxyConfig {
    fn to_safe_string(&self) -> String {
        let mut result = String::new();
        let _ = writeln!(&mut result, "tracing:");
        let _ = writeln!(&mut result, "{}", self.tracing.to_safe_string_indented());
        let _ = writeln!(&mut result, "port: {}", self.port);
        let _ = writeln!(
            &mut result,
            "host key path: {:?} (contents never logged)",
            self.host_key_path
        );
        let _ = writeln!(&mut result, "namespace: {}", self.namespace);
        let _ = writeln!(&mut result, "remote user: {}", self.remote_user);
        let _ = writeln!(&mut result, "remote port: {}", self.remote_port);
        let _ = writeln!(&mut result, "health port: {}", self.health_port);
        let _ = writeln!(&mut result, "ssh key secret: {}", self.ssh_key_secret);
        let _ = writeln!(
            &mut result,
            "worker ready timeout: {}s",
            self.worker_ready_timeout_secs
        );
        let _ = writeln!(
            &mut result,
            "worker dial timeout: {}s",
            self.worker_dial_timeout_secs
        );
        let _ = writeln!(
            &mut result,
            "shutdown timeout: {}s",
            self.shutdown_timeout_secs
        );
        result
    }
}

pub fn make_config_loader() -> ConfigLoader<ProxyConfig> {
    ConfigLoader::new(&PathBuf::from("config/nix-remote-build-proxy.toml"))
}

impl HasConfigExamples<ProxyConfig> for ProxyConfig {
    fn examples() -> Vec<ConfigExample<ProxyConfig>> {
        vec![ConfigExample(
            "single-namespace cluster behind a fixed LoadBalancer IP",
            ProxyConfig {
                namespace: "nix-builds".to_string(),
                remote_user: "nixbld".to_string(),
                ..ProxyConfig::default()
            },
        )]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_is_loadable() {
        make_config_loader().load().expect("failed to load config");
    }

    #[test]
    fn documented_examples_round_trip_through_figment() {
        for ConfigExample(name, config) in ProxyConfig::examples() {
            let value = serde_json::to_value(&config).expect("example serializes");
            let round_tripped: ProxyConfig =
                serde_json::from_value(value).unwrap_or_else(|err| {
                    panic!("example '{name}' does not round-trip: {err}")
                });
            assert_eq!(round_tripped.namespace, config.namespace, "example '{name}'");
        }
    }
}
