use nix_remote_build_common::config::{ConfigExample, ConfigLoader, HasConfigExamples};
use nix_remote_build_common::tracing::TracingConfig;
use nix_remote_build_common::SafeDisplay;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::path::PathBuf;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub tracing: TracingConfig,
    pub namespace: String,
    pub builder_image: String,
    pub remote_port: u16,
    pub nix_config_map: Option<String>,
    pub ssh_key_secret: String,
    pub health_port: u16,
    pub shutdown_timeout_secs: u64,
    pub terminal_gc_after_secs: u64,
    pub concurrency: u16,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            tracing: TracingConfig::local_dev("nix-remote-build-controller"),
            namespace: "default".to_string(),
            builder_image: "nix-builder:latest".to_string(),
            remote_port: 22,
            nix_config_map: None,
            ssh_key_secret: "nix-builder-keys".to_string(),
            health_port: 8081,
            shutdown_timeout_secs: 30,
            terminal_gc_after_secs: 300,
            concurrency: 8,
        }
    }
}

impl SafeDisplay for ControllerConfig {
    fn to_safe_string(&self) -> String {
        let mut result = String::new();
        let _ = writeln!(&mut result, "tracing:");
        let _ = writeln!(&mut result, "{}", self.tracing.to_safe_string_indented());
        let _ = writeln!(&mut result, "namespace: {}", self.namespace);
        let _ = writeln!(&mut result, "builder image: {}", self.builder_image);
        let _ = writeln!(&mut result, "remote port: {}", self.remote_port);
        let _ = writeln!(&mut result, "nix config map: {:?}", self.nix_config_map);
        let _ = writeln!(&mut result, "ssh key secret: {}", self.ssh_key_secret);
        let _ = writeln!(&mut result, "health port: {}", self.health_port);
        let _ = writeln!(
            &mut result,
            "shutdown timeout: {}s",
            self.shutdown_timeout_secs
        );
        let _ = writeln!(
            &mut result,
            "terminal gc after: {}s",
            self.terminal_gc_after_secs
        );
        let _ = writeln!(&mut result, "concurrency: {}", self.concurrency);
        result
    }
}

pub fn make_config_loader() -> ConfigLoader<ControllerConfig> {
    ConfigLoader::new(&PathBuf::from("config/nix-remote-build-controller.toml"))
}

impl HasConfigExamples<ControllerConfig> for ControllerConfig {
    fn examples() -> Vec<ConfigExample<ControllerConfig>> {
        vec![ConfigExample(
            "cluster with a shared nix.conf config map",
            ControllerConfig {
                namespace: "nix-builds".to_string(),
                nix_config_map: Some("nix-conf".to_string()),
                ..ControllerConfig::default()
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
        for ConfigExample(name, config) in ControllerConfig::examples() {
            let value = serde_json::to_value(&config).expect("example serializes");
            let round_tripped: ControllerConfig =
                serde_json::from_value(value).unwrap_or_else(|err| {
                    panic!("example '{name}' does not round-trip: {err}")
                });
            assert_eq!(round_tripped.namespace, config.namespace, "example '{name}'");
        }
    }
}
