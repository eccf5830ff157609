use clap::Parser;
use nix_remote_build_common::tracing::init_tracing_with_default_env_filter;
use nix_remote_build_common::SafeDisplay;
use nix_remote_build_controller::config::{make_config_loader, ControllerConfig};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "nix-remote-build-controller")]
struct Args {
    #[arg(long)]
    namespace: Option<String>,
    #[arg(long)]
    builder_image: Option<String>,
    #[arg(long)]
    remote_port: Option<u16>,
    #[arg(long)]
    nix_config: Option<String>,
    #[arg(long)]
    ssh_key_secret: Option<String>,
    #[arg(long)]
    health_port: Option<u16>,
    #[arg(long)]
    shutdown_timeout: Option<u64>,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    dump_config: bool,
}

fn apply_overrides(mut config: ControllerConfig, args: &Args) -> ControllerConfig {
    if let Some(namespace) = &args.namespace {
        config.namespace = namespace.clone();
    }
    if let Some(image) = &args.builder_image {
        config.builder_image = image.clone();
    }
    if let Some(remote_port) = args.remote_port {
        config.remote_port = remote_port;
    }
    if let Some(nix_config) = &args.nix_config {
        config.nix_config_map = Some(nix_config.clone());
    }
    if let Some(secret) = &args.ssh_key_secret {
        config.ssh_key_secret = secret.clone();
    }
    if let Some(health_port) = args.health_port {
        config.health_port = health_port;
    }
    if let Some(timeout) = args.shutdown_timeout {
        config.shutdown_timeout_secs = timeout;
    }
    config
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let loader = match &args.config {
        Some(path) => nix_remote_build_common::config::ConfigLoader::new(path),
        None => make_config_loader(),
    };

    let config =
        match loader.load_or_dump(args.dump_config, |c: &ControllerConfig| c.to_safe_string()) {
            Some(config) => apply_overrides(config, &args),
            None => return Ok(()),
        };

    init_tracing_with_default_env_filter(&config.tracing);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let cancel = CancellationToken::new();

        {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                cancel.cancel();
            });
        }

        // Awaited directly, not raced against the signal listener above: `run` performs
        // its own graceful shutdown sequence once `cancel` fires, and that sequence must
        // be allowed to finish before the process exits.
        nix_remote_build_controller::run(config, cancel).await
    })
}
