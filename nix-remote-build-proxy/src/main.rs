use clap::Parser;
use nix_remote_build_common::tracing::init_tracing_with_default_env_filter;
use nix_remote_build_common::SafeDisplay;
use nix_remote_build_proxy::config::{make_config_loader, ProxyConfig};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "nix-remote-build-proxy")]
struct Args {
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    host_key: Option<PathBuf>,
    #[arg(long)]
    namespace: Option<String>,
    #[arg(long)]
    remote_user: Option<String>,
    #[arg(long)]
    remote_port: Option<u16>,
    #[arg(long)]
    health_port: Option<u16>,
    #[arg(long)]
    ssh_key_secret: Option<String>,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    dump_config: bool,
}

fn apply_overrides(mut config: ProxyConfig, args: &Args) -> ProxyConfig {
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(host_key) = &args.host_key {
        config.host_key_path = Some(host_key.clone());
    }
    if let Some(namespace) = &args.namespace {
        config.namespace = namespace.clone();
    }
    if let Some(remote_user) = &args.remote_user {
        config.remote_user = remote_user.clone();
    }
    if let Some(remote_port) = args.remote_port {
        config.remote_port = remote_port;
    }
    if let Some(health_port) = args.health_port {
        config.health_port = health_port;
    }
    if let Some(ssh_key_secret) = &args.ssh_key_secret {
        config.ssh_key_secret = ssh_key_secret.clone();
    }
    config
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let loader = match &args.config {
        Some(path) => nix_remote_build_common::config::ConfigLoader::new(path),
        None => make_config_loader(),
    };

    let config = match loader.load_or_dump(args.dump_config, |c: &ProxyConfig| c.to_safe_string()) {
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
        // its own graceful drain once `cancel` fires, and that drain must be allowed to
        // finish before the process exits.
        nix_remote_build_proxy::run(config, cancel).await
    })
}
