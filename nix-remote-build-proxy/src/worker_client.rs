use crate::keys::KeyMaterial;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use russh::client::{self, Msg};
use russh::Channel;
use std::sync::Arc;
use std::time::Duration;

/// Accepts any worker host key. Host-key pinning for workers is an explicit non-goal: the
/// worker container is ephemeral and provisioned by the same cluster that runs the proxy,
/// so there is no separate trust root to pin against.
struct AcceptAllHostKeys;

#[async_trait]
impl client::Handler for AcceptAllHostKeys {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Dials `pod_ip:remote_port` as `remote_user`, authenticates with the proxy's client key,
/// and opens a single `session` channel on the resulting connection.
pub async fn dial_worker(
    keys: &KeyMaterial,
    pod_ip: &str,
    remote_port: u16,
    remote_user: &str,
    dial_timeout: Duration,
) -> Result<Channel<Msg>> {
    let config = Arc::new(client::Config {
        ..Default::default()
    });

    let addr = (pod_ip, remote_port);
    let connect = client::connect(config, addr, AcceptAllHostKeys);
    let mut handle = tokio::time::timeout(dial_timeout, connect)
        .await
        .context("timed out dialing worker")??;

    let authenticated = tokio::time::timeout(
        dial_timeout,
        handle.authenticate_publickey(remote_user, Arc::new(keys.client_key.clone())),
    )
    .await
    .context("timed out authenticating to worker")??;

    if !authenticated {
        return Err(anyhow!("worker rejected client key for user {remote_user}"));
    }

    let channel = handle
        .channel_open_session()
        .await
        .context("failed to open session channel on worker")?;

    Ok(channel)
}
