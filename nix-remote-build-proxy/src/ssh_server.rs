use crate::keys::KeyMaterial;
use crate::session_registry::{SessionRecord, SessionRegistry, SessionStatus};
use crate::splice::splice_channel;
use crate::worker_client::dial_worker;
use crate::{config::ProxyConfig, worker_lifecycle};
use async_trait::async_trait;
use kube::Client as KubeClient;
use nix_remote_build_common::session::SessionId;
use russh::server::{Auth, Handler, Msg, Server as _, Session};
use russh::{Channel, ChannelId};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

/// Accepts inbound SSH connections and drives each session through §4.3: handshake,
/// worker-record lifecycle, dial, splice, teardown. `tracker` lets graceful shutdown wait
/// for every in-flight session task to finish instead of abandoning them mid-splice.
pub struct ProxyServer {
    pub config: Arc<ProxyConfig>,
    pub keys: Arc<KeyMaterial>,
    pub kube_client: KubeClient,
    pub registry: SessionRegistry,
    pub cancel: CancellationToken,
    pub tracker: TaskTracker,
}

impl russh::server::Server for ProxyServer {
    type Handler = SessionHandler;

    fn new_client(&mut self, _addr: Option<std::net::SocketAddr>) -> SessionHandler {
        SessionHandler {
            config: self.config.clone(),
            keys: self.keys.clone(),
            kube_client: self.kube_client.clone(),
            registry: self.registry.clone(),
            cancel: self.cancel.clone(),
            tracker: self.tracker.clone(),
            session_id: SessionId::new(),
        }
    }
}

pub struct SessionHandler {
    config: Arc<ProxyConfig>,
    keys: Arc<KeyMaterial>,
    kube_client: KubeClient,
    registry: SessionRegistry,
    cancel: CancellationToken,
    tracker: TaskTracker,
    session_id: SessionId,
}

#[async_trait]
impl Handler for SessionHandler {
    type Error = anyhow::Error;

    /// The proxy currently authenticates no one: any client identity is accepted (a
    /// deliberate, documented non-goal). It authenticates only to the worker it dials.
    async fn auth_none(&mut self, _user: &str) -> Result<Auth, Self::Error> {
        Ok(Auth::Accept)
    }

    async fn auth_publickey(
        &mut self,
        _user: &str,
        _key: &russh_keys::key::PublicKey,
    ) -> Result<Auth, Self::Error> {
        Ok(Auth::Accept)
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.registry
            .insert(SessionRecord::new(self.session_id))
            .await;

        let session_id = self.session_id;
        let config = self.config.clone();
        let keys = self.keys.clone();
        let kube_client = self.kube_client.clone();
        let registry = self.registry.clone();
        let cancel = self.cancel.clone();
        let handle = session.handle();

        self.tracker.spawn(async move {
            let outcome = run_session(
                session_id,
                channel,
                handle,
                config,
                keys,
                kube_client,
                cancel,
                registry.clone(),
            )
            .await;

            if let Err(err) = outcome {
                warn!(%session_id, error = %err, "session ended with error");
            }
            registry.set_status(&session_id, SessionStatus::Closed).await;
            registry.remove(&session_id).await;
        });

        Ok(true)
    }

    /// Any channel type other than `session` is rejected, per the ingress contract.
    async fn channel_open_direct_tcpip(
        &mut self,
        _channel: ChannelId,
        _host_to_connect: &str,
        _port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(false)
    }
}

async fn run_session(
    session_id: SessionId,
    client_channel: Channel<Msg>,
    handle: russh::server::Handle,
    config: Arc<ProxyConfig>,
    keys: Arc<KeyMaterial>,
    kube_client: KubeClient,
    cancel: CancellationToken,
    registry: SessionRegistry,
) -> anyhow::Result<()> {
    let session_id_str = session_id.to_string();
    let record_name = worker_lifecycle::create(&kube_client, &config.namespace, &session_id_str)
        .await?;

    let teardown = {
        let kube_client = kube_client.clone();
        let namespace = config.namespace.clone();
        let record_name = record_name.clone();
        let delete_timeout = Duration::from_secs(config.record_delete_timeout_secs);
        move || async move {
            worker_lifecycle::delete(&kube_client, &namespace, &record_name, delete_timeout).await;
        }
    };

    let pod_ip = match worker_lifecycle::await_routable(
        &kube_client,
        &config.namespace,
        &record_name,
        Duration::from_secs(config.worker_ready_timeout_secs),
        &cancel,
    )
    .await
    {
        Ok(ip) => ip,
        Err(err) => {
            teardown().await;
            return Err(err.into());
        }
    };

    info!(%session_id, pod_ip = %pod_ip, "worker routable, dialing");

    let worker_channel = match dial_worker(
        &keys,
        &pod_ip,
        config.remote_port,
        &config.remote_user,
        Duration::from_secs(config.worker_dial_timeout_secs),
    )
    .await
    {
        Ok(channel) => channel,
        Err(err) => {
            teardown().await;
            return Err(err.into());
        }
    };

    registry
        .set_status(&session_id, SessionStatus::Connected)
        .await;
    let splice_result = splice_channel(client_channel, worker_channel, handle).await;

    teardown().await;

    if let Err(err) = splice_result {
        error!(%session_id, error = %err, "splice ended with error");
    }

    Ok(())
}
