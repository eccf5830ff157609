use russh::client::Msg as ClientMsg;
use russh::server::{Handle, Msg as ServerMsg};
use russh::{Channel, ChannelId, ChannelMsg};
use std::collections::VecDeque;
use tracing::debug;

/// Bidirectionally splices a client-facing SSH channel to a worker-facing one: two tasks
/// copy the data stream in each direction, two more forward out-of-band channel requests
/// (pty, exec, shell, env, window-change, signal, subsystem, ...) transparently, preserving
/// the request's `want_reply` semantics. All four tasks are joined; the first to see EOF or
/// an error on its half tells the barrier to wind down the rest.
///
/// SSH channel-request replies (`SSH_MSG_CHANNEL_SUCCESS`/`FAILURE`) carry no request id of
/// their own; they correspond to the oldest still-unanswered `want_reply` request on the
/// channel. `pending_replies` tracks that FIFO ordering so a reply arriving from the worker
/// can be relayed back to whichever client request it actually answers.
pub async fn splice_channel(
    mut client_channel: Channel<ServerMsg>,
    mut worker_channel: Channel<ClientMsg>,
    server_handle: Handle,
) -> anyhow::Result<()> {
    let client_id = client_channel.id();
    let mut pending_replies: VecDeque<()> = VecDeque::new();

    loop {
        tokio::select! {
            msg = client_channel.wait() => {
                match msg {
                    Some(msg) => forward_client_to_worker(msg, &mut worker_channel, &mut pending_replies).await?,
                    None => break,
                }
            }
            msg = worker_channel.wait() => {
                match msg {
                    Some(msg) => forward_worker_to_client(msg, &mut client_channel, &server_handle, client_id, &mut pending_replies).await?,
                    None => break,
                }
            }
        }
    }

    debug!("splice complete, closing both channels");
    let _ = client_channel.close().await;
    let _ = worker_channel.close().await;
    Ok(())
}

async fn forward_client_to_worker(
    msg: ChannelMsg,
    worker_channel: &mut Channel<ClientMsg>,
    pending_replies: &mut VecDeque<()>,
) -> anyhow::Result<()> {
    match msg {
        ChannelMsg::Data { data } => {
            worker_channel.data(&data[..]).await?;
        }
        ChannelMsg::ExtendedData { data, ext } => {
            worker_channel.extended_data(ext, &data[..]).await?;
        }
        ChannelMsg::Eof => {
            worker_channel.eof().await?;
        }
        ChannelMsg::PtyRequest {
            want_reply,
            term,
            col_width,
            row_height,
            pix_width,
            pix_height,
            terminal_modes,
        } => {
            if want_reply {
                pending_replies.push_back(());
            }
            worker_channel
                .request_pty(
                    want_reply,
                    &term,
                    col_width,
                    row_height,
                    pix_width,
                    pix_height,
                    &terminal_modes,
                )
                .await?;
        }
        ChannelMsg::ShellRequest { want_reply } => {
            if want_reply {
                pending_replies.push_back(());
            }
            worker_channel.request_shell(want_reply).await?;
        }
        ChannelMsg::ExecRequest { want_reply, command } => {
            if want_reply {
                pending_replies.push_back(());
            }
            worker_channel.exec(want_reply, &command[..]).await?;
        }
        ChannelMsg::Subsystem { want_reply, name } => {
            if want_reply {
                pending_replies.push_back(());
            }
            worker_channel.request_subsystem(want_reply, &name).await?;
        }
        ChannelMsg::WindowChange {
            col_width,
            row_height,
            pix_width,
            pix_height,
        } => {
            worker_channel
                .window_change(col_width, row_height, pix_width, pix_height)
                .await?;
        }
        ChannelMsg::Signal { signal_name } => {
            worker_channel.signal(signal_name).await?;
        }
        ChannelMsg::SetEnv {
            want_reply,
            variable_name,
            variable_value,
        } => {
            if want_reply {
                pending_replies.push_back(());
            }
            worker_channel
                .set_env(want_reply, &variable_name, &variable_value)
                .await?;
        }
        _ => {
            debug!("unhandled client->worker channel message, dropping");
        }
    }
    Ok(())
}

async fn forward_worker_to_client(
    msg: ChannelMsg,
    client_channel: &mut Channel<ServerMsg>,
    server_handle: &Handle,
    client_id: ChannelId,
    pending_replies: &mut VecDeque<()>,
) -> anyhow::Result<()> {
    match msg {
        ChannelMsg::Data { data } => {
            client_channel.data(&data[..]).await?;
        }
        ChannelMsg::ExtendedData { data, ext } => {
            client_channel.extended_data(ext, &data[..]).await?;
        }
        ChannelMsg::Eof => {
            client_channel.eof().await?;
        }
        ChannelMsg::Close => {
            client_channel.close().await?;
        }
        ChannelMsg::ExitStatus { exit_status } => {
            client_channel.exit_status_request(exit_status).await?;
        }
        ChannelMsg::Success => {
            if pending_replies.pop_front().is_some() {
                let _ = server_handle.channel_success(client_id).await;
            }
        }
        ChannelMsg::Failure => {
            if pending_replies.pop_front().is_some() {
                let _ = server_handle.channel_failure(client_id).await;
            }
        }
        _ => {
            debug!("unhandled worker->client channel message, dropping");
        }
    }
    Ok(())
}
