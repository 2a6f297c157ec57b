//! Provider main loop: one WebSocket to the gateway, demultiplexed by
//! client id into per-tunnel queues.

use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use wstun_core::codec::TAG_OPEN;
use wstun_core::config::join_gateway_url;
use wstun_core::{Envelope, Frame, ProviderConfig, QueueMap, Result, TunnelError};

use crate::tunnel;

/// Connect to the gateway at `/p/<name>`, authenticate, and serve
/// tunnels until the transport ends.
pub async fn run(config: ProviderConfig) -> Result<()> {
    let url = join_gateway_url(&config.gateway_url, "p", &config.name);
    info!(url = %url, name = %config.name, "connecting to gateway");

    let (mut ws, _) = connect_async(&url)
        .await
        .map_err(|e| TunnelError::Transport(format!("gateway connect failed: {e}")))?;

    ws.send(Message::Binary(config.password.clone().into_bytes()))
        .await
        .map_err(|e| TunnelError::Transport(format!("login failed: {e}")))?;

    // One outbound envelope queue for the whole connection; tunnel
    // tasks feed it, this loop drains it to the gateway.
    let clients = Arc::new(QueueMap::<u32>::new());
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();

    let (mut ws_tx, mut ws_rx) = ws.split();

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Binary(raw))) => {
                        handle_envelope(&clients, &out_tx, raw).await;
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = ws_tx.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "gateway transport error");
                        break;
                    }
                }
            }
            item = out_rx.recv() => {
                // The loop holds out_tx, so recv never yields None here.
                let Some(envelope) = item else { break };
                if ws_tx.send(Message::Binary(envelope)).await.is_err() {
                    break;
                }
            }
        }
    }

    info!(name = %config.name, "gateway connection closed");
    Ok(())
}

/// Dispatch one envelope from the gateway: OPEN spawns a tunnel, any
/// other inner frame is routed to its per-client queue. An unknown
/// client id is answered with CLOSE, never registered implicitly.
async fn handle_envelope(
    clients: &Arc<QueueMap<u32>>,
    out_tx: &UnboundedSender<Vec<u8>>,
    raw: Vec<u8>,
) {
    let envelope = match Envelope::decode(&raw) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "malformed envelope from gateway, dropping");
            return;
        }
    };
    let client_id = envelope.client_id;

    if envelope.inner.first() == Some(&TAG_OPEN) {
        let open = match Frame::decode(&envelope.inner) {
            Ok(Frame::Open { host, port }) => (host, port),
            other => {
                warn!(client_id, ?other, "bad OPEN frame, closing logical connection");
                send_close(out_tx, client_id);
                return;
            }
        };

        // The receiver goes straight into the tunnel task, so there is
        // no window where the queue exists without a consumer.
        let inbound = match clients.insert_named(client_id).await {
            Ok(rx) => rx,
            Err(e) => {
                warn!(client_id, error = %e, "duplicate client id in OPEN");
                send_close(out_tx, client_id);
                return;
            }
        };

        debug!(client_id, host = %open.0, port = open.1, "OPEN received, spawning tunnel");
        let clients = clients.clone();
        let out_tx = out_tx.clone();
        tokio::spawn(async move {
            tunnel::run(client_id, open.0, open.1, inbound, out_tx, clients).await;
        });
        return;
    }

    match clients.sender(&client_id).await {
        Some(tx) => {
            if tx.send(envelope.inner).is_err() {
                // Tunnel task just went away; it already sent CLOSE.
                debug!(client_id, "dropping frame for finished tunnel");
            }
        }
        None => {
            warn!(client_id, "unknown client id, answering with CLOSE");
            send_close(out_tx, client_id);
        }
    }
}

fn send_close(out_tx: &UnboundedSender<Vec<u8>>, client_id: u32) {
    let _ = out_tx.send(Envelope::new(client_id, Frame::Close.encode()).encode());
}
