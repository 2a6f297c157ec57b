//! Client role: a local TCP listener where every accepted connection
//! gets its own WebSocket to the gateway, addressed to the configured
//! provider. The connection is 1:1 with one logical stream, so frames
//! travel on the WebSocket directly with no intermediate registry.

use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info};
use wstun_core::config::join_gateway_url;
use wstun_core::{pump, ClientConfig, Frame, Result, TunnelError};

/// Bind the configured local port and serve tunnels forever.
pub async fn run(config: ClientConfig) -> Result<()> {
    let listener = TcpListener::bind(("127.0.0.1", config.local_port)).await?;
    serve(listener, config).await
}

/// Accept loop over an already-bound listener (tests use an ephemeral
/// port). Each accepted socket runs independently; a slow tunnel never
/// blocks other accepts.
pub async fn serve(listener: TcpListener, config: ClientConfig) -> Result<()> {
    let addr = listener.local_addr()?;
    info!(
        addr = %addr,
        provider = %config.provider_name,
        remote = %format!("{}:{}", config.remote_host, config.remote_port),
        "listening"
    );

    let config = Arc::new(config);
    loop {
        let (socket, remote) = listener
            .accept()
            .await
            .map_err(|e| TunnelError::Transport(format!("accept failed: {e}")))?;
        debug!(remote = %remote, "local connection accepted");

        let config = config.clone();
        tokio::spawn(async move {
            if let Err(e) = tunnel(socket, &config).await {
                debug!(remote = %remote, error = %e, "tunnel ended");
            }
        });
    }
}

/// Bridge one accepted socket to the gateway: authenticate, send OPEN
/// for the configured real endpoint, then pump until either side
/// closes.
async fn tunnel(socket: TcpStream, config: &ClientConfig) -> Result<()> {
    let url = join_gateway_url(&config.gateway_url, "c", &config.provider_name);
    debug!(url = %url, "opening gateway connection");

    let (ws, _) = connect_async(&url)
        .await
        .map_err(|e| TunnelError::Transport(format!("gateway connect failed: {e}")))?;
    let (mut ws_tx, mut ws_rx) = ws.split();

    ws_tx
        .send(Message::Binary(config.password.clone().into_bytes()))
        .await
        .map_err(|e| TunnelError::Transport(format!("login failed: {e}")))?;

    let open = Frame::Open {
        host: config.remote_host.clone(),
        port: config.remote_port,
    };
    ws_tx
        .send(Message::Binary(open.encode()))
        .await
        .map_err(|e| TunnelError::Transport(format!("OPEN failed: {e}")))?;

    // Writer task: drains outbound messages into the sink, then closes
    // the WebSocket once the channel empties.
    let (write_tx, mut write_rx) = mpsc::unbounded_channel::<Message>();
    let writer = tokio::spawn(async move {
        while let Some(msg) = write_rx.recv().await {
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    // Reader task: binary frames feed the pump, pings bounce back
    // through the writer. Dropping `in_tx` ends the pump's inbound side.
    let (in_tx, mut in_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let pong_tx = write_tx.clone();
    let reader = tokio::spawn(async move {
        while let Some(msg) = ws_rx.next().await {
            match msg {
                Ok(Message::Binary(frame)) => {
                    if in_tx.send(frame).is_err() {
                        break;
                    }
                }
                Ok(Message::Ping(payload)) => {
                    let _ = pong_tx.send(Message::Pong(payload));
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(error = %e, "gateway transport error");
                    break;
                }
            }
        }
    });

    let frame_tx = write_tx.clone();
    let end = pump::run(socket, &mut in_rx, move |inner| {
        let _ = frame_tx.send(Message::Binary(inner));
    })
    .await;
    debug!(end = ?end, "tunnel pump ended");

    // Let the writer flush whatever the pump queued (including its
    // CLOSE), then shut the transport down.
    drop(write_tx);
    reader.abort();
    let _ = writer.await;
    Ok(())
}
