//! The two routing loops sharing the gateway's registries.
//!
//! Both loops race the WebSocket against the connection's own queue
//! and relay opaque frames; the gateway never decodes inner DATA
//! payloads. Per-connection failures are converted into synthetic
//! CLOSE frames toward the affected peer, never process failures.

use crate::server::Gateway;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};
use wstun_core::{Envelope, Frame};

impl Gateway {
    /// Client-path loop (`/c/<provider>`): one logical connection.
    ///
    /// Transport-inbound frames are wrapped into envelopes with this
    /// connection's client id and routed to the named provider's
    /// queue; queue-inbound frames (already unwrapped) go out raw.
    pub(crate) async fn run_client(&self, ws: WebSocketStream<TcpStream>, provider_name: String) {
        let (client_id, mut queue_rx) = self.clients.insert_next().await;
        self.client_routes
            .lock()
            .await
            .insert(client_id, provider_name.clone());
        debug!(client_id, provider = %provider_name, "client registered");

        let (mut ws_tx, mut ws_rx) = ws.split();

        loop {
            tokio::select! {
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Binary(frame))) => {
                            self.route_to_provider(client_id, &provider_name, frame).await;
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = ws_tx.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            debug!(client_id, error = %e, "client transport error");
                            break;
                        }
                    }
                }
                item = queue_rx.recv() => {
                    let Some(frame) = item else { break };
                    if ws_tx.send(Message::Binary(frame)).await.is_err() {
                        break;
                    }
                }
            }
        }

        self.client_routes.lock().await.remove(&client_id);
        self.clients.remove(&client_id).await;
        debug!(client_id, "client unregistered");
    }

    /// Provider-path loop (`/p/<provider>`): carries envelopes for
    /// many logical connections.
    pub(crate) async fn run_provider(&self, ws: WebSocketStream<TcpStream>, name: String) {
        let mut queue_rx = match self.providers.insert_named(name.clone()).await {
            Ok(rx) => rx,
            Err(e) => {
                warn!(provider = %name, error = %e, "registration rejected, closing");
                let mut ws = ws;
                let _ = ws.close(None).await;
                return;
            }
        };
        debug!(provider = %name, "provider registered");

        let (mut ws_tx, mut ws_rx) = ws.split();

        loop {
            tokio::select! {
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Binary(frame))) => {
                            self.route_to_client(&name, &frame).await;
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = ws_tx.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            debug!(provider = %name, error = %e, "provider transport error");
                            break;
                        }
                    }
                }
                item = queue_rx.recv() => {
                    let Some(envelope) = item else { break };
                    if ws_tx.send(Message::Binary(envelope)).await.is_err() {
                        break;
                    }
                }
            }
        }

        self.providers.remove(&name).await;
        self.close_clients_of(&name).await;
        debug!(provider = %name, "provider unregistered");
    }

    /// Wrap a client frame into an envelope and hand it to the named
    /// provider. An unknown or vanished provider answers the client
    /// with a synthetic CLOSE through its own queue.
    async fn route_to_provider(&self, client_id: u32, provider_name: &str, frame: Vec<u8>) {
        let envelope = Envelope::new(client_id, frame).encode();
        let delivered = match self.providers.sender(provider_name).await {
            Some(tx) => tx.send(envelope).is_ok(),
            None => false,
        };
        if !delivered {
            warn!(client_id, provider = %provider_name, "provider not found, closing logical connection");
            self.push_close_to_client(client_id).await;
        }
    }

    /// Unpack an envelope from a provider and route the inner frame to
    /// its client. An unknown client id answers the provider with an
    /// envelope-wrapped CLOSE so it learns its peer vanished.
    async fn route_to_client(&self, provider_name: &str, raw: &[u8]) {
        let envelope = match Envelope::decode(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(provider = %provider_name, error = %e, "malformed envelope, dropping");
                return;
            }
        };

        let delivered = match self.clients.sender(&envelope.client_id).await {
            Some(tx) => tx.send(envelope.inner).is_ok(),
            None => false,
        };
        if !delivered {
            warn!(
                client_id = envelope.client_id,
                provider = %provider_name,
                "client not found, answering with CLOSE"
            );
            if let Some(tx) = self.providers.sender(provider_name).await {
                let reply = Envelope::new(envelope.client_id, Frame::Close.encode());
                let _ = tx.send(reply.encode());
            }
        }
    }

    async fn push_close_to_client(&self, client_id: u32) {
        if let Some(tx) = self.clients.sender(&client_id).await {
            let _ = tx.send(Frame::Close.encode());
        }
    }

    /// A provider went away: every client still routed to it gets a
    /// CLOSE so waiting peers are not left hanging.
    async fn close_clients_of(&self, provider_name: &str) {
        let ids: Vec<u32> = self
            .client_routes
            .lock()
            .await
            .iter()
            .filter(|(_, name)| name.as_str() == provider_name)
            .map(|(id, _)| *id)
            .collect();
        for client_id in ids {
            debug!(client_id, provider = %provider_name, "closing client of departed provider");
            self.push_close_to_client(client_id).await;
        }
    }
}
