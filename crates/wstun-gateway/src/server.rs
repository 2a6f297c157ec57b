//! Gateway server: accepts WebSocket connections, authenticates them,
//! and dispatches to the client-path or provider-path routing loop
//! based on the request path (`/c/<provider>` or `/p/<provider>`).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};
use wstun_core::{GatewayConfig, QueueMap, Result, TunnelError};

/// Which routing loop a connection's path selects.
enum Role {
    Client(String),
    Provider(String),
}

/// The gateway instance. Owns the two registries and the client-id to
/// provider-name association used to propagate provider disconnects.
/// No state lives outside this struct.
pub struct Gateway {
    config: GatewayConfig,
    pub(crate) clients: QueueMap<u32>,
    pub(crate) providers: QueueMap<String>,
    pub(crate) client_routes: Mutex<HashMap<u32, String>>,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            clients: QueueMap::new(),
            providers: QueueMap::new(),
            client_routes: Mutex::new(HashMap::new()),
        })
    }

    /// Accept loop. The listener is bound by the caller so tests can
    /// use an ephemeral port.
    pub async fn run(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, addr) = listener
                .accept()
                .await
                .map_err(|e| TunnelError::Transport(format!("accept failed: {e}")))?;
            let gateway = self.clone();
            tokio::spawn(async move {
                if let Err(e) = gateway.handle_connection(stream, addr).await {
                    debug!(remote = %addr, error = %e, "connection ended");
                }
            });
        }
    }

    /// Number of live client-id registry entries.
    pub async fn client_count(&self) -> usize {
        self.clients.len().await
    }

    /// Number of registered providers.
    pub async fn provider_count(&self) -> usize {
        self.providers.len().await
    }

    async fn handle_connection(
        self: Arc<Self>,
        stream: TcpStream,
        addr: SocketAddr,
    ) -> Result<()> {
        let mut request_path = String::new();
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
            request_path = req.uri().path().to_string();
            Ok(resp)
        })
        .await
        .map_err(|e| TunnelError::Transport(format!("WS handshake failed: {e}")))?;

        debug!(remote = %addr, path = %request_path, "connection accepted");

        // The first application message must be the shared secret.
        // A mismatch closes the connection before any routing state
        // exists; the peer gets no indication beyond the close.
        if !self.authenticate(&mut ws).await {
            info!(remote = %addr, "authentication failed, closing");
            let _ = ws.close(None).await;
            return Ok(());
        }

        match parse_path(&request_path) {
            Some(Role::Client(name)) => {
                debug!(remote = %addr, provider = %name, "connection is a client path");
                self.run_client(ws, name).await;
            }
            Some(Role::Provider(name)) => {
                debug!(remote = %addr, provider = %name, "connection is a provider path");
                self.run_provider(ws, name).await;
            }
            None => {
                warn!(remote = %addr, path = %request_path, "unrecognized path, closing");
                let _ = ws.close(None).await;
            }
        }
        Ok(())
    }

    async fn authenticate(&self, ws: &mut WebSocketStream<TcpStream>) -> bool {
        loop {
            match ws.next().await {
                Some(Ok(Message::Ping(payload))) => {
                    let _ = ws.send(Message::Pong(payload)).await;
                }
                Some(Ok(msg @ (Message::Binary(_) | Message::Text(_)))) => {
                    return msg.into_data() == self.config.password.as_bytes();
                }
                _ => return false,
            }
        }
    }
}

fn parse_path(path: &str) -> Option<Role> {
    if let Some(name) = path.strip_prefix("/c/") {
        if !name.is_empty() {
            return Some(Role::Client(name.to_string()));
        }
    }
    if let Some(name) = path.strip_prefix("/p/") {
        if !name.is_empty() {
            return Some(Role::Provider(name.to_string()));
        }
    }
    None
}
