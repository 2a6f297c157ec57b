//! One tunnel task per logical connection: opens the real TCP
//! connection requested by OPEN and pumps it against the per-client
//! queue. Envelope wrapping happens here; the pump itself only sees
//! inner frames.

use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};
use wstun_core::registry::QueueReceiver;
use wstun_core::{pump, Envelope, Frame, QueueMap};

pub(crate) async fn run(
    client_id: u32,
    host: String,
    port: u16,
    mut inbound: QueueReceiver,
    out_tx: UnboundedSender<Vec<u8>>,
    clients: Arc<QueueMap<u32>>,
) {
    debug!(client_id, host = %host, port, "opening real connection");

    match TcpStream::connect((host.as_str(), port)).await {
        Ok(stream) => {
            info!(client_id, host = %host, port, "tunnel established");
            let emit_tx = out_tx.clone();
            let end = pump::run(stream, &mut inbound, move |inner| {
                let _ = emit_tx.send(Envelope::new(client_id, inner).encode());
            })
            .await;
            debug!(client_id, end = ?end, "tunnel ended");
        }
        Err(e) => {
            warn!(client_id, host = %host, port, error = %e, "real connection failed");
            let _ = out_tx.send(Envelope::new(client_id, Frame::Close.encode()).encode());
        }
    }

    clients.remove(&client_id).await;
}
