//! Logical connection pump: the bidirectional forwarding loop shared
//! by the provider role (real target socket) and the client role
//! (locally accepted socket).
//!
//! Each iteration races the next inbound frame against the next socket
//! read and forwards whichever resolves first. Both sources are
//! cancel-safe in `select!`: an unbounded `recv()` that loses the race
//! has not dequeued anything, and a lost `read()` has not consumed
//! bytes, so no message is ever dropped between iterations.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::codec::Frame;
use crate::error::TunnelError;
use crate::registry::QueueReceiver;

/// Socket reads are chunked to this size; the peer sees one DATA frame
/// per chunk. Chunk boundaries carry no meaning.
pub const READ_BUF_SIZE: usize = 4096;

/// Why the pump stopped. Callers only branch on this for logging; the
/// CLOSE handshake is already taken care of by the time it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpEnd {
    /// The remote side sent CLOSE.
    PeerClosed,
    /// The local socket hit EOF or an I/O error.
    LocalClosed,
    /// The routing side dropped the inbound queue.
    RouteLost,
}

/// Forward between `stream` and a frame queue until either side closes.
///
/// `inbound` yields raw encoded inner frames from the peer; `emit` is
/// called with raw encoded inner frames headed to the peer (the caller
/// wraps them in envelopes or hands them to a transport writer; the
/// call must not block). On every exit path: if the peer had not sent
/// CLOSE, exactly one CLOSE is emitted, and the stream is shut down.
pub async fn run<S, F>(mut stream: S, inbound: &mut QueueReceiver, mut emit: F) -> PumpEnd
where
    S: AsyncRead + AsyncWrite + Unpin,
    F: FnMut(Vec<u8>),
{
    let mut buf = vec![0u8; READ_BUF_SIZE];
    let end;

    loop {
        tokio::select! {
            frame = inbound.recv() => {
                let Some(raw) = frame else {
                    debug!("inbound queue closed, ending pump");
                    end = PumpEnd::RouteLost;
                    break;
                };
                match Frame::decode(&raw) {
                    Ok(Frame::Data(payload)) => {
                        // Zero-length DATA is a wire-level no-op.
                        if payload.is_empty() {
                            continue;
                        }
                        if let Err(e) = stream.write_all(&payload).await {
                            warn!(error = %e, "socket write failed");
                            end = PumpEnd::LocalClosed;
                            break;
                        }
                    }
                    Ok(Frame::Close) => {
                        debug!("peer closed logical connection");
                        end = PumpEnd::PeerClosed;
                        break;
                    }
                    Ok(Frame::Open { .. }) => {
                        warn!("unexpected OPEN inside established connection, ignoring");
                    }
                    Err(TunnelError::UnknownTag(tag)) => {
                        warn!(tag, "unknown frame tag, ignoring");
                    }
                    Err(e) => {
                        warn!(error = %e, "malformed frame, closing logical connection");
                        end = PumpEnd::LocalClosed;
                        break;
                    }
                }
            }
            read = stream.read(&mut buf) => {
                match read {
                    Ok(0) => {
                        debug!("socket EOF");
                        end = PumpEnd::LocalClosed;
                        break;
                    }
                    Ok(n) => emit(Frame::Data(buf[..n].to_vec()).encode()),
                    Err(e) => {
                        warn!(error = %e, "socket read failed");
                        end = PumpEnd::LocalClosed;
                        break;
                    }
                }
            }
        }
    }

    if end != PumpEnd::PeerClosed {
        emit(Frame::Close.encode());
    }
    let _ = stream.shutdown().await;
    end
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Frame;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn frame_channel() -> (
        mpsc::UnboundedSender<Vec<u8>>,
        mpsc::UnboundedReceiver<Vec<u8>>,
    ) {
        mpsc::unbounded_channel()
    }

    async fn recv_frame(rx: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> Frame {
        let raw = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out")
            .expect("emit channel closed");
        Frame::decode(&raw).unwrap()
    }

    #[tokio::test]
    async fn forwards_both_directions() {
        let (local, mut remote) = tokio::io::duplex(1024);
        let (in_tx, mut in_rx) = frame_channel();
        let (out_tx, mut out_rx) = frame_channel();

        let pump = tokio::spawn(async move {
            run(local, &mut in_rx, move |f| {
                let _ = out_tx.send(f);
            })
            .await
        });

        // Socket to peer.
        remote.write_all(b"hello").await.unwrap();
        assert_eq!(recv_frame(&mut out_rx).await, Frame::Data(b"hello".to_vec()));

        // Peer to socket.
        in_tx.send(Frame::Data(b"world".to_vec()).encode()).unwrap();
        let mut buf = [0u8; 5];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"world");

        in_tx.send(Frame::Close.encode()).unwrap();
        assert_eq!(pump.await.unwrap(), PumpEnd::PeerClosed);
    }

    #[tokio::test]
    async fn eof_emits_exactly_one_close() {
        let (local, remote) = tokio::io::duplex(1024);
        let (_in_tx, mut in_rx) = frame_channel();
        let (out_tx, mut out_rx) = frame_channel();

        // Dropping the far end is EOF for the pump's reads.
        drop(remote);

        let end = run(local, &mut in_rx, move |f| {
            let _ = out_tx.send(f);
        })
        .await;
        assert_eq!(end, PumpEnd::LocalClosed);

        assert_eq!(recv_frame(&mut out_rx).await, Frame::Close);
        assert!(out_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn peer_close_emits_no_close_and_shuts_socket() {
        let (local, mut remote) = tokio::io::duplex(1024);
        let (in_tx, mut in_rx) = frame_channel();
        let (out_tx, mut out_rx) = frame_channel();

        in_tx.send(Frame::Close.encode()).unwrap();
        let end = run(local, &mut in_rx, move |f| {
            let _ = out_tx.send(f);
        })
        .await;
        assert_eq!(end, PumpEnd::PeerClosed);

        // No CLOSE echoed back to a peer that already closed.
        assert!(out_rx.recv().await.is_none());

        // Local socket was shut down.
        let mut buf = [0u8; 1];
        let n = timeout(Duration::from_secs(1), remote.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn zero_length_data_is_never_written_and_never_terminates() {
        let (local, mut remote) = tokio::io::duplex(1024);
        let (in_tx, mut in_rx) = frame_channel();
        let (out_tx, _out_rx) = frame_channel();

        let pump = tokio::spawn(async move {
            run(local, &mut in_rx, move |f| {
                let _ = out_tx.send(f);
            })
            .await
        });

        in_tx.send(Frame::Data(Vec::new()).encode()).unwrap();
        in_tx.send(Frame::Data(b"x".to_vec()).encode()).unwrap();

        // The first byte to arrive is from the non-empty frame.
        let mut buf = [0u8; 1];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"x");

        in_tx.send(Frame::Close.encode()).unwrap();
        assert_eq!(pump.await.unwrap(), PumpEnd::PeerClosed);
    }

    #[tokio::test]
    async fn unknown_tag_is_ignored() {
        let (local, mut remote) = tokio::io::duplex(1024);
        let (in_tx, mut in_rx) = frame_channel();
        let (out_tx, _out_rx) = frame_channel();

        let pump = tokio::spawn(async move {
            run(local, &mut in_rx, move |f| {
                let _ = out_tx.send(f);
            })
            .await
        });

        in_tx.send(vec![0x7f, 1, 2, 3]).unwrap();
        in_tx.send(Frame::Data(b"ok".to_vec()).encode()).unwrap();

        let mut buf = [0u8; 2];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ok");

        in_tx.send(Frame::Close.encode()).unwrap();
        assert_eq!(pump.await.unwrap(), PumpEnd::PeerClosed);
    }

    #[tokio::test]
    async fn malformed_frame_closes_connection() {
        let (local, _remote) = tokio::io::duplex(1024);
        let (in_tx, mut in_rx) = frame_channel();
        let (out_tx, mut out_rx) = frame_channel();

        // DATA header claims more bytes than the frame carries.
        let mut bad = Frame::Data(vec![9; 16]).encode();
        bad.truncate(10);
        in_tx.send(bad).unwrap();

        let end = run(local, &mut in_rx, move |f| {
            let _ = out_tx.send(f);
        })
        .await;
        assert_eq!(end, PumpEnd::LocalClosed);
        assert_eq!(recv_frame(&mut out_rx).await, Frame::Close);
    }

    #[tokio::test]
    async fn route_lost_emits_close() {
        let (local, _remote) = tokio::io::duplex(1024);
        let (in_tx, mut in_rx) = frame_channel();
        let (out_tx, mut out_rx) = frame_channel();

        drop(in_tx);
        let end = run(local, &mut in_rx, move |f| {
            let _ = out_tx.send(f);
        })
        .await;
        assert_eq!(end, PumpEnd::RouteLost);
        assert_eq!(recv_frame(&mut out_rx).await, Frame::Close);
    }
}
