//! Binary wire codec for the tunnel protocol.
//!
//! Two layers, all integers big-endian:
//!
//! - Inner frame, exchanged within one logical connection:
//!   - DATA:  `[0x00][u32 len][payload]`
//!   - OPEN:  `[0x01][u8 reserved=0][u32 port][u32 host_len][host UTF-8]`
//!   - CLOSE: `[0x02]`
//! - Envelope, used between gateway and provider:
//!   `[u32 client_id][u32 len][inner frame]`
//!
//! Decoding never panics: inconsistent length fields yield
//! [`TunnelError::MalformedFrame`], an unrecognized tag byte yields
//! [`TunnelError::UnknownTag`] so callers can skip it and keep going.

use crate::error::{Result, TunnelError};

pub const TAG_DATA: u8 = 0x00;
pub const TAG_OPEN: u8 = 0x01;
pub const TAG_CLOSE: u8 = 0x02;

/// Protocol unit exchanged within one logical connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Opaque chunk of the tunneled byte stream. An empty payload is a
    /// valid no-op on the wire.
    Data(Vec<u8>),
    /// Request to open an outbound TCP connection to `host:port`.
    Open { host: String, port: u16 },
    /// One side has terminated the logical connection.
    Close,
}

impl Frame {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Frame::Data(payload) => {
                let mut buf = Vec::with_capacity(5 + payload.len());
                buf.push(TAG_DATA);
                buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
                buf.extend_from_slice(payload);
                buf
            }
            Frame::Open { host, port } => {
                let host_bytes = host.as_bytes();
                let mut buf = Vec::with_capacity(10 + host_bytes.len());
                buf.push(TAG_OPEN);
                // Reserved for a future non-TCP transport.
                buf.push(0x00);
                buf.extend_from_slice(&(*port as u32).to_be_bytes());
                buf.extend_from_slice(&(host_bytes.len() as u32).to_be_bytes());
                buf.extend_from_slice(host_bytes);
                buf
            }
            Frame::Close => vec![TAG_CLOSE],
        }
    }

    pub fn decode(buf: &[u8]) -> Result<Frame> {
        let tag = *buf
            .first()
            .ok_or_else(|| TunnelError::MalformedFrame("empty frame".into()))?;

        match tag {
            TAG_DATA => {
                let len = read_u32(buf, 1)? as usize;
                let payload = buf
                    .get(5..5 + len)
                    .ok_or_else(|| malformed("DATA", buf.len(), 5 + len))?;
                Ok(Frame::Data(payload.to_vec()))
            }
            TAG_OPEN => {
                let port = read_u32(buf, 2)?;
                let port = u16::try_from(port).map_err(|_| {
                    TunnelError::MalformedFrame(format!("OPEN port {port} out of range"))
                })?;
                let host_len = read_u32(buf, 6)? as usize;
                let host_bytes = buf
                    .get(10..10 + host_len)
                    .ok_or_else(|| malformed("OPEN", buf.len(), 10 + host_len))?;
                let host = String::from_utf8(host_bytes.to_vec()).map_err(|_| {
                    TunnelError::MalformedFrame("OPEN host is not valid UTF-8".into())
                })?;
                Ok(Frame::Open { host, port })
            }
            TAG_CLOSE => Ok(Frame::Close),
            other => Err(TunnelError::UnknownTag(other)),
        }
    }
}

/// Pairs an inner frame with the logical connection it belongs to.
/// Only the gateway-to-provider path carries envelopes; the client's
/// connection is 1:1 with one logical stream and needs no id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub client_id: u32,
    pub inner: Vec<u8>,
}

impl Envelope {
    pub fn new(client_id: u32, inner: Vec<u8>) -> Self {
        Self { client_id, inner }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + self.inner.len());
        buf.extend_from_slice(&self.client_id.to_be_bytes());
        buf.extend_from_slice(&(self.inner.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.inner);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Envelope> {
        let client_id = read_u32(buf, 0)?;
        let len = read_u32(buf, 4)? as usize;
        let inner = buf
            .get(8..8 + len)
            .ok_or_else(|| malformed("envelope", buf.len(), 8 + len))?;
        Ok(Envelope {
            client_id,
            inner: inner.to_vec(),
        })
    }
}

fn read_u32(buf: &[u8], offset: usize) -> Result<u32> {
    let bytes = buf
        .get(offset..offset + 4)
        .ok_or_else(|| malformed("header", buf.len(), offset + 4))?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn malformed(what: &str, got: usize, need: usize) -> TunnelError {
    TunnelError::MalformedFrame(format!("{what} truncated: {got} bytes, need {need}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_round_trip() {
        let payload = b"GET / HTTP/1.0\r\n\r\n".to_vec();
        let frame = Frame::Data(payload.clone());
        assert_eq!(Frame::decode(&frame.encode()).unwrap(), frame);
    }

    #[test]
    fn empty_data_round_trip() {
        let frame = Frame::Data(Vec::new());
        let encoded = frame.encode();
        assert_eq!(encoded.len(), 5);
        assert_eq!(Frame::decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn open_round_trip() {
        let frame = Frame::Open {
            host: "example.com".into(),
            port: 80,
        };
        assert_eq!(Frame::decode(&frame.encode()).unwrap(), frame);
    }

    #[test]
    fn open_wire_layout() {
        let encoded = Frame::Open {
            host: "ab".into(),
            port: 443,
        }
        .encode();
        assert_eq!(&encoded[..2], &[TAG_OPEN, 0x00]);
        assert_eq!(&encoded[2..6], &443u32.to_be_bytes());
        assert_eq!(&encoded[6..10], &2u32.to_be_bytes());
        assert_eq!(&encoded[10..], b"ab");
    }

    #[test]
    fn close_is_single_byte() {
        let encoded = Frame::Close.encode();
        assert_eq!(encoded, vec![TAG_CLOSE]);
        assert_eq!(Frame::decode(&encoded).unwrap(), Frame::Close);
    }

    #[test]
    fn truncated_data_is_malformed() {
        let mut encoded = Frame::Data(vec![1, 2, 3, 4]).encode();
        encoded.truncate(7);
        assert!(matches!(
            Frame::decode(&encoded),
            Err(TunnelError::MalformedFrame(_))
        ));
    }

    #[test]
    fn empty_buffer_is_malformed() {
        assert!(matches!(
            Frame::decode(&[]),
            Err(TunnelError::MalformedFrame(_))
        ));
    }

    #[test]
    fn unknown_tag_is_distinguished() {
        assert!(matches!(
            Frame::decode(&[0x7f, 0, 0]),
            Err(TunnelError::UnknownTag(0x7f))
        ));
    }

    #[test]
    fn open_port_out_of_range_is_malformed() {
        let mut encoded = Frame::Open {
            host: "h".into(),
            port: 1,
        }
        .encode();
        encoded[2..6].copy_from_slice(&70_000u32.to_be_bytes());
        assert!(matches!(
            Frame::decode(&encoded),
            Err(TunnelError::MalformedFrame(_))
        ));
    }

    #[test]
    fn envelope_round_trip_boundary_ids() {
        for id in [0u32, 1, 0x7fff_ffff, u32::MAX] {
            let envelope = Envelope::new(id, Frame::Close.encode());
            assert_eq!(Envelope::decode(&envelope.encode()).unwrap(), envelope);
        }
    }

    #[test]
    fn envelope_large_inner() {
        let envelope = Envelope::new(42, Frame::Data(vec![0xAB; 256 * 1024]).encode());
        let decoded = Envelope::decode(&envelope.encode()).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn envelope_truncated_is_malformed() {
        let mut encoded = Envelope::new(7, vec![1, 2, 3]).encode();
        encoded.pop();
        assert!(matches!(
            Envelope::decode(&encoded),
            Err(TunnelError::MalformedFrame(_))
        ));
    }
}
