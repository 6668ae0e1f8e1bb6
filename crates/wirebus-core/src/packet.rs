//! Length-Type-Value framing over a byte stream.
//!
//! Wire layout (little-endian), shared by the TCP and KCP transports:
//!
//! ```text
//! +--------+--------+----------------+
//! | len:16 | id:16  | payload:len-2  |
//! +--------+--------+----------------+
//! ```
//!
//! `len` counts the id field plus the payload. The UDP and WebSocket
//! transports use variants of this layout and live with their processors.

use std::any::Any;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::{decode_message, encode_message};
use crate::error::{FramingError, Result};
use crate::meta::{meta_by_id, MessageBox};

/// Byte width of the `len` field.
pub const BODY_LEN_SIZE: usize = 2;
/// Byte width of the `id` field.
pub const MSG_ID_SIZE: usize = 2;

// ----------------------------------------------------------------------------
// RawPacket
// ----------------------------------------------------------------------------

/// A pre-encoded packet. Sending a `RawPacket` on a session bypasses the
/// codec and writes the carried bytes as-is under the carried id, which is
/// how gateways forward messages without re-encoding them.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPacket {
    pub msg_id: u32,
    pub msg_data: Vec<u8>,
}

impl RawPacket {
    pub fn new(msg_id: u32, msg_data: Vec<u8>) -> Self {
        Self { msg_id, msg_data }
    }

    /// Decodes the carried bytes through the registry. Returns `None` when
    /// the id is unregistered or the payload does not decode.
    pub fn message(&self) -> Option<MessageBox> {
        let meta = meta_by_id(self.msg_id)?;
        meta.decode(&self.msg_data).ok()
    }
}

// ----------------------------------------------------------------------------
// Stream Read / Write
// ----------------------------------------------------------------------------

/// Reads one LTV packet and decodes it through the registry.
///
/// When `max_packet_size` is nonzero, a length field of `max_packet_size` or
/// more fails with an over-size framing error. Short reads surface as
/// transport errors and end the session.
pub async fn read_ltv_packet<R>(reader: &mut R, max_packet_size: usize) -> Result<MessageBox>
where
    R: AsyncRead + Unpin,
{
    let mut size_buf = [0u8; BODY_LEN_SIZE];
    reader.read_exact(&mut size_buf).await?;

    let size = u16::from_le_bytes(size_buf) as usize;

    if max_packet_size > 0 && size >= max_packet_size {
        return Err(FramingError::OverSize {
            len: size,
            max: max_packet_size,
        }
        .into());
    }

    let mut body = vec![0u8; size];
    reader.read_exact(&mut body).await?;

    if body.len() < MSG_ID_SIZE {
        return Err(FramingError::ShortMsgId.into());
    }

    let msg_id = u16::from_le_bytes([body[0], body[1]]) as u32;
    let payload = &body[MSG_ID_SIZE..];

    let (msg, _) = decode_message(msg_id, payload)?;
    Ok(msg)
}

/// Encodes and frames a message, then writes header plus payload from one
/// buffer. A [`RawPacket`] value is written with its pre-encoded bytes;
/// anything else goes through the registry codec.
pub async fn write_ltv_packet<W>(writer: &mut W, msg: &(dyn Any + Send + Sync)) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let (msg_id, msg_data) = match msg.downcast_ref::<RawPacket>() {
        Some(raw) => (raw.msg_id, raw.msg_data.clone()),
        None => {
            let (data, meta) = encode_message(msg)?;
            (meta.id(), data)
        }
    };

    let pkt = frame_ltv(msg_id, &msg_data);

    // write_all retries short writes internally
    writer.write_all(&pkt).await?;
    writer.flush().await?;
    Ok(())
}

/// Builds the on-wire bytes for one LTV packet.
pub fn frame_ltv(msg_id: u32, msg_data: &[u8]) -> Vec<u8> {
    let body_len = (MSG_ID_SIZE + msg_data.len()) as u16;

    let mut pkt = Vec::with_capacity(BODY_LEN_SIZE + MSG_ID_SIZE + msg_data.len());
    pkt.extend_from_slice(&body_len.to_le_bytes());
    pkt.extend_from_slice(&(msg_id as u16).to_le_bytes());
    pkt.extend_from_slice(msg_data);
    pkt
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecKind;
    use crate::error::WirebusError;
    use crate::meta::register_message;
    use serde::{Deserialize, Serialize};
    use std::io::Cursor;

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct FrameProbe {
        msg: String,
        value: i32,
    }

    fn register_probe() -> &'static crate::meta::MessageMeta {
        static META: std::sync::LazyLock<&'static crate::meta::MessageMeta> =
            std::sync::LazyLock::new(|| {
                register_message::<FrameProbe>("packettest.FrameProbe", 0x6301, CodecKind::Json)
            });
        *META
    }

    #[tokio::test]
    async fn ltv_round_trip() {
        register_probe();

        let original = FrameProbe {
            msg: "hello".to_string(),
            value: 1234,
        };

        let mut wire = Cursor::new(Vec::new());
        write_ltv_packet(&mut wire, &original).await.unwrap();

        let mut reader = Cursor::new(wire.into_inner());
        let decoded = read_ltv_packet(&mut reader, 0).await.unwrap();
        assert_eq!(decoded.downcast_ref::<FrameProbe>().unwrap(), &original);
    }

    #[tokio::test]
    async fn header_layout_is_little_endian() {
        register_probe();

        let wire = frame_ltv(0x6301, b"xy");
        assert_eq!(wire.len(), 6);
        // len = id(2) + payload(2)
        assert_eq!(u16::from_le_bytes([wire[0], wire[1]]), 4);
        assert_eq!(u16::from_le_bytes([wire[2], wire[3]]), 0x6301);
        assert_eq!(&wire[4..], b"xy");
    }

    #[tokio::test]
    async fn oversize_packet_is_rejected() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&200u16.to_le_bytes());
        wire.extend_from_slice(&[0u8; 200]);

        let mut reader = Cursor::new(wire);
        let err = read_ltv_packet(&mut reader, 128).await.unwrap_err();
        assert!(matches!(
            err,
            WirebusError::Framing(FramingError::OverSize { len: 200, max: 128 })
        ));
    }

    #[tokio::test]
    async fn short_msg_id_is_rejected() {
        // len = 1: not enough bytes for the id field
        let wire = vec![1u8, 0, 0xaa];
        let mut reader = Cursor::new(wire);
        let err = read_ltv_packet(&mut reader, 0).await.unwrap_err();
        assert!(matches!(
            err,
            WirebusError::Framing(FramingError::ShortMsgId)
        ));
    }

    #[tokio::test]
    async fn truncated_stream_is_a_transport_error() {
        let wire = vec![10u8, 0, 1]; // promises 10 body bytes, delivers 1
        let mut reader = Cursor::new(wire);
        let err = read_ltv_packet(&mut reader, 0).await.unwrap_err();
        assert!(err.is_benign_transport());
    }

    #[tokio::test]
    async fn raw_packet_bypasses_the_codec() {
        register_probe();

        let inner = FrameProbe {
            msg: "fwd".to_string(),
            value: 9,
        };
        let (data, meta) = crate::codec::encode_message(&inner).unwrap();
        let raw = RawPacket::new(meta.id(), data);

        let mut wire = Cursor::new(Vec::new());
        write_ltv_packet(&mut wire, &raw).await.unwrap();

        let mut reader = Cursor::new(wire.into_inner());
        let decoded = read_ltv_packet(&mut reader, 0).await.unwrap();
        assert_eq!(decoded.downcast_ref::<FrameProbe>().unwrap(), &inner);

        // lazy decode from the raw packet itself
        let msg = raw.message().unwrap();
        assert_eq!(msg.downcast_ref::<FrameProbe>().unwrap(), &inner);
    }
}
