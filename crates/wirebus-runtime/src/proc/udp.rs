//! UDP LTV processor.
//!
//! Datagram layout: `u16 totalLen (LE) | u16 id (LE) | payload`, one message
//! per datagram. `totalLen` counts the whole datagram and must match its
//! actual size and fit the MTU; datagrams that fail either check are
//! dropped silently — UDP is best-effort by design.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;

use wirebus_core::codec::{decode_message, encode_message};
use wirebus_core::error::{FramingError, Result, TransportError};
use wirebus_core::meta::MessageBox;
use wirebus_core::packet::RawPacket;

use crate::peer::udp::UdpSession;
use crate::proc::bundle::MessageTransmitter;
use crate::proc::{new_queued_event_callback, register_processor, standard_hooker};
use crate::session::SessionRef;

/// Ethernet MTU minus IP and UDP headers.
pub const MTU: usize = 1472;

const LEN_SIZE: usize = 2;
const MSG_ID_SIZE: usize = 2;
const HEADER_SIZE: usize = LEN_SIZE + MSG_ID_SIZE;

/// Encodes and decodes single-datagram LTV packets on a [`UdpSession`].
pub struct UdpTransmitter;

#[async_trait]
impl MessageTransmitter for UdpTransmitter {
    async fn on_recv_message(&self, ses: &SessionRef) -> Result<MessageBox> {
        let udp_ses = ses
            .as_any()
            .downcast_ref::<UdpSession>()
            .ok_or_else(|| TransportError::Protocol("session is not a udp session".to_string()))?;

        let pkt = udp_ses.take_packet();

        if pkt.len() < LEN_SIZE {
            return Err(FramingError::ShortPacket.into());
        }

        let total_len = u16::from_le_bytes([pkt[0], pkt[1]]) as usize;

        // the length field must match the datagram and fit the MTU
        if total_len != pkt.len() || total_len > MTU {
            return Err(FramingError::LengthMismatch {
                field: total_len,
                actual: pkt.len(),
            }
            .into());
        }

        if pkt.len() < HEADER_SIZE {
            return Err(FramingError::ShortMsgId.into());
        }

        let msg_id = u16::from_le_bytes([pkt[2], pkt[3]]) as u32;
        let (msg, _) = decode_message(msg_id, &pkt[HEADER_SIZE..])?;
        Ok(msg)
    }

    async fn on_send_message(
        &self,
        ses: &SessionRef,
        msg: &(dyn Any + Send + Sync),
    ) -> Result<()> {
        let udp_ses = ses
            .as_any()
            .downcast_ref::<UdpSession>()
            .ok_or_else(|| TransportError::Protocol("session is not a udp session".to_string()))?;

        let (msg_id, msg_data) = match msg.downcast_ref::<RawPacket>() {
            Some(raw) => (raw.msg_id, raw.msg_data.clone()),
            None => {
                let (data, meta) = encode_message(msg)?;
                (meta.id(), data)
            }
        };

        let total_len = (HEADER_SIZE + msg_data.len()) as u16;

        let mut pkt = Vec::with_capacity(HEADER_SIZE + msg_data.len());
        pkt.extend_from_slice(&total_len.to_le_bytes());
        pkt.extend_from_slice(&(msg_id as u16).to_le_bytes());
        pkt.extend_from_slice(&msg_data);

        udp_ses.write_datagram(&pkt)
    }
}

pub(crate) fn register() {
    register_processor("udp.ltv", |peer, callback| {
        let bundle = peer.core().bundle();
        bundle.set_transmitter(Arc::new(UdpTransmitter));
        bundle.set_hooker(standard_hooker("udp"));
        bundle.set_callback(new_queued_event_callback(callback));
    });
}
