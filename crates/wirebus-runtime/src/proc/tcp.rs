//! TCP LTV processor.
//!
//! [`LtvTransmitter`] is generic over the byte stream, so the KCP processor
//! reuses it verbatim; only the framing constants differ per transport and
//! those live in the shared packet module.

use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use wirebus_core::error::{Result, TransportError};
use wirebus_core::meta::MessageBox;

use crate::peer::stream::ByteStreamSession;
use crate::proc::bundle::MessageTransmitter;
use crate::proc::{new_queued_event_callback, register_processor, standard_hooker};
use crate::session::SessionRef;

/// Reads and writes LTV packets on a [`ByteStreamSession`], honouring the
/// peer's max packet size and read/write deadlines.
pub struct LtvTransmitter<S> {
    _stream: PhantomData<fn() -> S>,
}

impl<S> LtvTransmitter<S> {
    pub fn new() -> Self {
        Self {
            _stream: PhantomData,
        }
    }
}

impl<S> Default for LtvTransmitter<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<S> MessageTransmitter for LtvTransmitter<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    async fn on_recv_message(&self, ses: &SessionRef) -> Result<MessageBox> {
        let stream_ses = ses
            .as_any()
            .downcast_ref::<ByteStreamSession<S>>()
            .ok_or_else(|| {
                TransportError::Protocol("session is not a byte-stream session".to_string())
            })?;

        let options = ses.core().socket();
        let max_packet_size = options.max_packet_size();
        let read_timeout = options.read_timeout();

        if read_timeout.is_zero() {
            stream_ses.read_packet(max_packet_size).await
        } else {
            match tokio::time::timeout(read_timeout, stream_ses.read_packet(max_packet_size)).await
            {
                Ok(result) => result,
                Err(_) => Err(TransportError::ReadTimeout(read_timeout).into()),
            }
        }
    }

    async fn on_send_message(
        &self,
        ses: &SessionRef,
        msg: &(dyn Any + Send + Sync),
    ) -> Result<()> {
        let stream_ses = ses
            .as_any()
            .downcast_ref::<ByteStreamSession<S>>()
            .ok_or_else(|| {
                TransportError::Protocol("session is not a byte-stream session".to_string())
            })?;

        let write_timeout = ses.core().socket().write_timeout();

        if write_timeout.is_zero() {
            stream_ses.write_packet(msg).await
        } else {
            match tokio::time::timeout(write_timeout, stream_ses.write_packet(msg)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::WriteTimeout(write_timeout).into()),
            }
        }
    }
}

pub(crate) fn register() {
    register_processor("tcp.ltv", |peer, callback| {
        let bundle = peer.core().bundle();
        bundle.set_transmitter(Arc::new(LtvTransmitter::<TcpStream>::new()));
        bundle.set_hooker(standard_hooker("tcp"));
        bundle.set_callback(new_queued_event_callback(callback));
    });
}
