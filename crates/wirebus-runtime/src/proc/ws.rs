//! WebSocket LTV processor.
//!
//! One transmitter serves both sides of the upgrade: the acceptor's plain
//! streams and the connector's possibly-TLS streams are tried in turn.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;

use wirebus_core::error::{Result, TransportError};
use wirebus_core::meta::MessageBox;

use crate::peer::ws::{ClientWsStream, ServerWsStream, WsSession};
use crate::proc::bundle::MessageTransmitter;
use crate::proc::{new_queued_event_callback, register_processor, standard_hooker};
use crate::session::SessionRef;

/// Reads and writes binary `u16 id | payload` frames on a WebSocket
/// session.
pub struct WsTransmitter;

#[async_trait]
impl MessageTransmitter for WsTransmitter {
    async fn on_recv_message(&self, ses: &SessionRef) -> Result<MessageBox> {
        if let Some(server) = ses.as_any().downcast_ref::<WsSession<ServerWsStream>>() {
            return server.read_frame().await;
        }
        if let Some(client) = ses.as_any().downcast_ref::<WsSession<ClientWsStream>>() {
            return client.read_frame().await;
        }
        Err(TransportError::Protocol("session is not a websocket session".to_string()).into())
    }

    async fn on_send_message(
        &self,
        ses: &SessionRef,
        msg: &(dyn Any + Send + Sync),
    ) -> Result<()> {
        if let Some(server) = ses.as_any().downcast_ref::<WsSession<ServerWsStream>>() {
            return server.write_frame(msg).await;
        }
        if let Some(client) = ses.as_any().downcast_ref::<WsSession<ClientWsStream>>() {
            return client.write_frame(msg).await;
        }
        Err(TransportError::Protocol("session is not a websocket session".to_string()).into())
    }
}

pub(crate) fn register() {
    register_processor("ws.ltv", |peer, callback| {
        let bundle = peer.core().bundle();
        bundle.set_transmitter(Arc::new(WsTransmitter));
        bundle.set_hooker(standard_hooker("ws"));
        bundle.set_callback(new_queued_event_callback(callback));
    });
}
