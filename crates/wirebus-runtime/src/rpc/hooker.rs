//! Inbound/outbound resolution of the RPC envelopes.

use std::any::Any;

use tracing::{debug, error};

use wirebus_core::codec::{decode_message, encode_message};
use wirebus_core::meta::{message_size, message_to_string, message_type_name, MessageBox};
use wirebus_core::msglog::is_msg_log_valid;

use crate::event::Event;
use crate::proc::bundle::EventHooker;
use crate::rpc::request::take_request;
use crate::rpc::{RemoteCallAck, RemoteCallReq};
use crate::session::SessionRef;

// ----------------------------------------------------------------------------
// RPC Receive Event
// ----------------------------------------------------------------------------

/// Inbound event produced for a decoded RPC request. `reply` routes the
/// answer back under the request's call id.
pub struct RpcRecvMsgEvent {
    ses: SessionRef,
    msg: MessageBox,
    call_id: i64,
}

impl RpcRecvMsgEvent {
    pub fn call_id(&self) -> i64 {
        self.call_id
    }

    /// Encodes `msg` and sends it as the response to this request.
    pub fn reply(&self, msg: &(dyn Any + Send + Sync)) {
        self.responder().reply(msg);
    }

    /// A detachable reply handle, for answering after the event is gone.
    pub fn responder(&self) -> RpcResponder {
        RpcResponder {
            ses: self.ses.clone(),
            call_id: self.call_id,
        }
    }
}

impl Event for RpcRecvMsgEvent {
    fn session(&self) -> &SessionRef {
        &self.ses
    }

    fn message(&self) -> &(dyn Any + Send + Sync) {
        self.msg.as_ref()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_message(self: Box<Self>) -> MessageBox {
        self.msg
    }
}

/// Answers one RPC request; cheap to clone out of the event.
#[derive(Clone)]
pub struct RpcResponder {
    ses: SessionRef,
    call_id: i64,
}

impl RpcResponder {
    pub fn reply(&self, msg: &(dyn Any + Send + Sync)) {
        let (data, meta) = match encode_message(msg) {
            Ok(encoded) => encoded,
            Err(err) => {
                error!("rpc reply message encode error: {}", err);
                return;
            }
        };

        self.ses.send(Box::new(RemoteCallAck {
            msg_id: meta.id(),
            data,
            call_id: self.call_id,
        }));
    }
}

// ----------------------------------------------------------------------------
// Hooker
// ----------------------------------------------------------------------------

/// Resolves RPC envelopes in the hooker chain.
///
/// Inbound requests become [`RpcRecvMsgEvent`]s carrying the call id;
/// inbound responses pop the matching pending request and are consumed
/// (unmatched call ids drop silently). Outbound envelopes are logged here
/// and pass through to the transmitter.
pub struct RpcHooker;

impl EventHooker for RpcHooker {
    fn on_inbound(&self, ev: Box<dyn Event>) -> Option<Box<dyn Event>> {
        if let Some(req) = ev.message().downcast_ref::<RemoteCallReq>() {
            let (msg, meta) = match decode_message(req.msg_id, &req.data) {
                Ok(decoded) => decoded,
                Err(err) => {
                    error!("rpc request decode failed: {}", err);
                    return None;
                }
            };

            if is_msg_log_valid(meta.id()) {
                let ses = ev.session();
                debug!(
                    "#rpc.recv({})@{} len: {} {} | {}",
                    ses.core().name(),
                    ses.id(),
                    message_size(msg.as_ref()),
                    message_type_name(msg.as_ref()),
                    message_to_string(msg.as_ref())
                );
            }

            return Some(Box::new(RpcRecvMsgEvent {
                ses: ev.session().clone(),
                msg,
                call_id: req.call_id,
            }));
        }

        if let Some(ack) = ev.message().downcast_ref::<RemoteCallAck>() {
            match decode_message(ack.msg_id, &ack.data) {
                Ok((msg, meta)) => {
                    if is_msg_log_valid(meta.id()) {
                        let ses = ev.session();
                        debug!(
                            "#rpc.recv({})@{} len: {} {} | {}",
                            ses.core().name(),
                            ses.id(),
                            message_size(msg.as_ref()),
                            message_type_name(msg.as_ref()),
                            message_to_string(msg.as_ref())
                        );
                    }

                    // no match: the call already timed out; drop silently
                    if let Some(request) = take_request(ack.call_id) {
                        (request.on_recv)(Ok(msg));
                    }
                }
                Err(err) => {
                    error!("rpc response decode failed: {}", err);
                }
            }

            // responses are consumed by the rpc layer
            return None;
        }

        Some(ev)
    }

    fn on_outbound(&self, ev: Box<dyn Event>) -> Option<Box<dyn Event>> {
        let envelope = ev
            .message()
            .downcast_ref::<RemoteCallReq>()
            .map(|req| (req.msg_id, &req.data))
            .or_else(|| {
                ev.message()
                    .downcast_ref::<RemoteCallAck>()
                    .map(|ack| (ack.msg_id, &ack.data))
            });

        if let Some((msg_id, data)) = envelope {
            if is_msg_log_valid(msg_id) {
                if let Ok((msg, _)) = decode_message(msg_id, data) {
                    let ses = ev.session();
                    debug!(
                        "#rpc.send({})@{} len: {} {} | {}",
                        ses.core().name(),
                        ses.id(),
                        message_size(msg.as_ref()),
                        message_type_name(msg.as_ref()),
                        message_to_string(msg.as_ref())
                    );
                }
            }
        }

        Some(ev)
    }
}
