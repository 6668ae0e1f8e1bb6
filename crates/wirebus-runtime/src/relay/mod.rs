//! Transparent forwarding envelope with passthrough fields.
//!
//! [`relay`] packs one application message (encoded through the registry)
//! together with a [`Passthrough`] bundle — an i64, an i64 slice, a string
//! and a byte slice, any subset set — into a [`RelayAck`] and sends it.
//! The receiving side sees a [`RelayRecvMsgEvent`] exposing the inner
//! message and the passthrough accessors; `reply` re-packs the same
//! passthrough fields onto the answer. A process-wide broadcaster, when
//! registered, consumes relay events on the session's queue instead of the
//! peer callback.

use std::any::Any;
use std::sync::{Arc, Once, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use wirebus_core::codec::{decode_message, encode_message, CodecKind};
use wirebus_core::error::Result;
use wirebus_core::meta::{
    message_size, message_to_string, message_type_name, register_message, string_hash, MessageBox,
};
use wirebus_core::msglog::is_msg_log_valid;

use crate::event::{session_queued_call, Event};
use crate::proc::bundle::EventHooker;
use crate::session::{SessionRef, SessionSource};

/// Relay envelope. Zero/empty fields are "unset".
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayAck {
    pub msg_id: u32,
    pub msg: Vec<u8>,
    pub int64: i64,
    pub int64_slice: Vec<i64>,
    pub str: String,
    pub bytes: Vec<u8>,
}

/// Passthrough fields carried beside the relayed message.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Passthrough {
    pub int64: i64,
    pub int64_slice: Vec<i64>,
    pub str: String,
    pub bytes: Vec<u8>,
}

impl Passthrough {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_i64(mut self, v: i64) -> Self {
        self.int64 = v;
        self
    }

    pub fn with_i64_slice(mut self, v: Vec<i64>) -> Self {
        self.int64_slice = v;
        self
    }

    pub fn with_str(mut self, v: &str) -> Self {
        self.str = v.to_string();
        self
    }

    pub fn with_bytes(mut self, v: Vec<u8>) -> Self {
        self.bytes = v;
        self
    }
}

/// Registers the relay envelope with the binary codec. Idempotent; invoked
/// by the runtime bootstrap.
pub fn register_relay_messages() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        register_message::<RelayAck>(
            "wirebus.RelayAck",
            string_hash("wirebus.RelayAck") as u32,
            CodecKind::Binary,
        );
    });
}

/// Sends `msg` (at most one message per call) plus `passthrough` to the
/// target session as a relay envelope.
pub fn relay(
    target: &dyn SessionSource,
    msg: Option<&(dyn Any + Send + Sync)>,
    passthrough: Passthrough,
) -> Result<()> {
    let ses = target.rpc_session()?;

    let mut ack = RelayAck {
        int64: passthrough.int64,
        int64_slice: passthrough.int64_slice,
        str: passthrough.str,
        bytes: passthrough.bytes,
        ..RelayAck::default()
    };

    if let Some(msg) = msg {
        let (data, meta) = encode_message(msg)?;
        ack.msg = data;
        ack.msg_id = meta.id();
    }

    ses.send(Box::new(ack));
    Ok(())
}

// ----------------------------------------------------------------------------
// Relay Receive Event
// ----------------------------------------------------------------------------

/// Inbound event for a decoded relay envelope.
pub struct RelayRecvMsgEvent {
    ses: SessionRef,
    ack: RelayAck,
    msg: MessageBox,
}

impl RelayRecvMsgEvent {
    pub fn pass_through_as_i64(&self) -> i64 {
        self.ack.int64
    }

    pub fn pass_through_as_i64_slice(&self) -> &[i64] {
        &self.ack.int64_slice
    }

    pub fn pass_through_as_str(&self) -> &str {
        &self.ack.str
    }

    pub fn pass_through_as_bytes(&self) -> &[u8] {
        &self.ack.bytes
    }

    /// Sends `msg` back to the originating session, carrying the same
    /// passthrough fields.
    pub fn reply(&self, msg: &(dyn Any + Send + Sync)) -> Result<()> {
        relay(
            &self.ses,
            Some(msg),
            Passthrough {
                int64: self.ack.int64,
                int64_slice: self.ack.int64_slice.clone(),
                str: self.ack.str.clone(),
                bytes: self.ack.bytes.clone(),
            },
        )
    }
}

impl Event for RelayRecvMsgEvent {
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

// ----------------------------------------------------------------------------
// Broadcaster
// ----------------------------------------------------------------------------

type BroadcasterFn = Arc<dyn Fn(&RelayRecvMsgEvent) + Send + Sync>;

static BROADCASTER: RwLock<Option<BroadcasterFn>> = RwLock::new(None);

/// Registers the process-wide relay consumer. It is invoked on the
/// receiving session's queue for every inbound relay event, which then
/// bypasses the peer callback.
pub fn set_broadcaster(callback: impl Fn(&RelayRecvMsgEvent) + Send + Sync + 'static) {
    *BROADCASTER.write().unwrap() = Some(Arc::new(callback));
}

fn broadcaster() -> Option<BroadcasterFn> {
    BROADCASTER.read().unwrap().clone()
}

// ----------------------------------------------------------------------------
// Hooker
// ----------------------------------------------------------------------------

/// Resolves relay envelopes in the hooker chain.
pub struct RelayHooker;

impl EventHooker for RelayHooker {
    fn on_inbound(&self, ev: Box<dyn Event>) -> Option<Box<dyn Event>> {
        let ack = match ev.message().downcast_ref::<RelayAck>() {
            Some(ack) => ack.clone(),
            None => return Some(ev),
        };

        let msg: MessageBox = if ack.msg_id != 0 {
            match decode_message(ack.msg_id, &ack.msg) {
                Ok((msg, _)) => msg,
                Err(err) => {
                    tracing::error!("relay message decode failed: {}", err);
                    return None;
                }
            }
        } else {
            Box::new(())
        };

        if is_msg_log_valid(ack.msg_id) {
            let ses = ev.session();
            debug!(
                "#relay.recv({})@{} len: {} {} {{{:?}}} | {}",
                ses.core().name(),
                ses.id(),
                message_size(msg.as_ref()),
                message_type_name(msg.as_ref()),
                ack,
                message_to_string(msg.as_ref())
            );
        }

        let relay_ev = RelayRecvMsgEvent {
            ses: ev.session().clone(),
            ack,
            msg,
        };

        // a registered broadcaster consumes relay traffic on the session's
        // queue; otherwise the event continues to the peer callback
        if let Some(bc) = broadcaster() {
            let ses = relay_ev.ses.clone();
            session_queued_call(&ses, move || bc(&relay_ev));
            return None;
        }

        Some(Box::new(relay_ev))
    }

    fn on_outbound(&self, ev: Box<dyn Event>) -> Option<Box<dyn Event>> {
        if let Some(ack) = ev.message().downcast_ref::<RelayAck>() {
            if is_msg_log_valid(ack.msg_id) {
                let payload: Option<MessageBox> = if ack.msg_id != 0 {
                    decode_message(ack.msg_id, &ack.msg).ok().map(|(m, _)| m)
                } else {
                    None
                };

                let ses = ev.session();
                match payload {
                    Some(msg) => debug!(
                        "#relay.send({})@{} len: {} {} {{{:?}}} | {}",
                        ses.core().name(),
                        ses.id(),
                        message_size(msg.as_ref()),
                        message_type_name(msg.as_ref()),
                        ack,
                        message_to_string(msg.as_ref())
                    ),
                    None => debug!(
                        "#relay.send({})@{} {{{:?}}}",
                        ses.core().name(),
                        ses.id(),
                        ack
                    ),
                }
            }
        }

        Some(ev)
    }
}
