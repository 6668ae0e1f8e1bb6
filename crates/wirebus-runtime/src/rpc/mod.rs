//! Request/response correlation over the message pipeline.
//!
//! Two flavours:
//!
//! - **Call-id routed** ([`call`], [`call_sync`]): the request rides in a
//!   [`RemoteCallReq`] envelope carrying a fresh 64-bit call id; the
//!   response comes back in a [`RemoteCallAck`] with the same id. The
//!   pending-request table is updated before the send, so a response can
//!   never race past its own registration.
//! - **Type routed** ([`call_type`]): the request goes out as a plain
//!   message and the first inbound message whose type matches the awaited
//!   ACK type resolves the call. No call id is carried, so concurrent calls
//!   awaiting the same ACK type cannot be told apart — a newer call
//!   replaces the older waiter, and the older call times out.
//!
//! Timeouts surface as [`RpcError::Timeout`]; per call id, exactly one of
//! the response or the timeout path fires.

mod hooker;
mod request;
mod typed;

use std::sync::Once;

use serde::{Deserialize, Serialize};

use wirebus_core::codec::CodecKind;
use wirebus_core::meta::{register_message, string_hash};

pub use hooker::{RpcHooker, RpcRecvMsgEvent, RpcResponder};
pub use request::{call, call_sync};
pub use typed::{call_type, TypeRpcHooker};

/// RPC request envelope.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCallReq {
    pub msg_id: u32,
    pub data: Vec<u8>,
    pub call_id: i64,
}

/// RPC response envelope.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCallAck {
    pub msg_id: u32,
    pub data: Vec<u8>,
    pub call_id: i64,
}

/// Registers the RPC envelopes with the binary codec. Idempotent; invoked
/// by the runtime bootstrap.
pub fn register_rpc_messages() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        register_message::<RemoteCallReq>(
            "wirebus.RemoteCallReq",
            string_hash("wirebus.RemoteCallReq") as u32,
            CodecKind::Binary,
        );
        register_message::<RemoteCallAck>(
            "wirebus.RemoteCallAck",
            string_hash("wirebus.RemoteCallAck") as u32,
            CodecKind::Binary,
        );
    });
}
