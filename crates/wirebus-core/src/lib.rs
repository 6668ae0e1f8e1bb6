//! wirebus core
//!
//! Foundation of the wirebus networking runtime. This crate is transport-free
//! and holds the pieces every peer shares:
//!
//! - [`pipe`] / [`queue`]: the unbounded FIFO and the single-consumer event
//!   queue that serializes all application callbacks.
//! - [`meta`] / [`codec`]: the process-wide message registry binding ids,
//!   full names and types to codecs, and the binary/json codec set.
//! - [`packet`]: Length-Type-Value framing over byte streams.
//! - [`sysmsg`]: session lifecycle messages delivered through the normal
//!   message pipeline.
//! - [`timer`]: queue-targeted one-shot timers and tick loops.
//! - [`addr`]: `scheme://host:minPort~maxPort/path` parsing and port probing.
//! - [`msglog`]: the per-message traffic-log gate.
//! - [`error`]: the error taxonomy shared by the whole workspace.
//!
//! The runtime crate (`wirebus-runtime`) builds sessions, peers and
//! processors on top of these.

pub mod addr;
pub mod codec;
pub mod error;
pub mod meta;
pub mod msglog;
pub mod packet;
pub mod pipe;
pub mod queue;
pub mod sysmsg;
pub mod timer;

pub use addr::{detect_port, parse_address, Address};
pub use codec::{decode_message, encode_message, CodecKind};
pub use error::{
    AddressError, CodecError, FramingError, PeerError, RegistryError, Result, RpcError,
    TransportError, WirebusError,
};
pub use meta::{
    message_full_name, message_id, message_size, message_to_string, message_type_name,
    meta_by_full_name, meta_by_id, meta_by_msg, meta_by_type, register_message, string_hash,
    visit_metas, Message, MessageBox, MessageMeta,
};
pub use msglog::{
    block_message_log, is_msg_log_valid, msg_log_mode, remove_blocked_message, set_msg_log_mode,
    set_msg_log_rule, write_recv_logger, write_send_logger, MsgLogMode, MsgLogRule,
};
pub use packet::{frame_ltv, read_ltv_packet, write_ltv_packet, RawPacket};
pub use pipe::Pipe;
pub use queue::{queued_call, EventQueue, PanicNotifyFn};
pub use sysmsg::{
    register_system_messages, CloseReason, SessionAccepted, SessionCloseNotify, SessionClosed,
    SessionConnectError, SessionConnected, SessionInit,
};
pub use timer::{after, TickLoop, TimerHandle};
