//! wirebus runtime
//!
//! Sessions, peers, processors, RPC and relay on top of `wirebus-core`.
//!
//! The programming model: a peer (acceptor or connector) produces a stream
//! of typed events — session lifecycle and decoded application messages —
//! through a processor pipeline into a user callback, serialized onto one
//! event queue. Outbound messages take the same pipeline in reverse.
//!
//! ```no_run
//! use std::sync::Arc;
//! use wirebus_core::queue::EventQueue;
//! use wirebus_runtime::peer::new_generic_peer;
//! use wirebus_runtime::proc::bind_processor;
//! use wirebus_runtime::{Event, Peer};
//!
//! # async fn run() -> wirebus_core::error::Result<()> {
//! let queue = EventQueue::new();
//! queue.start_loop();
//!
//! let server = new_generic_peer("tcp.Acceptor", "server", "127.0.0.1:8801", Some(queue.clone()))?;
//! bind_processor(&server, "tcp.ltv", Arc::new(|ev| {
//!     // all events for this peer arrive here, on the queue's consumer
//!     let _ = ev.message();
//! }))?;
//! server.clone().start().await?;
//! # Ok(())
//! # }
//! ```

pub mod event;
pub mod peer;
pub mod proc;
pub mod relay;
pub mod rpc;
pub mod session;

use std::sync::Once;

pub use event::{session_queued_call, Event, EventCallback, RecvMsgEvent, SendMsgEvent};
pub use peer::{new_generic_peer, new_peer, Peer, PeerCore, PeerRef};
pub use proc::{bind_processor, MessageDispatcher, SyncReceiver};
pub use session::{Session, SessionManager, SessionRef, SessionSource};

/// Registers system messages, the RPC/relay envelopes, the built-in peer
/// creators and the built-in processors. Idempotent; [`new_peer`] and
/// [`bind_processor`] invoke it, so calling it by hand is only needed when
/// registering application messages before creating any peer.
pub fn bootstrap() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        wirebus_core::sysmsg::register_system_messages();
        rpc::register_rpc_messages();
        relay::register_relay_messages();
        peer::register_builtin_peers();
        proc::register_builtin_processors();
    });
}
