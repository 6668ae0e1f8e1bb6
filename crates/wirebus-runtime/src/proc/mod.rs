//! Processors: the pipeline wiring per transport.
//!
//! A processor binds a transmitter (wire codec), the standard hooker chain
//! (RPC resolve → type-RPC resolve → relay resolve → message log) and the
//! queued user callback onto a peer's bundle. Processors are looked up by
//! name (`tcp.ltv`, `udp.ltv`, `kcp.ltv`, `ws.ltv`); a missing name fails
//! with a message pointing at the module providing it.

pub mod bundle;
pub mod dispatcher;
pub mod kcp;
pub mod sync_recv;
pub mod tcp;
pub mod udp;
pub mod ws;

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, RwLock};

use wirebus_core::error::{PeerError, Result};
use wirebus_core::msglog::{write_recv_logger, write_send_logger};

pub use bundle::{
    new_queued_event_callback, EventHooker, MessageTransmitter, MultiHooker, ProcBundle,
};
pub use dispatcher::{new_dispatcher_bound, MessageDispatcher};
pub use sync_recv::{new_sync_receiver_bound, SyncReceiver};

use crate::event::{Event, EventCallback};
use crate::peer::PeerRef;

// ----------------------------------------------------------------------------
// Processor Directory
// ----------------------------------------------------------------------------

type ProcessorBinder = fn(&PeerRef, EventCallback);

static PROCESSORS: LazyLock<RwLock<HashMap<&'static str, ProcessorBinder>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Registers a processor binder under its name. Duplicate names are a
/// bootstrap-time program bug.
pub fn register_processor(name: &'static str, binder: ProcessorBinder) {
    let mut procs = PROCESSORS.write().unwrap();
    if procs.contains_key(name) {
        panic!("duplicate processor: {name}");
    }
    procs.insert(name, binder);
}

/// Registered processor names, sorted.
pub fn processor_list() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = PROCESSORS.read().unwrap().keys().copied().collect();
    names.sort_unstable();
    names
}

fn module_hint_for_processor(name: &str) -> &'static str {
    match name.split('.').next().unwrap_or("") {
        "tcp" => "wirebus_runtime::proc::tcp",
        "udp" => "wirebus_runtime::proc::udp",
        "kcp" => "wirebus_runtime::proc::kcp",
        "ws" => "wirebus_runtime::proc::ws",
        _ => "a processor module registered via register_processor",
    }
}

/// Wires the named processor into `peer` with `callback` as the final user
/// stage.
pub fn bind_processor(peer: &PeerRef, proc_name: &str, callback: EventCallback) -> Result<()> {
    crate::bootstrap();

    let binder = {
        let procs = PROCESSORS.read().unwrap();
        procs.get(proc_name).copied()
    };

    match binder {
        Some(f) => {
            f(peer, callback);
            Ok(())
        }
        None => Err(PeerError::UnknownProcessor {
            name: proc_name.to_string(),
            hint: module_hint_for_processor(proc_name),
        }
        .into()),
    }
}

pub(crate) fn register_builtin_processors() {
    tcp::register();
    udp::register();
    kcp::register();
    ws::register();
}

/// The standard hooker chain shared by the stream transports.
pub(crate) fn standard_hooker(protocol: &'static str) -> Arc<dyn EventHooker> {
    Arc::new(MultiHooker::new(vec![
        Arc::new(crate::rpc::RpcHooker),
        Arc::new(crate::rpc::TypeRpcHooker),
        Arc::new(crate::relay::RelayHooker),
        Arc::new(MsgLogHooker::new(protocol)),
    ]))
}

// ----------------------------------------------------------------------------
// Message Log Hooker
// ----------------------------------------------------------------------------

/// Tail hooker writing gated traffic logs for plain messages. RPC and relay
/// envelopes are logged by their own resolvers with their own prefixes, so
/// they are skipped here.
pub struct MsgLogHooker {
    protocol: &'static str,
}

impl MsgLogHooker {
    pub fn new(protocol: &'static str) -> Self {
        Self { protocol }
    }

    fn is_overlay_message(msg: &(dyn std::any::Any + Send + Sync)) -> bool {
        msg.is::<crate::rpc::RemoteCallReq>()
            || msg.is::<crate::rpc::RemoteCallAck>()
            || msg.is::<crate::relay::RelayAck>()
    }

    fn is_overlay_event(ev: &dyn Event) -> bool {
        ev.as_any().is::<crate::rpc::RpcRecvMsgEvent>()
            || ev.as_any().is::<crate::relay::RelayRecvMsgEvent>()
    }
}

impl EventHooker for MsgLogHooker {
    fn on_inbound(&self, ev: Box<dyn Event>) -> Option<Box<dyn Event>> {
        if !Self::is_overlay_event(ev.as_ref()) && !Self::is_overlay_message(ev.message()) {
            let ses = ev.session();
            write_recv_logger(self.protocol, &ses.core().name(), ses.id(), ev.message());
        }
        Some(ev)
    }

    fn on_outbound(&self, ev: Box<dyn Event>) -> Option<Box<dyn Event>> {
        if !Self::is_overlay_message(ev.message()) {
            let ses = ev.session();
            write_send_logger(self.protocol, &ses.core().name(), ses.id(), ev.message());
        }
        Some(ev)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
