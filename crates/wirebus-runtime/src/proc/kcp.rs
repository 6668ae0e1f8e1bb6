//! KCP LTV processor: the stream LTV transmitter over KCP streams.

use std::sync::Arc;

use tokio_kcp::KcpStream;

use crate::proc::tcp::LtvTransmitter;
use crate::proc::{new_queued_event_callback, register_processor, standard_hooker};

pub(crate) fn register() {
    register_processor("kcp.ltv", |peer, callback| {
        let bundle = peer.core().bundle();
        bundle.set_transmitter(Arc::new(LtvTransmitter::<KcpStream>::new()));
        bundle.set_hooker(standard_hooker("kcp"));
        bundle.set_callback(new_queued_event_callback(callback));
    });
}
