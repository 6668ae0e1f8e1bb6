//! Blocking event consumer for tests and small tools.
//!
//! Installs as a peer callback; every event lands on a channel that
//! [`SyncReceiver::recv`] and [`SyncReceiver::wait_message`] pull from.

use std::sync::Arc;

use tokio::sync::mpsc;

use wirebus_core::meta::{meta_by_full_name, meta_by_msg, MessageBox};

use crate::event::{Event, EventCallback};
use crate::peer::PeerRef;
use crate::proc::bind_processor;

pub struct SyncReceiver {
    tx: mpsc::UnboundedSender<Box<dyn Event>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Box<dyn Event>>>,
}

impl SyncReceiver {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
        })
    }

    /// The callback to hand to `bind_processor`.
    pub fn callback(self: &Arc<Self>) -> EventCallback {
        let tx = self.tx.clone();
        Arc::new(move |ev: Box<dyn Event>| {
            let _ = tx.send(ev);
        })
    }

    /// Waits for the next event.
    pub async fn recv(&self) -> Box<dyn Event> {
        self.rx
            .lock()
            .await
            .recv()
            .await
            .expect("sync receiver channel closed")
    }

    /// Drains events until one carries the named message type, returning
    /// its payload.
    pub async fn wait_message(&self, full_name: &str) -> MessageBox {
        let want = meta_by_full_name(full_name)
            .unwrap_or_else(|| panic!("unknown message name: {full_name}"));

        loop {
            let ev = self.recv().await;
            if let Some(meta) = meta_by_msg(ev.message()) {
                if meta.id() == want.id() {
                    return ev.into_message();
                }
            }
        }
    }
}

/// Creates a receiver and binds it as `peer`'s callback through the named
/// processor.
pub fn new_sync_receiver_bound(
    peer: &PeerRef,
    proc_name: &str,
) -> wirebus_core::error::Result<Arc<SyncReceiver>> {
    let receiver = SyncReceiver::new();
    bind_processor(peer, proc_name, receiver.callback())?;
    Ok(receiver)
}
