//! Processor bundle: transmitter + hooker chain + user callback.
//!
//! Every peer that takes part in the message pipeline carries one
//! [`ProcBundle`]. Inbound: transmitter decode → hooker chain → callback.
//! Outbound: hooker chain → transmitter encode. A missing hooker is a
//! pass-through; a missing transmitter fails reads with `transmitter unset`.

use std::any::Any;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::warn;

use wirebus_core::error::{Result, TransportError};
use wirebus_core::meta::MessageBox;

use crate::event::{session_queued_call, Event, EventCallback};
use crate::session::{Session, SessionRef};

/// The read/write stage converting between wire bytes and message values.
#[async_trait]
pub trait MessageTransmitter: Send + Sync {
    /// Reads and decodes one message from the session's transport.
    async fn on_recv_message(&self, ses: &SessionRef) -> Result<MessageBox>;

    /// Encodes and writes one message to the session's transport.
    async fn on_send_message(&self, ses: &SessionRef, msg: &(dyn Any + Send + Sync))
        -> Result<()>;
}

/// A pre/post filter that may inspect, transform or cancel an event.
/// Returning `None` halts processing for that direction.
pub trait EventHooker: Send + Sync {
    fn on_inbound(&self, ev: Box<dyn Event>) -> Option<Box<dyn Event>>;
    fn on_outbound(&self, ev: Box<dyn Event>) -> Option<Box<dyn Event>>;
}

/// Composes hookers front-to-back in both directions.
pub struct MultiHooker {
    hookers: Vec<Arc<dyn EventHooker>>,
}

impl MultiHooker {
    pub fn new(hookers: Vec<Arc<dyn EventHooker>>) -> Self {
        Self { hookers }
    }
}

impl EventHooker for MultiHooker {
    fn on_inbound(&self, mut ev: Box<dyn Event>) -> Option<Box<dyn Event>> {
        for hooker in &self.hookers {
            ev = hooker.on_inbound(ev)?;
        }
        Some(ev)
    }

    fn on_outbound(&self, mut ev: Box<dyn Event>) -> Option<Box<dyn Event>> {
        for hooker in &self.hookers {
            ev = hooker.on_outbound(ev)?;
        }
        Some(ev)
    }
}

// ----------------------------------------------------------------------------
// ProcBundle
// ----------------------------------------------------------------------------

/// The processor composition attached to a peer.
pub struct ProcBundle {
    transmitter: RwLock<Option<Arc<dyn MessageTransmitter>>>,
    hooker: RwLock<Option<Arc<dyn EventHooker>>>,
    callback: RwLock<Option<EventCallback>>,
}

impl ProcBundle {
    pub fn new() -> Self {
        Self {
            transmitter: RwLock::new(None),
            hooker: RwLock::new(None),
            callback: RwLock::new(None),
        }
    }

    pub fn set_transmitter(&self, v: Arc<dyn MessageTransmitter>) {
        *self.transmitter.write().unwrap() = Some(v);
    }

    pub fn set_hooker(&self, v: Arc<dyn EventHooker>) {
        *self.hooker.write().unwrap() = Some(v);
    }

    pub fn set_callback(&self, v: EventCallback) {
        *self.callback.write().unwrap() = Some(v);
    }

    /// Reads one message through the transmitter.
    pub async fn read_message(&self, ses: &SessionRef) -> Result<MessageBox> {
        let transmitter = self.transmitter.read().unwrap().clone();
        match transmitter {
            Some(t) => t.on_recv_message(ses).await,
            None => Err(TransportError::TransmitterUnset.into()),
        }
    }

    /// Runs an outbound event through the hooker chain, then the
    /// transmitter. Send failures drop the message and log; they do not
    /// tear the session down.
    pub async fn send_message(&self, ev: Box<dyn Event>) {
        let hooker = self.hooker.read().unwrap().clone();
        let ev = match hooker {
            Some(h) => match h.on_outbound(ev) {
                Some(ev) => ev,
                None => return,
            },
            None => ev,
        };

        let transmitter = self.transmitter.read().unwrap().clone();
        if let Some(t) = transmitter {
            if let Err(err) = t.on_send_message(ev.session(), ev.message()).await {
                warn!(
                    "send failed on session {}: {}",
                    ev.session().id(),
                    err
                );
            }
        }
    }

    /// Runs an inbound event through the hooker chain, then the callback.
    pub fn proc_event(&self, ev: Box<dyn Event>) {
        let hooker = self.hooker.read().unwrap().clone();
        let ev = match hooker {
            Some(h) => match h.on_inbound(ev) {
                Some(ev) => ev,
                None => return,
            },
            None => ev,
        };

        let callback = self.callback.read().unwrap().clone();
        if let Some(cb) = callback {
            cb(ev);
        }
    }
}

impl Default for ProcBundle {
    fn default() -> Self {
        Self::new()
    }
}

/// Wraps a callback so invocation is posted onto the event's session's peer
/// queue. This is the serialization point that gives user logic
/// single-threaded semantics.
pub fn new_queued_event_callback(callback: EventCallback) -> EventCallback {
    Arc::new(move |ev: Box<dyn Event>| {
        let callback = callback.clone();
        let ses = ev.session().clone();
        session_queued_call(&ses, move || callback(ev));
    })
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::RecvMsgEvent;
    use crate::peer::PeerCore;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

    struct NullSession {
        id: AtomicI64,
        core: Arc<PeerCore>,
    }

    impl NullSession {
        fn new() -> SessionRef {
            Arc::new(Self {
                id: AtomicI64::new(1),
                core: PeerCore::new(),
            })
        }
    }

    impl Session for NullSession {
        fn id(&self) -> i64 {
            self.id.load(Ordering::SeqCst)
        }
        fn set_id(&self, id: i64) {
            self.id.store(id, Ordering::SeqCst);
        }
        fn core(&self) -> &Arc<PeerCore> {
            &self.core
        }
        fn send(&self, _msg: MessageBox) {}
        fn close(&self) {}
        fn remote_address(&self) -> Option<std::net::SocketAddr> {
            None
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    struct TagHooker {
        tag: i32,
        seen: Arc<std::sync::Mutex<Vec<i32>>>,
        swallow: bool,
    }

    impl EventHooker for TagHooker {
        fn on_inbound(&self, ev: Box<dyn Event>) -> Option<Box<dyn Event>> {
            self.seen.lock().unwrap().push(self.tag);
            if self.swallow {
                None
            } else {
                Some(ev)
            }
        }
        fn on_outbound(&self, ev: Box<dyn Event>) -> Option<Box<dyn Event>> {
            self.seen.lock().unwrap().push(-self.tag);
            Some(ev)
        }
    }

    #[tokio::test]
    async fn read_without_transmitter_fails() {
        let bundle = ProcBundle::new();
        let ses = NullSession::new();
        let err = bundle.read_message(&ses).await.unwrap_err();
        assert!(err.to_string().contains("transmitter unset"));
    }

    #[test]
    fn multi_hooker_runs_front_to_back_and_halts_on_none() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let bundle = ProcBundle::new();

        bundle.set_hooker(Arc::new(MultiHooker::new(vec![
            Arc::new(TagHooker {
                tag: 1,
                seen: seen.clone(),
                swallow: false,
            }),
            Arc::new(TagHooker {
                tag: 2,
                seen: seen.clone(),
                swallow: true,
            }),
            Arc::new(TagHooker {
                tag: 3,
                seen: seen.clone(),
                swallow: false,
            }),
        ])));

        let hits = Arc::new(AtomicUsize::new(0));
        {
            let hits = hits.clone();
            bundle.set_callback(Arc::new(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            }));
        }

        let ses = NullSession::new();
        bundle.proc_event(Box::new(RecvMsgEvent::new(ses, Box::new(42i32))));

        // the second hooker swallowed the event: the third never ran and the
        // callback never fired
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn null_hooker_is_a_pass_through() {
        let bundle = ProcBundle::new();

        let hits = Arc::new(AtomicUsize::new(0));
        {
            let hits = hits.clone();
            bundle.set_callback(Arc::new(move |ev| {
                assert_eq!(*ev.message().downcast_ref::<i32>().unwrap(), 7);
                hits.fetch_add(1, Ordering::SeqCst);
            }));
        }

        let ses = NullSession::new();
        bundle.proc_event(Box::new(RecvMsgEvent::new(ses, Box::new(7i32))));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
