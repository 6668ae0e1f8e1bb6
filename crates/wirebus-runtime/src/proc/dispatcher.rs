//! Type-keyed message dispatcher.
//!
//! An optional final callback stage: handlers register per message full
//! name and inbound events fan out to every handler for the message's type,
//! in registration order. Unknown types are ignored silently.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use wirebus_core::error::{RegistryError, Result};
use wirebus_core::meta::meta_by_full_name;

use crate::event::{Event, EventCallback};
use crate::peer::PeerRef;
use crate::proc::bind_processor;

type HandlerFn = Arc<dyn Fn(&dyn Event) + Send + Sync>;

pub struct MessageDispatcher {
    handlers: RwLock<HashMap<TypeId, Vec<HandlerFn>>>,
}

impl MessageDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            handlers: RwLock::new(HashMap::new()),
        })
    }

    /// Appends a handler for the named message. The message must be
    /// registered first.
    pub fn register_message(
        &self,
        full_name: &str,
        handler: impl Fn(&dyn Event) + Send + Sync + 'static,
    ) -> Result<()> {
        let meta = meta_by_full_name(full_name).ok_or_else(|| RegistryError::UnknownName {
            full_name: full_name.to_string(),
        })?;

        self.handlers
            .write()
            .unwrap()
            .entry(meta.type_id())
            .or_default()
            .push(Arc::new(handler));
        Ok(())
    }

    /// Whether at least one handler exists for the named message.
    pub fn exists(&self, full_name: &str) -> bool {
        meta_by_full_name(full_name)
            .map(|meta| {
                self.handlers
                    .read()
                    .unwrap()
                    .get(&meta.type_id())
                    .map(|list| !list.is_empty())
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }

    /// Fans an event out to the handlers of its message type.
    pub fn on_event(&self, ev: &dyn Event) {
        let type_id = ev.message().type_id();

        let handlers = {
            let map = self.handlers.read().unwrap();
            map.get(&type_id).cloned()
        };

        if let Some(handlers) = handlers {
            for handler in &handlers {
                handler(ev);
            }
        }
    }

    /// This dispatcher as a bundle callback.
    pub fn callback(self: &Arc<Self>) -> EventCallback {
        let dispatcher = self.clone();
        Arc::new(move |ev: Box<dyn Event>| {
            dispatcher.on_event(ev.as_ref());
        })
    }
}

/// Creates a dispatcher and binds it as `peer`'s callback through the named
/// processor.
pub fn new_dispatcher_bound(peer: &PeerRef, proc_name: &str) -> Result<Arc<MessageDispatcher>> {
    let dispatcher = MessageDispatcher::new();
    bind_processor(peer, proc_name, dispatcher.callback())?;
    Ok(dispatcher)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::RecvMsgEvent;
    use crate::peer::PeerCore;
    use crate::session::{Session, SessionRef};
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicI64, Ordering};
    use wirebus_core::codec::CodecKind;
    use wirebus_core::meta::{register_message, MessageBox};

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct DispatchProbe {
        value: i32,
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct UnhandledProbe;

    struct NullSession {
        id: AtomicI64,
        core: Arc<PeerCore>,
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

    fn null_session() -> SessionRef {
        Arc::new(NullSession {
            id: AtomicI64::new(1),
            core: PeerCore::new(),
        })
    }

    #[test]
    fn dispatches_in_registration_order_and_ignores_unknown() {
        register_message::<DispatchProbe>("disptest.DispatchProbe", 0x6501, CodecKind::Json);
        register_message::<UnhandledProbe>("disptest.UnhandledProbe", 0x6502, CodecKind::Json);

        let dispatcher = MessageDispatcher::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        for tag in [1, 2] {
            let order = order.clone();
            dispatcher
                .register_message("disptest.DispatchProbe", move |ev| {
                    let msg = ev.message().downcast_ref::<DispatchProbe>().unwrap();
                    order.lock().unwrap().push((tag, msg.value));
                })
                .unwrap();
        }

        assert!(dispatcher.exists("disptest.DispatchProbe"));
        assert!(!dispatcher.exists("disptest.UnhandledProbe"));
        assert!(dispatcher.register_message("disptest.Missing", |_| {}).is_err());

        let ev = RecvMsgEvent::new(null_session(), Box::new(DispatchProbe { value: 9 }));
        dispatcher.on_event(&ev);
        assert_eq!(*order.lock().unwrap(), vec![(1, 9), (2, 9)]);

        // unknown message type: silently ignored
        let ev = RecvMsgEvent::new(null_session(), Box::new(UnhandledProbe));
        dispatcher.on_event(&ev);
        assert_eq!(order.lock().unwrap().len(), 2);
    }
}
