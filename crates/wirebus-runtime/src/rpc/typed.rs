//! Type-routed RPC.
//!
//! The request is a plain message; the response is whichever inbound
//! message first matches the awaited ACK type. Because no call id is
//! carried, concurrent in-flight calls awaiting the same ACK type on the
//! same process cannot be disambiguated: a newer call replaces the older
//! waiter and the older call fails with timeout. Callers needing
//! concurrency use the call-id routed API instead.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{LazyLock, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;

use wirebus_core::error::{CodecError, Result, RpcError};
use wirebus_core::meta::{meta_by_msg, MessageBox};

use crate::event::Event;
use crate::proc::bundle::EventHooker;
use crate::session::SessionSource;

static WAITERS: LazyLock<Mutex<HashMap<TypeId, oneshot::Sender<MessageBox>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Sends `req_msg` plainly and awaits the first inbound message of type
/// `Ack`, or [`RpcError::Timeout`].
pub async fn call_type<Ack: Any + Send + Sync>(
    target: &dyn SessionSource,
    req_msg: MessageBox,
    timeout: Duration,
) -> Result<Box<Ack>> {
    let ses = target.rpc_session()?;

    let (tx, rx) = oneshot::channel();
    // a newer call for the same ACK type replaces the older waiter; the
    // replaced sender drops and the older call resolves to timeout
    WAITERS.lock().unwrap().insert(TypeId::of::<Ack>(), tx);

    ses.send(req_msg);

    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(msg)) => msg.downcast::<Ack>().map_err(|_| {
            CodecError::TypeMismatch {
                expected: std::any::type_name::<Ack>(),
            }
            .into()
        }),
        Ok(Err(_)) => Err(RpcError::Timeout.into()),
        Err(_) => {
            WAITERS.lock().unwrap().remove(&TypeId::of::<Ack>());
            Err(RpcError::Timeout.into())
        }
    }
}

/// Routes inbound messages to type-routed waiters. The event always
/// continues down the chain; the waiter receives a codec-cloned copy.
pub struct TypeRpcHooker;

impl EventHooker for TypeRpcHooker {
    fn on_inbound(&self, ev: Box<dyn Event>) -> Option<Box<dyn Event>> {
        let type_id = ev.message().type_id();

        let waiter = WAITERS.lock().unwrap().remove(&type_id);
        if let Some(tx) = waiter {
            // duplicate the message through its codec so both the waiter
            // and the normal pipeline own one
            if let Some(meta) = meta_by_msg(ev.message()) {
                if let Ok(data) = meta.encode(ev.message()) {
                    if let Ok(copy) = meta.decode(&data) {
                        let _ = tx.send(copy);
                    }
                }
            }
        }

        Some(ev)
    }

    fn on_outbound(&self, ev: Box<dyn Event>) -> Option<Box<dyn Event>> {
        Some(ev)
    }
}
