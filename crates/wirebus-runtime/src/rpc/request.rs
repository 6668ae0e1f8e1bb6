//! Pending-request table and the call-id routed request flows.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{LazyLock, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;

use wirebus_core::codec::encode_message;
use wirebus_core::error::{Result, RpcError};
use wirebus_core::meta::MessageBox;
use wirebus_core::timer;

use crate::event::session_queued_call;
use crate::rpc::RemoteCallReq;
use crate::session::SessionSource;

type FeedbackFn = Box<dyn FnOnce(Result<MessageBox>) + Send>;

pub(crate) struct Request {
    pub on_recv: FeedbackFn,
}

static CALL_ID_SEQ: AtomicI64 = AtomicI64::new(0);

static PENDING: LazyLock<Mutex<HashMap<i64, Request>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Allocates a call id and parks `on_recv` in the pending table.
fn create_request(on_recv: FeedbackFn) -> i64 {
    let id = CALL_ID_SEQ.fetch_add(1, Ordering::SeqCst) + 1;
    PENDING.lock().unwrap().insert(id, Request { on_recv });
    id
}

/// Removes and returns the pending request, if still present. The removal
/// is what guarantees at most one of response/timeout ever fires per call.
pub(crate) fn take_request(call_id: i64) -> Option<Request> {
    PENDING.lock().unwrap().remove(&call_id)
}

/// Asynchronous call: `callback` receives the decoded response, or
/// [`RpcError::Timeout`] after `timeout`, on the session's peer queue.
/// Target and encode failures surface through the callback immediately.
pub fn call(
    target: &dyn SessionSource,
    req_msg: &(dyn Any + Send + Sync),
    timeout: Duration,
    callback: impl FnOnce(Result<MessageBox>) + Send + 'static,
) {
    let ses = match target.rpc_session() {
        Ok(ses) => ses,
        Err(err) => {
            callback(Err(err));
            return;
        }
    };

    let (data, meta) = match encode_message(req_msg) {
        Ok(encoded) => encoded,
        Err(err) => {
            session_queued_call(&ses, move || callback(Err(err)));
            return;
        }
    };

    let queue_ses = ses.clone();
    let on_recv: FeedbackFn = Box::new(move |result| {
        session_queued_call(&queue_ses, move || callback(result));
    });

    // table update happens before the send: a response arriving early
    // always finds its entry
    let call_id = create_request(on_recv);

    ses.send(Box::new(RemoteCallReq {
        msg_id: meta.id(),
        data,
        call_id,
    }));

    timer::after(None, timeout, move || {
        if let Some(request) = take_request(call_id) {
            (request.on_recv)(Err(RpcError::Timeout.into()));
        }
    });
}

/// Synchronous call: awaits the decoded response or returns
/// [`RpcError::Timeout`] after `timeout`.
pub async fn call_sync(
    target: &dyn SessionSource,
    req_msg: &(dyn Any + Send + Sync),
    timeout: Duration,
) -> Result<MessageBox> {
    let ses = target.rpc_session()?;
    let (data, meta) = encode_message(req_msg)?;

    let (tx, rx) = oneshot::channel();
    let on_recv: FeedbackFn = Box::new(move |result| {
        let _ = tx.send(result);
    });

    let call_id = create_request(on_recv);

    ses.send(Box::new(RemoteCallReq {
        msg_id: meta.id(),
        data,
        call_id,
    }));

    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(result)) => result,
        // the pending entry was dropped without answering
        Ok(Err(_)) => Err(RpcError::Timeout.into()),
        Err(_) => {
            take_request(call_id);
            Err(RpcError::Timeout.into())
        }
    }
}
