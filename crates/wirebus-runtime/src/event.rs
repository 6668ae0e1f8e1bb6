//! Events flowing through the processor pipeline.
//!
//! Inbound, a decoded message becomes a [`RecvMsgEvent`] that passes the
//! hooker chain and then the user callback; outbound, a queued message
//! becomes a [`SendMsgEvent`] on its way to the transmitter. Overlay layers
//! (RPC, relay) substitute their own event types carrying extra context;
//! user code recognizes them through [`Event::as_any`].

use std::any::Any;
use std::sync::Arc;

use wirebus_core::meta::MessageBox;
use wirebus_core::queue::queued_call;

use crate::session::SessionRef;

/// A network event: a session plus the message it carries.
pub trait Event: Send + Sync {
    fn session(&self) -> &SessionRef;

    fn message(&self) -> &(dyn Any + Send + Sync);

    /// Downcast support, so callbacks can recognize RPC/relay events.
    fn as_any(&self) -> &dyn Any;

    /// Consumes the event, yielding the carried message.
    fn into_message(self: Box<Self>) -> MessageBox;
}

/// The user-facing callback invoked for every inbound event.
pub type EventCallback = Arc<dyn Fn(Box<dyn Event>) + Send + Sync>;

// ----------------------------------------------------------------------------
// Basic Events
// ----------------------------------------------------------------------------

/// An inbound message event.
pub struct RecvMsgEvent {
    ses: SessionRef,
    msg: MessageBox,
}

impl RecvMsgEvent {
    pub fn new(ses: SessionRef, msg: MessageBox) -> Self {
        Self { ses, msg }
    }

    /// Sends a message back on the originating session.
    pub fn reply(&self, msg: MessageBox) {
        self.ses.send(msg);
    }

    pub fn send(&self, msg: MessageBox) {
        self.ses.send(msg);
    }
}

impl Event for RecvMsgEvent {
    fn session(&self) -> &SessionRef {
        &self.ses
    }

    fn message(&self) -> &(dyn Any + Send + Sync) {
        self.msg.as_ref()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_message(self: Box<Self>) -> MessageBox {
        self.msg
    }
}

/// An outbound message event, produced by the send loop.
pub struct SendMsgEvent {
    ses: SessionRef,
    msg: MessageBox,
}

impl SendMsgEvent {
    pub fn new(ses: SessionRef, msg: MessageBox) -> Self {
        Self { ses, msg }
    }
}

impl Event for SendMsgEvent {
    fn session(&self) -> &SessionRef {
        &self.ses
    }

    fn message(&self) -> &(dyn Any + Send + Sync) {
        self.msg.as_ref()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_message(self: Box<Self>) -> MessageBox {
        self.msg
    }
}

// ----------------------------------------------------------------------------
// Queue Routing
// ----------------------------------------------------------------------------

/// Runs `f` on the session's peer queue, or inline when the peer has none.
pub fn session_queued_call(ses: &SessionRef, f: impl FnOnce() + Send + 'static) {
    let queue = ses.core().queue();
    queued_call(queue.as_ref(), f);
}
