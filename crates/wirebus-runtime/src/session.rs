//! Session trait and session manager.
//!
//! A session is one connection's lifetime and the unit of message ordering.
//! Concrete session types live with their transports; everything above the
//! transport handles sessions through [`SessionRef`].

use std::any::Any;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

use wirebus_core::error::{Result, RpcError};
use wirebus_core::meta::MessageBox;

use crate::peer::PeerCore;

/// Shared handle to a live session.
pub type SessionRef = Arc<dyn Session>;

/// One connection. Sending is asynchronous: messages are queued onto the
/// session's send pipe and transmitted in FIFO order by its send loop.
pub trait Session: Send + Sync {
    /// Unique id assigned by the owning peer's [`SessionManager`] before any
    /// loop observes the session.
    fn id(&self) -> i64;

    /// Called by the manager during [`SessionManager::add`].
    fn set_id(&self, id: i64);

    /// The owning peer's shared core (queue, bundle, manager, options).
    fn core(&self) -> &Arc<PeerCore>;

    /// Queues a message for transmission. A no-op once the session is
    /// closing.
    fn send(&self, msg: MessageBox);

    /// Begins teardown. Idempotent: repeated calls produce one SessionClosed.
    fn close(&self);

    /// Remote endpoint, when the transport knows one.
    fn remote_address(&self) -> Option<SocketAddr>;

    /// Downcast support for transmitters and user code.
    fn as_any(&self) -> &dyn Any;
}

/// Anything RPC or relay can resolve a target session from: a session itself
/// or a connector peer holding one.
pub trait SessionSource: Send + Sync {
    fn rpc_session(&self) -> Result<SessionRef>;
}

impl SessionSource for SessionRef {
    fn rpc_session(&self) -> Result<SessionRef> {
        Ok(self.clone())
    }
}

impl SessionSource for crate::peer::PeerRef {
    fn rpc_session(&self) -> Result<SessionRef> {
        self.session().ok_or_else(|| RpcError::EmptySession.into())
    }
}

// ----------------------------------------------------------------------------
// Session Manager
// ----------------------------------------------------------------------------

/// Id allocation and lookup for the sessions of one peer.
pub struct SessionManager {
    by_id: RwLock<HashMap<i64, SessionRef>>,
    id_gen: AtomicI64,
    count: AtomicI64,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            by_id: RwLock::new(HashMap::new()),
            id_gen: AtomicI64::new(0),
            count: AtomicI64::new(0),
        }
    }

    /// Sets the number ids start counting from.
    pub fn set_id_base(&self, base: i64) {
        self.id_gen.store(base, Ordering::SeqCst);
    }

    /// Allocates the next id, writes it into the session, and registers it.
    /// The id is visible before anything else can observe the session.
    pub fn add(&self, ses: &SessionRef) -> i64 {
        let id = self.id_gen.fetch_add(1, Ordering::SeqCst) + 1;
        ses.set_id(id);

        self.by_id.write().unwrap().insert(id, ses.clone());
        self.count.fetch_add(1, Ordering::SeqCst);
        id
    }

    pub fn remove(&self, id: i64) {
        if self.by_id.write().unwrap().remove(&id).is_some() {
            self.count.fetch_sub(1, Ordering::SeqCst);
        }
    }

    pub fn get(&self, id: i64) -> Option<SessionRef> {
        self.by_id.read().unwrap().get(&id).cloned()
    }

    /// Visits every session; stops early when the callback returns false.
    pub fn visit(&self, mut callback: impl FnMut(&SessionRef) -> bool) {
        let sessions: Vec<SessionRef> = self.by_id.read().unwrap().values().cloned().collect();
        for ses in &sessions {
            if !callback(ses) {
                break;
            }
        }
    }

    /// Closes every session. Close is idempotent and asynchronous, so this
    /// is safe to run concurrently with sessions removing themselves.
    pub fn close_all(&self) {
        self.visit(|ses| {
            ses.close();
            true
        });
    }

    /// Number of live sessions.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst).max(0) as usize
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct FakeSession {
        id: AtomicI64,
        core: Arc<PeerCore>,
        closed: AtomicUsize,
    }

    impl FakeSession {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                id: AtomicI64::new(0),
                core: PeerCore::new(),
                closed: AtomicUsize::new(0),
            })
        }
    }

    impl Session for FakeSession {
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
        fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
        fn remote_address(&self) -> Option<SocketAddr> {
            None
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn ids_are_assigned_before_visibility() {
        let mgr = SessionManager::new();

        let a = FakeSession::new();
        let b = FakeSession::new();
        let a_ref: SessionRef = a.clone();
        let b_ref: SessionRef = b.clone();

        let id_a = mgr.add(&a_ref);
        let id_b = mgr.add(&b_ref);

        assert_eq!(id_a, 1);
        assert_eq!(id_b, 2);
        assert_eq!(a.id(), 1);
        assert_eq!(mgr.count(), 2);
        assert!(Arc::ptr_eq(
            &mgr.get(1).unwrap(),
            &(a.clone() as SessionRef)
        ));

        mgr.remove(1);
        assert!(mgr.get(1).is_none());
        assert_eq!(mgr.count(), 1);

        // removing twice does not corrupt the count
        mgr.remove(1);
        assert_eq!(mgr.count(), 1);
    }

    #[test]
    fn id_base_offsets_allocation() {
        let mgr = SessionManager::new();
        mgr.set_id_base(10_000);

        let ses = FakeSession::new();
        let ses_ref: SessionRef = ses;
        assert_eq!(mgr.add(&ses_ref), 10_001);
    }

    #[test]
    fn visit_short_circuits_and_close_all_reaches_everyone() {
        let mgr = SessionManager::new();

        let sessions: Vec<Arc<FakeSession>> = (0..4).map(|_| FakeSession::new()).collect();
        for ses in &sessions {
            let ses_ref: SessionRef = ses.clone();
            mgr.add(&ses_ref);
        }

        let mut visited = 0;
        mgr.visit(|_| {
            visited += 1;
            false
        });
        assert_eq!(visited, 1);

        mgr.close_all();
        for ses in &sessions {
            assert_eq!(ses.closed.load(Ordering::SeqCst), 1);
        }
    }
}
