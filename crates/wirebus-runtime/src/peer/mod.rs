//! Peers: the network endpoints.
//!
//! An acceptor listens and produces sessions; a connector dials and owns
//! one. Every peer shares a [`PeerCore`]: name/address/queue properties, the
//! processor bundle, the session manager, running/stopping tags, socket
//! options, a context map and the capture-io-panic flag.
//!
//! Peers are created by type name through [`new_generic_peer`], mirroring
//! the processor directory: missing names fail with a message pointing at
//! the module that provides them.

pub mod kcp;
pub mod stream;
pub mod stream_peer;
pub mod tcp;
pub mod udp;
pub mod ws;

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use wirebus_core::error::{PeerError, Result};
use wirebus_core::queue::EventQueue;

use crate::proc::bundle::ProcBundle;
use crate::session::{SessionManager, SessionRef};

/// Shared handle to a peer.
pub type PeerRef = Arc<dyn Peer>;

/// A network endpoint: acceptor or connector.
#[async_trait]
pub trait Peer: Send + Sync {
    /// Starts the peer: binds and spawns the accept loop, or begins dialing.
    async fn start(self: Arc<Self>) -> Result<()>;

    /// Stops the peer and waits for its supervisor loop to finish.
    async fn stop(&self);

    /// `protocol.Kind` name, e.g. `tcp.Acceptor`.
    fn type_name(&self) -> &'static str;

    fn core(&self) -> &Arc<PeerCore>;

    /// Whether the peer is up: listening (acceptor) or connected (connector).
    fn is_ready(&self) -> bool;

    /// The default session, for connectors.
    fn session(&self) -> Option<SessionRef> {
        None
    }

    /// The locally bound or dialed port, once known.
    fn local_port(&self) -> Option<u16> {
        None
    }

    fn as_any(&self) -> &dyn Any;
}

// ----------------------------------------------------------------------------
// Peer Core
// ----------------------------------------------------------------------------

/// State shared by every peer implementation and by its sessions.
pub struct PeerCore {
    name: RwLock<String>,
    address: RwLock<String>,
    queue: RwLock<Option<EventQueue>>,
    bundle: ProcBundle,
    sessions: SessionManager,
    running: RunningTag,
    capture_io_panic: AtomicBool,
    context: ContextSet,
    socket: SocketOptions,
}

impl PeerCore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            name: RwLock::new(String::new()),
            address: RwLock::new(String::new()),
            queue: RwLock::new(None),
            bundle: ProcBundle::new(),
            sessions: SessionManager::new(),
            running: RunningTag::new(),
            capture_io_panic: AtomicBool::new(false),
            context: ContextSet::new(),
            socket: SocketOptions::new(),
        })
    }

    pub fn name(&self) -> String {
        self.name.read().unwrap().clone()
    }

    pub fn set_name(&self, v: &str) {
        *self.name.write().unwrap() = v.to_string();
    }

    pub fn address(&self) -> String {
        self.address.read().unwrap().clone()
    }

    pub fn set_address(&self, v: &str) {
        *self.address.write().unwrap() = v.to_string();
    }

    pub fn queue(&self) -> Option<EventQueue> {
        self.queue.read().unwrap().clone()
    }

    pub fn set_queue(&self, q: Option<EventQueue>) {
        *self.queue.write().unwrap() = q;
    }

    pub fn bundle(&self) -> &ProcBundle {
        &self.bundle
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn running(&self) -> &RunningTag {
        &self.running
    }

    /// IO-layer panic capture. When on, a recv panic closes only the
    /// offending session and a send panic drops only the offending message.
    pub fn enable_capture_io_panic(&self, v: bool) {
        self.capture_io_panic.store(v, Ordering::Relaxed);
    }

    pub fn capture_io_panic(&self) -> bool {
        self.capture_io_panic.load(Ordering::Relaxed)
    }

    pub fn context(&self) -> &ContextSet {
        &self.context
    }

    pub fn socket(&self) -> &SocketOptions {
        &self.socket
    }
}

// ----------------------------------------------------------------------------
// Running Tag
// ----------------------------------------------------------------------------

/// Running/stopping state shared by peer supervisor loops.
pub struct RunningTag {
    running: AtomicBool,
    stopping: AtomicBool,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

impl RunningTag {
    pub fn new() -> Self {
        let (done_tx, done_rx) = watch::channel(true);
        Self {
            running: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            done_tx,
            done_rx,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_running(&self, v: bool) {
        self.running.store(v, Ordering::SeqCst);
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Marks the peer stopping; `wait_stop_finished` blocks until the
    /// supervisor loop acknowledges with [`RunningTag::end_stopping`].
    pub fn start_stopping(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        let _ = self.done_tx.send(false);
    }

    pub fn end_stopping(&self) {
        self.stopping.store(false, Ordering::SeqCst);
        let _ = self.done_tx.send(true);
    }

    pub async fn wait_stop_finished(&self) {
        let mut rx = self.done_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
}

impl Default for RunningTag {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Context Set
// ----------------------------------------------------------------------------

/// Keyed opaque storage carried by peers and sessions for user data.
pub struct ContextSet {
    map: RwLock<HashMap<String, Box<dyn Any + Send + Sync>>>,
}

impl ContextSet {
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }

    pub fn set(&self, key: &str, value: impl Any + Send + Sync) {
        self.map
            .write()
            .unwrap()
            .insert(key.to_string(), Box::new(value));
    }

    /// Fetches a clone of the stored value when the type matches.
    pub fn get<T: Any + Clone>(&self, key: &str) -> Option<T> {
        self.map
            .read()
            .unwrap()
            .get(key)
            .and_then(|v| v.downcast_ref::<T>().cloned())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.read().unwrap().contains_key(key)
    }
}

impl Default for ContextSet {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Socket Options
// ----------------------------------------------------------------------------

#[derive(Clone)]
struct SocketOptionsInner {
    read_buffer_size: i64,
    write_buffer_size: i64,
    no_delay: bool,
    max_packet_size: usize,
    read_timeout: Duration,
    write_timeout: Duration,
}

/// Per-peer socket tuning applied to every session's transport.
pub struct SocketOptions {
    inner: RwLock<SocketOptionsInner>,
}

impl SocketOptions {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(SocketOptionsInner {
                read_buffer_size: -1,
                write_buffer_size: -1,
                no_delay: true,
                max_packet_size: 0,
                read_timeout: Duration::ZERO,
                write_timeout: Duration::ZERO,
            }),
        }
    }

    /// Buffer sizes (-1 keeps the system default) and Nagle control.
    pub fn set_socket_buffer(&self, read: i64, write: i64, no_delay: bool) {
        let mut inner = self.inner.write().unwrap();
        inner.read_buffer_size = read;
        inner.write_buffer_size = write;
        inner.no_delay = no_delay;
    }

    /// Read/write deadlines; zero disables.
    pub fn set_socket_deadline(&self, read: Duration, write: Duration) {
        let mut inner = self.inner.write().unwrap();
        inner.read_timeout = read;
        inner.write_timeout = write;
    }

    /// Frames with a length field at or above this fail with over-size;
    /// zero disables the check.
    pub fn set_max_packet_size(&self, max: usize) {
        self.inner.write().unwrap().max_packet_size = max;
    }

    pub fn max_packet_size(&self) -> usize {
        self.inner.read().unwrap().max_packet_size
    }

    pub fn read_timeout(&self) -> Duration {
        self.inner.read().unwrap().read_timeout
    }

    pub fn write_timeout(&self) -> Duration {
        self.inner.read().unwrap().write_timeout
    }

    pub fn no_delay(&self) -> bool {
        self.inner.read().unwrap().no_delay
    }

    /// Configured receive buffer size; negative keeps the system default.
    pub fn read_buffer_size(&self) -> i64 {
        self.inner.read().unwrap().read_buffer_size
    }

    /// Configured send buffer size; negative keeps the system default.
    pub fn write_buffer_size(&self) -> i64 {
        self.inner.read().unwrap().write_buffer_size
    }

    /// Applies stream-level options to an accepted or dialed TCP stream.
    pub fn apply_tcp(&self, stream: &tokio::net::TcpStream) {
        let _ = stream.set_nodelay(self.no_delay());
    }
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Peer Directory
// ----------------------------------------------------------------------------

type PeerCreator = fn() -> PeerRef;

static CREATORS: LazyLock<RwLock<HashMap<&'static str, PeerCreator>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Registers a peer constructor under its type name. Duplicate names are a
/// bootstrap-time program bug.
pub fn register_peer_creator(type_name: &'static str, creator: PeerCreator) {
    let mut creators = CREATORS.write().unwrap();
    if creators.contains_key(type_name) {
        panic!("duplicate peer type: {type_name}");
    }
    creators.insert(type_name, creator);
}

/// Registered peer type names, sorted.
pub fn peer_creator_list() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = CREATORS.read().unwrap().keys().copied().collect();
    names.sort_unstable();
    names
}

fn module_hint_for_peer(name: &str) -> &'static str {
    match name.split('.').next().unwrap_or("") {
        "tcp" => "wirebus_runtime::peer::tcp",
        "udp" => "wirebus_runtime::peer::udp",
        "kcp" => "wirebus_runtime::peer::kcp",
        "ws" => "wirebus_runtime::peer::ws",
        _ => "a peer module registered via register_peer_creator",
    }
}

/// Creates a peer by type name.
pub fn new_peer(type_name: &str) -> Result<PeerRef> {
    crate::bootstrap();

    let creator = {
        let creators = CREATORS.read().unwrap();
        creators.get(type_name).copied()
    };

    match creator {
        Some(f) => Ok(f()),
        None => Err(PeerError::UnknownPeerType {
            name: type_name.to_string(),
            hint: module_hint_for_peer(type_name),
        }
        .into()),
    }
}

/// Creates a peer and sets its basic properties in one call.
pub fn new_generic_peer(
    type_name: &str,
    name: &str,
    addr: &str,
    queue: Option<EventQueue>,
) -> Result<PeerRef> {
    let peer = new_peer(type_name)?;
    let core = peer.core();
    core.set_name(name);
    core.set_address(addr);
    core.set_queue(queue);
    Ok(peer)
}

pub(crate) fn register_builtin_peers() {
    tcp::register();
    udp::register();
    kcp::register();
    ws::register();
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
