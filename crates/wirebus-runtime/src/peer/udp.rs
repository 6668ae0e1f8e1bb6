//! UDP acceptor and connector.
//!
//! UDP is connectionless: the acceptor multiplexes one socket across many
//! logical sessions keyed by source address, each leased for a TTL that
//! every datagram renews. A periodic sweep evicts sessions whose lease
//! expired. Delivery is best-effort by design.

use std::any::Any;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::net::UdpSocket;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use tracing::{debug, error, info};

use wirebus_core::addr::detect_port;
use wirebus_core::error::{PeerError, Result};
use wirebus_core::meta::MessageBox;
use wirebus_core::pipe::Pipe;
use wirebus_core::sysmsg::{SessionCloseNotify, SessionConnected};

use crate::event::{RecvMsgEvent, SendMsgEvent};
use crate::peer::{register_peer_creator, ContextSet, Peer, PeerCore, PeerRef};
use crate::session::{Session, SessionRef};

/// Largest datagram the read loops accept.
pub const MAX_UDP_RECV_BUFFER: usize = 2048;

// ----------------------------------------------------------------------------
// Connection Track Key
// ----------------------------------------------------------------------------

/// Fixed-width key identifying a UDP source address. IPv4 sits in the low
/// half with the high half zero; IPv6 splits across both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnTrackKey {
    pub ip_high: u64,
    pub ip_low: u64,
    pub port: u16,
}

impl ConnTrackKey {
    pub fn from_addr(addr: &SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => Self {
                ip_high: 0,
                ip_low: u32::from_be_bytes(v4.ip().octets()) as u64,
                port: addr.port(),
            },
            SocketAddr::V6(v6) => {
                let octets = v6.ip().octets();
                let mut high = [0u8; 8];
                let mut low = [0u8; 8];
                high.copy_from_slice(&octets[..8]);
                low.copy_from_slice(&octets[8..]);
                Self {
                    ip_high: u64::from_be_bytes(high),
                    ip_low: u64::from_be_bytes(low),
                    port: addr.port(),
                }
            }
        }
    }
}

// ----------------------------------------------------------------------------
// UDP Session
// ----------------------------------------------------------------------------

/// One logical UDP conversation over the shared socket.
pub struct UdpSession {
    id: AtomicI64,
    core: Arc<PeerCore>,
    socket: RwLock<Option<Arc<UdpSocket>>>,
    /// Set on acceptor-side sessions; `None` means the socket is connected.
    remote: RwLock<Option<SocketAddr>>,
    /// The datagram currently being decoded, read by the transmitter.
    pkt: Mutex<Vec<u8>>,
    /// Lease expiry; `None` disables the TTL (connector side).
    deadline: Mutex<Option<Instant>>,
    closing: AtomicBool,
    send_queue: Pipe<MessageBox>,
    context: ContextSet,
}

impl UdpSession {
    fn new(core: Arc<PeerCore>, remote: Option<SocketAddr>) -> Arc<Self> {
        Arc::new(Self {
            id: AtomicI64::new(0),
            core,
            socket: RwLock::new(None),
            remote: RwLock::new(remote),
            pkt: Mutex::new(Vec::new()),
            deadline: Mutex::new(None),
            closing: AtomicBool::new(false),
            send_queue: Pipe::new(),
            context: ContextSet::new(),
        })
    }

    fn set_socket(&self, socket: Arc<UdpSocket>) {
        *self.socket.write().unwrap() = Some(socket);
    }

    fn socket_set(&self) -> bool {
        self.socket.read().unwrap().is_some()
    }

    pub fn context(&self) -> &ContextSet {
        &self.context
    }

    /// Whether the TTL lease is still live.
    pub fn is_alive(&self) -> bool {
        match *self.deadline.lock().unwrap() {
            Some(deadline) => Instant::now() < deadline,
            None => true,
        }
    }

    /// Renews the lease; called for every inbound datagram.
    fn refresh(&self, ttl: Duration) {
        *self.deadline.lock().unwrap() = Some(Instant::now() + ttl);
    }

    /// Registers with the manager and spawns the send loop.
    fn start(self: &Arc<Self>) {
        let ses: SessionRef = self.clone();
        self.core.sessions().add(&ses);

        let this = self.clone();
        tokio::spawn(async move {
            let ses: SessionRef = this.clone();
            let mut batch: Vec<MessageBox> = Vec::new();

            loop {
                batch.clear();
                let exit = this.send_queue.drain(&mut batch).await;

                for msg in batch.drain(..) {
                    this.core
                        .bundle()
                        .send_message(Box::new(SendMsgEvent::new(ses.clone(), msg)))
                        .await;
                }

                if exit {
                    break;
                }
            }
        });
    }

    /// Feeds one inbound datagram through the pipeline. Malformed datagrams
    /// are dropped silently, per the best-effort contract.
    pub async fn recv(self: &Arc<Self>, data: &[u8]) {
        *self.pkt.lock().unwrap() = data.to_vec();

        let ses: SessionRef = self.clone();
        match self.core.bundle().read_message(&ses).await {
            Ok(msg) => {
                self.core
                    .bundle()
                    .proc_event(Box::new(RecvMsgEvent::new(ses, msg)));
            }
            Err(err) => {
                debug!("udp datagram dropped: {}", err);
            }
        }
    }

    /// The datagram under decode; consumed by the UDP transmitter.
    pub fn take_packet(&self) -> Vec<u8> {
        std::mem::take(&mut self.pkt.lock().unwrap())
    }

    /// Writes one datagram, best-effort: a full socket buffer drops it.
    pub fn write_datagram(&self, data: &[u8]) -> Result<()> {
        let socket = self.socket.read().unwrap().clone();
        let Some(socket) = socket else {
            return Ok(());
        };

        let result = match *self.remote.read().unwrap() {
            Some(remote) => socket.try_send_to(data, remote),
            None => socket.try_send(data),
        };

        if let Err(err) = result {
            if err.kind() != std::io::ErrorKind::WouldBlock {
                debug!("udp send dropped: {}", err);
            }
        }
        Ok(())
    }

    /// Removes the session without the close notification; used by the TTL
    /// sweep and by peer stop.
    fn evict(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        self.send_queue.add_exit();
        self.core.sessions().remove(self.id());
    }
}

impl Session for UdpSession {
    fn id(&self) -> i64 {
        self.id.load(Ordering::SeqCst)
    }

    fn set_id(&self, id: i64) {
        self.id.store(id, Ordering::SeqCst);
    }

    fn core(&self) -> &Arc<PeerCore> {
        &self.core
    }

    fn send(&self, msg: MessageBox) {
        if self.closing.load(Ordering::SeqCst) {
            return;
        }
        self.send_queue.add(msg);
    }

    fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(ses) = self.core.sessions().get(self.id()) {
            self.core.bundle().proc_event(Box::new(RecvMsgEvent::new(
                ses,
                Box::new(SessionCloseNotify),
            )));
        }

        self.send_queue.add_exit();
        self.core.sessions().remove(self.id());
    }

    fn remote_address(&self) -> Option<SocketAddr> {
        *self.remote.read().unwrap()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ----------------------------------------------------------------------------
// Acceptor
// ----------------------------------------------------------------------------

/// Single-socket UDP server with per-source session tracking.
pub struct UdpAcceptor {
    core: Arc<PeerCore>,
    socket: RwLock<Option<Arc<UdpSocket>>>,
    session_ttl: RwLock<Duration>,
    clean_interval: RwLock<Duration>,
    track: Mutex<HashMap<ConnTrackKey, Arc<UdpSession>>>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl UdpAcceptor {
    pub fn new() -> Arc<Self> {
        let (stop_tx, stop_rx) = watch::channel(false);
        Arc::new(Self {
            core: PeerCore::new(),
            socket: RwLock::new(None),
            session_ttl: RwLock::new(Duration::from_secs(60)),
            clean_interval: RwLock::new(Duration::from_secs(60)),
            track: Mutex::new(HashMap::new()),
            stop_tx,
            stop_rx,
        })
    }

    /// Lease duration granted per inbound datagram.
    pub fn set_session_ttl(&self, ttl: Duration) {
        *self.session_ttl.write().unwrap() = ttl;
    }

    /// How often the sweep for expired leases runs.
    pub fn set_clean_interval(&self, interval: Duration) {
        *self.clean_interval.write().unwrap() = interval;
    }

    /// Number of tracked source addresses.
    pub fn track_count(&self) -> usize {
        self.track.lock().unwrap().len()
    }

    pub fn port(&self) -> Option<u16> {
        self.socket
            .read()
            .unwrap()
            .as_ref()
            .and_then(|s| s.local_addr().ok())
            .map(|a| a.port())
    }

    fn get_session(&self, socket: &Arc<UdpSocket>, remote: SocketAddr) -> Arc<UdpSession> {
        let key = ConnTrackKey::from_addr(&remote);
        let mut track = self.track.lock().unwrap();

        let ses = track.entry(key).or_insert_with(|| {
            let ses = UdpSession::new(self.core.clone(), Some(remote));
            ses.set_socket(socket.clone());
            ses.start();
            ses
        });

        // every datagram renews the lease
        ses.refresh(*self.session_ttl.read().unwrap());
        ses.clone()
    }

    fn sweep_expired(&self) {
        let expired: Vec<(ConnTrackKey, Arc<UdpSession>)> = {
            let track = self.track.lock().unwrap();
            track
                .iter()
                .filter(|(_, ses)| !ses.is_alive())
                .map(|(key, ses)| (*key, ses.clone()))
                .collect()
        };

        if expired.is_empty() {
            return;
        }

        let mut track = self.track.lock().unwrap();
        for (key, ses) in expired {
            track.remove(&key);
            ses.evict();
        }
    }

    async fn read_loop(self: Arc<Self>, socket: Arc<UdpSocket>) {
        let mut stop_rx = self.stop_rx.clone();
        let mut buf = vec![0u8; MAX_UDP_RECV_BUFFER];

        loop {
            tokio::select! {
                received = socket.recv_from(&mut buf) => match received {
                    Ok((n, remote)) => {
                        if n == 0 {
                            continue;
                        }

                        let ses = self.get_session(&socket, remote);
                        if self.core.capture_io_panic() {
                            if AssertUnwindSafe(ses.recv(&buf[..n]))
                                .catch_unwind()
                                .await
                                .is_err()
                            {
                                error!("io panic on udp recv({})", self.core.name());
                            }
                        } else {
                            ses.recv(&buf[..n]).await;
                        }
                    }
                    Err(_) => break,
                },
                _ = stop_rx.changed() => break,
            }
        }

        self.core.running().set_running(false);
        self.core.running().end_stopping();
    }

    async fn sweep_loop(self: Arc<Self>) {
        let mut stop_rx = self.stop_rx.clone();
        let interval = *self.clean_interval.read().unwrap();
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => self.sweep_expired(),
                _ = stop_rx.changed() => break,
            }
        }
    }
}

#[async_trait]
impl Peer for UdpAcceptor {
    async fn start(self: Arc<Self>) -> Result<()> {
        if self.core.running().is_running() {
            return Ok(());
        }

        let address = self.core.address();
        let socket = match detect_port(&address, |a, port| {
            let host_port = a.host_port_string(port);
            async move {
                UdpSocket::bind(&host_port).await.map_err(|err| {
                    PeerError::Bind {
                        addr: host_port.clone(),
                        source: err,
                    }
                    .into()
                })
            }
        })
        .await
        {
            Ok(socket) => Arc::new(socket),
            Err(err) => {
                error!("#udp.listen failed({}) {}", self.core.name(), err);
                return Err(err);
            }
        };

        *self.socket.write().unwrap() = Some(socket.clone());
        info!(
            "#udp.listen({}) {:?}",
            self.core.name(),
            socket.local_addr().ok()
        );

        self.core.running().set_running(true);
        tokio::spawn(self.clone().read_loop(socket));
        tokio::spawn(self.clone().sweep_loop());
        Ok(())
    }

    async fn stop(&self) {
        if !self.core.running().is_running() || self.core.running().is_stopping() {
            return;
        }

        self.core.running().start_stopping();
        let _ = self.stop_tx.send(true);

        let sessions: Vec<Arc<UdpSession>> =
            self.track.lock().unwrap().drain().map(|(_, s)| s).collect();
        for ses in sessions {
            ses.evict();
        }

        self.socket.write().unwrap().take();
        self.core.running().wait_stop_finished().await;
    }

    fn type_name(&self) -> &'static str {
        "udp.Acceptor"
    }

    fn core(&self) -> &Arc<PeerCore> {
        &self.core
    }

    fn is_ready(&self) -> bool {
        self.core.running().is_running()
    }

    fn local_port(&self) -> Option<u16> {
        self.port()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ----------------------------------------------------------------------------
// Connector
// ----------------------------------------------------------------------------

/// UDP client over a connected socket feeding one default session.
pub struct UdpConnector {
    core: Arc<PeerCore>,
    session: Arc<UdpSession>,
    stop_notify: Notify,
}

impl UdpConnector {
    pub fn new() -> Arc<Self> {
        let core = PeerCore::new();
        let session = UdpSession::new(core.clone(), None);

        Arc::new(Self {
            core,
            session,
            stop_notify: Notify::new(),
        })
    }

    async fn read_loop(self: Arc<Self>, socket: Arc<UdpSocket>) {
        let mut buf = vec![0u8; MAX_UDP_RECV_BUFFER];

        loop {
            tokio::select! {
                received = socket.recv(&mut buf) => match received {
                    Ok(n) if n > 0 => self.session.recv(&buf[..n]).await,
                    Ok(_) => continue,
                    Err(_) => break,
                },
                _ = self.stop_notify.notified() => break,
            }
        }

        self.core.running().set_running(false);
        self.core.running().end_stopping();
    }
}

#[async_trait]
impl Peer for UdpConnector {
    async fn start(self: Arc<Self>) -> Result<()> {
        self.core.running().wait_stop_finished().await;
        if self.core.running().is_running() {
            return Ok(());
        }

        let address = self.core.address();
        let socket = UdpSocket::bind("0.0.0.0:0").await.map_err(|err| {
            PeerError::Dial {
                addr: address.clone(),
                source: err,
            }
        })?;
        socket.connect(&address).await.map_err(|err| {
            error!("#udp.connect failed({}) {}", self.core.name(), err);
            PeerError::Dial {
                addr: address.clone(),
                source: err,
            }
        })?;

        let socket = Arc::new(socket);
        self.session.set_socket(socket.clone());
        self.session.start();
        self.core.running().set_running(true);

        self.core.bundle().proc_event(Box::new(RecvMsgEvent::new(
            self.session.clone() as SessionRef,
            Box::new(SessionConnected),
        )));

        tokio::spawn(self.clone().read_loop(socket));
        Ok(())
    }

    async fn stop(&self) {
        if !self.core.running().is_running() || self.core.running().is_stopping() {
            return;
        }

        self.core.running().start_stopping();
        self.stop_notify.notify_one();
        self.session.evict();
        self.core.running().wait_stop_finished().await;
    }

    fn type_name(&self) -> &'static str {
        "udp.Connector"
    }

    fn core(&self) -> &Arc<PeerCore> {
        &self.core
    }

    fn is_ready(&self) -> bool {
        self.session.socket_set()
    }

    fn session(&self) -> Option<SessionRef> {
        Some(self.session.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) fn register() {
    register_peer_creator("udp.Acceptor", || UdpAcceptor::new() as PeerRef);
    register_peer_creator("udp.Connector", || UdpConnector::new() as PeerRef);
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
