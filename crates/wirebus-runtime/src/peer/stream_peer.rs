//! Generic acceptor and connectors over byte-stream transports.
//!
//! TCP and KCP expose the same shape: a listener producing streams and a
//! dialer producing one stream. The peers here are generic over those two
//! operations; the transport modules supply [`StreamBinder`] /
//! [`StreamDialer`] implementations plus the registered type names.
//!
//! The reconnecting connector is an explicit state machine
//! `Idle → Connecting → Running → Backoff → Connecting …` driven by dial
//! results, session termination and external stop.

use std::any::Any;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Notify;
use tracing::{error, info, warn};

use wirebus_core::addr::detect_port;
use wirebus_core::error::Result;
use wirebus_core::sysmsg::{SessionAccepted, SessionConnectError, SessionConnected};

use crate::event::RecvMsgEvent;
use crate::peer::stream::{ByteStreamSession, StreamIo};
use crate::peer::{Peer, PeerCore};
use crate::session::{Session, SessionRef};

/// A bound listener producing streams.
#[async_trait]
pub trait StreamListener: Send + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    async fn accept(&mut self) -> Result<(Self::Stream, SocketAddr)>;

    fn local_addr(&self) -> Option<SocketAddr>;
}

/// Binds listeners for one transport.
#[async_trait]
pub trait StreamBinder: Send + Sync + 'static {
    type Listener: StreamListener;

    async fn bind(&self, host_port: &str) -> Result<Self::Listener>;

    /// Transport-specific per-stream tuning (nodelay and friends).
    fn apply_options(&self, _stream: &ListenerStream<Self>, _core: &PeerCore) {}
}

/// Dials streams for one transport.
#[async_trait]
pub trait StreamDialer: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    async fn dial(&self, address: &str) -> Result<(Self::Stream, Option<SocketAddr>)>;

    fn apply_options(&self, _stream: &Self::Stream, _core: &PeerCore) {}
}

pub type ListenerStream<B> = <<B as StreamBinder>::Listener as StreamListener>::Stream;

// ----------------------------------------------------------------------------
// Acceptor
// ----------------------------------------------------------------------------

/// Accepts connections and runs one [`ByteStreamSession`] per stream.
pub struct StreamAcceptor<B: StreamBinder> {
    core: Arc<PeerCore>,
    binder: Arc<B>,
    type_name: &'static str,
    protocol: &'static str,
    local_addr: RwLock<Option<SocketAddr>>,
    stop_notify: Notify,
}

impl<B: StreamBinder> StreamAcceptor<B> {
    pub fn new(binder: B, type_name: &'static str, protocol: &'static str) -> Arc<Self> {
        Arc::new(Self {
            core: PeerCore::new(),
            binder: Arc::new(binder),
            type_name,
            protocol,
            local_addr: RwLock::new(None),
            stop_notify: Notify::new(),
        })
    }

    /// The bound port, once listening. Useful with `:0` and range addresses.
    pub fn port(&self) -> Option<u16> {
        self.local_addr.read().unwrap().map(|a| a.port())
    }

    pub fn listen_address(&self) -> Option<SocketAddr> {
        *self.local_addr.read().unwrap()
    }

    async fn accept_loop(self: Arc<Self>, mut listener: B::Listener) {
        self.core.running().set_running(true);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        self.on_new_session(stream, remote).await;
                    }
                    Err(err) => {
                        if self.core.running().is_stopping() {
                            break;
                        }
                        warn!("#{}.accept failed({}) {}", self.protocol, self.core.name(), err);
                        tokio::time::sleep(Duration::from_millis(1)).await;
                    }
                },
                _ = self.stop_notify.notified() => break,
            }
        }

        self.core.running().set_running(false);
        self.core.running().end_stopping();
    }

    async fn on_new_session(&self, stream: ListenerStream<B>, remote: SocketAddr) {
        self.binder.apply_options(&stream, &self.core);

        let ses = ByteStreamSession::new(self.core.clone(), StreamIo::new());
        ses.io().attach(stream).await;
        ses.set_remote(Some(remote));
        ses.start();

        let ses_ref: SessionRef = ses;
        self.core.bundle().proc_event(Box::new(RecvMsgEvent::new(
            ses_ref,
            Box::new(SessionAccepted),
        )));
    }
}

#[async_trait]
impl<B: StreamBinder> Peer for StreamAcceptor<B> {
    async fn start(self: Arc<Self>) -> Result<()> {
        self.core.running().wait_stop_finished().await;
        if self.core.running().is_running() {
            return Ok(());
        }

        let address = self.core.address();
        let binder = self.binder.clone();

        let listener = match detect_port(&address, |a, port| {
            let host_port = a.host_port_string(port);
            let binder = binder.clone();
            async move { binder.bind(&host_port).await }
        })
        .await
        {
            Ok(listener) => listener,
            Err(err) => {
                error!(
                    "#{}.listen failed({}) {}",
                    self.protocol,
                    self.core.name(),
                    err
                );
                self.core.running().set_running(false);
                return Err(err);
            }
        };

        *self.local_addr.write().unwrap() = listener.local_addr();
        info!(
            "#{}.listen({}) {:?}",
            self.protocol,
            self.core.name(),
            self.listen_address()
        );

        tokio::spawn(self.clone().accept_loop(listener));
        Ok(())
    }

    async fn stop(&self) {
        if !self.core.running().is_running() || self.core.running().is_stopping() {
            return;
        }

        self.core.running().start_stopping();
        self.stop_notify.notify_one();
        self.core.sessions().close_all();
        self.core.running().wait_stop_finished().await;
    }

    fn type_name(&self) -> &'static str {
        self.type_name
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
// Reconnecting Connector
// ----------------------------------------------------------------------------

enum ConnectorState {
    Idle,
    Connecting,
    Running,
    Backoff,
}

const REPORT_CONNECT_FAILED_LIMIT: u32 = 3;

/// Dials one session and keeps it alive, optionally reconnecting with a
/// fixed backoff. Failure logs mute after a few attempts.
pub struct StreamConnector<D: StreamDialer> {
    core: Arc<PeerCore>,
    dialer: Arc<D>,
    type_name: &'static str,
    protocol: &'static str,
    session: Arc<ByteStreamSession<D::Stream>>,
    reconnect: Mutex<Duration>,
    ses_end: Arc<Notify>,
    stop_notify: Notify,
}

impl<D: StreamDialer> StreamConnector<D> {
    pub fn new(dialer: D, type_name: &'static str, protocol: &'static str) -> Arc<Self> {
        let core = PeerCore::new();
        let session = ByteStreamSession::new(core.clone(), StreamIo::new());
        let ses_end = Arc::new(Notify::new());
        session.set_end_notify(ses_end.clone());

        Arc::new(Self {
            core,
            dialer: Arc::new(dialer),
            type_name,
            protocol,
            session,
            reconnect: Mutex::new(Duration::ZERO),
            ses_end,
            stop_notify: Notify::new(),
        })
    }

    /// Sets the delay between reconnect attempts; zero disables reconnect.
    pub fn set_reconnect_duration(&self, d: Duration) {
        *self.reconnect.lock().unwrap() = d;
    }

    pub fn reconnect_duration(&self) -> Duration {
        *self.reconnect.lock().unwrap()
    }

    fn default_session(&self) -> SessionRef {
        self.session.clone()
    }

    async fn connect_loop(self: Arc<Self>) {
        self.core.running().set_running(true);

        let mut state = ConnectorState::Idle;
        let mut try_times: u32 = 0;

        loop {
            match state {
                ConnectorState::Idle => {
                    state = ConnectorState::Connecting;
                }

                ConnectorState::Connecting => {
                    try_times += 1;
                    let address = self.core.address();

                    match self.dialer.dial(&address).await {
                        Err(err) => {
                            if try_times <= REPORT_CONNECT_FAILED_LIMIT {
                                error!(
                                    "#{}.connect failed({}) {}",
                                    self.protocol,
                                    self.core.name(),
                                    err
                                );
                                if try_times == REPORT_CONNECT_FAILED_LIMIT {
                                    error!(
                                        "({}) continue reconnecting, but mute log",
                                        self.core.name()
                                    );
                                }
                            }

                            if self.reconnect_duration().is_zero()
                                || self.core.running().is_stopping()
                            {
                                self.core.bundle().proc_event(Box::new(RecvMsgEvent::new(
                                    self.default_session(),
                                    Box::new(SessionConnectError),
                                )));
                                break;
                            }

                            state = ConnectorState::Backoff;
                        }

                        Ok((stream, remote)) => {
                            if self.core.running().is_stopping() {
                                break;
                            }

                            self.dialer.apply_options(&stream, &self.core);
                            self.session.io().attach(stream).await;
                            self.session.set_remote(remote);
                            self.session.start();

                            try_times = 0;
                            self.core.bundle().proc_event(Box::new(RecvMsgEvent::new(
                                self.default_session(),
                                Box::new(SessionConnected),
                            )));

                            state = ConnectorState::Running;
                        }
                    }
                }

                ConnectorState::Running => {
                    self.ses_end.notified().await;
                    self.session.io().detach().await;

                    if self.core.running().is_stopping()
                        || self.reconnect_duration().is_zero()
                    {
                        break;
                    }
                    state = ConnectorState::Backoff;
                }

                ConnectorState::Backoff => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.reconnect_duration()) => {
                            state = ConnectorState::Connecting;
                        }
                        _ = self.stop_notify.notified() => break,
                    }
                }
            }
        }

        self.core.running().set_running(false);
        self.core.running().end_stopping();
    }
}

#[async_trait]
impl<D: StreamDialer> Peer for StreamConnector<D> {
    async fn start(self: Arc<Self>) -> Result<()> {
        self.core.running().wait_stop_finished().await;
        if self.core.running().is_running() {
            return Ok(());
        }

        tokio::spawn(self.clone().connect_loop());
        Ok(())
    }

    async fn stop(&self) {
        if !self.core.running().is_running() || self.core.running().is_stopping() {
            return;
        }

        self.core.running().start_stopping();
        self.session.close();
        self.stop_notify.notify_one();
        self.core.running().wait_stop_finished().await;
    }

    fn type_name(&self) -> &'static str {
        self.type_name
    }

    fn core(&self) -> &Arc<PeerCore> {
        &self.core
    }

    fn is_ready(&self) -> bool {
        self.core.sessions().count() != 0
    }

    fn session(&self) -> Option<SessionRef> {
        Some(self.default_session())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ----------------------------------------------------------------------------
// One-shot Connector
// ----------------------------------------------------------------------------

/// Dials exactly once; never reconnects.
pub struct StreamSyncConnector<D: StreamDialer> {
    core: Arc<PeerCore>,
    dialer: Arc<D>,
    type_name: &'static str,
    protocol: &'static str,
    session: Arc<ByteStreamSession<D::Stream>>,
}

impl<D: StreamDialer> StreamSyncConnector<D> {
    pub fn new(dialer: D, type_name: &'static str, protocol: &'static str) -> Arc<Self> {
        let core = PeerCore::new();
        let session = ByteStreamSession::new(core.clone(), StreamIo::new());

        Arc::new(Self {
            core,
            dialer: Arc::new(dialer),
            type_name,
            protocol,
            session,
        })
    }
}

#[async_trait]
impl<D: StreamDialer> Peer for StreamSyncConnector<D> {
    async fn start(self: Arc<Self>) -> Result<()> {
        let address = self.core.address();

        match self.dialer.dial(&address).await {
            Err(err) => {
                error!(
                    "#{}.connect failed({}) {}",
                    self.protocol,
                    self.core.name(),
                    err
                );
                self.core.bundle().proc_event(Box::new(RecvMsgEvent::new(
                    self.session.clone() as SessionRef,
                    Box::new(SessionConnectError),
                )));
                Err(err)
            }
            Ok((stream, remote)) => {
                self.dialer.apply_options(&stream, &self.core);
                self.session.io().attach(stream).await;
                self.session.set_remote(remote);
                self.session.start();
                self.core.running().set_running(true);

                self.core.bundle().proc_event(Box::new(RecvMsgEvent::new(
                    self.session.clone() as SessionRef,
                    Box::new(SessionConnected),
                )));
                Ok(())
            }
        }
    }

    async fn stop(&self) {
        self.core.running().set_running(false);
        self.session.close();
    }

    fn type_name(&self) -> &'static str {
        self.type_name
    }

    fn core(&self) -> &Arc<PeerCore> {
        &self.core
    }

    fn is_ready(&self) -> bool {
        self.core.sessions().count() != 0
    }

    fn session(&self) -> Option<SessionRef> {
        Some(self.session.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
