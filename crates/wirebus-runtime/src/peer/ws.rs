//! WebSocket acceptor and connector.
//!
//! Connections are upgraded over HTTP and then carry binary frames whose
//! body is `u16 id (LE) | payload` — the frame boundary supplies the length.
//! The acceptor surfaces TLS certificate/key paths as options; termination
//! itself stays with the deployment in front of the listener.

use std::any::Any;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tracing::{error, info, warn};

use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::Message as WsFrame;
use tokio_tungstenite::{accept_async, connect_async, MaybeTlsStream, WebSocketStream};

use wirebus_core::addr::{detect_port, parse_address};
use wirebus_core::codec::{decode_message, encode_message};
use wirebus_core::error::{FramingError, PeerError, Result, TransportError};
use wirebus_core::meta::MessageBox;
use wirebus_core::packet::{RawPacket, MSG_ID_SIZE};
use wirebus_core::sysmsg::{SessionAccepted, SessionConnectError, SessionConnected};

use crate::event::RecvMsgEvent;
use crate::peer::stream::{NetSession, SessionIo};
use crate::peer::{register_peer_creator, Peer, PeerCore, PeerRef};
use crate::session::{Session, SessionRef};

/// Bound required of the upgraded WebSocket transport.
pub trait WsWire:
    Stream<Item = std::result::Result<WsFrame, WsError>>
    + Sink<WsFrame, Error = WsError>
    + Send
    + Unpin
    + 'static
{
}

impl<T> WsWire for T where
    T: Stream<Item = std::result::Result<WsFrame, WsError>>
        + Sink<WsFrame, Error = WsError>
        + Send
        + Unpin
        + 'static
{
}

pub type ServerWsStream = WebSocketStream<TcpStream>;
pub type ClientWsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Session type produced by the WebSocket peers.
pub type WsSession<WS> = NetSession<WsIo<WS>>;

fn ws_transport_error(err: WsError) -> TransportError {
    match err {
        WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::ConnectionClosed,
        WsError::Io(io) => TransportError::Io(io),
        other => TransportError::Protocol(other.to_string()),
    }
}

// ----------------------------------------------------------------------------
// WebSocket IO
// ----------------------------------------------------------------------------

/// Split halves of an upgraded WebSocket connection.
pub struct WsIo<WS: WsWire> {
    sink: tokio::sync::Mutex<Option<SplitSink<WS, WsFrame>>>,
    stream: tokio::sync::Mutex<Option<SplitStream<WS>>>,
}

impl<WS: WsWire> WsIo<WS> {
    pub fn new() -> Self {
        Self {
            sink: tokio::sync::Mutex::new(None),
            stream: tokio::sync::Mutex::new(None),
        }
    }

    pub async fn attach(&self, ws: WS) {
        let (sink, stream) = ws.split();
        *self.sink.lock().await = Some(sink);
        *self.stream.lock().await = Some(stream);
    }
}

#[async_trait]
impl<WS: WsWire> SessionIo for WsIo<WS> {
    async fn shutdown_write(&self) {
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.close().await;
        }
    }

    async fn release_read(&self) {
        self.stream.lock().await.take();
    }

    async fn teardown(&self) {
        self.stream.lock().await.take();
        self.sink.lock().await.take();
    }
}

impl<WS: WsWire> WsSession<WS> {
    /// Reads binary frames until one decodes, racing local close. Control
    /// and text frames are skipped.
    pub async fn read_frame(&self) -> Result<MessageBox> {
        let mut guard = self.io().stream.lock().await;
        let stream = guard
            .as_mut()
            .ok_or(TransportError::ConnectionClosed)?;

        loop {
            let frame = tokio::select! {
                frame = stream.next() => frame,
                _ = self.closed() => return Err(TransportError::ConnectionClosed.into()),
            };

            match frame {
                None => return Err(TransportError::ConnectionClosed.into()),
                Some(Err(err)) => return Err(ws_transport_error(err).into()),
                Some(Ok(WsFrame::Binary(data))) => {
                    if data.len() < MSG_ID_SIZE {
                        return Err(FramingError::ShortMsgId.into());
                    }
                    let msg_id = u16::from_le_bytes([data[0], data[1]]) as u32;
                    let (msg, _) = decode_message(msg_id, &data[MSG_ID_SIZE..])?;
                    return Ok(msg);
                }
                Some(Ok(WsFrame::Close(_))) => {
                    return Err(TransportError::ConnectionClosed.into())
                }
                Some(Ok(_)) => continue,
            }
        }
    }

    /// Frames and sends one message as a binary frame.
    pub async fn write_frame(&self, msg: &(dyn Any + Send + Sync)) -> Result<()> {
        let (msg_id, msg_data) = match msg.downcast_ref::<RawPacket>() {
            Some(raw) => (raw.msg_id, raw.msg_data.clone()),
            None => {
                let (data, meta) = encode_message(msg)?;
                (meta.id(), data)
            }
        };

        let mut pkt = Vec::with_capacity(MSG_ID_SIZE + msg_data.len());
        pkt.extend_from_slice(&(msg_id as u16).to_le_bytes());
        pkt.extend_from_slice(&msg_data);

        let mut guard = self.io().sink.lock().await;
        let sink = guard
            .as_mut()
            .ok_or(TransportError::ConnectionClosed)?;
        sink.send(WsFrame::Binary(pkt))
            .await
            .map_err(|err| ws_transport_error(err).into())
    }
}

// ----------------------------------------------------------------------------
// Acceptor
// ----------------------------------------------------------------------------

/// Listens for HTTP upgrades and runs one session per connection.
pub struct WsAcceptor {
    core: Arc<PeerCore>,
    local_addr: RwLock<Option<SocketAddr>>,
    certificate_file: Mutex<Option<(String, String)>>,
    stop_notify: Notify,
}

impl WsAcceptor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            core: PeerCore::new(),
            local_addr: RwLock::new(None),
            certificate_file: Mutex::new(None),
            stop_notify: Notify::new(),
        })
    }

    /// Surfaces certificate/key paths for a TLS terminator in front of the
    /// listener. The acceptor itself serves plain upgrades.
    pub fn set_https(&self, cert_file: &str, key_file: &str) {
        *self.certificate_file.lock().unwrap() =
            Some((cert_file.to_string(), key_file.to_string()));
    }

    pub fn https_files(&self) -> Option<(String, String)> {
        self.certificate_file.lock().unwrap().clone()
    }

    pub fn port(&self) -> Option<u16> {
        self.local_addr.read().unwrap().map(|a| a.port())
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        self.core.running().set_running(true);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        let this = self.clone();
                        tokio::spawn(async move {
                            this.on_new_session(stream, remote).await;
                        });
                    }
                    Err(err) => {
                        if self.core.running().is_stopping() {
                            break;
                        }
                        warn!("#ws.accept failed({}) {}", self.core.name(), err);
                        tokio::time::sleep(Duration::from_millis(1)).await;
                    }
                },
                _ = self.stop_notify.notified() => break,
            }
        }

        self.core.running().set_running(false);
        self.core.running().end_stopping();
    }

    async fn on_new_session(&self, stream: TcpStream, remote: SocketAddr) {
        self.core.socket().apply_tcp(&stream);

        let ws = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(err) => {
                warn!("#ws.upgrade failed({}) {}", self.core.name(), err);
                return;
            }
        };

        let ses = WsSession::<ServerWsStream>::new(self.core.clone(), WsIo::new());
        ses.io().attach(ws).await;
        ses.set_remote(Some(remote));
        ses.start();

        self.core.bundle().proc_event(Box::new(RecvMsgEvent::new(
            ses as SessionRef,
            Box::new(SessionAccepted),
        )));
    }
}

#[async_trait]
impl Peer for WsAcceptor {
    async fn start(self: Arc<Self>) -> Result<()> {
        self.core.running().wait_stop_finished().await;
        if self.core.running().is_running() {
            return Ok(());
        }

        let address = self.core.address();
        let listener = match detect_port(&address, |a, port| {
            let host_port = a.host_port_string(port);
            async move {
                TcpListener::bind(&host_port).await.map_err(|err| {
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
            Ok(listener) => listener,
            Err(err) => {
                error!("#ws.listen failed({}) {}", self.core.name(), err);
                return Err(err);
            }
        };

        *self.local_addr.write().unwrap() = listener.local_addr().ok();
        info!(
            "#ws.listen({}) {:?}",
            self.core.name(),
            *self.local_addr.read().unwrap()
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
        "ws.Acceptor"
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

/// Dials a WebSocket endpoint and keeps one session, optionally
/// reconnecting with a fixed backoff.
pub struct WsConnector {
    core: Arc<PeerCore>,
    session: Arc<WsSession<ClientWsStream>>,
    reconnect: Mutex<Duration>,
    ses_end: Arc<Notify>,
    stop_notify: Notify,
}

impl WsConnector {
    pub fn new() -> Arc<Self> {
        let core = PeerCore::new();
        let session = WsSession::<ClientWsStream>::new(core.clone(), WsIo::new());
        let ses_end = Arc::new(Notify::new());
        session.set_end_notify(ses_end.clone());

        Arc::new(Self {
            core,
            session,
            reconnect: Mutex::new(Duration::ZERO),
            ses_end,
            stop_notify: Notify::new(),
        })
    }

    pub fn set_reconnect_duration(&self, d: Duration) {
        *self.reconnect.lock().unwrap() = d;
    }

    pub fn reconnect_duration(&self) -> Duration {
        *self.reconnect.lock().unwrap()
    }

    /// The dial URL derived from the peer address; a missing scheme defaults
    /// to `ws://`.
    fn url(&self) -> String {
        let address = self.core.address();
        match parse_address(&address) {
            Ok(parsed) if !parsed.scheme.is_empty() => address,
            _ => format!("ws://{address}"),
        }
    }

    async fn connect_loop(self: Arc<Self>) {
        self.core.running().set_running(true);

        let mut try_times: u32 = 0;

        loop {
            try_times += 1;
            let url = self.url();

            match connect_async(url.as_str()).await {
                Err(err) => {
                    if try_times <= 3 {
                        error!("#ws.connect failed({}) {}", self.core.name(), err);
                        if try_times == 3 {
                            error!("({}) continue reconnecting, but mute log", self.core.name());
                        }
                    }

                    if self.reconnect_duration().is_zero() || self.core.running().is_stopping() {
                        self.core.bundle().proc_event(Box::new(RecvMsgEvent::new(
                            self.session.clone() as SessionRef,
                            Box::new(SessionConnectError),
                        )));
                        break;
                    }

                    tokio::select! {
                        _ = tokio::time::sleep(self.reconnect_duration()) => continue,
                        _ = self.stop_notify.notified() => break,
                    }
                }

                Ok((ws, _response)) => {
                    if self.core.running().is_stopping() {
                        break;
                    }

                    self.session.io().attach(ws).await;
                    self.session.start();
                    try_times = 0;

                    self.core.bundle().proc_event(Box::new(RecvMsgEvent::new(
                        self.session.clone() as SessionRef,
                        Box::new(SessionConnected),
                    )));

                    self.ses_end.notified().await;
                    self.session.io().teardown().await;

                    if self.core.running().is_stopping() || self.reconnect_duration().is_zero() {
                        break;
                    }

                    tokio::select! {
                        _ = tokio::time::sleep(self.reconnect_duration()) => {}
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
impl Peer for WsConnector {
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
        "ws.Connector"
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

pub(crate) fn register() {
    register_peer_creator("ws.Acceptor", || WsAcceptor::new() as PeerRef);
    register_peer_creator("ws.Connector", || WsConnector::new() as PeerRef);
}
