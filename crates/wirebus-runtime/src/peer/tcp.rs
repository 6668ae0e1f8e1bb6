//! TCP acceptor and connectors.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};

use wirebus_core::error::{PeerError, Result};

use crate::peer::stream::ByteStreamSession;
use crate::peer::stream_peer::{
    StreamAcceptor, StreamBinder, StreamConnector, StreamDialer, StreamListener,
    StreamSyncConnector,
};
use crate::peer::{register_peer_creator, PeerCore, PeerRef};

/// Session type produced by the TCP peers.
pub type TcpSession = ByteStreamSession<TcpStream>;

pub type TcpAcceptor = StreamAcceptor<TcpBinder>;
pub type TcpConnector = StreamConnector<TcpDialer>;
pub type TcpSyncConnector = StreamSyncConnector<TcpDialer>;

pub struct TcpBinder;

pub struct BoundTcpListener(TcpListener);

#[async_trait]
impl StreamListener for BoundTcpListener {
    type Stream = TcpStream;

    async fn accept(&mut self) -> Result<(TcpStream, SocketAddr)> {
        let (stream, remote) = self.0.accept().await?;
        Ok((stream, remote))
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.0.local_addr().ok()
    }
}

#[async_trait]
impl StreamBinder for TcpBinder {
    type Listener = BoundTcpListener;

    async fn bind(&self, host_port: &str) -> Result<BoundTcpListener> {
        let listener = TcpListener::bind(host_port).await.map_err(|err| {
            PeerError::Bind {
                addr: host_port.to_string(),
                source: err,
            }
        })?;
        Ok(BoundTcpListener(listener))
    }

    fn apply_options(&self, stream: &TcpStream, core: &PeerCore) {
        core.socket().apply_tcp(stream);
    }
}

pub struct TcpDialer;

#[async_trait]
impl StreamDialer for TcpDialer {
    type Stream = TcpStream;

    async fn dial(&self, address: &str) -> Result<(TcpStream, Option<SocketAddr>)> {
        let stream = TcpStream::connect(address).await.map_err(|err| {
            PeerError::Dial {
                addr: address.to_string(),
                source: err,
            }
        })?;
        let remote = stream.peer_addr().ok();
        Ok((stream, remote))
    }

    fn apply_options(&self, stream: &TcpStream, core: &PeerCore) {
        core.socket().apply_tcp(stream);
    }
}

pub(crate) fn register() {
    register_peer_creator("tcp.Acceptor", || {
        StreamAcceptor::new(TcpBinder, "tcp.Acceptor", "tcp") as PeerRef
    });
    register_peer_creator("tcp.Connector", || {
        StreamConnector::new(TcpDialer, "tcp.Connector", "tcp") as PeerRef
    });
    register_peer_creator("tcp.SyncConnector", || {
        StreamSyncConnector::new(TcpDialer, "tcp.SyncConnector", "tcp") as PeerRef
    });
}
