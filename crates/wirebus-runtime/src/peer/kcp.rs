//! KCP (reliable UDP) acceptor and connectors.
//!
//! The KCP library supplies retransmission and stream multiplexing over UDP,
//! so these peers are structurally the TCP ones over a different stream
//! type. Dead peers surface as stream errors, which end the session through
//! the normal recv-loop path.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::lookup_host;
use tokio_kcp::{KcpConfig, KcpListener, KcpStream};

use wirebus_core::error::{PeerError, Result};

use crate::peer::stream::ByteStreamSession;
use crate::peer::stream_peer::{
    StreamAcceptor, StreamBinder, StreamConnector, StreamDialer, StreamListener,
    StreamSyncConnector,
};
use crate::peer::{register_peer_creator, PeerRef};

/// Session type produced by the KCP peers.
pub type KcpSession = ByteStreamSession<KcpStream>;

pub type KcpAcceptor = StreamAcceptor<KcpBinder>;
pub type KcpConnector = StreamConnector<KcpDialer>;
pub type KcpSyncConnector = StreamSyncConnector<KcpDialer>;

fn kcp_io_error(err: kcp::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err.to_string())
}

pub struct KcpBinder;

pub struct BoundKcpListener {
    listener: KcpListener,
}

#[async_trait]
impl StreamListener for BoundKcpListener {
    type Stream = KcpStream;

    async fn accept(&mut self) -> Result<(KcpStream, SocketAddr)> {
        let (stream, remote) = self
            .listener
            .accept()
            .await
            .map_err(kcp_io_error)?;
        Ok((stream, remote))
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }
}

#[async_trait]
impl StreamBinder for KcpBinder {
    type Listener = BoundKcpListener;

    async fn bind(&self, host_port: &str) -> Result<BoundKcpListener> {
        let listener = KcpListener::bind(KcpConfig::default(), host_port)
            .await
            .map_err(|err| PeerError::Bind {
                addr: host_port.to_string(),
                source: kcp_io_error(err),
            })?;

        Ok(BoundKcpListener { listener })
    }
}

pub struct KcpDialer;

#[async_trait]
impl StreamDialer for KcpDialer {
    type Stream = KcpStream;

    async fn dial(&self, address: &str) -> Result<(KcpStream, Option<SocketAddr>)> {
        let remote = lookup_host(address)
            .await
            .map_err(|err| PeerError::Dial {
                addr: address.to_string(),
                source: err,
            })?
            .next()
            .ok_or_else(|| PeerError::Dial {
                addr: address.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "address resolved to nothing"),
            })?;

        let stream = KcpStream::connect(&KcpConfig::default(), remote)
            .await
            .map_err(|err| PeerError::Dial {
                addr: address.to_string(),
                source: kcp_io_error(err),
            })?;

        Ok((stream, Some(remote)))
    }
}

pub(crate) fn register() {
    register_peer_creator("kcp.Acceptor", || {
        StreamAcceptor::new(KcpBinder, "kcp.Acceptor", "kcp") as PeerRef
    });
    register_peer_creator("kcp.Connector", || {
        StreamConnector::new(KcpDialer, "kcp.Connector", "kcp") as PeerRef
    });
    register_peer_creator("kcp.SyncConnector", || {
        StreamSyncConnector::new(KcpDialer, "kcp.SyncConnector", "kcp") as PeerRef
    });
}
