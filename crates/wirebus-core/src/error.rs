//! Error types for the wirebus runtime
//!
//! Each subsystem has its own error enum; [`WirebusError`] unifies them for
//! callers that cross subsystem boundaries. Transport errors distinguish the
//! benign end-of-stream class (suppressed in logs) from real faults.

use std::io;

// ----------------------------------------------------------------------------
// Subsystem Errors
// ----------------------------------------------------------------------------

/// Errors raised while registering or resolving message metadata.
///
/// Registration collisions are program bugs: they are raised once at process
/// bootstrap and callers are expected to treat them as fatal.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate message id {id}: {type_name} collides with {previous}")]
    DuplicateId {
        id: u32,
        type_name: &'static str,
        previous: &'static str,
    },
    #[error("duplicate message name: {full_name}")]
    DuplicateName { full_name: String },
    #[error("duplicate message type: {type_name}")]
    DuplicateType { type_name: &'static str },
    #[error("message {type_name} requires a nonzero id")]
    ZeroId { type_name: &'static str },
    #[error("message id {id} is not registered")]
    UnknownId { id: u32 },
    #[error("message name {full_name} is not registered")]
    UnknownName { full_name: String },
    #[error("message type {type_name} is not registered")]
    UnknownType { type_name: String },
    #[error("invalid name rule: {0}")]
    InvalidNameRule(#[from] regex::Error),
}

/// Errors raised by codec encode/decode paths.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("codec not found: '{name}'")]
    UnknownCodec { name: String },
    #[error("{codec} encode failed for {type_name}: {reason}")]
    Encode {
        codec: &'static str,
        type_name: &'static str,
        reason: String,
    },
    #[error("{codec} decode failed for {type_name}: {reason}")]
    Decode {
        codec: &'static str,
        type_name: &'static str,
        reason: String,
    },
    #[error("message value does not match registered type {expected}")]
    TypeMismatch { expected: &'static str },
}

/// Errors raised while framing or de-framing packets.
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("packet over size: {len} >= {max}")]
    OverSize { len: usize, max: usize },
    #[error("packet short size")]
    ShortPacket,
    #[error("short msgid")]
    ShortMsgId,
    #[error("datagram length field {field} does not match datagram size {actual}")]
    LengthMismatch { field: usize, actual: usize },
}

/// Transport-level failures.
///
/// The `benign` class covers the normal ways a socket read ends (EOF, reset
/// by peer, local close); recv loops suppress logging for those.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("transmitter unset")]
    TransmitterUnset,
    #[error("read timeout after {0:?}")]
    ReadTimeout(std::time::Duration),
    #[error("write timeout after {0:?}")]
    WriteTimeout(std::time::Duration),
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Whether this error is an expected way for a connection to end.
    pub fn is_benign(&self) -> bool {
        match self {
            TransportError::ConnectionClosed => true,
            TransportError::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}

/// Errors surfaced by the RPC layer.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("rpc time out")]
    Timeout,
    #[error("rpc: invalid target, require a session or a connector with a session")]
    InvalidTarget,
    #[error("rpc: empty session")]
    EmptySession,
}

/// Errors raised while creating, binding or dialing peers.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("peer type not found '{name}', enable the module providing it ({hint})")]
    UnknownPeerType { name: String, hint: &'static str },
    #[error("processor not found '{name}', enable the module providing it ({hint})")]
    UnknownProcessor { name: String, hint: &'static str },
    #[error("bind failed on {addr}: {source}")]
    Bind { addr: String, source: io::Error },
    #[error("dial failed on {addr}: {source}")]
    Dial { addr: String, source: io::Error },
    #[error("peer is already running")]
    AlreadyRunning,
}

/// Errors raised by the `scheme://host:minPort~maxPort/path` parser.
#[derive(Debug, thiserror::Error)]
pub enum AddressError {
    #[error("invalid address format: {addr}")]
    InvalidFormat { addr: String },
    #[error("invalid port range: {addr}")]
    InvalidPortRange { addr: String },
}

// ----------------------------------------------------------------------------
// Unified Error
// ----------------------------------------------------------------------------

/// The unified wirebus error type.
#[derive(Debug, thiserror::Error)]
pub enum WirebusError {
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),
    #[error("peer error: {0}")]
    Peer(#[from] PeerError),
    #[error("address error: {0}")]
    Address(#[from] AddressError),
}

impl WirebusError {
    /// True when the error is a transport failure that normal connection
    /// teardown produces; recv loops skip logging these.
    pub fn is_benign_transport(&self) -> bool {
        matches!(self, WirebusError::Transport(t) if t.is_benign())
    }

    /// True when the error is the RPC timeout sentinel.
    pub fn is_timeout(&self) -> bool {
        matches!(self, WirebusError::Rpc(RpcError::Timeout))
    }
}

impl From<io::Error> for WirebusError {
    fn from(err: io::Error) -> Self {
        WirebusError::Transport(TransportError::Io(err))
    }
}

pub type Result<T> = std::result::Result<T, WirebusError>;

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn benign_transport_classification() {
        let eof = TransportError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "eof"));
        assert!(eof.is_benign());

        let reset = TransportError::Io(io::Error::new(io::ErrorKind::ConnectionReset, "rst"));
        assert!(reset.is_benign());

        assert!(TransportError::ConnectionClosed.is_benign());

        let refused = TransportError::Io(io::Error::new(io::ErrorKind::ConnectionRefused, "no"));
        assert!(!refused.is_benign());
        assert!(!TransportError::TransmitterUnset.is_benign());
    }

    #[test]
    fn timeout_sentinel() {
        let err: WirebusError = RpcError::Timeout.into();
        assert!(err.is_timeout());
        let err: WirebusError = TransportError::ConnectionClosed.into();
        assert!(!err.is_timeout());
        assert!(err.is_benign_transport());
    }
}
