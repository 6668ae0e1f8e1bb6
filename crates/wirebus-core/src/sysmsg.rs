//! Session lifecycle system messages.
//!
//! These are dispatched through the same pipeline as application messages so
//! a user callback observes one ordered stream per session: accepted or
//! connected first, then decoded messages, then closed last. Ids derive from
//! [`string_hash`](crate::meta::string_hash) of the full name, stable across
//! runs and implementations.

use std::sync::Once;

use serde::{Deserialize, Serialize};

use crate::codec::CodecKind;
use crate::meta::{register_message, string_hash};

/// Why a session ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    /// The transport failed or the remote side went away.
    #[default]
    Io,
    /// `Session::close` was called locally before the teardown.
    Manual,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::Io => write!(f, "IO"),
            CloseReason::Manual => write!(f, "Manual"),
        }
    }
}

/// Session created, before either loop runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInit;

/// An acceptor took a new connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionAccepted;

/// A connector established its connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConnected;

/// A connector failed to establish its connection (and is not retrying).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConnectError;

/// The session ended; always the last event for a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClosed {
    pub reason: CloseReason,
}

/// Close notification for connectionless sessions (UDP), dispatched when the
/// application closes such a session by hand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCloseNotify;

/// Registers the system messages with the binary codec. Idempotent; invoked
/// by the runtime bootstrap before any peer is created.
pub fn register_system_messages() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        register_sys::<SessionInit>("wirebus.SessionInit");
        register_sys::<SessionAccepted>("wirebus.SessionAccepted");
        register_sys::<SessionConnected>("wirebus.SessionConnected");
        register_sys::<SessionConnectError>("wirebus.SessionConnectError");
        register_sys::<SessionClosed>("wirebus.SessionClosed");
        register_sys::<SessionCloseNotify>("wirebus.SessionCloseNotify");
    });
}

fn register_sys<M: crate::meta::Message>(full_name: &str) {
    register_message::<M>(full_name, string_hash(full_name) as u32, CodecKind::Binary);
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{message_id, meta_by_full_name};

    #[test]
    fn system_messages_register_once_with_hash_ids() {
        register_system_messages();
        register_system_messages(); // idempotent

        for name in [
            "wirebus.SessionInit",
            "wirebus.SessionAccepted",
            "wirebus.SessionConnected",
            "wirebus.SessionConnectError",
            "wirebus.SessionClosed",
            "wirebus.SessionCloseNotify",
        ] {
            let meta = meta_by_full_name(name).unwrap_or_else(|| panic!("{name} missing"));
            assert_eq!(meta.id(), string_hash(name) as u32, "{name}");
            assert_eq!(meta.codec(), CodecKind::Binary);
        }

        let closed = SessionClosed {
            reason: CloseReason::Manual,
        };
        assert_eq!(
            message_id(&closed),
            string_hash("wirebus.SessionClosed") as u32
        );
    }

    #[test]
    fn closed_reason_round_trip() {
        register_system_messages();

        let original = SessionClosed {
            reason: CloseReason::Manual,
        };
        let (data, meta) = crate::codec::encode_message(&original).unwrap();
        let (decoded, _) = crate::codec::decode_message(meta.id(), &data).unwrap();
        assert_eq!(decoded.downcast_ref::<SessionClosed>().unwrap(), &original);

        assert_eq!(CloseReason::Io.to_string(), "IO");
        assert_eq!(CloseReason::Manual.to_string(), "Manual");
    }
}
