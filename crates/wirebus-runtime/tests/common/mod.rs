#![allow(dead_code)]

//! Shared fixtures for the integration tests.

use std::sync::Once;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use wirebus_core::codec::CodecKind;
use wirebus_core::meta::{register_message, MessageBox};
use wirebus_runtime::proc::SyncReceiver;

/// The canonical test message: json codec, id 1234.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Echo {
    pub msg: String,
    pub value: i32,
}

/// Bootstraps the runtime, installs a test subscriber and registers the
/// shared test messages. Safe to call from every test.
pub fn init() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();

        wirebus_runtime::bootstrap();
        register_message::<Echo>("echotest.Echo", 1234, CodecKind::Json);
    });
}

/// Waits for a named message with a test-wide deadline.
pub async fn wait_msg(receiver: &SyncReceiver, full_name: &str) -> MessageBox {
    tokio::time::timeout(Duration::from_secs(5), receiver.wait_message(full_name))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {full_name}"))
}
