//! Relay envelope with passthrough fields, including the reply path that
//! carries the original passthrough back.

mod common;

use std::sync::Once;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use wirebus_core::codec::CodecKind;
use wirebus_core::meta::register_message;
use wirebus_core::queue::EventQueue;
use wirebus_runtime::peer::new_generic_peer;
use wirebus_runtime::proc::{bind_processor, SyncReceiver};
use wirebus_runtime::relay::{relay, Passthrough, RelayRecvMsgEvent};
use wirebus_runtime::Event;

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct MsgX {
    label: String,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct MsgY {
    label: String,
}

fn init_relay_messages() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        common::init();
        register_message::<MsgX>("relaytest.MsgX", 0x5301, CodecKind::Json);
        register_message::<MsgY>("relaytest.MsgY", 0x5302, CodecKind::Json);
    });
}

async fn wait_relay_event(receiver: &SyncReceiver) -> Box<dyn Event> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let ev = receiver.recv().await;
            if ev.as_any().is::<RelayRecvMsgEvent>() {
                return ev;
            }
        }
    })
    .await
    .expect("timed out waiting for relay event")
}

#[tokio::test]
async fn relay_passthrough_and_reply() {
    init_relay_messages();

    let queue = EventQueue::new();
    queue.start_loop();

    // B: the acceptor side observing the relayed message
    let b_peer =
        new_generic_peer("tcp.Acceptor", "relay-b", "127.0.0.1:0", Some(queue.clone())).unwrap();
    let b_receiver = SyncReceiver::new();
    bind_processor(&b_peer, "tcp.ltv", b_receiver.callback()).unwrap();
    b_peer.clone().start().await.unwrap();
    let port = b_peer.local_port().unwrap();

    // A: the connector side sending the relay
    let a_peer = new_generic_peer(
        "tcp.Connector",
        "relay-a",
        &format!("127.0.0.1:{port}"),
        Some(queue.clone()),
    )
    .unwrap();
    let a_receiver = SyncReceiver::new();
    bind_processor(&a_peer, "tcp.ltv", a_receiver.callback()).unwrap();
    a_peer.clone().start().await.unwrap();

    common::wait_msg(&a_receiver, "wirebus.SessionConnected").await;

    let a_ses = a_peer.session().unwrap();
    relay(
        &a_ses,
        Some(&MsgX {
            label: "payload".to_string(),
        }),
        Passthrough::new().with_i64(42).with_str("tag"),
    )
    .unwrap();

    // B observes the inner message plus the passthrough fields
    let ev = wait_relay_event(&b_receiver).await;
    let relay_ev = ev.as_any().downcast_ref::<RelayRecvMsgEvent>().unwrap();
    assert_eq!(
        relay_ev.message().downcast_ref::<MsgX>().unwrap().label,
        "payload"
    );
    assert_eq!(relay_ev.pass_through_as_i64(), 42);
    assert_eq!(relay_ev.pass_through_as_str(), "tag");
    assert!(relay_ev.pass_through_as_i64_slice().is_empty());
    assert!(relay_ev.pass_through_as_bytes().is_empty());

    // the reply carries the same passthrough back to A
    relay_ev
        .reply(&MsgY {
            label: "answer".to_string(),
        })
        .unwrap();

    let ev = wait_relay_event(&a_receiver).await;
    let relay_ev = ev.as_any().downcast_ref::<RelayRecvMsgEvent>().unwrap();
    assert_eq!(
        relay_ev.message().downcast_ref::<MsgY>().unwrap().label,
        "answer"
    );
    assert_eq!(relay_ev.pass_through_as_i64(), 42);
    assert_eq!(relay_ev.pass_through_as_str(), "tag");

    a_peer.stop().await;
    b_peer.stop().await;
    queue.stop_loop();
    queue.wait().await;
}
