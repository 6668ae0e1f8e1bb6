//! WebSocket echo round-trip over the 2-byte-id binary framing.

mod common;

use std::sync::Arc;

use wirebus_core::queue::EventQueue;
use wirebus_runtime::peer::new_generic_peer;
use wirebus_runtime::proc::{bind_processor, SyncReceiver};

use common::Echo;

#[tokio::test]
async fn ws_echo_round_trip() {
    common::init();

    let queue = EventQueue::new();
    queue.start_loop();

    let server =
        new_generic_peer("ws.Acceptor", "ws-server", "127.0.0.1:0", Some(queue.clone())).unwrap();
    bind_processor(
        &server,
        "ws.ltv",
        Arc::new(move |ev| {
            if let Some(echo) = ev.message().downcast_ref::<Echo>() {
                ev.session().send(Box::new(echo.clone()));
            }
        }),
    )
    .unwrap();
    server.clone().start().await.unwrap();
    let port = server.local_port().unwrap();

    let client = new_generic_peer(
        "ws.Connector",
        "ws-client",
        &format!("127.0.0.1:{port}"),
        Some(queue.clone()),
    )
    .unwrap();
    let receiver = SyncReceiver::new();
    bind_processor(&client, "ws.ltv", receiver.callback()).unwrap();
    client.clone().start().await.unwrap();

    common::wait_msg(&receiver, "wirebus.SessionConnected").await;

    client.session().unwrap().send(Box::new(Echo {
        msg: "over websocket".to_string(),
        value: 77,
    }));

    let reply = common::wait_msg(&receiver, "echotest.Echo").await;
    let reply = reply.downcast_ref::<Echo>().unwrap();
    assert_eq!(reply.msg, "over websocket");
    assert_eq!(reply.value, 77);

    client.stop().await;
    server.stop().await;
    queue.stop_loop();
    queue.wait().await;
}
