//! TCP echo round-trip with the json codec, covering session lifecycle
//! ordering and close reasons on both sides.

mod common;

use std::sync::Arc;

use tokio::sync::mpsc;

use wirebus_core::queue::EventQueue;
use wirebus_core::sysmsg::{CloseReason, SessionClosed};
use wirebus_runtime::peer::new_generic_peer;
use wirebus_runtime::proc::{bind_processor, SyncReceiver};

use common::Echo;

#[tokio::test]
async fn tcp_echo_with_json_codec() {
    common::init();

    let queue = EventQueue::new();
    queue.start_loop();

    // server echoes every Echo and reports its session closures
    let (server_closed_tx, mut server_closed_rx) = mpsc::unbounded_channel::<CloseReason>();

    let server =
        new_generic_peer("tcp.Acceptor", "server", "127.0.0.1:0", Some(queue.clone())).unwrap();
    bind_processor(
        &server,
        "tcp.ltv",
        Arc::new(move |ev| {
            if let Some(echo) = ev.message().downcast_ref::<Echo>() {
                ev.session().send(Box::new(echo.clone()));
            } else if let Some(closed) = ev.message().downcast_ref::<SessionClosed>() {
                let _ = server_closed_tx.send(closed.reason);
            }
        }),
    )
    .unwrap();
    server.clone().start().await.unwrap();
    let port = server.local_port().expect("server bound");

    // client drives the conversation through a sync receiver
    let client = new_generic_peer(
        "tcp.Connector",
        "client",
        &format!("127.0.0.1:{port}"),
        Some(queue.clone()),
    )
    .unwrap();
    let receiver = SyncReceiver::new();
    bind_processor(&client, "tcp.ltv", receiver.callback()).unwrap();
    client.clone().start().await.unwrap();

    common::wait_msg(&receiver, "wirebus.SessionConnected").await;

    client.session().unwrap().send(Box::new(Echo {
        msg: "hello".to_string(),
        value: 1234,
    }));

    let reply = common::wait_msg(&receiver, "echotest.Echo").await;
    let reply = reply.downcast_ref::<Echo>().unwrap();
    assert_eq!(reply.msg, "hello");
    assert_eq!(reply.value, 1234);

    // local close: the client observes Manual, the server observes IO
    client.session().unwrap().close();

    let closed = common::wait_msg(&receiver, "wirebus.SessionClosed").await;
    assert_eq!(
        closed.downcast_ref::<SessionClosed>().unwrap().reason,
        CloseReason::Manual
    );

    let server_reason = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        server_closed_rx.recv(),
    )
    .await
    .expect("server saw the close")
    .unwrap();
    assert_eq!(server_reason, CloseReason::Io);

    server.stop().await;
    queue.stop_loop();
    queue.wait().await;
}
