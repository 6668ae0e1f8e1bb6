//! UDP session tracking: one datagram creates a leased session; silence
//! lets the TTL sweep evict it. Datagrams with a bad length field drop
//! silently.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use wirebus_core::queue::EventQueue;
use wirebus_runtime::peer::udp::UdpAcceptor;
use wirebus_runtime::peer::new_generic_peer;
use wirebus_runtime::proc::bind_processor;

use common::Echo;

fn frame_udp_echo(value: i32) -> Vec<u8> {
    let payload = serde_json::to_vec(&Echo {
        msg: "udp".to_string(),
        value,
    })
    .unwrap();

    let total = (4 + payload.len()) as u16;
    let mut pkt = Vec::new();
    pkt.extend_from_slice(&total.to_le_bytes());
    pkt.extend_from_slice(&1234u16.to_le_bytes());
    pkt.extend_from_slice(&payload);
    pkt
}

#[tokio::test]
async fn session_ttl_evicts_silent_sources() {
    common::init();

    let queue = EventQueue::new();
    queue.start_loop();

    let (tx, mut rx) = mpsc::unbounded_channel::<i32>();

    let server =
        new_generic_peer("udp.Acceptor", "udp-server", "127.0.0.1:0", Some(queue.clone()))
            .unwrap();
    {
        let acceptor = server.as_any().downcast_ref::<UdpAcceptor>().unwrap();
        acceptor.set_session_ttl(Duration::from_millis(300));
        acceptor.set_clean_interval(Duration::from_millis(50));
    }
    bind_processor(
        &server,
        "udp.ltv",
        Arc::new(move |ev| {
            if let Some(echo) = ev.message().downcast_ref::<Echo>() {
                let _ = tx.send(echo.value);
            }
        }),
    )
    .unwrap();
    server.clone().start().await.unwrap();
    let port = server.local_port().unwrap();

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client
        .send_to(&frame_udp_echo(11), ("127.0.0.1", port))
        .await
        .unwrap();

    // the datagram arrived and created a tracked session
    let value = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("datagram delivered")
        .unwrap();
    assert_eq!(value, 11);

    let acceptor = server.as_any().downcast_ref::<UdpAcceptor>().unwrap();
    assert_eq!(acceptor.track_count(), 1);
    assert_eq!(server.core().sessions().count(), 1);

    // the client goes silent: the sweep evicts the lease
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if acceptor.track_count() == 0 && server.core().sessions().count() == 0 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "session was not evicted"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    server.stop().await;
    queue.stop_loop();
    queue.wait().await;
}

#[tokio::test]
async fn mismatched_length_field_drops_silently() {
    common::init();

    let queue = EventQueue::new();
    queue.start_loop();

    let (tx, mut rx) = mpsc::unbounded_channel::<i32>();

    let server =
        new_generic_peer("udp.Acceptor", "udp-drop", "127.0.0.1:0", Some(queue.clone()))
            .unwrap();
    bind_processor(
        &server,
        "udp.ltv",
        Arc::new(move |ev| {
            if let Some(echo) = ev.message().downcast_ref::<Echo>() {
                let _ = tx.send(echo.value);
            }
        }),
    )
    .unwrap();
    server.clone().start().await.unwrap();
    let port = server.local_port().unwrap();

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    // corrupt the length field: totalLen no longer matches the datagram
    let mut bad = frame_udp_echo(1);
    bad[0] = bad[0].wrapping_add(3);
    client.send_to(&bad, ("127.0.0.1", port)).await.unwrap();

    // a good datagram afterwards still flows
    client
        .send_to(&frame_udp_echo(2), ("127.0.0.1", port))
        .await
        .unwrap();

    let value = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("good datagram delivered")
        .unwrap();
    assert_eq!(value, 2, "the corrupt datagram must not dispatch");

    server.stop().await;
    queue.stop_loop();
    queue.wait().await;
}

#[tokio::test]
async fn udp_connector_echo() {
    common::init();

    let queue = EventQueue::new();
    queue.start_loop();

    // server echoes Echo messages back to their source
    let server =
        new_generic_peer("udp.Acceptor", "udp-echo", "127.0.0.1:0", Some(queue.clone()))
            .unwrap();
    bind_processor(
        &server,
        "udp.ltv",
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
        "udp.Connector",
        "udp-client",
        &format!("127.0.0.1:{port}"),
        Some(queue.clone()),
    )
    .unwrap();
    let receiver = wirebus_runtime::proc::SyncReceiver::new();
    bind_processor(&client, "udp.ltv", receiver.callback()).unwrap();
    client.clone().start().await.unwrap();

    common::wait_msg(&receiver, "wirebus.SessionConnected").await;

    client.session().unwrap().send(Box::new(Echo {
        msg: "ping".to_string(),
        value: 3,
    }));

    let reply = common::wait_msg(&receiver, "echotest.Echo").await;
    assert_eq!(reply.downcast_ref::<Echo>().unwrap().value, 3);

    client.stop().await;
    server.stop().await;
    queue.stop_loop();
    queue.wait().await;
}
