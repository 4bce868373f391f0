use std::time::Duration;

use chorus_e2e::socket::SocketListener;
use chorus_e2e::E2eError;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

/// Socket.IO Listener
///
/// Runs a minimal Engine.IO server: open, namespace connect, one ping,
/// then two events. The listener must answer the ping, buffer the event
/// it was not waiting for, and time out on events that never arrive.
#[tokio::test]
async fn listener_handshakes_answers_pings_and_buffers_events() {
    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let origin = format!("http://{}", tcp.local_addr().unwrap());

    let server = tokio::spawn(async move {
        let (stream, _) = tcp.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();

        ws.send(Message::Text(r#"0{"sid":"e1","pingInterval":25000,"pingTimeout":20000}"#.into()))
            .await
            .unwrap();

        let connect = ws.next().await.unwrap().unwrap();
        assert_eq!(connect.to_text().unwrap(), r#"40{"token":"jwt-1"}"#);
        ws.send(Message::Text(r#"40{"sid":"s1"}"#.into())).await.unwrap();

        ws.send(Message::Text("2".into())).await.unwrap();
        let pong = ws.next().await.unwrap().unwrap();
        assert_eq!(pong.to_text().unwrap(), "3");

        ws.send(Message::Text(r#"42["message:queued",{"id":7}]"#.into())).await.unwrap();
        ws.send(Message::Text(r#"42["message:sent",{"id":7,"status":"sent"}]"#.into()))
            .await
            .unwrap();

        // Drain until the client's close completes the handshake
        while let Some(Ok(_)) = ws.next().await {}
    });

    let mut listener = SocketListener::connect(&origin, "jwt-1", Duration::from_secs(5)).await.unwrap();

    let sent = listener.wait_for("message:sent", Duration::from_secs(5)).await.unwrap();
    assert_eq!(sent.args[0]["status"], "sent");
    assert_eq!(listener.pending().count(), 1);

    let queued = listener.wait_for("message:queued", Duration::from_millis(10)).await.unwrap();
    assert_eq!(queued.args[0]["id"], 7);

    let err = listener
        .wait_for("message:delivered", Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(matches!(err, E2eError::Timeout(_)));

    listener.close().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn refused_namespace_connect_is_an_error() {
    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let origin = format!("http://{}", tcp.local_addr().unwrap());

    tokio::spawn(async move {
        let (stream, _) = tcp.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.send(Message::Text(r#"0{"sid":"e2"}"#.into())).await.unwrap();
        let _ = ws.next().await;
        ws.send(Message::Text(r#"44{"message":"invalid token"}"#.into())).await.unwrap();
        let _ = ws.next().await;
    });

    let err = SocketListener::connect(&origin, "expired", Duration::from_secs(5))
        .await
        .err()
        .unwrap();
    assert!(err.to_string().contains("invalid token"));
}

#[tokio::test]
async fn server_closing_before_namespace_ack_is_an_error() {
    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let origin = format!("http://{}", tcp.local_addr().unwrap());

    tokio::spawn(async move {
        let (stream, _) = tcp.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.send(Message::Text(r#"0{"sid":"e3"}"#.into())).await.unwrap();
        let _ = ws.next().await;
        let _ = ws.close(None).await;
    });

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        SocketListener::connect(&origin, "jwt-1", Duration::from_secs(1)),
    )
    .await
    .expect("connect must not hang once the server is gone");

    let err = result.err().unwrap();
    assert!(!matches!(err, E2eError::Timeout(_)), "got {err:?}");
}
