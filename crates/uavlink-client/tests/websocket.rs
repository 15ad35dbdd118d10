//! End-to-end over a local WebSocket server.

use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use uavlink_client::{Client, ClientConfig, HandshakeState};

async fn listen() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

async fn next_json(stream: &mut SplitStream<WebSocketStream<TcpStream>>) -> Value {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
            Some(Ok(_)) => continue,
            other => panic!("connection ended early: {other:?}"),
        }
    }
}

#[tokio::test]
async fn pub_sub_event_round_trip() {
    let (listener, addr) = listen().await;
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let (mut sink, mut stream) = ws.split();

        let def = json!({ "type": "def", "payload": { "identifier": "IMU", "type": "event", "fields": [] } });
        sink.send(Message::Text(def.to_string().into())).await.unwrap();

        let sub = next_json(&mut stream).await;
        assert_eq!(sub, json!({ "type": "sub", "payload": { "identifier": "IMU" } }));

        let event = json!({ "type": "event", "payload": { "identifier": "IMU", "data": { "x": 3 } } });
        sink.send(Message::Text(event.to_string().into())).await.unwrap();

        while let Some(Ok(_)) = stream.next().await {}
    });

    let client = Client::new(ClientConfig::pub_sub(format!("ws://{addr}")));
    let (tx, mut rx) = mpsc::unbounded_channel();
    client.attach("IMU", move |update| {
        let _ = tx.send(update.data.clone());
    });

    client.connect().await.unwrap();
    client.ready().await.unwrap();

    let data = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(data, json!({ "x": 3 }));

    client.disconnect();
    assert!(!client.is_connected());
    server.await.unwrap();
}

#[tokio::test]
async fn telemetry_handshake_over_bulk_definitions() {
    let (listener, addr) = listen().await;
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let (mut sink, mut stream) = ws.split();

        let bulk = json!([
            { "name": "GCSTelemetryStats", "id": 1, "fields": [] },
            { "name": "FlightTelemetryStats", "id": 2, "fields": [] },
        ]);
        sink.send(Message::Text(bulk.to_string().into())).await.unwrap();

        assert_eq!(
            next_json(&mut stream).await,
            json!({ "type": "sub", "payload": { "objectId": 2 } })
        );
        let request = next_json(&mut stream).await;
        assert_eq!(request["payload"]["data"]["Status"], "HandshakeReq");

        let ack = json!({ "type": "update", "payload": { "objectId": 2, "data": { "Status": "HandshakeAck" } } });
        sink.send(Message::Text(ack.to_string().into())).await.unwrap();
        let reply = next_json(&mut stream).await;
        assert_eq!(reply["payload"]["data"]["Status"], "Connected");

        let connected = json!({ "type": "update", "payload": { "objectId": 2, "data": { "Status": "Connected" } } });
        sink.send(Message::Text(connected.to_string().into())).await.unwrap();

        while let Some(Ok(_)) = stream.next().await {}
    });

    let mut config = ClientConfig::telemetry(format!("ws://{addr}"));
    config.bulk_definitions = true;
    let client = Client::new(config);
    client.connect().await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), client.ready())
        .await
        .unwrap()
        .unwrap();
    assert!(client.telemetry_ready());
    assert_eq!(client.handshake_state(), Some(HandshakeState::Connected));

    client.disconnect();
    server.await.unwrap();
}

#[tokio::test]
async fn connect_fails_without_a_server() {
    let (listener, addr) = listen().await;
    drop(listener);
    let client = Client::new(ClientConfig::pub_sub(format!("ws://{addr}")));
    assert!(client.connect().await.is_err());
    assert!(!client.is_connected());
}
