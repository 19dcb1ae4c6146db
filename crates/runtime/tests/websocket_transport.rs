//! WebSocket transport against a local tungstenite server.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use gw_runtime::ErrorKind;
use gw_runtime::transport::WebSocketTransport;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

#[tokio::test]
async fn websocket_transport_echo_round_trip() -> anyhow::Result<()> {
	let listener = TcpListener::bind("127.0.0.1:0").await?;
	let addr = listener.local_addr()?;

	let server = tokio::spawn(async move {
		let (stream, _) = listener.accept().await.unwrap();
		let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
		let (mut ws_tx, mut ws_rx) = ws.split();

		let incoming = ws_rx.next().await.unwrap().unwrap();
		assert_eq!(incoming, Message::Text("{\"ping\":true}".into()));

		ws_tx.send(Message::Text("not json".into())).await.unwrap();
		ws_tx.send(Message::Text("{\"pong\":true}".into())).await.unwrap();
	});

	let url = format!("ws://{addr}");
	let parts = WebSocketTransport::connect(&url, Duration::from_secs(5), None).await?;
	let mut sender = parts.sender;
	let receiver = parts.receiver;
	let mut rx = parts.message_rx;

	let recv_task = tokio::spawn(async move { receiver.run().await });

	sender.send(json!({ "ping": true })).await?;

	// The malformed frame is skipped.
	let reply = rx.recv().await.expect("should receive reply");
	assert_eq!(reply["pong"], true);

	recv_task.abort();
	let _ = recv_task.await;
	server.await?;
	Ok(())
}

#[tokio::test]
async fn refused_connection_is_classified() {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	drop(listener);

	let err = WebSocketTransport::connect(&format!("ws://{addr}"), Duration::from_secs(5), None)
		.await
		.err()
		.unwrap();
	assert_eq!(err.kind(), ErrorKind::ConnectionRefused);
	assert!(err.is_expected_on_teardown());
}

#[tokio::test]
async fn silent_server_times_out() {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();

	// Accept the TCP connection but never answer the handshake.
	let server = tokio::spawn(async move {
		let (stream, _) = listener.accept().await.unwrap();
		tokio::time::sleep(Duration::from_millis(500)).await;
		drop(stream);
	});

	let err = WebSocketTransport::connect(&format!("ws://{addr}"), Duration::from_millis(100), None)
		.await
		.err()
		.unwrap();
	assert_eq!(err.kind(), ErrorKind::ConnectTimeout);
	server.abort();
}

#[tokio::test]
async fn oversized_message_ends_the_receiver() -> anyhow::Result<()> {
	let listener = TcpListener::bind("127.0.0.1:0").await?;
	let addr = listener.local_addr()?;

	let server = tokio::spawn(async move {
		let (stream, _) = listener.accept().await.unwrap();
		let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
		let blob = format!("{{\"blob\":\"{}\"}}", "x".repeat(4096));
		let _ = ws.send(Message::Text(blob)).await;
		let _ = ws.next().await;
	});

	let parts = WebSocketTransport::connect(&format!("ws://{addr}"), Duration::from_secs(5), Some(1024)).await?;
	let mut rx = parts.message_rx;

	let err = parts.receiver.run().await.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::Protocol);
	assert!(rx.recv().await.is_none());

	server.abort();
	Ok(())
}
