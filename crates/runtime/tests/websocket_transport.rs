//! WebSocket transport against a local echo peer.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use slotclaim_runtime::{Connection, WebSocketTransport};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

#[tokio::test]
async fn websocket_connection_round_trip() {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();

	let server = tokio::spawn(async move {
		let (stream, _) = listener.accept().await.unwrap();
		let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
		let (mut ws_tx, mut ws_rx) = ws.split();

		let incoming = ws_rx.next().await.unwrap().unwrap();
		let request: serde_json::Value = serde_json::from_str(incoming.to_text().unwrap()).unwrap();
		assert_eq!(request["method"], "Target.createTarget");

		ws_tx
			.send(Message::text(json!({"method": "Target.targetCreated", "params": {}}).to_string()))
			.await
			.unwrap();
		ws_tx
			.send(Message::text(json!({"id": request["id"], "result": {"targetId": "T1"}}).to_string()))
			.await
			.unwrap();
	});

	let parts = WebSocketTransport::connect(&format!("ws://{addr}")).await.unwrap();
	let connection = Arc::new(Connection::new(parts));
	let conn = Arc::clone(&connection);
	let loop_task = tokio::spawn(async move { conn.run().await });

	let reply = connection
		.send("Target.createTarget", json!({"url": "about:blank"}), None)
		.await
		.unwrap();
	assert_eq!(reply["targetId"], "T1");

	server.await.unwrap();
	loop_task.abort();
}
