//! Message transports carrying DevTools JSON frames.
//!
//! A transport is split in two halves so the connection can send while a
//! background task drains inbound frames into an unbounded channel.

use std::future::Future;
use std::pin::Pin;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Outbound half of a transport.
pub trait Transport: Send {
	fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Inbound half of a transport. `run` forwards every parsed frame until the peer goes away.
pub trait TransportReceiver: Send {
	fn run(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>>;
}

/// Both halves plus the channel the receiver feeds.
pub struct TransportParts {
	pub sender: Box<dyn Transport>,
	pub receiver: Box<dyn TransportReceiver>,
	pub message_rx: mpsc::UnboundedReceiver<Value>,
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport to a browser's `webSocketDebuggerUrl`.
pub struct WebSocketTransport;

impl WebSocketTransport {
	pub async fn connect(url: &str) -> Result<TransportParts> {
		debug!(target = "slotclaim.runtime", %url, "connecting devtools websocket");
		let (stream, _) = connect_async(url)
			.await
			.map_err(|e| Error::Transport(format!("failed to connect to {url}: {e}")))?;
		let (sink, stream) = stream.split();
		let (message_tx, message_rx) = mpsc::unbounded_channel();

		Ok(TransportParts {
			sender: Box::new(WebSocketSender { sink }),
			receiver: Box::new(WebSocketReceiver { stream, message_tx }),
			message_rx,
		})
	}
}

struct WebSocketSender {
	sink: SplitSink<WsStream, Message>,
}

impl Transport for WebSocketSender {
	fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
		Box::pin(async move {
			let text = serde_json::to_string(&message)?;
			self.sink.send(Message::text(text)).await.map_err(|e| Error::Transport(e.to_string()))
		})
	}
}

struct WebSocketReceiver {
	stream: SplitStream<WsStream>,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl TransportReceiver for WebSocketReceiver {
	fn run(mut self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
		Box::pin(async move {
			while let Some(frame) = self.stream.next().await {
				let frame = frame.map_err(|e| Error::Transport(e.to_string()))?;
				match frame {
					Message::Text(text) => match serde_json::from_str::<Value>(&text) {
						Ok(value) => {
							if self.message_tx.send(value).is_err() {
								break;
							}
						}
						Err(e) => warn!(target = "slotclaim.runtime", error = %e, "dropping unparseable devtools frame"),
					},
					Message::Close(_) => break,
					_ => {}
				}
			}
			Ok(())
		})
	}
}
