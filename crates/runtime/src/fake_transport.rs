//! In-memory transport for exercising the connection without a browser.
//!
//! ```ignore
//! let (parts, controller) = FakeTransportBuilder::new().build();
//! let connection = Arc::new(Connection::new(parts));
//! tokio::spawn({
//!     let conn = Arc::clone(&connection);
//!     async move { conn.run().await }
//! });
//! controller.inject_response(0, json!({"targetId": "T1"}));
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{Notify, mpsc};

use crate::error::Result;
use crate::transport::{Transport, TransportParts, TransportReceiver};

/// Builder for fake transport instances.
#[derive(Default)]
pub struct FakeTransportBuilder;

impl FakeTransportBuilder {
	pub fn new() -> Self {
		Self
	}

	/// Returns the parts for a [`Connection`](crate::Connection) and a controller driving the peer side.
	pub fn build(self) -> (TransportParts, FakeTransportController) {
		let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
		let (message_tx, message_rx) = mpsc::unbounded_channel();
		let sent = Arc::new(Mutex::new(Vec::new()));
		let notify = Arc::new(Notify::new());

		let parts = TransportParts {
			sender: Box::new(FakeTransportSender {
				sent: Arc::clone(&sent),
				notify: Arc::clone(&notify),
			}),
			receiver: Box::new(FakeTransportReceiver { inbound_rx, message_tx }),
			message_rx,
		};

		(parts, FakeTransportController { inbound_tx, sent, notify })
	}
}

/// Peer side of a fake transport: injects frames and inspects what was sent.
pub struct FakeTransportController {
	inbound_tx: mpsc::UnboundedSender<Value>,
	sent: Arc<Mutex<Vec<Value>>>,
	notify: Arc<Notify>,
}

impl FakeTransportController {
	pub fn inject(&self, message: Value) {
		let _ = self.inbound_tx.send(message);
	}

	pub fn inject_response(&self, id: u64, result: Value) {
		self.inject(json!({ "id": id, "result": result }));
	}

	pub fn inject_error(&self, id: u64, code: i64, message: &str) {
		self.inject(json!({ "id": id, "error": { "code": code, "message": message } }));
	}

	pub fn inject_event(&self, method: &str, params: Value, session_id: Option<&str>) {
		let mut event = json!({ "method": method, "params": params });
		if let Some(session_id) = session_id {
			event["sessionId"] = Value::String(session_id.to_string());
		}
		self.inject(event);
	}

	/// Snapshot of everything sent so far.
	pub fn sent(&self) -> Vec<Value> {
		self.sent.lock().clone()
	}

	/// Waits until at least `count` messages were sent and returns them.
	pub async fn wait_for_sent(&self, count: usize) -> Vec<Value> {
		loop {
			let notified = self.notify.notified();
			{
				let sent = self.sent.lock();
				if sent.len() >= count {
					return sent.clone();
				}
			}
			notified.await;
		}
	}
}

struct FakeTransportSender {
	sent: Arc<Mutex<Vec<Value>>>,
	notify: Arc<Notify>,
}

impl Transport for FakeTransportSender {
	fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
		Box::pin(async move {
			self.sent.lock().push(message);
			self.notify.notify_waiters();
			Ok(())
		})
	}
}

struct FakeTransportReceiver {
	inbound_rx: mpsc::UnboundedReceiver<Value>,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl TransportReceiver for FakeTransportReceiver {
	fn run(mut self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
		Box::pin(async move {
			while let Some(message) = self.inbound_rx.recv().await {
				if self.message_tx.send(message).is_err() {
					break;
				}
			}
			Ok(())
		})
	}
}
