//! Request/response correlation over a DevTools transport.
//!
//! Every command gets a sequential id and a oneshot channel; the message loop
//! completes the channel when the matching reply arrives. Events (frames with
//! no `id`) are fanned out on a broadcast channel so page handles can wait for
//! navigation without polling.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use slotclaim_protocol::{Event, Message, Request};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, trace};

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportParts, TransportReceiver};

const EVENT_BUFFER: usize = 256;

type Callbacks = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

/// DevTools connection shared by every context and page of one browser.
pub struct Connection {
	last_id: AtomicU64,
	callbacks: Callbacks,
	sender: tokio::sync::Mutex<Box<dyn Transport>>,
	inbound: Mutex<Option<(Box<dyn TransportReceiver>, mpsc::UnboundedReceiver<Value>)>>,
	events: broadcast::Sender<Event>,
	closed: AtomicBool,
}

impl Connection {
	pub fn new(parts: TransportParts) -> Self {
		let (events, _) = broadcast::channel(EVENT_BUFFER);
		Self {
			last_id: AtomicU64::new(0),
			callbacks: Arc::new(Mutex::new(HashMap::new())),
			sender: tokio::sync::Mutex::new(parts.sender),
			inbound: Mutex::new(Some((parts.receiver, parts.message_rx))),
			events,
			closed: AtomicBool::new(false),
		}
	}

	/// Sends `method` and waits for its reply. Page-scoped commands pass the flat `session_id`.
	pub async fn send(&self, method: &str, params: Value, session_id: Option<&str>) -> Result<Value> {
		if self.closed.load(Ordering::SeqCst) {
			return Err(Error::ConnectionClosed);
		}

		let id = self.last_id.fetch_add(1, Ordering::SeqCst);
		let (tx, rx) = oneshot::channel();
		self.callbacks.lock().insert(id, tx);

		let request = Request {
			id,
			method: method.to_string(),
			params,
			session_id: session_id.map(str::to_string),
		};
		trace!(target = "slotclaim.runtime", id, %method, "send");

		let value = serde_json::to_value(&request)?;
		if let Err(err) = self.sender.lock().await.send(value).await {
			self.callbacks.lock().remove(&id);
			return Err(err);
		}

		rx.await.map_err(|_| Error::ConnectionClosed).and_then(|result| result)
	}

	/// Like [`send`](Self::send) but decodes the reply.
	pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value, session_id: Option<&str>) -> Result<T> {
		let value = self.send(method, params, session_id).await?;
		serde_json::from_value(value).map_err(|e| Error::UnexpectedReply {
			method: method.to_string(),
			reason: e.to_string(),
		})
	}

	/// Subscribes to every event received after this call.
	pub fn subscribe(&self) -> broadcast::Receiver<Event> {
		self.events.subscribe()
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	/// Runs the message loop until the transport closes. Spawn this once per connection.
	pub async fn run(&self) {
		let Some((receiver, mut message_rx)) = self.inbound.lock().take() else {
			error!(target = "slotclaim.runtime", "connection message loop started twice");
			return;
		};

		let receiver_task = tokio::spawn(async move {
			if let Err(e) = receiver.run().await {
				error!(target = "slotclaim.runtime", error = %e, "transport receive failed");
			}
		});

		while let Some(value) = message_rx.recv().await {
			match serde_json::from_value::<Message>(value) {
				Ok(message) => {
					if let Err(e) = self.dispatch(message) {
						debug!(target = "slotclaim.runtime", error = %e, "dropping message");
					}
				}
				Err(e) => debug!(target = "slotclaim.runtime", error = %e, "unrecognized devtools frame"),
			}
		}

		debug!(target = "slotclaim.runtime", "message loop ended (transport closed)");
		self.closed.store(true, Ordering::SeqCst);
		for (_, callback) in self.callbacks.lock().drain() {
			let _ = callback.send(Err(Error::ConnectionClosed));
		}
		let _ = receiver_task.await;
	}

	fn dispatch(&self, message: Message) -> Result<()> {
		match message {
			Message::Response(response) => {
				let callback = self.callbacks.lock().remove(&response.id).ok_or_else(|| Error::UnexpectedReply {
					method: format!("#{}", response.id),
					reason: "no pending request with this id".to_string(),
				})?;
				let result = match response.error {
					Some(err) => Err(Error::Protocol {
						code: err.code,
						message: err.message,
					}),
					None => Ok(response.result.unwrap_or(Value::Null)),
				};
				let _ = callback.send(result);
				Ok(())
			}
			Message::Event(event) => {
				trace!(target = "slotclaim.runtime", method = %event.method, "event");
				// No subscribers is fine.
				let _ = self.events.send(event);
				Ok(())
			}
		}
	}
}
