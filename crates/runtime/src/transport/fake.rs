//! In-memory transport for exercising the connection without a server.
//!
//! ```ignore
//! let (parts, controller) = FakeTransportBuilder::new().build();
//! let connection = Arc::new(Connection::new(parts));
//! tokio::spawn({
//!     let conn = Arc::clone(&connection);
//!     async move { conn.run().await }
//! });
//!
//! let fut = connection.send_message("gateway", "gateway.callbackCategory", json!(null), Default::default());
//! controller.inject_response(0, json!("callbacks"));
//! let category = fut.await?;
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc};

use super::{Transport, TransportParts, TransportReceiver};
use crate::error::{Error, Result};

#[derive(Default)]
pub struct FakeTransportBuilder {
	fail_sends: bool,
}

impl FakeTransportBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	/// Makes every send fail with a transport error.
	pub fn failing_sends(mut self) -> Self {
		self.fail_sends = true;
		self
	}

	/// Returns the parts for a [`Connection`](crate::connection::Connection) and a
	/// controller for injecting inbound messages and inspecting sent ones.
	pub fn build(self) -> (TransportParts, FakeTransportController) {
		let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
		let (message_tx, message_rx) = mpsc::unbounded_channel();
		let (sent_tx, sent_rx) = mpsc::unbounded_channel();
		let sent = Arc::new(Mutex::new(Vec::new()));

		let sender = FakeTransportSender {
			sent: Arc::clone(&sent),
			sent_tx,
			fail: self.fail_sends,
		};
		let receiver = FakeTransportReceiver { inbound_rx, message_tx };
		let controller = FakeTransportController {
			inbound_tx,
			sent,
			sent_rx: Mutex::new(sent_rx),
		};

		let parts = TransportParts {
			sender: Box::new(sender),
			receiver: Box::new(receiver),
			message_rx,
		};
		(parts, controller)
	}
}

/// Drives the server side of a fake transport.
pub struct FakeTransportController {
	inbound_tx: mpsc::UnboundedSender<Value>,
	sent: Arc<Mutex<Vec<Value>>>,
	sent_rx: Mutex<mpsc::UnboundedReceiver<Value>>,
}

impl FakeTransportController {
	/// Injects a raw inbound message.
	pub fn inject(&self, message: Value) {
		let _ = self.inbound_tx.send(message);
	}

	pub fn inject_response(&self, id: u32, result: Value) {
		self.inject(json!({ "id": id, "result": result }));
	}

	pub fn inject_error(&self, id: u32, name: &str, message: &str) {
		self.inject(json!({
			"id": id,
			"error": { "error": { "message": message, "name": name } }
		}));
	}

	/// Injects a server call addressed to a local callback identity.
	pub fn inject_call(&self, target: &str, method: &str, params: Value) {
		self.inject(json!({ "target": target, "method": method, "params": params }));
	}

	/// Takes all sent messages, clearing the buffer.
	pub async fn take_sent(&self) -> Vec<Value> {
		std::mem::take(&mut *self.sent.lock().await)
	}

	/// Waits for the next sent message, in send order.
	///
	/// Messages observed here are still returned by [`take_sent`](Self::take_sent).
	pub async fn next_sent(&self) -> Option<Value> {
		self.sent_rx.lock().await.recv().await
	}

	/// Ends the inbound stream, as if the server hung up.
	pub fn disconnect(self) {
		drop(self.inbound_tx);
	}
}

struct FakeTransportSender {
	sent: Arc<Mutex<Vec<Value>>>,
	sent_tx: mpsc::UnboundedSender<Value>,
	fail: bool,
}

impl Transport for FakeTransportSender {
	fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
		Box::pin(async move {
			if self.fail {
				return Err(Error::Transport("fake transport refuses to send".into()));
			}
			self.sent.lock().await.push(message.clone());
			let _ = self.sent_tx.send(message);
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
