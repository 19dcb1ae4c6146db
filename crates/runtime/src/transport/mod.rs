//! Message transports carrying JSON values to and from the gateway.
//!
//! A transport is split into a sending half, a receiving task, and the
//! channel the receiving task feeds. [`Connection`](crate::connection::Connection)
//! owns all three.

mod fake;
mod websocket;

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tokio::sync::mpsc;

pub use fake::{FakeTransportBuilder, FakeTransportController};
pub use websocket::WebSocketTransport;

use crate::error::Result;

/// Sending half of a transport.
pub trait Transport: Send {
	fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

	/// Closes the outbound side. Default is a no-op.
	fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
		Box::pin(async { Ok(()) })
	}
}

/// Receiving half; `run` forwards inbound messages until the peer goes away.
pub trait TransportReceiver: Send {
	fn run(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>>;
}

/// Transport halves plus the channel the receiver feeds.
pub struct TransportParts {
	pub sender: Box<dyn Transport>,
	pub receiver: Box<dyn TransportReceiver>,
	pub message_rx: mpsc::UnboundedReceiver<Value>,
}
