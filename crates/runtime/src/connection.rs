//! JSON-RPC connection to the gateway.
//!
//! Correlates replies with pending requests and routes server-initiated calls
//! to the dispatch registries attached to this connection.
//!
//! # Message Flow
//!
//! 1. Caller invokes [`Connection::send_message`] with a target, method, params, and context
//! 2. The connection allocates a sequential id and parks a oneshot sender under it
//! 3. The request is serialized and sent through the transport
//! 4. [`Connection::run`] receives the reply, looks up the id, and completes the oneshot
//!
//! Inbound calls (no `id`) are decoded into a [`Notification`] and dispatched
//! by identity on the blocking pool, at most `dispatch_limit` at a time. With
//! a limit of one, calls are delivered in arrival order. When the inbound stream ends every pending request fails with
//! [`Error::ChannelClosed`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use gw_protocol::{Call, ErrorPayload, Identity, Message, Notification, Reply, Request};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tokio::sync::{Mutex as AsyncMutex, Semaphore, mpsc, oneshot};

use crate::error::{Error, ErrorKind, Result};
use crate::registry::DispatchRegistry;
use crate::transport::{Transport, TransportParts, TransportReceiver};

type Pending = HashMap<u32, oneshot::Sender<Result<Value>>>;

/// JSON-RPC connection shared across tasks behind an `Arc`.
pub struct Connection {
	last_id: AtomicU32,
	pending: Mutex<Pending>,
	sender: AsyncMutex<Box<dyn Transport>>,
	inbound: Mutex<Option<(Box<dyn TransportReceiver>, mpsc::UnboundedReceiver<Value>)>>,
	registries: RwLock<Vec<Arc<DispatchRegistry>>>,
	dispatch_permits: Arc<Semaphore>,
	closed: AtomicBool,
}

impl Connection {
	pub fn new(parts: TransportParts) -> Self {
		Self::with_dispatch_limit(parts, 1)
	}

	/// Connection running up to `limit` inbound calls concurrently (at least one).
	pub fn with_dispatch_limit(parts: TransportParts, limit: usize) -> Self {
		let TransportParts {
			sender,
			receiver,
			message_rx,
		} = parts;
		Self {
			last_id: AtomicU32::new(0),
			pending: Mutex::new(HashMap::new()),
			sender: AsyncMutex::new(sender),
			inbound: Mutex::new(Some((receiver, message_rx))),
			registries: RwLock::new(Vec::new()),
			dispatch_permits: Arc::new(Semaphore::new(limit.max(1))),
			closed: AtomicBool::new(false),
		}
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	/// Routes inbound calls for identities registered in `registry`.
	pub fn attach_registry(&self, registry: Arc<DispatchRegistry>) {
		let mut registries = self.registries.write();
		registries.retain(|r| r.is_active());
		registries.push(registry);
	}

	/// Sends a request and waits for its reply.
	pub async fn send_message(&self, target: &str, method: &str, params: Value, context: BTreeMap<String, String>) -> Result<Value> {
		if self.is_closed() {
			return Err(Error::ChannelClosed);
		}

		let id = self.last_id.fetch_add(1, Ordering::SeqCst);
		let (tx, rx) = oneshot::channel();
		self.pending.lock().insert(id, tx);

		// `run` marks the connection closed before draining pending requests.
		if self.is_closed() {
			self.pending.lock().remove(&id);
			return Err(Error::ChannelClosed);
		}

		let request = Request {
			id,
			target: target.to_string(),
			method: method.to_string(),
			params,
			context,
		};
		tracing::trace!(target = "gw.connection", id, target_object = target, method, "sending request");

		let sent = match serde_json::to_value(&request) {
			Ok(value) => self.sender.lock().await.send(value).await,
			Err(err) => Err(err.into()),
		};
		if let Err(err) = sent {
			self.pending.lock().remove(&id);
			return Err(err);
		}

		rx.await.map_err(|_| Error::ChannelClosed).and_then(|result| result)
	}

	/// Runs the inbound loop until the transport ends. Call once.
	pub async fn run(&self) {
		let Some((receiver, mut message_rx)) = self.inbound.lock().take() else {
			tracing::warn!(target = "gw.connection", "connection loop already started");
			return;
		};

		let transport_handle = tokio::spawn(async move {
			if let Err(err) = receiver.run().await {
				tracing::warn!(target = "gw.connection", error = %err, "transport ended with error");
			}
		});

		while let Some(value) = message_rx.recv().await {
			match serde_json::from_value::<Message>(value.clone()) {
				Ok(Message::Call(call)) => self.spawn_route(call).await,
				Ok(message) => {
					if let Err(err) = self.dispatch(message) {
						tracing::error!(target = "gw.connection", error = %err, "error dispatching message");
					}
				}
				Err(err) => {
					tracing::error!(target = "gw.connection", error = %err, message = %value, "failed to parse message");
				}
			}
		}

		tracing::debug!(target = "gw.connection", "message loop ended");
		self.fail_pending();
		let _ = transport_handle.await;
	}

	/// Closes the outbound side and fails pending requests.
	pub async fn close(&self) {
		if self.closed.swap(true, Ordering::SeqCst) {
			return;
		}
		if let Err(err) = self.sender.lock().await.close().await {
			tracing::debug!(target = "gw.connection", error = %err, "transport close failed");
		}
		self.drain_pending();
	}

	fn fail_pending(&self) {
		self.closed.store(true, Ordering::SeqCst);
		self.drain_pending();
	}

	fn drain_pending(&self) {
		let pending = std::mem::take(&mut *self.pending.lock());
		if !pending.is_empty() {
			tracing::debug!(target = "gw.connection", count = pending.len(), "failing pending requests");
		}
		for (_, tx) in pending {
			let _ = tx.send(Err(Error::ChannelClosed));
		}
	}

	fn dispatch(&self, message: Message) -> Result<()> {
		match message {
			Message::Reply(reply) => self.complete(reply),
			Message::Call(call) => {
				let registries = self.registries.read().clone();
				route(&registries, call);
				Ok(())
			}
		}
	}

	/// Hands `call` to the blocking pool once a dispatch slot is free.
	async fn spawn_route(&self, call: Call) {
		let Ok(permit) = Arc::clone(&self.dispatch_permits).acquire_owned().await else {
			return;
		};
		let registries = self.registries.read().clone();
		tokio::task::spawn_blocking(move || {
			let _permit = permit;
			route(&registries, call);
		});
	}

	fn complete(&self, reply: Reply) -> Result<()> {
		let tx = self
			.pending
			.lock()
			.remove(&reply.id)
			.ok_or_else(|| Error::Protocol(format!("cannot find request to respond: id={}", reply.id)))?;

		let result = match reply.error {
			Some(wrapper) => Err(parse_remote_error(wrapper.error)),
			None => Ok(reply.result.unwrap_or(Value::Null)),
		};
		let _ = tx.send(result);
		Ok(())
	}
}

fn route(registries: &[Arc<DispatchRegistry>], call: Call) {
	let Some(identity) = Identity::parse(&call.target) else {
		tracing::warn!(target = "gw.connection", call_target = %call.target, "call with malformed target");
		return;
	};
	let notification = match decode_notification(&call) {
		Ok(notification) => notification,
		Err(err) => {
			tracing::warn!(target = "gw.connection", %identity, method = %call.method, error = %err, "undecodable call");
			return;
		}
	};

	let Some(registry) = registries.iter().find(|r| r.contains(&identity)) else {
		tracing::debug!(target = "gw.connection", error = %Error::NotFound(identity), "dropping call");
		return;
	};
	if let Err(err) = registry.dispatch(&identity, notification) {
		tracing::debug!(target = "gw.connection", error = %err, "dropping call");
	}
}

/// Decodes a call into a notification; absent, null, or empty params mean "no fields".
fn decode_notification(call: &Call) -> Result<Notification> {
	let mut envelope = Map::new();
	envelope.insert("method".into(), Value::String(call.method.clone()));
	let empty = match &call.params {
		Value::Null => true,
		Value::Object(map) => map.is_empty(),
		_ => false,
	};
	if !empty {
		envelope.insert("params".into(), call.params.clone());
	}
	Ok(serde_json::from_value(Value::Object(envelope))?)
}

fn parse_remote_error(payload: ErrorPayload) -> Error {
	Error::rpc(ErrorKind::from_remote_name(payload.name.as_deref()), payload.message)
}
