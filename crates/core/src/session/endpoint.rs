//! Client endpoint receiving session-level push notifications.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use gw_protocol::Identity;
use gw_runtime::CallbackTarget;
use parking_lot::RwLock;

/// Zero-argument notification handler.
pub type Handler = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

#[derive(Default)]
struct Slots {
	heartbeat: Option<Handler>,
	session_closed: Option<Handler>,
	shutdown: Option<Handler>,
}

/// Replaceable handlers shared between a manager and its endpoints.
///
/// Unset handlers are no-ops. Handlers outlive individual sessions, so they
/// may be installed before the first `create_session`.
#[derive(Clone, Default)]
pub struct EndpointHandlers {
	slots: Arc<RwLock<Slots>>,
}

impl EndpointHandlers {
	pub fn on_heartbeat(&self, handler: impl Fn() -> anyhow::Result<()> + Send + Sync + 'static) {
		self.slots.write().heartbeat = Some(Arc::new(handler));
	}

	pub fn on_session_closed(&self, handler: impl Fn() -> anyhow::Result<()> + Send + Sync + 'static) {
		self.slots.write().session_closed = Some(Arc::new(handler));
	}

	pub fn on_shutdown(&self, handler: impl Fn() -> anyhow::Result<()> + Send + Sync + 'static) {
		self.slots.write().shutdown = Some(Arc::new(handler));
	}

	/// Resets every handler to a no-op.
	pub fn clear(&self) {
		*self.slots.write() = Slots::default();
	}
}

/// Locally hosted object the server pushes heartbeat, session-closed, and
/// shutdown notifications to.
///
/// Handler failures and panics are logged and never reach the dispatch path.
#[derive(Clone)]
pub struct CallbackEndpoint {
	identity: Identity,
	handlers: EndpointHandlers,
}

impl CallbackEndpoint {
	pub fn new(identity: Identity, handlers: EndpointHandlers) -> Self {
		Self { identity, handlers }
	}

	pub fn identity(&self) -> &Identity {
		&self.identity
	}

	pub fn handlers(&self) -> &EndpointHandlers {
		&self.handlers
	}

	pub fn on_heartbeat(&self, handler: impl Fn() -> anyhow::Result<()> + Send + Sync + 'static) {
		self.handlers.on_heartbeat(handler);
	}

	pub fn on_session_closed(&self, handler: impl Fn() -> anyhow::Result<()> + Send + Sync + 'static) {
		self.handlers.on_session_closed(handler);
	}

	pub fn on_shutdown(&self, handler: impl Fn() -> anyhow::Result<()> + Send + Sync + 'static) {
		self.handlers.on_shutdown(handler);
	}

	fn invoke(&self, notification: &'static str, select: impl Fn(&Slots) -> Option<Handler>) {
		// Clone out so the handler may replace itself.
		let Some(handler) = select(&self.handlers.slots.read()) else {
			return;
		};
		let failure = match catch_unwind(AssertUnwindSafe(|| handler())) {
			Ok(Ok(())) => return,
			Ok(Err(err)) => format!("{err:#}"),
			Err(panic) => panic_message(panic.as_ref()),
		};
		report_handler_failure(&self.identity, notification, &failure);
	}
}

impl CallbackTarget for CallbackEndpoint {
	fn heartbeat_requested(&self) {
		self.invoke("heartbeat", |slots| slots.heartbeat.clone());
	}

	fn session_closed(&self) {
		tracing::info!(target = "gw.callback", identity = %self.identity, "session closed by server");
		self.invoke("session closed", |slots| slots.session_closed.clone());
	}

	fn shutdown_in(&self, delay_ms: u64) {
		tracing::warn!(target = "gw.callback", identity = %self.identity, delay_ms, "server shutdown requested");
		self.invoke("shutdown", |slots| slots.shutdown.clone());
	}
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
	if let Some(msg) = panic.downcast_ref::<&str>() {
		format!("panicked: {msg}")
	} else if let Some(msg) = panic.downcast_ref::<String>() {
		format!("panicked: {msg}")
	} else {
		"panicked".to_string()
	}
}

/// Logs through `tracing` when a subscriber is installed, else to stderr.
fn report_handler_failure(identity: &Identity, notification: &str, failure: &str) {
	let has_subscriber = tracing::dispatcher::get_default(|dispatch| !dispatch.is::<tracing::subscriber::NoSubscriber>());
	if has_subscriber {
		tracing::error!(target = "gw.callback", %identity, notification, error = %failure, "callback handler failed");
	} else {
		eprintln!("gw: {notification} handler on {identity} failed: {failure}");
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use super::*;

	fn endpoint() -> CallbackEndpoint {
		CallbackEndpoint::new(Identity::new("cb", "client"), EndpointHandlers::default())
	}

	#[test]
	fn unset_handlers_are_no_ops() {
		let endpoint = endpoint();
		endpoint.heartbeat_requested();
		endpoint.session_closed();
		endpoint.shutdown_in(10);
	}

	#[test]
	fn handlers_run_once_per_notification() {
		let endpoint = endpoint();
		let beats = Arc::new(AtomicUsize::new(0));
		let counter = Arc::clone(&beats);
		endpoint.on_heartbeat(move || {
			counter.fetch_add(1, Ordering::SeqCst);
			Ok(())
		});

		endpoint.heartbeat_requested();
		endpoint.heartbeat_requested();
		assert_eq!(beats.load(Ordering::SeqCst), 2);
	}

	#[test]
	fn failing_and_panicking_handlers_are_contained() {
		let endpoint = endpoint();
		endpoint.on_session_closed(|| anyhow::bail!("handler exploded"));
		endpoint.on_shutdown(|| panic!("handler panicked"));

		endpoint.session_closed();
		endpoint.shutdown_in(0);

		// Still usable afterwards.
		let ran = Arc::new(AtomicUsize::new(0));
		let counter = Arc::clone(&ran);
		endpoint.on_shutdown(move || {
			counter.fetch_add(1, Ordering::SeqCst);
			Ok(())
		});
		endpoint.shutdown_in(0);
		assert_eq!(ran.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn handler_may_replace_itself() {
		let endpoint = endpoint();
		let inner = endpoint.clone();
		endpoint.on_heartbeat(move || {
			inner.on_heartbeat(|| Ok(()));
			Ok(())
		});
		endpoint.heartbeat_requested();
		endpoint.heartbeat_requested();
	}

	#[test]
	fn clear_restores_no_ops() {
		let endpoint = endpoint();
		endpoint.on_heartbeat(|| anyhow::bail!("should not run"));
		endpoint.handlers().clear();
		endpoint.heartbeat_requested();
	}
}
