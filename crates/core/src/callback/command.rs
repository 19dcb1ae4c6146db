//! Waiting for a long-running command through push notifications or polling.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use gw_protocol::{CommandResponse, CommandStatus, Identity, StatusFlag};
use gw_runtime::{CallbackTarget, CommandHandle, DispatchRegistry};
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::latch::Latch;
use super::registration::Registration;
use crate::error::{Error, Result};
use crate::session::SessionManager;

/// Hooks invoked by a [`CommandCallback`].
///
/// `step` may run any number of times before completion; `on_finished`
/// runs exactly once, after waiters have been released.
pub trait CommandObserver: Send + Sync {
	fn step(&self, _complete: u32, _total: u32) {}

	fn on_finished(&self, _response: &CommandResponse, _status: &CommandStatus) {}
}

struct NoopObserver;

impl CommandObserver for NoopObserver {}

#[derive(Clone)]
struct Completion {
	response: Arc<CommandResponse>,
	status: Arc<CommandStatus>,
}

struct Shared {
	identity: Identity,
	handle: Arc<dyn CommandHandle>,
	observer: Arc<dyn CommandObserver>,
	completion: Mutex<Option<Completion>>,
	latch: Latch,
	close_handle: bool,
	closed: AtomicBool,
}

impl Shared {
	/// Records the terminal outcome; only the first caller wins.
	fn capture(&self, response: CommandResponse, status: CommandStatus) -> bool {
		let completion = {
			let mut slot = self.completion.lock();
			if slot.is_some() {
				return false;
			}
			let completion = Completion {
				response: Arc::new(response),
				status: Arc::new(status),
			};
			*slot = Some(completion.clone());
			completion
		};
		self.latch.release();
		debug!(target = "gw.callback", identity = %self.identity, command = self.handle.id(), "command finished");
		self.observer.on_finished(&completion.response, &completion.status);
		true
	}

	async fn poll(&self) -> Result<bool> {
		if self.latch.is_released() {
			return Ok(true);
		}
		let Some(response) = self.handle.response().await? else {
			return Ok(false);
		};
		let status = self.handle.status().await?;
		self.capture(response, status);
		Ok(true)
	}
}

impl CallbackTarget for Shared {
	fn step(&self, complete: u32, total: u32) {
		if self.latch.is_released() {
			return;
		}
		trace!(target = "gw.callback", identity = %self.identity, complete, total, "command step");
		self.observer.step(complete, total);
	}

	fn finished(&self, response: CommandResponse, status: CommandStatus) {
		self.capture(response, status);
	}
}

/// Per-command waiter.
///
/// On construction the callback registers itself under a fresh identity,
/// subscribes that identity to the command, and polls once in the
/// background in case the command finished before the subscription took
/// effect. Completion is recorded exactly once, whichever of push or poll
/// observes it first. Clones share state.
///
/// Dropping the last clone without [`close`](Self::close) deregisters the
/// identity but leaves an owned handle open on the server.
#[derive(Clone)]
pub struct CommandCallback {
	shared: Arc<Shared>,
	registration: Arc<Registration>,
}

impl CommandCallback {
	pub async fn new(
		registry: Arc<DispatchRegistry>,
		category: impl Into<String>,
		handle: Arc<dyn CommandHandle>,
		close_handle: bool,
	) -> Result<Self> {
		Self::with_observer(registry, category, handle, close_handle, Arc::new(NoopObserver)).await
	}

	pub async fn with_observer(
		registry: Arc<DispatchRegistry>,
		category: impl Into<String>,
		handle: Arc<dyn CommandHandle>,
		close_handle: bool,
		observer: Arc<dyn CommandObserver>,
	) -> Result<Self> {
		let identity = Identity::new(category, uuid::Uuid::new_v4().to_string());
		let shared = Arc::new(Shared {
			identity: identity.clone(),
			handle: Arc::clone(&handle),
			observer,
			completion: Mutex::new(None),
			latch: Latch::new(),
			close_handle,
			closed: AtomicBool::new(false),
		});

		let registration = Registration::add(registry, identity.clone(), Arc::clone(&shared) as Arc<dyn CallbackTarget>)?;
		handle.add_callback(&identity).await?;

		let callback = Self {
			shared,
			registration: Arc::new(registration),
		};
		callback.spawn_initial_poll();
		Ok(callback)
	}

	/// Waits on `handle` using the registry and callback category of the manager's session.
	pub async fn for_session(manager: &SessionManager, handle: Arc<dyn CommandHandle>, close_handle: bool) -> Result<Self> {
		let session = manager.session().await?;
		Self::new(Arc::clone(session.registry()), session.category(), handle, close_handle).await
	}

	fn spawn_initial_poll(&self) {
		let shared = Arc::clone(&self.shared);
		tokio::spawn(async move {
			if let Err(err) = shared.poll().await {
				debug!(target = "gw.callback", identity = %shared.identity, error = %err, "initial poll failed");
			}
		});
	}

	pub fn identity(&self) -> &Identity {
		&self.shared.identity
	}

	pub fn handle(&self) -> &Arc<dyn CommandHandle> {
		&self.shared.handle
	}

	pub fn is_finished(&self) -> bool {
		self.shared.latch.is_released()
	}

	/// Asks the command for its response; returns whether it has finished.
	pub async fn poll(&self) -> Result<bool> {
		self.shared.poll().await
	}

	/// Waits up to `timeout` for completion without polling.
	pub async fn block(&self, timeout: Duration) -> bool {
		self.shared.latch.wait(timeout).await
	}

	/// Calls [`block`](Self::block) up to `attempts` times.
	///
	/// Fails with [`Error::LockTimeout`] carrying the total time waited. The
	/// remote command is never cancelled here.
	pub async fn loop_wait(&self, attempts: u32, per_attempt: Duration) -> Result<Arc<CommandResponse>> {
		let started = Instant::now();
		for _ in 0..attempts {
			if self.block(per_attempt).await {
				if let Some(response) = self.response() {
					return Ok(response);
				}
			}
		}
		Err(Error::LockTimeout {
			attempts,
			elapsed: started.elapsed(),
		})
	}

	pub fn response(&self) -> Option<Arc<CommandResponse>> {
		self.shared.completion.lock().as_ref().map(|c| Arc::clone(&c.response))
	}

	pub fn status(&self) -> Option<Arc<CommandStatus>> {
		self.shared.completion.lock().as_ref().map(|c| Arc::clone(&c.status))
	}

	pub fn status_or_err(&self) -> Result<Arc<CommandStatus>> {
		self.status().ok_or(Error::StatusNotPresent)
	}

	pub fn is_cancelled(&self) -> Result<bool> {
		Ok(self.status_or_err()?.count(StatusFlag::Cancelled) > 0)
	}

	pub fn is_failure(&self) -> Result<bool> {
		Ok(self.status_or_err()?.count(StatusFlag::Failure) > 0)
	}

	/// Requests cancellation of the remote command.
	pub async fn cancel(&self) -> Result<bool> {
		Ok(self.shared.handle.cancel().await?)
	}

	/// Deregisters the callback and, if it owns the handle, closes it remotely. Idempotent.
	pub async fn close(&self) -> Result<()> {
		if self.shared.closed.swap(true, Ordering::SeqCst) {
			return Ok(());
		}
		self.registration.release();
		if self.shared.close_handle {
			self.shared.handle.close().await?;
		}
		Ok(())
	}

	#[cfg(test)]
	fn releases(&self) -> usize {
		self.shared.latch.releases()
	}
}

impl std::fmt::Debug for CommandCallback {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CommandCallback")
			.field("identity", &self.shared.identity)
			.field("command", &self.shared.handle.id())
			.field("finished", &self.is_finished())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::AtomicUsize;

	use gw_runtime::stub::StubCommand;
	use serde_json::json;

	use super::*;

	#[derive(Default)]
	struct Counting {
		finished: AtomicUsize,
		steps: AtomicUsize,
	}

	impl CommandObserver for Counting {
		fn step(&self, _complete: u32, _total: u32) {
			self.steps.fetch_add(1, Ordering::SeqCst);
		}

		fn on_finished(&self, _response: &CommandResponse, _status: &CommandStatus) {
			self.finished.fetch_add(1, Ordering::SeqCst);
		}
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn racing_poll_and_push_capture_once() {
		for round in 0..50 {
			let registry = Arc::new(DispatchRegistry::new("race"));
			let command = Arc::new(StubCommand::new(format!("race-{round}")));
			let observer = Arc::new(Counting::default());
			let callback = CommandCallback::with_observer(
				Arc::clone(&registry),
				"cb",
				command.clone(),
				false,
				observer.clone(),
			)
			.await
			.unwrap();

			let waiter = tokio::spawn({
				let callback = callback.clone();
				async move { callback.block(Duration::from_secs(2)).await }
			});

			command.complete(CommandResponse::ok(json!({"via": "poll"})), CommandStatus::default());
			let pusher = {
				let registry = Arc::clone(&registry);
				let identity = callback.identity().clone();
				tokio::spawn(async move {
					registry
						.dispatch(
							&identity,
							gw_protocol::Notification::Finished {
								response: CommandResponse::ok(json!({"via": "push"})),
								status: CommandStatus::default().with_flag(StatusFlag::Success),
							},
						)
						.unwrap();
				})
			};
			let poller = tokio::spawn({
				let callback = callback.clone();
				async move { callback.poll().await.unwrap() }
			});

			pusher.await.unwrap();
			assert!(poller.await.unwrap());
			assert!(waiter.await.unwrap());

			let first = callback.response().unwrap();
			let second = callback.response().unwrap();
			assert!(Arc::ptr_eq(&first, &second));
			assert_eq!(callback.releases(), 1);
			assert_eq!(observer.finished.load(Ordering::SeqCst), 1);
		}
	}

	#[tokio::test]
	async fn steps_after_completion_are_ignored() {
		let registry = Arc::new(DispatchRegistry::new("steps"));
		let command = Arc::new(StubCommand::new("steps"));
		let observer = Arc::new(Counting::default());
		let callback = CommandCallback::with_observer(Arc::clone(&registry), "cb", command, false, observer.clone())
			.await
			.unwrap();
		let identity = callback.identity().clone();

		registry.dispatch(&identity, gw_protocol::Notification::Step { complete: 1, total: 2 }).unwrap();
		registry
			.dispatch(
				&identity,
				gw_protocol::Notification::Finished {
					response: CommandResponse::ok(json!(null)),
					status: CommandStatus::default(),
				},
			)
			.unwrap();
		registry.dispatch(&identity, gw_protocol::Notification::Step { complete: 2, total: 2 }).unwrap();

		assert_eq!(observer.steps.load(Ordering::SeqCst), 1);
		assert_eq!(observer.finished.load(Ordering::SeqCst), 1);
	}
}
