//! Waiting for a single server-side process.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use gw_protocol::Identity;
use gw_runtime::{CallbackTarget, DispatchRegistry, ProcessHandle};
use parking_lot::Mutex;
use tracing::debug;

use super::latch::Latch;
use super::registration::Registration;
use crate::error::{Error, Result};
use crate::session::SessionManager;

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
	Cancelled { success: bool },
	Finished { return_code: i32 },
	Killed { success: bool },
}

struct Shared {
	identity: Identity,
	handle: Arc<dyn ProcessHandle>,
	outcome: Mutex<Option<ProcessOutcome>>,
	latch: Latch,
	closed: AtomicBool,
}

impl Shared {
	fn settle(&self, outcome: ProcessOutcome) -> bool {
		{
			let mut slot = self.outcome.lock();
			if slot.is_some() {
				return false;
			}
			*slot = Some(outcome);
		}
		self.latch.release();
		debug!(target = "gw.callback", identity = %self.identity, process = self.handle.id(), ?outcome, "process settled");
		true
	}

	async fn poll(&self) -> Result<bool> {
		if self.latch.is_released() {
			return Ok(true);
		}
		match self.handle.poll().await? {
			Some(return_code) => {
				self.settle(ProcessOutcome::Finished { return_code });
				Ok(true)
			}
			None => Ok(false),
		}
	}
}

impl CallbackTarget for Shared {
	fn process_cancelled(&self, success: bool) {
		self.settle(ProcessOutcome::Cancelled { success });
	}

	fn process_finished(&self, return_code: i32) {
		self.settle(ProcessOutcome::Finished { return_code });
	}

	fn process_killed(&self, success: bool) {
		self.settle(ProcessOutcome::Killed { success });
	}
}

/// Per-process waiter with the same registration and race-closing poll as
/// [`CommandCallback`](super::CommandCallback). The first of cancelled,
/// finished, or killed to arrive is kept. Dropping the last clone deregisters it.
#[derive(Clone)]
pub struct ProcessCallback {
	shared: Arc<Shared>,
	registration: Arc<Registration>,
}

impl ProcessCallback {
	pub async fn new(registry: Arc<DispatchRegistry>, category: impl Into<String>, handle: Arc<dyn ProcessHandle>) -> Result<Self> {
		let identity = Identity::new(category, uuid::Uuid::new_v4().to_string());
		let shared = Arc::new(Shared {
			identity: identity.clone(),
			handle: Arc::clone(&handle),
			outcome: Mutex::new(None),
			latch: Latch::new(),
			closed: AtomicBool::new(false),
		});

		let registration = Registration::add(registry, identity.clone(), Arc::clone(&shared) as Arc<dyn CallbackTarget>)?;
		handle.register_callback(&identity).await?;

		let poller = Arc::clone(&shared);
		tokio::spawn(async move {
			if let Err(err) = poller.poll().await {
				debug!(target = "gw.callback", identity = %poller.identity, error = %err, "initial poll failed");
			}
		});
		Ok(Self {
			shared,
			registration: Arc::new(registration),
		})
	}

	pub async fn for_session(manager: &SessionManager, handle: Arc<dyn ProcessHandle>) -> Result<Self> {
		let session = manager.session().await?;
		Self::new(Arc::clone(session.registry()), session.category(), handle).await
	}

	pub fn identity(&self) -> &Identity {
		&self.shared.identity
	}

	pub fn outcome(&self) -> Option<ProcessOutcome> {
		*self.shared.outcome.lock()
	}

	pub async fn poll(&self) -> Result<bool> {
		self.shared.poll().await
	}

	pub async fn block(&self, timeout: Duration) -> bool {
		self.shared.latch.wait(timeout).await
	}

	pub async fn loop_wait(&self, attempts: u32, per_attempt: Duration) -> Result<ProcessOutcome> {
		let started = Instant::now();
		for _ in 0..attempts {
			if self.block(per_attempt).await {
				if let Some(outcome) = self.outcome() {
					return Ok(outcome);
				}
			}
		}
		Err(Error::LockTimeout {
			attempts,
			elapsed: started.elapsed(),
		})
	}

	pub async fn cancel(&self) -> Result<bool> {
		Ok(self.shared.handle.cancel().await?)
	}

	pub async fn kill(&self) -> Result<bool> {
		Ok(self.shared.handle.kill().await?)
	}

	/// Deregisters the callback. Idempotent.
	pub fn close(&self) {
		if !self.shared.closed.swap(true, Ordering::SeqCst) {
			self.registration.release();
		}
	}
}

impl std::fmt::Debug for ProcessCallback {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ProcessCallback")
			.field("identity", &self.shared.identity)
			.field("outcome", &self.outcome())
			.finish()
	}
}
