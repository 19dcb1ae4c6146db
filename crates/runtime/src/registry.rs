//! Local registry of server-addressable callback objects.
//!
//! Inbound push notifications are routed by [`Identity`] to the
//! [`CallbackTarget`] registered under it. The registry is shared by every
//! in-flight callback of a session, so registration, removal, and dispatch
//! are safe under concurrent use.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use gw_protocol::{CommandResponse, CommandStatus, Identity, Notification};
use parking_lot::RwLock;

use crate::error::{Error, Result};

/// Receiver of push notifications.
///
/// Every method defaults to a no-op; implementors override only the
/// notifications they care about.
pub trait CallbackTarget: Send + Sync {
	fn heartbeat_requested(&self) {}

	fn session_closed(&self) {}

	fn shutdown_in(&self, _delay_ms: u64) {}

	fn step(&self, _complete: u32, _total: u32) {}

	fn finished(&self, _response: CommandResponse, _status: CommandStatus) {}

	fn process_cancelled(&self, _success: bool) {}

	fn process_finished(&self, _return_code: i32) {}

	fn process_killed(&self, _success: bool) {}
}

/// Routes `notification` to the matching method of `target`.
pub fn deliver(target: &dyn CallbackTarget, notification: Notification) {
	match notification {
		Notification::HeartbeatRequested => target.heartbeat_requested(),
		Notification::SessionClosed => target.session_closed(),
		Notification::ShutdownIn { delay_ms } => target.shutdown_in(delay_ms),
		Notification::Step { complete, total } => target.step(complete, total),
		Notification::Finished { response, status } => target.finished(response, status),
		Notification::ProcessCancelled { success } => target.process_cancelled(success),
		Notification::ProcessFinished { return_code } => target.process_finished(return_code),
		Notification::ProcessKilled { success } => target.process_killed(success),
	}
}

/// Identity-keyed dispatch table owned by one runtime.
pub struct DispatchRegistry {
	name: String,
	targets: RwLock<HashMap<Identity, Arc<dyn CallbackTarget>>>,
	active: AtomicBool,
}

impl DispatchRegistry {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			targets: RwLock::new(HashMap::new()),
			active: AtomicBool::new(true),
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn is_active(&self) -> bool {
		self.active.load(Ordering::Acquire)
	}

	fn ensure_active(&self) -> Result<()> {
		if self.is_active() {
			Ok(())
		} else {
			Err(Error::Deactivated(self.name.clone()))
		}
	}

	/// Registers `target` under `identity`.
	pub fn add(&self, identity: Identity, target: Arc<dyn CallbackTarget>) -> Result<()> {
		self.ensure_active()?;
		let mut targets = self.targets.write();
		if targets.contains_key(&identity) {
			return Err(Error::AlreadyRegistered(identity));
		}
		tracing::trace!(target = "gw.registry", registry = %self.name, %identity, "registered callback");
		targets.insert(identity, target);
		Ok(())
	}

	/// Removes `identity`; returns whether it was registered.
	pub fn remove(&self, identity: &Identity) -> bool {
		let removed = self.targets.write().remove(identity).is_some();
		if removed {
			tracing::trace!(target = "gw.registry", registry = %self.name, %identity, "removed callback");
		}
		removed
	}

	pub fn contains(&self, identity: &Identity) -> bool {
		self.targets.read().contains_key(identity)
	}

	pub fn len(&self) -> usize {
		self.targets.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Delivers `notification` to the target registered under `identity`.
	///
	/// The target runs outside the map lock, so it may deregister itself.
	pub fn dispatch(&self, identity: &Identity, notification: Notification) -> Result<()> {
		self.ensure_active()?;
		let target = self
			.targets
			.read()
			.get(identity)
			.cloned()
			.ok_or_else(|| Error::NotFound(identity.clone()))?;
		tracing::debug!(
			target = "gw.registry",
			registry = %self.name,
			%identity,
			method = notification.method(),
			"dispatching notification"
		);
		deliver(target.as_ref(), notification);
		Ok(())
	}

	/// Drops every registration and refuses further work.
	///
	/// A second call reports [`Error::Deactivated`].
	pub fn deactivate(&self) -> Result<()> {
		if !self.active.swap(false, Ordering::AcqRel) {
			return Err(Error::Deactivated(self.name.clone()));
		}
		let dropped = std::mem::take(&mut *self.targets.write());
		tracing::debug!(target = "gw.registry", registry = %self.name, dropped = dropped.len(), "registry deactivated");
		Ok(())
	}
}

impl std::fmt::Debug for DispatchRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("DispatchRegistry")
			.field("name", &self.name)
			.field("targets", &self.len())
			.field("active", &self.is_active())
			.finish()
	}
}
