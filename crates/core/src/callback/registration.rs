//! Registry membership tied to the lifetime of a callback's handles.

use std::sync::Arc;

use gw_protocol::Identity;
use gw_runtime::{CallbackTarget, DispatchRegistry};
use tracing::debug;

use crate::error::Result;

/// Keeps `identity` registered until released or dropped.
///
/// The registry holds the callback target strongly, so membership cannot
/// hang off the target's own lifetime. Handles share one `Registration`
/// instead and the last of them to drop removes the entry.
pub(super) struct Registration {
	registry: Arc<DispatchRegistry>,
	identity: Identity,
}

impl Registration {
	pub(super) fn add(registry: Arc<DispatchRegistry>, identity: Identity, target: Arc<dyn CallbackTarget>) -> Result<Self> {
		registry.add(identity.clone(), target)?;
		Ok(Self { registry, identity })
	}

	/// Removes the entry; returns whether it was still registered.
	pub(super) fn release(&self) -> bool {
		self.registry.remove(&self.identity)
	}
}

impl Drop for Registration {
	fn drop(&mut self) {
		if self.release() {
			debug!(target = "gw.callback", identity = %self.identity, "deregistered callback on drop");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	struct Quiet;

	impl CallbackTarget for Quiet {}

	#[test]
	fn duplicate_identity_keeps_the_first_entry() {
		let registry = Arc::new(DispatchRegistry::new("test"));
		let identity = Identity::new("cb", "one");
		let first = Registration::add(Arc::clone(&registry), identity.clone(), Arc::new(Quiet)).unwrap();
		assert!(Registration::add(Arc::clone(&registry), identity.clone(), Arc::new(Quiet)).is_err());
		assert!(registry.contains(&identity));

		drop(first);
		assert!(!registry.contains(&identity));
	}
}
