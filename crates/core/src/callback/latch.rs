//! One-shot completion latch.

#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::watch;

/// Fires at most once; any number of waiters observe it.
pub(crate) struct Latch {
	tx: watch::Sender<bool>,
	#[cfg(test)]
	releases: AtomicUsize,
}

impl Latch {
	pub(crate) fn new() -> Self {
		let (tx, _rx) = watch::channel(false);
		Self {
			tx,
			#[cfg(test)]
			releases: AtomicUsize::new(0),
		}
	}

	/// Fires the latch; returns `false` if it had already fired.
	pub(crate) fn release(&self) -> bool {
		let released = self.tx.send_if_modified(|fired| {
			if *fired {
				false
			} else {
				*fired = true;
				true
			}
		});
		#[cfg(test)]
		self.releases.fetch_add(usize::from(released), Ordering::SeqCst);
		released
	}

	pub(crate) fn is_released(&self) -> bool {
		*self.tx.borrow()
	}

	/// Waits up to `timeout` for the latch; returns whether it fired.
	pub(crate) async fn wait(&self, timeout: Duration) -> bool {
		let mut rx = self.tx.subscribe();
		matches!(tokio::time::timeout(timeout, rx.wait_for(|fired| *fired)).await, Ok(Ok(_)))
	}

	#[cfg(test)]
	pub(crate) fn releases(&self) -> usize {
		self.releases.load(Ordering::SeqCst)
	}
}
