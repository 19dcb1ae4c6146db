//! Caller-facing view of an open session.

use std::sync::Arc;

use gw_protocol::{CommandRequest, ProcessRequest, SessionInfo};
use gw_runtime::{CommandHandle, DispatchRegistry, ProcessHandle, SessionProxy};

use crate::error::Result;

/// Handle returned by `create_session`.
///
/// Cheap to clone. It shares the session proxy with the manager and becomes
/// unusable once the session is closed; do not cache it past `close_session`.
#[derive(Clone)]
pub struct SessionHandle {
	proxy: Arc<dyn SessionProxy>,
	registry: Arc<DispatchRegistry>,
	category: String,
}

impl SessionHandle {
	pub(crate) fn new(proxy: Arc<dyn SessionProxy>, registry: Arc<DispatchRegistry>, category: String) -> Self {
		Self { proxy, registry, category }
	}

	pub fn info(&self) -> &SessionInfo {
		self.proxy.info()
	}

	pub fn uuid(&self) -> &str {
		&self.proxy.info().uuid
	}

	/// Callback category for objects registered on behalf of this session.
	pub fn category(&self) -> &str {
		&self.category
	}

	pub fn registry(&self) -> &Arc<DispatchRegistry> {
		&self.registry
	}

	pub fn proxy(&self) -> &Arc<dyn SessionProxy> {
		&self.proxy
	}

	pub async fn submit(&self, request: CommandRequest) -> Result<Arc<dyn CommandHandle>> {
		Ok(self.proxy.submit(request).await?)
	}

	pub async fn launch_process(&self, request: ProcessRequest) -> Result<Arc<dyn ProcessHandle>> {
		Ok(self.proxy.launch_process(request).await?)
	}
}

impl std::fmt::Debug for SessionHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SessionHandle")
			.field("uuid", &self.uuid())
			.field("category", &self.category)
			.finish()
	}
}
