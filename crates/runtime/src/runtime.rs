//! Outbound contract between the session layer and an RPC runtime.
//!
//! The session manager only talks to these traits; [`crate::remote`] binds them
//! to the JSON-RPC connection and [`crate::stub`] scripts them for tests.

use std::sync::Arc;

use async_trait::async_trait;
use gw_protocol::{CommandRequest, CommandResponse, CommandStatus, Credentials, Identity, ProcessRequest, SessionInfo};

use crate::config::ConfigSnapshot;
use crate::error::Result;
use crate::registry::DispatchRegistry;

/// Creates runtimes from configuration snapshots.
#[async_trait]
pub trait Connector: Send + Sync {
	async fn initialize(&self, config: &ConfigSnapshot) -> Result<Arc<dyn Runtime>>;
}

/// An initialized communication substrate.
#[async_trait]
pub trait Runtime: Send + Sync {
	/// Configuration the runtime was initialized from.
	fn config(&self) -> ConfigSnapshot;

	fn gateway(&self) -> Result<Arc<dyn Gateway>>;

	/// Creates a dispatch registry whose callbacks inbound calls are routed to.
	fn create_registry(&self, name: &str) -> Result<Arc<DispatchRegistry>>;

	/// Sets an implicit context value attached to every subsequent call.
	fn set_context(&self, key: &str, value: &str);

	fn context(&self, key: &str) -> Option<String>;

	/// Releases the runtime. Best-effort; never fails.
	async fn destroy(&self);
}

#[async_trait]
pub trait Gateway: Send + Sync {
	/// Category under which the server expects client callbacks to be registered.
	async fn callback_category(&self) -> Result<String>;

	async fn open_session(&self, credentials: &Credentials) -> Result<Arc<dyn SessionProxy>>;
}

/// Capability for an authenticated remote session.
#[async_trait]
pub trait SessionProxy: Send + Sync {
	fn info(&self) -> &SessionInfo;

	/// Installs `identity` as the target of session-level notifications.
	async fn set_callback(&self, identity: &Identity) -> Result<()>;

	async fn destroy(&self) -> Result<()>;

	async fn session_service(&self) -> Result<Arc<dyn SessionService>>;

	async fn submit(&self, request: CommandRequest) -> Result<Arc<dyn CommandHandle>>;

	async fn launch_process(&self, request: ProcessRequest) -> Result<Arc<dyn ProcessHandle>>;
}

#[async_trait]
pub trait SessionService: Send + Sync {
	/// Drops one reference to `session`, returning the references left.
	async fn close_session(&self, session: &SessionInfo) -> Result<i32>;
}

/// Remote reference to an in-progress command.
#[async_trait]
pub trait CommandHandle: Send + Sync {
	fn id(&self) -> &str;

	/// Terminal response, or `None` while the command runs.
	async fn response(&self) -> Result<Option<CommandResponse>>;

	async fn status(&self) -> Result<CommandStatus>;

	/// Requests cancellation; returns whether the server accepted it.
	async fn cancel(&self) -> Result<bool>;

	/// Releases server-side resources held for this handle.
	async fn close(&self) -> Result<()>;

	async fn add_callback(&self, identity: &Identity) -> Result<()>;
}

/// Remote reference to a single server-side process.
#[async_trait]
pub trait ProcessHandle: Send + Sync {
	fn id(&self) -> &str;

	/// Return code, or `None` while the process runs.
	async fn poll(&self) -> Result<Option<i32>>;

	async fn cancel(&self) -> Result<bool>;

	async fn kill(&self) -> Result<bool>;

	async fn register_callback(&self, identity: &Identity) -> Result<()>;
}
