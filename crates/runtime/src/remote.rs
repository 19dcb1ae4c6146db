//! Runtime contract bound to a JSON-RPC [`Connection`].
//!
//! Remote objects are addressed by target strings: `gateway`,
//! `session/<uuid>`, `command/<id>`, `process/<id>`, and `sessions` for the
//! session service.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use gw_protocol::{CommandRequest, CommandResponse, CommandStatus, Credentials, Identity, ProcessRequest, SessionInfo};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::task::JoinHandle;

use crate::config::ConfigSnapshot;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::registry::DispatchRegistry;
use crate::runtime::{CommandHandle, Connector, Gateway, ProcessHandle, Runtime, SessionProxy, SessionService};
use crate::transport::{TransportParts, WebSocketTransport};

const GATEWAY: &str = "gateway";
const SESSIONS: &str = "sessions";

/// Connects to the router named by the configuration over WebSocket.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoteConnector;

#[async_trait]
impl Connector for RemoteConnector {
	async fn initialize(&self, config: &ConfigSnapshot) -> Result<Arc<dyn Runtime>> {
		let endpoint = config.router_endpoint()?;
		let timeout = config.connect_timeout()?;
		let max_message_size = usize::try_from(config.message_size_max_kb()?.saturating_mul(1024)).unwrap_or(usize::MAX);
		let parts = WebSocketTransport::connect(&endpoint, timeout, Some(max_message_size)).await?;
		tracing::info!(target = "gw.connection", endpoint = %endpoint, "connected to router");
		RemoteRuntime::start(config.clone(), parts)
	}
}

struct RemoteCore {
	connection: Arc<Connection>,
	context: RwLock<BTreeMap<String, String>>,
}

impl RemoteCore {
	async fn call(&self, target: &str, method: &str, params: Value) -> Result<Value> {
		let context = self.context.read().clone();
		self.connection.send_message(target, method, params, context).await
	}

	async fn call_as<T: DeserializeOwned>(&self, target: &str, method: &str, params: Value) -> Result<T> {
		let value = self.call(target, method, params).await?;
		decode(method, value)
	}
}

fn decode<T: DeserializeOwned>(method: &str, value: Value) -> Result<T> {
	serde_json::from_value(value).map_err(|err| Error::Protocol(format!("{method}: unexpected result: {err}")))
}

#[derive(Deserialize)]
struct HandleRef {
	id: String,
}

/// Runtime backed by a live connection.
pub struct RemoteRuntime {
	config: ConfigSnapshot,
	core: Arc<RemoteCore>,
	run_task: Mutex<Option<JoinHandle<()>>>,
}

impl RemoteRuntime {
	/// Starts the connection loop on `parts` and returns the runtime.
	pub fn start(config: ConfigSnapshot, parts: TransportParts) -> Result<Arc<dyn Runtime>> {
		let connection = Arc::new(Connection::with_dispatch_limit(parts, config.callback_pool_size()?));
		let run_task = tokio::spawn({
			let connection = Arc::clone(&connection);
			async move { connection.run().await }
		});
		Ok(Arc::new(Self {
			config,
			core: Arc::new(RemoteCore {
				connection,
				context: RwLock::new(BTreeMap::new()),
			}),
			run_task: Mutex::new(Some(run_task)),
		}))
	}
}

#[async_trait]
impl Runtime for RemoteRuntime {
	fn config(&self) -> ConfigSnapshot {
		self.config.clone()
	}

	fn gateway(&self) -> Result<Arc<dyn Gateway>> {
		if self.core.connection.is_closed() {
			return Err(Error::ChannelClosed);
		}
		Ok(Arc::new(RemoteGateway {
			core: Arc::clone(&self.core),
		}))
	}

	fn create_registry(&self, name: &str) -> Result<Arc<DispatchRegistry>> {
		let registry = Arc::new(DispatchRegistry::new(name));
		self.core.connection.attach_registry(Arc::clone(&registry));
		Ok(registry)
	}

	fn set_context(&self, key: &str, value: &str) {
		self.core.context.write().insert(key.to_string(), value.to_string());
	}

	fn context(&self, key: &str) -> Option<String> {
		self.core.context.read().get(key).cloned()
	}

	async fn destroy(&self) {
		self.core.connection.close().await;
		let task = self.run_task.lock().take();
		if let Some(task) = task {
			task.abort();
		}
		tracing::debug!(target = "gw.connection", "runtime destroyed");
	}
}

struct RemoteGateway {
	core: Arc<RemoteCore>,
}

#[async_trait]
impl Gateway for RemoteGateway {
	async fn callback_category(&self) -> Result<String> {
		self.core.call_as(GATEWAY, "gateway.callbackCategory", Value::Null).await
	}

	async fn open_session(&self, credentials: &Credentials) -> Result<Arc<dyn SessionProxy>> {
		let params = serde_json::to_value(credentials)?;
		let info: SessionInfo = self.core.call_as(GATEWAY, "gateway.openSession", params).await?;
		Ok(Arc::new(RemoteSession {
			target: format!("session/{}", info.uuid),
			info,
			core: Arc::clone(&self.core),
		}))
	}
}

struct RemoteSession {
	core: Arc<RemoteCore>,
	info: SessionInfo,
	target: String,
}

#[async_trait]
impl SessionProxy for RemoteSession {
	fn info(&self) -> &SessionInfo {
		&self.info
	}

	async fn set_callback(&self, identity: &Identity) -> Result<()> {
		self.core.call(&self.target, "session.setCallback", json!({ "identity": identity })).await?;
		Ok(())
	}

	async fn destroy(&self) -> Result<()> {
		self.core.call(&self.target, "session.destroy", Value::Null).await?;
		Ok(())
	}

	async fn session_service(&self) -> Result<Arc<dyn SessionService>> {
		if self.core.connection.is_closed() {
			return Err(Error::ChannelClosed);
		}
		Ok(Arc::new(RemoteSessionService {
			core: Arc::clone(&self.core),
		}))
	}

	async fn submit(&self, request: CommandRequest) -> Result<Arc<dyn CommandHandle>> {
		let params = serde_json::to_value(&request)?;
		let handle: HandleRef = self.core.call_as(&self.target, "session.submit", params).await?;
		Ok(Arc::new(RemoteCommandHandle {
			target: format!("command/{}", handle.id),
			id: handle.id,
			core: Arc::clone(&self.core),
		}))
	}

	async fn launch_process(&self, request: ProcessRequest) -> Result<Arc<dyn ProcessHandle>> {
		let params = serde_json::to_value(&request)?;
		let handle: HandleRef = self.core.call_as(&self.target, "session.launchProcess", params).await?;
		Ok(Arc::new(RemoteProcessHandle {
			target: format!("process/{}", handle.id),
			id: handle.id,
			core: Arc::clone(&self.core),
		}))
	}
}

struct RemoteSessionService {
	core: Arc<RemoteCore>,
}

#[async_trait]
impl SessionService for RemoteSessionService {
	async fn close_session(&self, session: &SessionInfo) -> Result<i32> {
		self.core.call_as(SESSIONS, "sessions.close", json!({ "uuid": session.uuid })).await
	}
}

struct RemoteCommandHandle {
	core: Arc<RemoteCore>,
	id: String,
	target: String,
}

#[async_trait]
impl CommandHandle for RemoteCommandHandle {
	fn id(&self) -> &str {
		&self.id
	}

	async fn response(&self) -> Result<Option<CommandResponse>> {
		self.core.call_as(&self.target, "command.response", Value::Null).await
	}

	async fn status(&self) -> Result<CommandStatus> {
		self.core.call_as(&self.target, "command.status", Value::Null).await
	}

	async fn cancel(&self) -> Result<bool> {
		self.core.call_as(&self.target, "command.cancel", Value::Null).await
	}

	async fn close(&self) -> Result<()> {
		self.core.call(&self.target, "command.close", Value::Null).await?;
		Ok(())
	}

	async fn add_callback(&self, identity: &Identity) -> Result<()> {
		self.core.call(&self.target, "command.addCallback", json!({ "identity": identity })).await?;
		Ok(())
	}
}

struct RemoteProcessHandle {
	core: Arc<RemoteCore>,
	id: String,
	target: String,
}

#[async_trait]
impl ProcessHandle for RemoteProcessHandle {
	fn id(&self) -> &str {
		&self.id
	}

	async fn poll(&self) -> Result<Option<i32>> {
		self.core.call_as(&self.target, "process.poll", Value::Null).await
	}

	async fn cancel(&self) -> Result<bool> {
		self.core.call_as(&self.target, "process.cancel", Value::Null).await
	}

	async fn kill(&self) -> Result<bool> {
		self.core.call_as(&self.target, "process.kill", Value::Null).await
	}

	async fn register_callback(&self, identity: &Identity) -> Result<()> {
		self.core.call(&self.target, "process.registerCallback", json!({ "identity": identity })).await?;
		Ok(())
	}
}
