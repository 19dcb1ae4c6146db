//! Session lifecycle: runtime initialization, session creation with bounded
//! retry, callback endpoint installation, and ordered teardown.

use std::future::Future;
use std::sync::Arc;

use gw_protocol::{CommandRequest, Credentials, Identity, ProcessRequest};
use gw_runtime::config::{CONTEXT_CLIENT_UUID, CONTEXT_SESSION};
use gw_runtime::{ConfigSnapshot, Connector, DispatchRegistry, ErrorKind, Gateway, RemoteConnector, RetryPolicy, Runtime, SessionProxy};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::endpoint::{CallbackEndpoint, EndpointHandlers};
use super::handle::SessionHandle;
use crate::callback::{CommandCallback, ProcessCallback};
use crate::error::{Error, Result};

#[derive(Default)]
struct ManagerState {
	runtime: Option<Arc<dyn Runtime>>,
	registry: Option<Arc<DispatchRegistry>>,
	session: Option<Arc<dyn SessionProxy>>,
	endpoint: Option<CallbackEndpoint>,
	category: Option<String>,
	/// Configuration for the next initialization.
	saved_config: ConfigSnapshot,
}

impl ManagerState {
	fn handle(&self) -> Option<SessionHandle> {
		let session = self.session.clone()?;
		let registry = self.registry.clone()?;
		let category = self.category.clone()?;
		Some(SessionHandle::new(session, registry, category))
	}
}

/// Owns the runtime and exposes a single logical session.
///
/// Create, close and kill are serialized by a lifecycle lock that accessors
/// never take. Published state sits behind a separate lock held only to read
/// or swap fields, so a reader never observes a half-initialized session and
/// never waits on a remote call. The manager can be reused: `create_session` after `close_session` re-initializes the
/// runtime from the configuration captured at teardown.
///
/// Dropping a manager does not close its session; call
/// [`close_session`](Self::close_session) or use [`run_scoped`](Self::run_scoped).
pub struct SessionManager {
	connector: Arc<dyn Connector>,
	client_id: String,
	handlers: EndpointHandlers,
	lifecycle: tokio::sync::Mutex<()>,
	state: Mutex<ManagerState>,
}

impl SessionManager {
	/// Creates a manager; `overrides` are layered onto the built-in defaults.
	///
	/// Does not touch the network.
	pub fn new(connector: impl Connector + 'static, overrides: ConfigSnapshot) -> Self {
		Self::with_connector(Arc::new(connector), overrides)
	}

	pub fn with_connector(connector: Arc<dyn Connector>, overrides: ConfigSnapshot) -> Self {
		let saved_config = ConfigSnapshot::builder().merge(&overrides).build();
		Self {
			connector,
			client_id: uuid::Uuid::new_v4().to_string(),
			handlers: EndpointHandlers::default(),
			lifecycle: tokio::sync::Mutex::new(()),
			state: Mutex::new(ManagerState {
				saved_config,
				..ManagerState::default()
			}),
		}
	}

	/// Manager connecting over WebSocket to the configured router.
	pub fn remote(overrides: ConfigSnapshot) -> Self {
		Self::new(RemoteConnector, overrides)
	}

	/// Identifier minted once per manager; names the callback endpoint.
	pub fn client_id(&self) -> &str {
		&self.client_id
	}

	/// Handlers the callback endpoint of every session delegates to.
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

	/// Opens a session.
	///
	/// Explicit credentials override `gw.user`/`gw.pass`. Retryable open
	/// failures are retried per `gw.session.retry.*`; any other failure, or a
	/// failure while installing the callback endpoint, leaves the manager
	/// fully torn down.
	pub async fn create_session(&self, username: Option<&str>, password: Option<&str>) -> Result<SessionHandle> {
		let _lifecycle = self.lifecycle.lock().await;
		let (config, runtime) = {
			let state = self.state.lock();
			if state.session.is_some() {
				return Err(Error::AlreadyActive);
			}
			(state.saved_config.clone(), state.runtime.clone())
		};

		let credentials = resolve_credentials(&config, username, password)?;
		let policy = config.retry_policy()?;

		let runtime = match runtime {
			Some(runtime) => runtime,
			None => {
				let runtime = self.initialize(&config).await?;
				self.state.lock().runtime = Some(Arc::clone(&runtime));
				runtime
			}
		};

		let gateway = match runtime.gateway() {
			Ok(gateway) => gateway,
			Err(err) => {
				self.roll_back(None).await;
				return Err(err.into());
			}
		};

		let proxy = match open_with_retry(gateway.as_ref(), &credentials, policy).await {
			Ok(proxy) => proxy,
			Err(err) => {
				self.roll_back(None).await;
				return Err(err);
			}
		};

		let (registry, endpoint, category) = match self.install(runtime.as_ref(), gateway.as_ref(), proxy.as_ref()).await {
			Ok(installed) => installed,
			Err(err) => {
				warn!(target = "gw.session", error = %err, "callback installation failed; rolling back session");
				self.roll_back(Some(proxy)).await;
				return Err(err);
			}
		};

		info!(
			target = "gw.session",
			session = %proxy.info().uuid,
			user = %proxy.info().user,
			endpoint = %endpoint.identity(),
			"session created"
		);

		let mut state = self.state.lock();
		state.session = Some(proxy);
		state.registry = Some(registry);
		state.endpoint = Some(endpoint);
		state.category = Some(category);
		state.handle().ok_or(Error::NotInitialized("session"))
	}

	/// Closes the session and tears the runtime down.
	///
	/// No-op when nothing is initialized. Expected teardown failures (session
	/// already gone, connection lost, refused, or timed out, no router) count
	/// as success; any other failure is returned after the runtime is still
	/// destroyed.
	pub async fn close_session(&self) -> Result<()> {
		let _lifecycle = self.lifecycle.lock().await;
		self.teardown().await
	}

	/// Closes every reference the server holds on this session, then closes it locally.
	///
	/// Returns the number of successful close calls, or `-1` when the session
	/// service could not be obtained.
	pub async fn kill_session(&self) -> Result<i32> {
		let _lifecycle = self.lifecycle.lock().await;
		let session = self.state.lock().session.clone();
		let Some(session) = session else {
			debug!(target = "gw.session", "kill requested without a session");
			self.teardown().await?;
			return Ok(-1);
		};

		let service = match session.session_service().await {
			Ok(service) => service,
			Err(err) => {
				warn!(target = "gw.session", error = %err, "session service unavailable; closing instead");
				self.teardown().await?;
				return Ok(-1);
			}
		};

		let mut count = 0;
		loop {
			match service.close_session(session.info()).await {
				Ok(remaining) => {
					count += 1;
					if remaining <= 0 {
						break;
					}
				}
				Err(err) if err.kind() == ErrorKind::AlreadyRemoved => {
					debug!(target = "gw.session", session = %session.info().uuid, "session already removed");
					break;
				}
				Err(err) => {
					warn!(target = "gw.session", error = %err, closed = count, "error while killing session");
					break;
				}
			}
		}

		self.teardown().await?;
		Ok(count)
	}

	/// Runs `f` inside a session that is always closed afterwards.
	///
	/// An error from `f` takes precedence over an error from closing.
	pub async fn run_scoped<F, Fut, T>(&self, username: Option<&str>, password: Option<&str>, f: F) -> Result<T>
	where
		F: FnOnce(SessionHandle) -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		let session = self.create_session(username, password).await?;
		let outcome = f(session).await;
		let closed = self.close_session().await;
		match (outcome, closed) {
			(Ok(value), Ok(())) => Ok(value),
			(Ok(_), Err(err)) => Err(err),
			(Err(err), Ok(())) => Err(err),
			(Err(err), Err(close_err)) => {
				warn!(target = "gw.session", error = %close_err, "close failed after scoped work failed");
				Err(err)
			}
		}
	}

	/// Submits `request` and waits on it through a [`CommandCallback`] that owns the handle.
	pub async fn submit(&self, request: CommandRequest) -> Result<CommandCallback> {
		let session = self.session().await?;
		let handle = session.submit(request).await?;
		CommandCallback::new(Arc::clone(session.registry()), session.category(), handle, true).await
	}

	/// Launches `request` and waits on it through a [`ProcessCallback`].
	pub async fn launch_process(&self, request: ProcessRequest) -> Result<ProcessCallback> {
		let session = self.session().await?;
		let handle = session.launch_process(request).await?;
		ProcessCallback::new(Arc::clone(session.registry()), session.category(), handle).await
	}

	pub async fn is_active(&self) -> bool {
		self.state.lock().session.is_some()
	}

	pub async fn runtime(&self) -> Result<Arc<dyn Runtime>> {
		self.state.lock().runtime.clone().ok_or(Error::NotInitialized("runtime"))
	}

	pub async fn registry(&self) -> Result<Arc<DispatchRegistry>> {
		self.state.lock().registry.clone().ok_or(Error::NotInitialized("dispatch registry"))
	}

	pub async fn session(&self) -> Result<SessionHandle> {
		self.state.lock().handle().ok_or(Error::NotInitialized("session"))
	}

	pub async fn callback_endpoint(&self) -> Result<CallbackEndpoint> {
		self.state.lock().endpoint.clone().ok_or(Error::NotInitialized("callback endpoint"))
	}

	/// Configuration the next initialization will use.
	pub async fn saved_config(&self) -> ConfigSnapshot {
		self.state.lock().saved_config.clone()
	}

	async fn initialize(&self, config: &ConfigSnapshot) -> Result<Arc<dyn Runtime>> {
		config.log_effective();
		let runtime = self.connector.initialize(config).await?;
		runtime.set_context(CONTEXT_CLIENT_UUID, &self.client_id);
		debug!(target = "gw.session", client = %self.client_id, "runtime initialized");
		Ok(runtime)
	}

	async fn install(
		&self,
		runtime: &dyn Runtime,
		gateway: &dyn Gateway,
		proxy: &dyn SessionProxy,
	) -> Result<(Arc<DispatchRegistry>, CallbackEndpoint, String)> {
		let category = gateway.callback_category().await?;
		let registry = runtime.create_registry(&format!("client-{}", self.client_id))?;
		let identity = Identity::new(category.clone(), self.client_id.clone());
		let endpoint = CallbackEndpoint::new(identity.clone(), self.handlers.clone());

		let installed = async {
			registry.add(identity.clone(), Arc::new(endpoint.clone()))?;
			proxy.set_callback(&identity).await
		}
		.await;
		if let Err(err) = installed {
			if let Err(deactivate_err) = registry.deactivate() {
				debug!(target = "gw.session", error = %deactivate_err, "registry already deactivated");
			}
			return Err(err.into());
		}

		runtime.set_context(CONTEXT_SESSION, &proxy.info().uuid);
		Ok((registry, endpoint, category))
	}

	/// Undoes a partially created session, leaving every field empty.
	async fn roll_back(&self, proxy: Option<Arc<dyn SessionProxy>>) {
		let (registry, runtime) = {
			let mut state = self.state.lock();
			state.session = None;
			state.endpoint = None;
			state.category = None;
			let runtime = state.runtime.take();
			if let Some(runtime) = &runtime {
				state.saved_config = runtime.config();
			}
			(state.registry.take(), runtime)
		};

		if let Some(proxy) = proxy {
			if let Err(err) = proxy.destroy().await {
				if !err.is_expected_on_teardown() {
					warn!(target = "gw.session", error = %err, "failed to destroy partially created session");
				}
			}
		}
		if let Some(registry) = registry {
			let _ = registry.deactivate();
		}
		if let Some(runtime) = runtime {
			runtime.destroy().await;
		}
	}

	/// Unpublishes the session under the state lock, then releases it remotely.
	async fn teardown(&self) -> Result<()> {
		let (runtime, session, registry) = {
			let mut state = self.state.lock();
			let Some(runtime) = state.runtime.take() else {
				return Ok(());
			};
			state.endpoint = None;
			state.category = None;
			state.saved_config = runtime.config();
			(runtime, state.session.take(), state.registry.take())
		};

		if let Some(registry) = registry {
			if let Err(err) = registry.deactivate() {
				warn!(target = "gw.session", error = %err, "error deactivating dispatch registry");
			}
		}

		let mut outcome = Ok(());
		if let Some(session) = session {
			let uuid = session.info().uuid.clone();
			match session.destroy().await {
				Ok(()) => debug!(target = "gw.session", session = %uuid, "session destroyed"),
				Err(err) if err.is_expected_on_teardown() => {
					debug!(target = "gw.session", session = %uuid, kind = %err.kind(), "session already unreachable; treating as closed");
				}
				Err(err) => {
					error!(target = "gw.session", session = %uuid, error = %err, "failed to destroy session");
					outcome = Err(err.into());
				}
			}
		}

		runtime.destroy().await;
		info!(target = "gw.session", client = %self.client_id, "session closed");
		outcome
	}
}

impl Drop for SessionManager {
	fn drop(&mut self) {
		if self.state.get_mut().runtime.is_some() {
			warn!(target = "gw.session", client = %self.client_id, "session manager dropped without close_session");
		}
	}
}

fn resolve_credentials(config: &ConfigSnapshot, username: Option<&str>, password: Option<&str>) -> Result<Credentials> {
	let username = username.filter(|u| !u.is_empty()).or_else(|| config.username());
	let password = password.filter(|p| !p.is_empty()).or_else(|| config.password());
	let (Some(username), Some(password)) = (username, password) else {
		return Err(Error::MissingCredentials);
	};
	let mut credentials = Credentials::new(username, password);
	if let Some(group) = config.group() {
		credentials = credentials.with_group(group);
	}
	Ok(credentials)
}

async fn open_with_retry(gateway: &dyn Gateway, credentials: &Credentials, policy: RetryPolicy) -> Result<Arc<dyn SessionProxy>> {
	let mut attempt = 1;
	loop {
		match gateway.open_session(credentials).await {
			Ok(proxy) => return Ok(proxy),
			Err(err) if err.is_retryable() && attempt < policy.attempts => {
				info!(
					target = "gw.session",
					attempt,
					max_attempts = policy.attempts,
					error = %err,
					"session creation contended; retrying"
				);
				tokio::time::sleep(policy.delay).await;
				attempt += 1;
			}
			Err(err) => return Err(err.into()),
		}
	}
}
