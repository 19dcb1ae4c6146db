//! Scripted in-memory runtime for tests.
//!
//! A [`StubConnector`] records every call made through the runtime contract
//! and fails calls on demand with a chosen [`ErrorKind`]. Notifications are
//! pushed with [`StubConnector::push`], which dispatches through the most
//! recently created registry exactly as an inbound call would.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use gw_protocol::{CommandRequest, CommandResponse, CommandStatus, Credentials, Identity, Notification, ProcessRequest, SessionInfo};
use parking_lot::Mutex;

use crate::config::ConfigSnapshot;
use crate::error::{Error, ErrorKind, Result};
use crate::registry::DispatchRegistry;
use crate::runtime::{CommandHandle, Connector, Gateway, ProcessHandle, Runtime, SessionProxy, SessionService};

/// Callback category reported by the stub gateway.
pub const STUB_CALLBACK_CATEGORY: &str = "stub-callbacks";

fn scripted(kind: ErrorKind, call: &str) -> Error {
	Error::rpc(kind, format!("scripted {kind} from {call}"))
}

#[derive(Default)]
struct Script {
	initialize: VecDeque<ErrorKind>,
	open: VecDeque<ErrorKind>,
	set_callback: VecDeque<ErrorKind>,
	destroy: VecDeque<ErrorKind>,
	destroy_delay: Option<Duration>,
	session_service: VecDeque<ErrorKind>,
	close: VecDeque<std::result::Result<i32, ErrorKind>>,
	commands: VecDeque<Arc<StubCommand>>,
}

#[derive(Default)]
struct Recorded {
	last_config: Option<ConfigSnapshot>,
	last_credentials: Option<Credentials>,
	registries: Vec<Arc<DispatchRegistry>>,
	runtimes: Vec<Arc<StubRuntime>>,
	session_callbacks: Vec<Identity>,
	commands: Vec<Arc<StubCommand>>,
	processes: Vec<Arc<StubProcess>>,
}

#[derive(Default)]
struct StubState {
	script: Mutex<Script>,
	recorded: Mutex<Recorded>,
	runtime_inits: AtomicUsize,
	runtime_destroys: AtomicUsize,
	open_calls: AtomicUsize,
	destroy_calls: AtomicUsize,
	close_calls: AtomicUsize,
	submit_calls: AtomicUsize,
}

/// Connector handing out scripted in-memory runtimes. Clones share state.
#[derive(Clone, Default)]
pub struct StubConnector {
	state: Arc<StubState>,
}

impl StubConnector {
	pub fn new() -> Self {
		Self::default()
	}

	/// Fails the next runtime initialization with `kind`.
	pub fn fail_initialize(&self, kind: ErrorKind) -> &Self {
		self.state.script.lock().initialize.push_back(kind);
		self
	}

	/// Fails the next open-session call with `kind`; queue several for repeated failures.
	pub fn fail_open(&self, kind: ErrorKind) -> &Self {
		self.state.script.lock().open.push_back(kind);
		self
	}

	pub fn fail_set_callback(&self, kind: ErrorKind) -> &Self {
		self.state.script.lock().set_callback.push_back(kind);
		self
	}

	pub fn fail_destroy(&self, kind: ErrorKind) -> &Self {
		self.state.script.lock().destroy.push_back(kind);
		self
	}

	/// Makes every session destroy take `delay` before answering.
	pub fn delay_destroy(&self, delay: Duration) -> &Self {
		self.state.script.lock().destroy_delay = Some(delay);
		self
	}

	pub fn fail_session_service(&self, kind: ErrorKind) -> &Self {
		self.state.script.lock().session_service.push_back(kind);
		self
	}

	/// Queues results for successive close-session calls. Once drained, calls return `0`.
	pub fn queue_close_results(&self, results: impl IntoIterator<Item = std::result::Result<i32, ErrorKind>>) -> &Self {
		self.state.script.lock().close.extend(results);
		self
	}

	/// Hands `command` out from the next submit instead of a fresh pending one.
	pub fn queue_command(&self, command: Arc<StubCommand>) -> &Self {
		self.state.script.lock().commands.push_back(command);
		self
	}

	/// Dispatches `notification` to `identity` through the latest registry.
	pub fn push(&self, identity: &Identity, notification: Notification) -> Result<()> {
		let registry = self.last_registry().ok_or_else(|| Error::NotFound(identity.clone()))?;
		registry.dispatch(identity, notification)
	}

	pub fn runtime_inits(&self) -> usize {
		self.state.runtime_inits.load(Ordering::SeqCst)
	}

	pub fn runtime_destroys(&self) -> usize {
		self.state.runtime_destroys.load(Ordering::SeqCst)
	}

	pub fn open_calls(&self) -> usize {
		self.state.open_calls.load(Ordering::SeqCst)
	}

	pub fn destroy_calls(&self) -> usize {
		self.state.destroy_calls.load(Ordering::SeqCst)
	}

	pub fn close_calls(&self) -> usize {
		self.state.close_calls.load(Ordering::SeqCst)
	}

	pub fn submit_calls(&self) -> usize {
		self.state.submit_calls.load(Ordering::SeqCst)
	}

	pub fn last_config(&self) -> Option<ConfigSnapshot> {
		self.state.recorded.lock().last_config.clone()
	}

	pub fn last_credentials(&self) -> Option<Credentials> {
		self.state.recorded.lock().last_credentials.clone()
	}

	pub fn last_registry(&self) -> Option<Arc<DispatchRegistry>> {
		self.state.recorded.lock().registries.last().cloned()
	}

	/// Context value set on the most recently initialized runtime.
	pub fn context(&self, key: &str) -> Option<String> {
		let runtime = self.state.recorded.lock().runtimes.last().cloned()?;
		runtime.context(key)
	}

	/// Identities installed through `set_callback`, oldest first.
	pub fn session_callbacks(&self) -> Vec<Identity> {
		self.state.recorded.lock().session_callbacks.clone()
	}

	pub fn last_command(&self) -> Option<Arc<StubCommand>> {
		self.state.recorded.lock().commands.last().cloned()
	}

	pub fn last_process(&self) -> Option<Arc<StubProcess>> {
		self.state.recorded.lock().processes.last().cloned()
	}
}

#[async_trait]
impl Connector for StubConnector {
	async fn initialize(&self, config: &ConfigSnapshot) -> Result<Arc<dyn Runtime>> {
		if let Some(kind) = self.state.script.lock().initialize.pop_front() {
			return Err(scripted(kind, "initialize"));
		}
		self.state.runtime_inits.fetch_add(1, Ordering::SeqCst);
		let runtime = Arc::new(StubRuntime {
			config: config.clone(),
			context: Mutex::new(BTreeMap::new()),
			state: Arc::clone(&self.state),
		});
		let mut recorded = self.state.recorded.lock();
		recorded.last_config = Some(config.clone());
		recorded.runtimes.push(Arc::clone(&runtime));
		Ok(runtime as Arc<dyn Runtime>)
	}
}

struct StubRuntime {
	config: ConfigSnapshot,
	context: Mutex<BTreeMap<String, String>>,
	state: Arc<StubState>,
}

#[async_trait]
impl Runtime for StubRuntime {
	fn config(&self) -> ConfigSnapshot {
		self.config.clone()
	}

	fn gateway(&self) -> Result<Arc<dyn Gateway>> {
		Ok(Arc::new(StubGateway {
			state: Arc::clone(&self.state),
		}))
	}

	fn create_registry(&self, name: &str) -> Result<Arc<DispatchRegistry>> {
		let registry = Arc::new(DispatchRegistry::new(name));
		self.state.recorded.lock().registries.push(Arc::clone(&registry));
		Ok(registry)
	}

	fn set_context(&self, key: &str, value: &str) {
		self.context.lock().insert(key.to_string(), value.to_string());
	}

	fn context(&self, key: &str) -> Option<String> {
		self.context.lock().get(key).cloned()
	}

	async fn destroy(&self) {
		self.state.runtime_destroys.fetch_add(1, Ordering::SeqCst);
	}
}

struct StubGateway {
	state: Arc<StubState>,
}

#[async_trait]
impl Gateway for StubGateway {
	async fn callback_category(&self) -> Result<String> {
		Ok(STUB_CALLBACK_CATEGORY.to_string())
	}

	async fn open_session(&self, credentials: &Credentials) -> Result<Arc<dyn SessionProxy>> {
		self.state.open_calls.fetch_add(1, Ordering::SeqCst);
		self.state.recorded.lock().last_credentials = Some(credentials.clone());
		if let Some(kind) = self.state.script.lock().open.pop_front() {
			return Err(scripted(kind, "open_session"));
		}
		Ok(Arc::new(StubSession {
			info: SessionInfo {
				uuid: uuid::Uuid::new_v4().to_string(),
				user: credentials.username.clone(),
				group: credentials.group.clone(),
			},
			state: Arc::clone(&self.state),
		}))
	}
}

struct StubSession {
	info: SessionInfo,
	state: Arc<StubState>,
}

#[async_trait]
impl SessionProxy for StubSession {
	fn info(&self) -> &SessionInfo {
		&self.info
	}

	async fn set_callback(&self, identity: &Identity) -> Result<()> {
		if let Some(kind) = self.state.script.lock().set_callback.pop_front() {
			return Err(scripted(kind, "set_callback"));
		}
		self.state.recorded.lock().session_callbacks.push(identity.clone());
		Ok(())
	}

	async fn destroy(&self) -> Result<()> {
		self.state.destroy_calls.fetch_add(1, Ordering::SeqCst);
		let delay = self.state.script.lock().destroy_delay;
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}
		let scripted_failure = self.state.script.lock().destroy.pop_front();
		match scripted_failure {
			Some(kind) => Err(scripted(kind, "destroy")),
			None => Ok(()),
		}
	}

	async fn session_service(&self) -> Result<Arc<dyn SessionService>> {
		if let Some(kind) = self.state.script.lock().session_service.pop_front() {
			return Err(scripted(kind, "session_service"));
		}
		Ok(Arc::new(StubSessionService {
			state: Arc::clone(&self.state),
		}))
	}

	async fn submit(&self, _request: CommandRequest) -> Result<Arc<dyn CommandHandle>> {
		let n = self.state.submit_calls.fetch_add(1, Ordering::SeqCst);
		let queued = self.state.script.lock().commands.pop_front();
		let command = queued.unwrap_or_else(|| Arc::new(StubCommand::new(format!("cmd-{n}"))));
		self.state.recorded.lock().commands.push(Arc::clone(&command));
		Ok(command as Arc<dyn CommandHandle>)
	}

	async fn launch_process(&self, _request: ProcessRequest) -> Result<Arc<dyn ProcessHandle>> {
		let mut recorded = self.state.recorded.lock();
		let process = Arc::new(StubProcess::new(format!("proc-{}", recorded.processes.len())));
		recorded.processes.push(Arc::clone(&process));
		Ok(process as Arc<dyn ProcessHandle>)
	}
}

struct StubSessionService {
	state: Arc<StubState>,
}

#[async_trait]
impl SessionService for StubSessionService {
	async fn close_session(&self, _session: &SessionInfo) -> Result<i32> {
		self.state.close_calls.fetch_add(1, Ordering::SeqCst);
		match self.state.script.lock().close.pop_front() {
			Some(Ok(remaining)) => Ok(remaining),
			Some(Err(kind)) => Err(scripted(kind, "close_session")),
			None => Ok(0),
		}
	}
}

#[derive(Default)]
struct CommandState {
	response: Option<CommandResponse>,
	status: CommandStatus,
	callbacks: Vec<Identity>,
	response_polls: usize,
	cancel_calls: usize,
	close_calls: usize,
}

/// In-memory command handle.
pub struct StubCommand {
	id: String,
	state: Mutex<CommandState>,
}

impl StubCommand {
	/// A command that is still running.
	pub fn new(id: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			state: Mutex::new(CommandState::default()),
		}
	}

	/// A command that finished before anyone asked.
	pub fn completed(id: impl Into<String>, response: CommandResponse, status: CommandStatus) -> Self {
		let command = Self::new(id);
		command.complete(response, status);
		command
	}

	/// Makes `response` visible to subsequent polls. Does not notify.
	pub fn complete(&self, response: CommandResponse, status: CommandStatus) {
		let mut state = self.state.lock();
		state.response = Some(response);
		state.status = status;
	}

	pub fn callbacks(&self) -> Vec<Identity> {
		self.state.lock().callbacks.clone()
	}

	pub fn response_polls(&self) -> usize {
		self.state.lock().response_polls
	}

	pub fn cancel_calls(&self) -> usize {
		self.state.lock().cancel_calls
	}

	pub fn close_calls(&self) -> usize {
		self.state.lock().close_calls
	}
}

#[async_trait]
impl CommandHandle for StubCommand {
	fn id(&self) -> &str {
		&self.id
	}

	async fn response(&self) -> Result<Option<CommandResponse>> {
		let mut state = self.state.lock();
		state.response_polls += 1;
		Ok(state.response.clone())
	}

	async fn status(&self) -> Result<CommandStatus> {
		Ok(self.state.lock().status.clone())
	}

	async fn cancel(&self) -> Result<bool> {
		self.state.lock().cancel_calls += 1;
		Ok(true)
	}

	async fn close(&self) -> Result<()> {
		self.state.lock().close_calls += 1;
		Ok(())
	}

	async fn add_callback(&self, identity: &Identity) -> Result<()> {
		self.state.lock().callbacks.push(identity.clone());
		Ok(())
	}
}

#[derive(Default)]
struct ProcessState {
	return_code: Option<i32>,
	callbacks: Vec<Identity>,
	cancel_calls: usize,
	kill_calls: usize,
}

/// In-memory process handle.
pub struct StubProcess {
	id: String,
	state: Mutex<ProcessState>,
}

impl StubProcess {
	pub fn new(id: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			state: Mutex::new(ProcessState::default()),
		}
	}

	/// A process that already exited with `return_code`.
	pub fn finished(id: impl Into<String>, return_code: i32) -> Self {
		let process = Self::new(id);
		process.finish(return_code);
		process
	}

	pub fn finish(&self, return_code: i32) {
		self.state.lock().return_code = Some(return_code);
	}

	pub fn callbacks(&self) -> Vec<Identity> {
		self.state.lock().callbacks.clone()
	}

	pub fn cancel_calls(&self) -> usize {
		self.state.lock().cancel_calls
	}

	pub fn kill_calls(&self) -> usize {
		self.state.lock().kill_calls
	}
}

#[async_trait]
impl ProcessHandle for StubProcess {
	fn id(&self) -> &str {
		&self.id
	}

	async fn poll(&self) -> Result<Option<i32>> {
		Ok(self.state.lock().return_code)
	}

	async fn cancel(&self) -> Result<bool> {
		self.state.lock().cancel_calls += 1;
		Ok(true)
	}

	async fn kill(&self) -> Result<bool> {
		self.state.lock().kill_calls += 1;
		Ok(true)
	}

	async fn register_callback(&self, identity: &Identity) -> Result<()> {
		self.state.lock().callbacks.push(identity.clone());
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn scripted_open_failures_are_consumed_in_order() {
		let stub = StubConnector::new();
		stub.fail_open(ErrorKind::Concurrency).fail_open(ErrorKind::Authentication);

		let runtime = stub.initialize(&ConfigSnapshot::defaults()).await.unwrap();
		let gateway = runtime.gateway().unwrap();
		let credentials = Credentials::new("root", "omero");

		let first = gateway.open_session(&credentials).await.err().unwrap();
		assert_eq!(first.kind(), ErrorKind::Concurrency);
		let second = gateway.open_session(&credentials).await.err().unwrap();
		assert_eq!(second.kind(), ErrorKind::Authentication);
		let session = gateway.open_session(&credentials).await.unwrap();
		assert_eq!(session.info().user, "root");
		assert_eq!(stub.open_calls(), 3);
	}

	#[tokio::test]
	async fn close_results_drain_to_zero() {
		let stub = StubConnector::new();
		stub.queue_close_results([Ok(2), Err(ErrorKind::AlreadyRemoved)]);
		let runtime = stub.initialize(&ConfigSnapshot::defaults()).await.unwrap();
		let session = runtime.gateway().unwrap().open_session(&Credentials::new("u", "p")).await.unwrap();
		let service = session.session_service().await.unwrap();

		assert_eq!(service.close_session(session.info()).await.unwrap(), 2);
		assert_eq!(
			service.close_session(session.info()).await.unwrap_err().kind(),
			ErrorKind::AlreadyRemoved
		);
		assert_eq!(service.close_session(session.info()).await.unwrap(), 0);
		assert_eq!(stub.close_calls(), 3);
	}

	#[tokio::test]
	async fn completed_command_answers_first_poll() {
		let command = StubCommand::completed("c", CommandResponse::ok(serde_json::Value::Null), CommandStatus::default());
		assert!(command.response().await.unwrap().is_some());
		assert_eq!(command.response_polls(), 1);
	}
}
