//! Immutable key/value configuration captured before runtime initialization.
//!
//! Keys use a dotted `gw.` namespace (see [`keys`]). Values are kept as
//! strings; typed getters parse on access and report malformed values as
//! [`Error::Config`].

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind, Result};

/// Well-known configuration keys.
pub mod keys {
	pub const HOST: &str = "gw.host";
	pub const PORT: &str = "gw.port";
	pub const ROUTER: &str = "gw.router";
	pub const BLOCK_SIZE: &str = "gw.block_size";
	pub const MESSAGE_SIZE_MAX_KB: &str = "gw.message_size_max_kb";
	pub const CONNECT_TIMEOUT_MS: &str = "gw.connect_timeout_ms";
	/// Accepted and reported by the dump; the tokio scheduler drives outbound
	/// I/O and reply handling, so no getter reads them.
	pub const CLIENT_POOL_SIZE: &str = "gw.thread_pool.client.size";
	pub const SERVER_POOL_SIZE: &str = "gw.thread_pool.server.size";
	/// Bounds how many inbound calls are dispatched at once.
	pub const CALLBACK_POOL_SIZE: &str = "gw.callback.pool.size";
	pub const USER: &str = "gw.user";
	pub const PASS: &str = "gw.pass";
	pub const GROUP: &str = "gw.group";
	pub const DUMP: &str = "gw.dump";
	pub const RETRY_ATTEMPTS: &str = "gw.session.retry.attempts";
	pub const RETRY_DELAY_MS: &str = "gw.session.retry.delay_ms";
}

/// Context key holding the manager's client identifier.
pub const CONTEXT_CLIENT_UUID: &str = "gw.client_uuid";
/// Context key holding the active session uuid.
pub const CONTEXT_SESSION: &str = "gw.session";

const DEFAULTS: &[(&str, &str)] = &[
	(keys::PORT, "4064"),
	(keys::ROUTER, "ws://@gw.host@:@gw.port@/rpc"),
	(keys::BLOCK_SIZE, "5000000"),
	(keys::MESSAGE_SIZE_MAX_KB, "250000"),
	(keys::CONNECT_TIMEOUT_MS, "5000"),
	(keys::CLIENT_POOL_SIZE, "1"),
	(keys::SERVER_POOL_SIZE, "1"),
	(keys::CALLBACK_POOL_SIZE, "1"),
	(keys::DUMP, "false"),
	(keys::RETRY_ATTEMPTS, "3"),
	(keys::RETRY_DELAY_MS, "100"),
];

const MASK: &str = "***";

/// Bounded retry policy for session creation. No backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
	/// Total attempts, including the first. Never zero.
	pub attempts: u32,
	pub delay: Duration,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			attempts: 3,
			delay: Duration::from_millis(100),
		}
	}
}

/// Immutable snapshot of string-keyed configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigSnapshot {
	entries: BTreeMap<String, String>,
}

impl ConfigSnapshot {
	/// Snapshot containing only the built-in defaults.
	pub fn defaults() -> Self {
		Self {
			entries: DEFAULTS.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect(),
		}
	}

	/// Builder layering overrides onto [`defaults`](Self::defaults).
	pub fn builder() -> ConfigBuilder {
		ConfigBuilder { snapshot: Self::defaults() }
	}

	/// Snapshot of exactly the given entries, without defaults.
	pub fn from_entries<I, K, V>(entries: I) -> Self
	where
		I: IntoIterator<Item = (K, V)>,
		K: Into<String>,
		V: Into<String>,
	{
		Self {
			entries: entries.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
		}
	}

	/// Returns a copy with one entry replaced.
	pub fn with(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
		let mut entries = self.entries.clone();
		entries.insert(key.into(), value.into());
		Self { entries }
	}

	pub fn get(&self, key: &str) -> Option<&str> {
		self.entries.get(key).map(String::as_str)
	}

	/// Like [`get`](Self::get), treating blank values as absent.
	pub fn get_non_empty(&self, key: &str) -> Option<&str> {
		self.get(key).map(str::trim).filter(|v| !v.is_empty())
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
		self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Parses `key`, returning `None` when it is absent or blank.
	pub fn parse<T>(&self, key: &str) -> Result<Option<T>>
	where
		T: FromStr,
		T::Err: std::fmt::Display,
	{
		let Some(raw) = self.get_non_empty(key) else {
			return Ok(None);
		};
		raw.parse::<T>()
			.map(Some)
			.map_err(|err| Error::Config(format!("{key}={raw:?} is malformed: {err}")))
	}

	fn parse_or<T>(&self, key: &str, default: T) -> Result<T>
	where
		T: FromStr,
		T::Err: std::fmt::Display,
	{
		Ok(self.parse(key)?.unwrap_or(default))
	}

	pub fn host(&self) -> Option<&str> {
		self.get_non_empty(keys::HOST)
	}

	pub fn port(&self) -> Result<u16> {
		self.parse_or(keys::PORT, 4064)
	}

	pub fn block_size(&self) -> Result<u64> {
		self.parse_or(keys::BLOCK_SIZE, 5_000_000)
	}

	pub fn message_size_max_kb(&self) -> Result<u64> {
		self.parse_or(keys::MESSAGE_SIZE_MAX_KB, 250_000)
	}

	pub fn connect_timeout(&self) -> Result<Duration> {
		self.parse_or(keys::CONNECT_TIMEOUT_MS, 5000).map(Duration::from_millis)
	}

	pub fn callback_pool_size(&self) -> Result<usize> {
		self.parse_or(keys::CALLBACK_POOL_SIZE, 1)
	}

	pub fn username(&self) -> Option<&str> {
		self.get_non_empty(keys::USER)
	}

	pub fn password(&self) -> Option<&str> {
		self.get(keys::PASS).filter(|v| !v.is_empty())
	}

	pub fn group(&self) -> Option<&str> {
		self.get_non_empty(keys::GROUP)
	}

	pub fn dump_enabled(&self) -> Result<bool> {
		self.parse_or(keys::DUMP, false)
	}

	pub fn retry_policy(&self) -> Result<RetryPolicy> {
		let attempts: u32 = self.parse_or(keys::RETRY_ATTEMPTS, 3)?;
		let delay_ms: u64 = self.parse_or(keys::RETRY_DELAY_MS, 100)?;
		Ok(RetryPolicy {
			attempts: attempts.max(1),
			delay: Duration::from_millis(delay_ms),
		})
	}

	/// Resolves the router address, substituting `@key@` placeholders.
	///
	/// An absent router is reported as [`ErrorKind::NoRouter`]; a placeholder
	/// naming a missing key (typically `gw.host`) is a configuration error.
	pub fn router_endpoint(&self) -> Result<String> {
		let Some(template) = self.get_non_empty(keys::ROUTER) else {
			return Err(Error::rpc(ErrorKind::NoRouter, format!("{} is not configured", keys::ROUTER)));
		};

		let mut out = String::with_capacity(template.len());
		let mut rest = template;
		while let Some(start) = rest.find('@') {
			out.push_str(&rest[..start]);
			let after = &rest[start + 1..];
			let Some(end) = after.find('@') else {
				out.push_str(&rest[start..]);
				rest = "";
				break;
			};
			let key = &after[..end];
			if key.is_empty() {
				out.push_str("@@");
			} else {
				let value = self
					.get_non_empty(key)
					.ok_or_else(|| Error::Config(format!("{key} is required by {}", keys::ROUTER)))?;
				out.push_str(value);
			}
			rest = &after[end + 1..];
		}
		out.push_str(rest);
		Ok(out)
	}

	/// Copy with the password masked, suitable for logging.
	pub fn redacted(&self) -> Self {
		let mut entries = self.entries.clone();
		if let Some(pass) = entries.get_mut(keys::PASS) {
			*pass = MASK.to_string();
		}
		Self { entries }
	}

	/// Logs every entry when `gw.dump` is enabled.
	pub fn log_effective(&self) {
		if !self.dump_enabled().unwrap_or(false) {
			return;
		}
		for (key, value) in self.redacted().iter() {
			tracing::info!(target = "gw.config", key, value, "effective configuration");
		}
	}
}

/// Builder for [`ConfigSnapshot`].
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
	snapshot: ConfigSnapshot,
}

impl ConfigBuilder {
	pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.snapshot.entries.insert(key.into(), value.into());
		self
	}

	/// Layers every entry of `overrides` on top of the current values.
	pub fn merge(mut self, overrides: &ConfigSnapshot) -> Self {
		for (key, value) in overrides.iter() {
			self.snapshot.entries.insert(key.to_string(), value.to_string());
		}
		self
	}

	pub fn host(self, host: impl Into<String>) -> Self {
		self.set(keys::HOST, host)
	}

	pub fn port(self, port: u16) -> Self {
		self.set(keys::PORT, port.to_string())
	}

	pub fn credentials(self, username: impl Into<String>, password: impl Into<String>) -> Self {
		self.set(keys::USER, username).set(keys::PASS, password)
	}

	pub fn retry(self, attempts: u32, delay: Duration) -> Self {
		self.set(keys::RETRY_ATTEMPTS, attempts.to_string())
			.set(keys::RETRY_DELAY_MS, delay.as_millis().to_string())
	}

	pub fn build(self) -> ConfigSnapshot {
		self.snapshot
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_are_present() {
		let config = ConfigSnapshot::defaults();
		assert_eq!(config.port().unwrap(), 4064);
		assert_eq!(config.block_size().unwrap(), 5_000_000);
		assert_eq!(config.message_size_max_kb().unwrap(), 250_000);
		assert_eq!(config.connect_timeout().unwrap(), Duration::from_millis(5000));
		assert_eq!(config.callback_pool_size().unwrap(), 1);
		assert!(!config.dump_enabled().unwrap());
		assert_eq!(config.retry_policy().unwrap(), RetryPolicy::default());
		assert!(config.username().is_none());
	}

	#[test]
	fn router_substitutes_host_and_port() {
		let config = ConfigSnapshot::builder().host("omero.example.org").port(4063).build();
		assert_eq!(config.router_endpoint().unwrap(), "ws://omero.example.org:4063/rpc");
	}

	#[test]
	fn router_requires_host() {
		let err = ConfigSnapshot::defaults().router_endpoint().unwrap_err();
		assert_eq!(err.kind(), ErrorKind::Config);
		assert!(err.to_string().contains("gw.host"));
	}

	#[test]
	fn missing_router_is_no_router() {
		let config = ConfigSnapshot::from_entries([(keys::HOST, "localhost")]);
		assert_eq!(config.router_endpoint().unwrap_err().kind(), ErrorKind::NoRouter);
	}

	#[test]
	fn literal_router_needs_no_placeholders() {
		let config = ConfigSnapshot::from_entries([(keys::ROUTER, "ws://10.0.0.2:9000/rpc")]);
		assert_eq!(config.router_endpoint().unwrap(), "ws://10.0.0.2:9000/rpc");
	}

	#[test]
	fn malformed_values_are_config_errors() {
		let config = ConfigSnapshot::defaults().with(keys::PORT, "forty");
		let err = config.port().unwrap_err();
		assert_eq!(err.kind(), ErrorKind::Config);
		assert!(err.to_string().contains("gw.port"));
	}

	#[test]
	fn with_leaves_original_untouched() {
		let base = ConfigSnapshot::defaults();
		let changed = base.with(keys::HOST, "a");
		assert!(base.host().is_none());
		assert_eq!(changed.host(), Some("a"));
	}

	#[test]
	fn retry_attempts_never_zero() {
		let config = ConfigSnapshot::builder().retry(0, Duration::from_millis(5)).build();
		let policy = config.retry_policy().unwrap();
		assert_eq!(policy.attempts, 1);
		assert_eq!(policy.delay, Duration::from_millis(5));
	}

	#[test]
	fn redacted_masks_password() {
		let config = ConfigSnapshot::builder().credentials("root", "omero").build();
		let redacted = config.redacted();
		assert_eq!(redacted.get(keys::PASS), Some("***"));
		assert_eq!(redacted.username(), Some("root"));
		assert_eq!(config.password(), Some("omero"));
	}

	#[derive(Clone, Default)]
	struct Capture(std::sync::Arc<parking_lot::Mutex<Vec<u8>>>);

	impl std::io::Write for Capture {
		fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
			self.0.lock().extend_from_slice(buf);
			Ok(buf.len())
		}

		fn flush(&mut self) -> std::io::Result<()> {
			Ok(())
		}
	}

	fn captured_dump(config: &ConfigSnapshot) -> String {
		let capture = Capture::default();
		let writer = capture.clone();
		let subscriber = tracing_subscriber::fmt()
			.with_writer(move || writer.clone())
			.with_ansi(false)
			.finish();
		tracing::subscriber::with_default(subscriber, || config.log_effective());
		let bytes = capture.0.lock().clone();
		String::from_utf8(bytes).unwrap()
	}

	#[test]
	fn dump_logs_entries_with_password_masked() {
		let config = ConfigSnapshot::builder().credentials("root", "s3cr3t-pass").build();
		assert!(captured_dump(&config).is_empty());

		let output = captured_dump(&config.with(keys::DUMP, "true"));
		assert!(output.contains("gw.user"), "{output}");
		assert!(output.contains("root"), "{output}");
		assert!(output.contains("***"), "{output}");
		assert!(!output.contains("s3cr3t-pass"), "{output}");
	}

	#[test]
	fn blank_values_read_as_absent() {
		let config = ConfigSnapshot::builder().set(keys::USER, "  ").build();
		assert!(config.username().is_none());
	}
}
