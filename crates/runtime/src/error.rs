//! Runtime error type and data-driven failure classification.

use std::fmt;

use gw_protocol::Identity;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Classification of a runtime failure.
///
/// Retry and teardown decisions are made by checking membership of a kind in
/// a constant set rather than by matching individual error values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
	/// Transient contention on the server; the call may succeed if repeated.
	Concurrency,
	Authentication,
	ConnectionLost,
	ConnectionRefused,
	ConnectTimeout,
	SessionNotFound,
	/// No router endpoint is configured locally.
	NoRouter,
	/// The session was already removed by another client.
	AlreadyRemoved,
	Config,
	Protocol,
	Transport,
	ChannelClosed,
	/// No local callback object for an identity.
	NotFound,
	/// The dispatch registry no longer accepts work.
	Deactivated,
	AlreadyRegistered,
	/// Any other server-side failure.
	Remote,
}

/// Kinds that count as a successful teardown when raised by a destroy-session call.
pub const EXPECTED_ON_TEARDOWN: &[ErrorKind] = &[
	ErrorKind::SessionNotFound,
	ErrorKind::ConnectionLost,
	ErrorKind::ConnectionRefused,
	ErrorKind::ConnectTimeout,
	ErrorKind::NoRouter,
];

/// Kinds worth retrying on session creation.
pub const RETRYABLE: &[ErrorKind] = &[ErrorKind::Concurrency];

impl ErrorKind {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Concurrency => "concurrency",
			Self::Authentication => "authentication",
			Self::ConnectionLost => "connection_lost",
			Self::ConnectionRefused => "connection_refused",
			Self::ConnectTimeout => "connect_timeout",
			Self::SessionNotFound => "session_not_found",
			Self::NoRouter => "no_router",
			Self::AlreadyRemoved => "already_removed",
			Self::Config => "config",
			Self::Protocol => "protocol",
			Self::Transport => "transport",
			Self::ChannelClosed => "channel_closed",
			Self::NotFound => "not_found",
			Self::Deactivated => "deactivated",
			Self::AlreadyRegistered => "already_registered",
			Self::Remote => "remote",
		}
	}

	/// Maps a server error class name onto a kind.
	pub fn from_remote_name(name: Option<&str>) -> Self {
		match name {
			Some("ConcurrencyError") => Self::Concurrency,
			Some("AuthenticationError") | Some("PermissionDeniedError") => Self::Authentication,
			Some("SessionNotFoundError") => Self::SessionNotFound,
			Some("RemovedSessionError") => Self::AlreadyRemoved,
			Some("NoRouterError") => Self::NoRouter,
			Some("ConnectionLostError") => Self::ConnectionLost,
			Some("ConnectionRefusedError") => Self::ConnectionRefused,
			Some("ConnectTimeoutError") => Self::ConnectTimeout,
			_ => Self::Remote,
		}
	}
}

impl fmt::Display for ErrorKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Error)]
pub enum Error {
	/// Failure reported by the remote side or classified from the connection.
	#[error("{kind}: {message}")]
	Rpc { kind: ErrorKind, message: String },

	#[error("configuration error: {0}")]
	Config(String),

	#[error("protocol error: {0}")]
	Protocol(String),

	#[error("transport error: {0}")]
	Transport(String),

	#[error("channel closed unexpectedly")]
	ChannelClosed,

	#[error("cannot find local callback object: {0}")]
	NotFound(Identity),

	#[error("dispatch registry {0} is deactivated")]
	Deactivated(String),

	#[error("callback object already registered: {0}")]
	AlreadyRegistered(Identity),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	pub fn rpc(kind: ErrorKind, message: impl Into<String>) -> Self {
		Self::Rpc {
			kind,
			message: message.into(),
		}
	}

	pub fn kind(&self) -> ErrorKind {
		match self {
			Self::Rpc { kind, .. } => *kind,
			Self::Config(_) => ErrorKind::Config,
			Self::Protocol(_) | Self::Json(_) => ErrorKind::Protocol,
			Self::Transport(_) => ErrorKind::Transport,
			Self::ChannelClosed => ErrorKind::ChannelClosed,
			Self::NotFound(_) => ErrorKind::NotFound,
			Self::Deactivated(_) => ErrorKind::Deactivated,
			Self::AlreadyRegistered(_) => ErrorKind::AlreadyRegistered,
		}
	}

	pub fn is_retryable(&self) -> bool {
		RETRYABLE.contains(&self.kind())
	}

	pub fn is_expected_on_teardown(&self) -> bool {
		EXPECTED_ON_TEARDOWN.contains(&self.kind())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn only_concurrency_is_retryable() {
		assert!(Error::rpc(ErrorKind::Concurrency, "busy").is_retryable());
		assert!(!Error::rpc(ErrorKind::Authentication, "denied").is_retryable());
		assert!(!Error::rpc(ErrorKind::ConnectionRefused, "refused").is_retryable());
		assert!(!Error::ChannelClosed.is_retryable());
	}

	#[test]
	fn teardown_set_membership() {
		for kind in EXPECTED_ON_TEARDOWN {
			assert!(Error::rpc(*kind, "gone").is_expected_on_teardown(), "{kind}");
		}
		assert!(!Error::rpc(ErrorKind::Remote, "boom").is_expected_on_teardown());
		assert!(!Error::rpc(ErrorKind::AlreadyRemoved, "removed").is_expected_on_teardown());
		assert!(!Error::Config("bad".into()).is_expected_on_teardown());
	}

	#[test]
	fn remote_names_map_to_kinds() {
		assert_eq!(ErrorKind::from_remote_name(Some("ConcurrencyError")), ErrorKind::Concurrency);
		assert_eq!(ErrorKind::from_remote_name(Some("RemovedSessionError")), ErrorKind::AlreadyRemoved);
		assert_eq!(ErrorKind::from_remote_name(Some("NoRouterError")), ErrorKind::NoRouter);
		assert_eq!(ErrorKind::from_remote_name(Some("Whatever")), ErrorKind::Remote);
		assert_eq!(ErrorKind::from_remote_name(None), ErrorKind::Remote);
	}

	#[test]
	fn display_includes_kind() {
		let err = Error::rpc(ErrorKind::SessionNotFound, "no such session");
		assert_eq!(err.to_string(), "session_not_found: no such session");
	}
}
