//! Client error type.

use std::time::Duration;

use gw_runtime::ErrorKind;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
	/// `create_session` was called while a session is open.
	#[error("a session is already active; close it before creating another")]
	AlreadyActive,

	#[error("no credentials: pass a username and password or configure gw.user and gw.pass")]
	MissingCredentials,

	/// An accessor was used while the named component does not exist.
	#[error("{0} is not initialized")]
	NotInitialized(&'static str),

	#[error("command status not present: the command has not completed")]
	StatusNotPresent,

	#[error("lock timed out after {attempts} attempt(s), {elapsed:?} elapsed")]
	LockTimeout { attempts: u32, elapsed: Duration },

	#[error(transparent)]
	Runtime(#[from] gw_runtime::Error),
}

impl Error {
	/// Runtime classification, when this wraps a runtime failure.
	pub fn runtime_kind(&self) -> Option<ErrorKind> {
		match self {
			Self::Runtime(err) => Some(err.kind()),
			_ => None,
		}
	}

	pub fn is_retryable(&self) -> bool {
		matches!(self, Self::Runtime(err) if err.is_retryable())
	}
}
