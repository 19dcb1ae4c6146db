//! Long-running command and process payloads.
//!
//! The server owns the meaning of command requests and responses; the client
//! only carries them and inspects the status flags.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A request for a long-running server-side command (bulk delete, move, reset, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
	/// Command type understood by the server, e.g. `"delete"` or `"chgrp"`.
	pub kind: String,
	#[serde(default, skip_serializing_if = "Value::is_null")]
	pub params: Value,
}

impl CommandRequest {
	pub fn new(kind: impl Into<String>, params: Value) -> Self {
		Self {
			kind: kind.into(),
			params,
		}
	}
}

/// Terminal response of a command.
///
/// Failures reported by the server are still terminal responses; they are
/// data, not transport errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CommandResponse {
	Ok {
		#[serde(default)]
		payload: Value,
	},
	Err {
		category: String,
		name: String,
		#[serde(default)]
		parameters: BTreeMap<String, String>,
	},
}

impl CommandResponse {
	pub fn ok(payload: Value) -> Self {
		Self::Ok { payload }
	}

	pub fn err(category: impl Into<String>, name: impl Into<String>) -> Self {
		Self::Err {
			category: category.into(),
			name: name.into(),
			parameters: BTreeMap::new(),
		}
	}

	pub fn is_err(&self) -> bool {
		matches!(self, Self::Err { .. })
	}
}

/// Markers carried in a [`CommandStatus`] flag list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusFlag {
	Active,
	Inactive,
	Success,
	Failure,
	Cancelled,
}

/// Progress and outcome markers for a command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandStatus {
	#[serde(default)]
	pub flags: Vec<StatusFlag>,
	#[serde(default)]
	pub steps: u32,
	#[serde(default)]
	pub current_step: u32,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub start_time: Option<i64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub stop_time: Option<i64>,
}

impl CommandStatus {
	pub fn with_flag(mut self, flag: StatusFlag) -> Self {
		self.flags.push(flag);
		self
	}

	/// Number of occurrences of `flag` in the flag list.
	pub fn count(&self, flag: StatusFlag) -> usize {
		self.flags.iter().filter(|f| **f == flag).count()
	}

	pub fn has(&self, flag: StatusFlag) -> bool {
		self.count(flag) > 0
	}
}

/// A request to run a single server-side process (script execution).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRequest {
	pub script: String,
	#[serde(default, skip_serializing_if = "Value::is_null")]
	pub inputs: Value,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub wait_secs: Option<u64>,
}

impl ProcessRequest {
	pub fn new(script: impl Into<String>) -> Self {
		Self {
			script: script.into(),
			inputs: Value::Null,
			wait_secs: None,
		}
	}
}
