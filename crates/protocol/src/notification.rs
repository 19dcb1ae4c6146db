//! Server-to-client push notifications.

use serde::{Deserialize, Serialize};

use crate::command::{CommandResponse, CommandStatus};

/// A push notification addressed to a locally registered callback object.
///
/// Encoded as `{"method": "...", "params": {...}}`; variants without fields
/// omit `params`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Notification {
	/// The server asks the client to prove it is still alive.
	HeartbeatRequested,
	/// The session was closed on the server side.
	SessionClosed,
	/// The server will shut down after `delay_ms`.
	ShutdownIn { delay_ms: u64 },
	/// Command progress.
	Step { complete: u32, total: u32 },
	/// Command reached its terminal state.
	Finished {
		response: CommandResponse,
		status: CommandStatus,
	},
	ProcessCancelled { success: bool },
	ProcessFinished { return_code: i32 },
	ProcessKilled { success: bool },
}

impl Notification {
	/// Wire method name of this notification.
	pub fn method(&self) -> &'static str {
		match self {
			Self::HeartbeatRequested => "heartbeatRequested",
			Self::SessionClosed => "sessionClosed",
			Self::ShutdownIn { .. } => "shutdownIn",
			Self::Step { .. } => "step",
			Self::Finished { .. } => "finished",
			Self::ProcessCancelled { .. } => "processCancelled",
			Self::ProcessFinished { .. } => "processFinished",
			Self::ProcessKilled { .. } => "processKilled",
		}
	}
}
