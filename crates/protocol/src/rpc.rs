//! JSON-RPC envelopes for the reference WebSocket binding.
//!
//! Outbound requests carry a numeric `id`, an addressed `target`, and the
//! caller's implicit context. Inbound messages are either replies (with `id`)
//! or server-initiated calls addressed to a local callback identity.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request sent to the gateway.
///
/// ```json
/// {
///   "id": 7,
///   "target": "session/2f1c...",
///   "method": "session.submit",
///   "params": {"kind": "delete"},
///   "context": {"gw.session": "2f1c..."}
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
	/// Correlates the reply.
	pub id: u32,
	/// Remote object the method is invoked on (`gateway`, `session/<uuid>`, ...).
	pub target: String,
	pub method: String,
	#[serde(default)]
	pub params: Value,
	/// Implicit call context attached to every request on a runtime.
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub context: BTreeMap<String, String>,
}

/// Reply to a [`Request`]; `result` and `error` are mutually exclusive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
	pub id: u32,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<ErrorWrapper>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorWrapper {
	pub error: ErrorPayload,
}

/// Server error details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
	pub message: String,
	/// Error class name used for classification (e.g. `"ConcurrencyError"`).
	#[serde(skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub stack: Option<String>,
}

/// Server-initiated call on a locally hosted callback object.
///
/// `target` is the callback identity in `category/name` form; `method` and
/// `params` decode into a [`Notification`](crate::Notification).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Call {
	pub target: String,
	pub method: String,
	#[serde(default)]
	pub params: Value,
}

/// Inbound message, distinguished by the presence of `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
	Reply(Reply),
	Call(Call),
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn reply_and_call_are_distinguished_by_id() {
		let reply: Message = serde_json::from_value(json!({"id": 4, "result": {"ok": true}})).unwrap();
		assert!(matches!(reply, Message::Reply(Reply { id: 4, .. })));

		let call: Message = serde_json::from_value(json!({
			"target": "cb/1",
			"method": "step",
			"params": {"complete": 1, "total": 2}
		}))
		.unwrap();
		let Message::Call(call) = call else {
			panic!("expected call");
		};
		assert_eq!(call.target, "cb/1");
		assert_eq!(call.params["total"], 2);
	}

	#[test]
	fn empty_context_is_omitted() {
		let request = Request {
			id: 0,
			target: "gateway".into(),
			method: "gateway.callbackCategory".into(),
			params: Value::Null,
			context: BTreeMap::new(),
		};
		let value = serde_json::to_value(&request).unwrap();
		assert!(value.get("context").is_none());
	}

	#[test]
	fn error_reply_parses() {
		let message: Message = serde_json::from_value(json!({
			"id": 1,
			"error": {"error": {"message": "busy", "name": "ConcurrencyError"}}
		}))
		.unwrap();
		let Message::Reply(reply) = message else {
			panic!("expected reply");
		};
		let payload = reply.error.unwrap().error;
		assert_eq!(payload.name.as_deref(), Some("ConcurrencyError"));
	}
}
