//! Session descriptors and login credentials.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Server-side description of an open session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
	pub uuid: String,
	#[serde(default)]
	pub user: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub group: Option<String>,
}

/// Login credentials passed to the gateway's open-session call.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
	pub username: String,
	pub password: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub group: Option<String>,
}

impl Credentials {
	pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
		Self {
			username: username.into(),
			password: password.into(),
			group: None,
		}
	}

	pub fn with_group(mut self, group: impl Into<String>) -> Self {
		self.group = Some(group.into());
		self
	}
}

impl fmt::Debug for Credentials {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Credentials")
			.field("username", &self.username)
			.field("password", &"***")
			.field("group", &self.group)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn debug_masks_password() {
		let credentials = Credentials::new("root", "hunter2").with_group("system");
		let rendered = format!("{credentials:?}");
		assert!(rendered.contains("root"));
		assert!(rendered.contains("system"));
		assert!(!rendered.contains("hunter2"));
	}
}
