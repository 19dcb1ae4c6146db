//! Addressing for locally hosted callback objects.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A `(category, name)` pair that is unique within one dispatch registry.
///
/// The category is usually handed out by the gateway (or derived from the
/// owning session) and may itself contain `/`; the name is a random token
/// minted per callback and must not.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity {
	pub category: String,
	pub name: String,
}

impl Identity {
	pub fn new(category: impl Into<String>, name: impl Into<String>) -> Self {
		Self {
			category: category.into(),
			name: name.into(),
		}
	}

	/// Parses the `category/name` form produced by [`Display`](fmt::Display).
	///
	/// Splits at the last `/`. A string without a separator is treated as a
	/// bare name with an empty category.
	pub fn parse(value: &str) -> Option<Self> {
		let (category, name) = match value.rsplit_once('/') {
			Some((category, name)) => (category, name),
			None => ("", value),
		};
		if name.is_empty() {
			return None;
		}
		Some(Self::new(category, name))
	}
}

impl fmt::Display for Identity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.category.is_empty() {
			write!(f, "{}", self.name)
		} else {
			write!(f, "{}/{}", self.category, self.name)
		}
	}
}
