use serde::{Deserialize, Serialize};

/// Severity of a device's condition, ordered from unknown to fatal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
	#[default]
	Unknown,
	Good,
	WarningMinor,
	WarningMajor,
	Bad,
	Fatal,
}

/// Snapshot returned by `status()`. Cheap to build, never touches the network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
	pub status_code: StatusCode,
	#[serde(default)]
	pub messages: Vec<String>,
	pub active: bool,
}

impl DeviceStatus {
	pub fn new(status_code: StatusCode, active: bool) -> Self {
		Self {
			status_code,
			messages: Vec::new(),
			active,
		}
	}

	pub fn with_message(mut self, message: impl Into<String>) -> Self {
		self.messages.push(message.into());
		self
	}

	/// Raise the code to `code` if that is worse than the current one
	pub fn degrade(mut self, code: StatusCode, message: impl Into<String>) -> Self {
		self.status_code = self.status_code.max(code);
		self.with_message(message)
	}

	pub fn is_good(&self) -> bool {
		self.status_code == StatusCode::Good
	}
}
