use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How due entries of one queue are dispatched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SendMode {
	/// Fire every due entry at once without waiting for any to settle
	#[default]
	Burst,
	/// Start the next entry of a queue only after the previous one settled
	InOrder,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerConfig {
	#[serde(default)]
	pub send_mode: SendMode,

	/// Report commands sent later than this after their planned time
	#[serde(default = "default_limit_slow_sent_command")]
	pub limit_slow_sent_command_ms: Timestamp,

	/// Report commands that settled later than this after their planned time
	#[serde(default = "default_limit_slow_fulfilled_command")]
	pub limit_slow_fulfilled_command_ms: Timestamp,

	/// Upper bound on the poll interval, even when nothing is due
	#[serde(default = "default_max_check_interval")]
	pub max_check_interval_ms: u64,
}

fn default_limit_slow_sent_command() -> Timestamp {
	40
}

fn default_limit_slow_fulfilled_command() -> Timestamp {
	100
}

fn default_max_check_interval() -> u64 {
	1000
}

impl SchedulerConfig {
	pub fn new(send_mode: SendMode) -> Self {
		Self { send_mode, ..Self::default() }
	}

	pub fn with_send_mode(mut self, send_mode: SendMode) -> Self {
		self.send_mode = send_mode;
		self
	}

	pub fn with_slow_sent_limit(mut self, limit_ms: Timestamp) -> Self {
		self.limit_slow_sent_command_ms = limit_ms;
		self
	}

	pub fn with_slow_fulfilled_limit(mut self, limit_ms: Timestamp) -> Self {
		self.limit_slow_fulfilled_command_ms = limit_ms;
		self
	}

	pub fn with_max_check_interval(mut self, interval_ms: u64) -> Self {
		self.max_check_interval_ms = interval_ms.max(1);
		self
	}

	pub fn max_check_interval(&self) -> Duration {
		Duration::from_millis(self.max_check_interval_ms)
	}
}

impl Default for SchedulerConfig {
	fn default() -> Self {
		Self {
			send_mode: SendMode::default(),
			limit_slow_sent_command_ms: default_limit_slow_sent_command(),
			limit_slow_fulfilled_command_ms: default_limit_slow_fulfilled_command(),
			max_check_interval_ms: default_max_check_interval(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults_from_empty_json() {
		let config: SchedulerConfig = serde_json::from_str("{}").unwrap();
		assert_eq!(config.send_mode, SendMode::Burst);
		assert_eq!(config.limit_slow_sent_command_ms, 40);
		assert_eq!(config.limit_slow_fulfilled_command_ms, 100);
		assert_eq!(config.max_check_interval(), Duration::from_secs(1));
	}

	#[test]
	fn test_send_mode_wire_names() {
		let config: SchedulerConfig = serde_json::from_str(r#"{ "sendMode": "IN_ORDER", "limitSlowSentCommandMs": 10 }"#).unwrap();
		assert_eq!(config.send_mode, SendMode::InOrder);
		assert_eq!(config.limit_slow_sent_command_ms, 10);
	}
}
