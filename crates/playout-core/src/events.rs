use crate::device::DeviceStatus;
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Timing breakdown of one dispatched command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingInfo {
	/// When the command was handed to the scheduler
	pub added: Timestamp,
	/// When the scheduler found it due
	pub prepare_time: Timestamp,
	pub planned_send: Timestamp,
	pub send: Timestamp,
	pub queue_id: String,
	/// `send - planned_send`
	pub send_delay: Timestamp,
	/// `added - planned_send`, negative when queued ahead of time
	pub added_delay: Timestamp,
	/// `send - added`
	pub internal_delay: Timestamp,
	pub args: serde_json::Value,
}

/// Timing of a command whose job has settled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingReport {
	#[serde(flatten)]
	pub timing: TimingInfo,
	pub fulfilled: Timestamp,
	/// `fulfilled - planned_send`
	pub fulfilled_delay: Timestamp,
	pub succeeded: bool,
}

/// Where a failed command came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandContext {
	pub context: String,
	pub timeline_obj_id: String,
	pub layer: String,
}

/// Everything a device reports to its owner. Fire-and-forget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum DeviceEvent {
	Info(String),
	Warning(String),
	Error { context: String, message: String },
	Debug(String),
	ConnectionChanged(DeviceStatus),
	/// The owner should re-resolve the timeline and resend the full state
	ResetResolver,
	SlowCommand(String),
	SlowSentCommand(TimingInfo),
	SlowFulfilledCommand(TimingReport),
	CommandError { message: String, context: CommandContext },
	CommandReport(TimingReport),
}

/// Fan-out of device events to any number of subscribers
#[derive(Debug, Clone)]
pub struct EventEmitter {
	sender: broadcast::Sender<DeviceEvent>,
}

impl EventEmitter {
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity.max(1));
		Self { sender }
	}

	/// Never fails: events emitted with nobody listening are dropped
	pub fn emit(&self, event: DeviceEvent) {
		let _ = self.sender.send(event);
	}

	pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
		self.sender.subscribe()
	}

	pub fn has_listeners(&self) -> bool {
		self.sender.receiver_count() > 0
	}

	pub fn info(&self, message: impl Into<String>) {
		self.emit(DeviceEvent::Info(message.into()));
	}

	pub fn warning(&self, message: impl Into<String>) {
		self.emit(DeviceEvent::Warning(message.into()));
	}

	pub fn error(&self, context: impl Into<String>, message: impl Into<String>) {
		self.emit(DeviceEvent::Error {
			context: context.into(),
			message: message.into(),
		});
	}

	pub fn debug(&self, message: impl Into<String>) {
		self.emit(DeviceEvent::Debug(message.into()));
	}
}

impl Default for EventEmitter {
	fn default() -> Self {
		Self::new(256)
	}
}
