use crate::time::Timestamp;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DeviceError>;

/// Errors raised by the state history cache
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HistoryError {
	#[error("Cannot store a state at time {0}: time must be positive")]
	InvalidTime(Timestamp),
}

/// Errors raised synchronously by the command scheduler
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
	#[error("Cannot queue a command at time {0}: time must not be negative")]
	InvalidTime(Timestamp),

	#[error("Scheduler has been disposed")]
	Disposed,

	#[error("Clock returned an invalid time: {0}")]
	InvalidClock(Timestamp),
}

/// Errors produced while sending a single command to a device
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
	#[error("Device not connected")]
	NotConnected,

	#[error("Referenced object not available yet: {0}")]
	NotYetAvailable(String),

	#[error("Command rejected by device: {0}")]
	Rejected(String),

	#[error("Transport failure: {0}")]
	Transport(String),

	#[error("Retry limit exceeded after {attempts} attempts: {last}")]
	RetryExhausted { attempts: u32, last: Box<CommandError> },
}

impl CommandError {
	/// Errors a slow device is expected to recover from on its own
	pub fn is_transient(&self) -> bool {
		matches!(self, Self::NotYetAvailable(_))
	}
}

/// Errors surfaced by the device lifecycle
#[derive(Debug, Error)]
pub enum DeviceError {
	#[error("Invalid device configuration: {0}")]
	Config(String),

	#[error("Device has not been initialized")]
	NotInitialized,

	#[error("Device is already initialized")]
	AlreadyInitialized,

	#[error("Device has been terminated")]
	Terminated,

	#[error("Invalid lifecycle transition: {from} -> {to}")]
	InvalidTransition { from: String, to: String },

	#[error("History error: {0}")]
	History(#[from] HistoryError),

	#[error("Scheduler error: {0}")]
	Scheduler(#[from] SchedulerError),

	#[error("Command error: {0}")]
	Command(#[from] CommandError),

	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

impl DeviceError {
	/// Whether the caller can keep driving the device after this error
	pub fn is_recoverable(&self) -> bool {
		matches!(self, Self::Command(_) | Self::NotInitialized)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_only_missing_objects_are_transient() {
		assert!(CommandError::NotYetAvailable("element".into()).is_transient());
		assert!(!CommandError::NotConnected.is_transient());
		assert!(!CommandError::Rejected("bad".into()).is_transient());

		let exhausted = CommandError::RetryExhausted {
			attempts: 3,
			last: Box::new(CommandError::NotYetAvailable("element".into())),
		};
		assert!(!exhausted.is_transient());
		assert_eq!(exhausted.to_string(), "Retry limit exceeded after 3 attempts: Referenced object not available yet: element");
	}

	#[test]
	fn test_configuration_errors_are_fatal() {
		assert!(!DeviceError::Config("missing host".into()).is_recoverable());
		assert!(!DeviceError::Terminated.is_recoverable());
		assert!(DeviceError::Command(CommandError::NotConnected).is_recoverable());
	}
}
