use crate::diff::{Command, DiffOutcome};
use crate::error::Result;
use crate::history::HistoryEntry;
use crate::scheduler::SendMode;
use crate::time::Timestamp;
use crate::timeline::{Mappings, TimelineState};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/// A device state projected from the timeline, plus anything that could not be projected
#[derive(Debug, Clone, PartialEq)]
pub struct Conversion<S> {
	pub state: S,
	pub warnings: Vec<String>,
}

impl<S> Conversion<S> {
	pub fn new(state: S) -> Self {
		Self { state, warnings: Vec::new() }
	}

	pub fn warn(&mut self, warning: impl Into<String>) {
		self.warnings.push(warning.into());
	}
}

/// The device specific half of a device: its vocabulary, its diff and its command routing.
///
/// Everything here is synchronous and side-effect free. [`DeviceInstance`](super::DeviceInstance)
/// owns the history, the scheduler and the receiver around it.
pub trait DeviceIntegration: Sized + Send + Sync + 'static {
	/// Value of `Mapping::device` that selects this integration
	const DEVICE_TYPE: &'static str;

	type Options: DeserializeOwned + Send;
	type State: Clone + Default + PartialEq + Debug + Send + Sync + 'static;
	type Command: Clone + Debug + Serialize + Send + Sync + 'static;

	/// Validate options. Any error here is a fatal configuration error.
	fn from_options(options: Self::Options) -> Result<Self>;

	/// Project the layers mapped onto `device_id` into the device's own state
	fn convert(&self, state: &TimelineState, mappings: &Mappings, device_id: &str) -> Conversion<Self::State>;

	/// Commands that take the device from `old` to `new`. Must not fail for any state `convert` produced.
	fn diff(&self, old: &HistoryEntry<Self::State>, new: &HistoryEntry<Self::State>, now: Timestamp) -> DiffOutcome<Self::Command>;

	/// Scheduler queue for a command; `None` is the default queue
	fn queue_id(&self, _command: &Command<Self::Command>) -> Option<String> {
		None
	}

	fn send_mode(&self) -> SendMode {
		SendMode::Burst
	}

	/// Commands to run when going live. `destructive` allows visible glitches.
	fn make_ready_commands(&self, _destructive: bool, _current: Option<&HistoryEntry<Self::State>>, _now: Timestamp) -> Vec<Command<Self::Command>> {
		Vec::new()
	}

	fn stand_down_commands(&self, _destructive: bool, _now: Timestamp) -> Vec<Command<Self::Command>> {
		Vec::new()
	}
}
