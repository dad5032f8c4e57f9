use super::integration::DeviceIntegration;
use super::lifecycle::{DeviceLifecycle, LifecycleTransition};
use super::status::{DeviceStatus, StatusCode};
use super::Device;
use crate::diff::Command;
use crate::error::{CommandError, DeviceError, Result};
use crate::events::{CommandContext, DeviceEvent, EventEmitter};
use crate::history::{HistoryConfig, HistoryEntry, StateHistory};
use crate::receiver::CommandReceiver;
use crate::scheduler::{DoOnTime, PendingEntry, SchedulerConfig};
use crate::time::{Clock, Timestamp};
use crate::timeline::{device_mappings, Mappings, TimelineState};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

/// Per-instance knobs that are not part of the device's own options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSettings {
	/// The send mode is always taken from the integration
	#[serde(default)]
	pub scheduler: SchedulerConfig,
	#[serde(default)]
	pub history: HistoryConfig,
}

impl DeviceSettings {
	pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
		self.scheduler = scheduler;
		self
	}

	pub fn with_history(mut self, history: HistoryConfig) -> Self {
		self.history = history;
		self
	}
}

/// Outcome of the most recent command, shared with the scheduled jobs
#[derive(Debug, Default)]
struct CommandHealth {
	last_error: Mutex<Option<String>>,
}

impl CommandHealth {
	fn record(&self, result: &std::result::Result<(), CommandError>) {
		let mut last_error = self.last_error.lock().unwrap_or_else(PoisonError::into_inner);
		*last_error = result.as_ref().err().map(ToString::to_string);
	}

	fn last_error(&self) -> Option<String> {
		self.last_error.lock().unwrap_or_else(PoisonError::into_inner).clone()
	}
}

/// Exists only once `init` accepted the options
struct Runtime<I> {
	integration: I,
	scheduler: DoOnTime,
}

/// Generic device shell: history, diff, scheduling and lifecycle around one integration.
pub struct DeviceInstance<I: DeviceIntegration> {
	device_id: String,
	clock: Arc<dyn Clock>,
	settings: DeviceSettings,
	receiver: Arc<dyn CommandReceiver<I::Command>>,
	events: EventEmitter,
	runtime: OnceLock<Runtime<I>>,
	history: tokio::sync::Mutex<StateHistory<I::State>>,
	lifecycle: watch::Sender<DeviceLifecycle>,
	active: AtomicBool,
	health: Arc<CommandHealth>,
	session_id: Mutex<Option<String>>,
}

impl<I: DeviceIntegration> DeviceInstance<I> {
	pub fn new(device_id: impl Into<String>, receiver: Arc<dyn CommandReceiver<I::Command>>, clock: Arc<dyn Clock>) -> Self {
		Self::with_settings(device_id, receiver, clock, DeviceSettings::default())
	}

	pub fn with_settings(device_id: impl Into<String>, receiver: Arc<dyn CommandReceiver<I::Command>>, clock: Arc<dyn Clock>, settings: DeviceSettings) -> Self {
		let history = StateHistory::with_config(Arc::clone(&clock), settings.history.clone());
		Self {
			device_id: device_id.into(),
			clock,
			settings,
			receiver,
			events: EventEmitter::default(),
			runtime: OnceLock::new(),
			history: tokio::sync::Mutex::new(history),
			lifecycle: watch::Sender::new(DeviceLifecycle::Uninitialized),
			active: AtomicBool::new(false),
			health: Arc::new(CommandHealth::default()),
			session_id: Mutex::new(None),
		}
	}

	pub fn lifecycle(&self) -> DeviceLifecycle {
		*self.lifecycle.borrow()
	}

	pub fn watch_lifecycle(&self) -> watch::Receiver<DeviceLifecycle> {
		self.lifecycle.subscribe()
	}

	pub fn events(&self) -> &EventEmitter {
		&self.events
	}

	pub fn integration(&self) -> Option<&I> {
		self.runtime.get().map(|runtime| &runtime.integration)
	}

	pub fn session_id(&self) -> Option<String> {
		self.session_id.lock().unwrap_or_else(PoisonError::into_inner).clone()
	}

	/// Commands waiting in the scheduler, ordered by due time
	pub fn pending_commands(&self) -> Vec<PendingEntry> {
		self.runtime.get().map(|runtime| runtime.scheduler.pending_entries()).unwrap_or_default()
	}

	/// The state last stored at or before now
	pub async fn current_state(&self) -> Option<HistoryEntry<I::State>> {
		self.history.lock().await.get_current_state()
	}

	/// Report a connection change observed outside of `init`, e.g. by the receiver's socket
	pub fn set_connected(&self, connected: bool) -> Result<()> {
		let transition = if connected {
			LifecycleTransition::ConnectionEstablished
		} else {
			LifecycleTransition::ConnectionLost
		};

		if self.transition(transition)? {
			info!(device = %self.device_id, connected, "connection changed");
			self.events.emit(DeviceEvent::ConnectionChanged(self.status()));
		}
		Ok(())
	}

	/// Apply a lifecycle transition. Returns whether the state changed.
	fn transition(&self, transition: LifecycleTransition) -> Result<bool> {
		let mut outcome = Ok(false);
		self.lifecycle.send_if_modified(|state| match state.transition(transition) {
			Ok(next) => {
				let changed = *state != next;
				if changed {
					debug!(device = %self.device_id, from = ?*state, to = ?next, "lifecycle transition");
				}
				*state = next;
				outcome = Ok(changed);
				changed
			}
			Err(e) => {
				outcome = Err(e);
				false
			}
		});
		outcome
	}

	fn runtime(&self) -> Result<&Runtime<I>> {
		let lifecycle = self.lifecycle();
		if lifecycle.is_terminal() {
			return Err(DeviceError::Terminated);
		}
		if !lifecycle.is_initialized() {
			return Err(DeviceError::NotInitialized);
		}
		self.runtime.get().ok_or(DeviceError::NotInitialized)
	}

	fn parse_options(options: serde_json::Value) -> Result<I> {
		let options: I::Options = serde_json::from_value(options).map_err(|e| DeviceError::Config(e.to_string()))?;
		I::from_options(options)
	}

	/// Hand one command to the scheduler. Failures of the send itself only surface as events.
	fn queue_command(&self, runtime: &Runtime<I>, command: Command<I::Command>) -> Result<()> {
		let queue_id = runtime.integration.queue_id(&command);
		let args = serde_json::to_value(&command)?;
		let receiver = Arc::clone(&self.receiver);
		let events = self.events.clone();
		let health = Arc::clone(&self.health);

		runtime.scheduler.queue(command.time, queue_id.as_deref(), args, move || async move {
			let result = receiver.send(command.time, &command.content, &command.context, &command.timeline_obj_id).await;
			health.record(&result);
			if let Err(e) = &result {
				events.emit(DeviceEvent::CommandError {
					message: e.to_string(),
					context: CommandContext {
						context: command.context.clone(),
						timeline_obj_id: command.timeline_obj_id.clone(),
						layer: command.layer.clone(),
					},
				});
			}
			result
		})?;

		Ok(())
	}

	fn queue_all(&self, runtime: &Runtime<I>, mut commands: Vec<Command<I::Command>>) -> Result<usize> {
		crate::diff::sort_commands(&mut commands);
		let count = commands.len();
		for command in commands {
			self.queue_command(runtime, command)?;
		}
		Ok(count)
	}

	/// Recompute whether any layer is mapped to this device. Emits on change.
	fn update_active(&self, mappings: &Mappings) {
		let active = device_mappings(mappings, I::DEVICE_TYPE, &self.device_id).next().is_some();
		if self.active.swap(active, Ordering::SeqCst) != active {
			debug!(device = %self.device_id, active, "device activity changed");
			self.events.emit(DeviceEvent::ConnectionChanged(self.status()));
		}
	}
}

#[async_trait]
impl<I: DeviceIntegration> Device for DeviceInstance<I> {
	fn device_id(&self) -> &str {
		&self.device_id
	}

	fn device_type(&self) -> &'static str {
		I::DEVICE_TYPE
	}

	async fn init(&self, options: serde_json::Value, active_session_id: Option<String>) -> Result<bool> {
		match self.lifecycle() {
			DeviceLifecycle::Terminated => return Err(DeviceError::Terminated),
			DeviceLifecycle::Uninitialized => {}
			_ => return Err(DeviceError::AlreadyInitialized),
		}
		self.transition(LifecycleTransition::StartInit)?;

		let integration = match Self::parse_options(options) {
			Ok(integration) => integration,
			Err(e) => {
				error!(device = %self.device_id, error = %e, "rejected device options");
				self.transition(LifecycleTransition::InitFailed)?;
				self.events.error("init", e.to_string());
				return Err(e);
			}
		};

		let scheduler_config = self.settings.scheduler.clone().with_send_mode(integration.send_mode());
		let scheduler = DoOnTime::new(Arc::clone(&self.clock), scheduler_config, self.events.clone());
		if self.runtime.set(Runtime { integration, scheduler }).is_err() {
			return Err(DeviceError::AlreadyInitialized);
		}
		*self.session_id.lock().unwrap_or_else(PoisonError::into_inner) = active_session_id;

		let connected = match self.receiver.connect().await {
			Ok(()) => true,
			Err(e) => {
				warn!(device = %self.device_id, error = %e, "device did not connect during init");
				self.events.warning(format!("Connection failed during init: {e}"));
				false
			}
		};
		self.set_connected(connected)?;
		info!(device = %self.device_id, device_type = I::DEVICE_TYPE, connected, "device initialized");

		Ok(connected)
	}

	async fn prepare_for_handle_state(&self, time: Timestamp) -> Result<()> {
		let runtime = self.runtime()?;
		let cleared = runtime.scheduler.clear_queue_now_and_after(time);
		let trimmed = self.history.lock().await.remove_states_from(time);
		debug!(device = %self.device_id, time, cleared, trimmed, "prepared for new state");
		Ok(())
	}

	async fn handle_state(&self, state: &TimelineState, mappings: &Mappings) -> Result<()> {
		let runtime = self.runtime()?;
		self.update_active(mappings);

		let conversion = runtime.integration.convert(state, mappings, &self.device_id);
		for warning in conversion.warnings {
			warn!(device = %self.device_id, %warning, "conversion warning");
			self.events.warning(warning);
		}
		let new_entry = HistoryEntry::new(state.time, conversion.state);

		let mut history = self.history.lock().await;
		let old_entry = history.get_state_before(state.time).unwrap_or_else(|| HistoryEntry::new(0, I::State::default()));

		let outcome = runtime.integration.diff(&old_entry, &new_entry, self.clock.now());
		for warning in outcome.warnings {
			warn!(device = %self.device_id, %warning, "diff warning");
			self.events.warning(warning);
		}

		let queued = self.queue_all(runtime, outcome.commands)?;
		debug!(device = %self.device_id, time = state.time, queued, "handled state");

		history.set_state(new_entry.state, new_entry.time)?;
		Ok(())
	}

	fn clear_future(&self, time: Timestamp) -> Result<()> {
		let cleared = self.runtime()?.scheduler.clear_queue_after(time);
		debug!(device = %self.device_id, time, cleared, "cleared future commands");
		Ok(())
	}

	async fn make_ready(&self, destructive: bool, session_id: Option<String>) -> Result<()> {
		let runtime = self.runtime()?;

		if let Some(session_id) = session_id {
			let mut current = self.session_id.lock().unwrap_or_else(PoisonError::into_inner);
			if current.as_deref() != Some(session_id.as_str()) {
				info!(device = %self.device_id, session = %session_id, "active session changed");
				*current = Some(session_id);
			}
		}

		let mut history = self.history.lock().await;
		let now = self.clock.now();
		let current = history.get_current_state();
		let commands = runtime.integration.make_ready_commands(destructive, current.as_ref(), now);

		if destructive {
			runtime.scheduler.clear_queue_now_and_after(0);
			history.clear_states();
		}
		let queued = self.queue_all(runtime, commands)?;
		info!(device = %self.device_id, destructive, queued, "make ready");

		if destructive {
			self.events.emit(DeviceEvent::ResetResolver);
		}
		Ok(())
	}

	async fn stand_down(&self, destructive: bool) -> Result<()> {
		let runtime = self.runtime()?;
		let commands = runtime.integration.stand_down_commands(destructive, self.clock.now());

		if destructive {
			runtime.scheduler.clear_queue_now_and_after(0);
			self.history.lock().await.clear_states();
		}
		let queued = self.queue_all(runtime, commands)?;
		info!(device = %self.device_id, destructive, queued, "stand down");
		Ok(())
	}

	fn status(&self) -> DeviceStatus {
		let active = self.active.load(Ordering::SeqCst);
		let status = match self.lifecycle() {
			DeviceLifecycle::Uninitialized | DeviceLifecycle::Initializing => DeviceStatus::new(StatusCode::Unknown, active).with_message("Not initialized"),
			DeviceLifecycle::Connected => DeviceStatus::new(StatusCode::Good, active),
			DeviceLifecycle::Disconnected => DeviceStatus::new(StatusCode::Bad, active).with_message("Not connected"),
			DeviceLifecycle::Terminated => return DeviceStatus::new(StatusCode::Bad, active).with_message("Terminated"),
		};

		match self.health.last_error() {
			Some(e) => status.degrade(StatusCode::WarningMajor, format!("Last command failed: {e}")),
			None => status,
		}
	}

	async fn terminate(&self) -> Result<()> {
		if self.lifecycle().is_terminal() {
			return Ok(());
		}

		if let Some(runtime) = self.runtime.get() {
			runtime.scheduler.dispose();
			if let Err(e) = self.receiver.disconnect().await {
				warn!(device = %self.device_id, error = %e, "disconnect failed during terminate");
			}
		}

		self.transition(LifecycleTransition::Terminate)?;
		info!(device = %self.device_id, "device terminated");
		self.events.emit(DeviceEvent::ConnectionChanged(self.status()));
		Ok(())
	}

	fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
		self.events.subscribe()
	}
}

impl<I: DeviceIntegration> std::fmt::Debug for DeviceInstance<I> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("DeviceInstance")
			.field("device_id", &self.device_id)
			.field("device_type", &I::DEVICE_TYPE)
			.field("lifecycle", &self.lifecycle())
			.field("active", &self.active.load(Ordering::SeqCst))
			.finish_non_exhaustive()
	}
}
