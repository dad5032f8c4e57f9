//! Pharos-style lighting controller: scenes and timelines started and released by number.

use playout_core::device::Conversion;
use playout_core::diff::{diff_layers, LayerChange};
use playout_core::timeline::device_mappings;
use playout_core::{Command, DeviceError, DeviceIntegration, DiffOutcome, HistoryEntry, LayerState, Mappings, Result, TimelineState, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEVICE_TYPE: &str = "lighting";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LightingOptions {
	pub host: String,
	#[serde(default)]
	pub secure: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LightingContent {
	Scene {
		scene: u32,
		#[serde(default)]
		fade_ms: Option<u32>,
	},
	Timeline {
		timeline: u32,
		#[serde(default)]
		pause: bool,
		#[serde(default)]
		rate: Option<f64>,
		#[serde(default)]
		fade_ms: Option<u32>,
	},
}

pub type LightingState = BTreeMap<String, LayerState<LightingContent>>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum LightingCommand {
	StartScene { scene: u32, fade_ms: Option<u32> },
	ReleaseScene { scene: u32, fade_ms: Option<u32> },
	StartTimeline { timeline: u32 },
	ReleaseTimeline { timeline: u32, fade_ms: Option<u32> },
	PauseTimeline { timeline: u32 },
	ResumeTimeline { timeline: u32 },
	SetTimelineRate { timeline: u32, rate: f64 },
	ReleaseAll { fade_ms: Option<u32> },
}

#[derive(Debug)]
pub struct Lighting {
	options: LightingOptions,
}

impl Lighting {
	pub fn options(&self) -> &LightingOptions {
		&self.options
	}

	/// Base URL of the controller's web API
	pub fn endpoint(&self) -> String {
		let scheme = if self.options.secure { "https" } else { "http" };
		format!("{scheme}://{}", self.options.host)
	}
}

fn start(outcome: &mut DiffOutcome<LightingCommand>, time: Timestamp, layer: &str, source: &LayerState<LightingContent>) {
	let push = |outcome: &mut DiffOutcome<LightingCommand>, command: LightingCommand, context: String| {
		outcome.push(Command::create(time, layer, &source.timeline_obj_id, command).with_priority(source.priority).with_context(context));
	};

	match source.content {
		LightingContent::Scene { scene, fade_ms } => push(outcome, LightingCommand::StartScene { scene, fade_ms }, format!("Start scene {scene}")),
		LightingContent::Timeline { timeline, pause, rate, .. } => {
			push(outcome, LightingCommand::StartTimeline { timeline }, format!("Start timeline {timeline}"));
			if pause {
				push(outcome, LightingCommand::PauseTimeline { timeline }, format!("Timeline {timeline} starts paused"));
			}
			if let Some(rate) = rate {
				push(outcome, LightingCommand::SetTimelineRate { timeline, rate }, format!("Timeline {timeline} rate"));
			}
		}
	}
}

fn release(outcome: &mut DiffOutcome<LightingCommand>, time: Timestamp, layer: &str, source: &LayerState<LightingContent>) {
	let (command, context) = match source.content {
		LightingContent::Scene { scene, fade_ms } => (LightingCommand::ReleaseScene { scene, fade_ms }, format!("Release scene {scene}")),
		LightingContent::Timeline { timeline, fade_ms, .. } => (LightingCommand::ReleaseTimeline { timeline, fade_ms }, format!("Release timeline {timeline}")),
	};
	outcome.push(Command::remove(time, layer, &source.timeline_obj_id, command).with_priority(source.priority).with_context(context));
}

/// Same timeline still running: adjust it in place
fn adjust_timeline(outcome: &mut DiffOutcome<LightingCommand>, time: Timestamp, layer: &str, source: &LayerState<LightingContent>, was_paused: bool, old_rate: Option<f64>) {
	let LightingContent::Timeline { timeline, pause, rate, .. } = source.content else {
		return;
	};

	if pause != was_paused {
		let command = if pause {
			LightingCommand::PauseTimeline { timeline }
		} else {
			LightingCommand::ResumeTimeline { timeline }
		};
		outcome.push(Command::create(time, layer, &source.timeline_obj_id, command).with_priority(source.priority).with_context(format!("Timeline {timeline} pause toggled")));
	}
	if rate != old_rate {
		let command = LightingCommand::SetTimelineRate { timeline, rate: rate.unwrap_or(1.0) };
		outcome.push(Command::create(time, layer, &source.timeline_obj_id, command).with_priority(source.priority).with_context(format!("Timeline {timeline} rate changed")));
	}
}

impl DeviceIntegration for Lighting {
	const DEVICE_TYPE: &'static str = DEVICE_TYPE;

	type Options = LightingOptions;
	type State = LightingState;
	type Command = LightingCommand;

	fn from_options(options: LightingOptions) -> Result<Self> {
		if options.host.trim().is_empty() {
			return Err(DeviceError::Config("lighting controller host is required".into()));
		}
		Ok(Self { options })
	}

	fn convert(&self, state: &TimelineState, mappings: &Mappings, device_id: &str) -> Conversion<LightingState> {
		let mut conversion = Conversion::new(LightingState::new());

		for (layer_id, _) in device_mappings(mappings, DEVICE_TYPE, device_id) {
			let Some(object) = state.layers.get(layer_id) else {
				continue;
			};
			match object.content_as::<LightingContent>() {
				Ok(content) => {
					conversion.state.insert(layer_id.clone(), LayerState::new(&object.id, content).with_priority(object.priority));
				}
				Err(e) => conversion.warn(format!("Unable to read content of {} on {layer_id}: {e}", object.id)),
			}
		}

		conversion
	}

	fn diff(&self, old: &HistoryEntry<LightingState>, new: &HistoryEntry<LightingState>, _now: Timestamp) -> DiffOutcome<LightingCommand> {
		let mut outcome = DiffOutcome::new();

		for change in diff_layers(&old.state, &new.state) {
			match change {
				LayerChange::Added { layer, new: source } => start(&mut outcome, new.time, layer, source),
				LayerChange::Changed { layer, old: previous, new: source } => match (&previous.content, &source.content) {
					(LightingContent::Timeline { timeline: old_timeline, pause, rate, .. }, LightingContent::Timeline { timeline, .. }) if old_timeline == timeline => {
						adjust_timeline(&mut outcome, new.time, layer, source, *pause, *rate);
					}
					(LightingContent::Scene { scene: old_scene, .. }, LightingContent::Scene { scene, .. }) if old_scene == scene => {
						// fade time only matters when a scene starts, nothing to send
					}
					_ => {
						release(&mut outcome, new.time, layer, previous);
						start(&mut outcome, new.time, layer, source);
					}
				},
				LayerChange::Removed { layer, old: previous } => release(&mut outcome, new.time, layer, previous),
			}
		}

		outcome
	}

	fn make_ready_commands(&self, destructive: bool, _current: Option<&HistoryEntry<LightingState>>, now: Timestamp) -> Vec<Command<LightingCommand>> {
		self.stand_down_commands(destructive, now)
	}

	fn stand_down_commands(&self, destructive: bool, now: Timestamp) -> Vec<Command<LightingCommand>> {
		if destructive {
			vec![Command::remove(now, "", "", LightingCommand::ReleaseAll { fade_ms: None }).with_context("Release all")]
		} else {
			Vec::new()
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use playout_core::{Mapping, ResolvedObject, SendMode};
	use serde_json::json;

	fn lighting() -> Lighting {
		Lighting::from_options(serde_json::from_value(json!({ "host": "pharos.local" })).unwrap()).unwrap()
	}

	fn mappings() -> Mappings {
		let mut mappings = Mappings::new();
		for layer in ["house", "stage", "fx"] {
			mappings.insert(layer.into(), Mapping::new(DEVICE_TYPE, "pharos"));
		}
		mappings
	}

	fn state(time: Timestamp, objects: Vec<ResolvedObject>) -> HistoryEntry<LightingState> {
		let timeline = objects.into_iter().fold(TimelineState::new(time), TimelineState::with_object);
		HistoryEntry::new(time, lighting().convert(&timeline, &mappings(), "pharos").state)
	}

	fn commands(old: &HistoryEntry<LightingState>, new: &HistoryEntry<LightingState>) -> Vec<LightingCommand> {
		lighting().diff(old, new, 0).sorted().commands.into_iter().map(|command| command.content).collect()
	}

	#[test]
	fn test_options() {
		let options: LightingOptions = serde_json::from_value(json!({ "host": "" })).unwrap();
		assert!(matches!(Lighting::from_options(options), Err(DeviceError::Config(_))));

		let secure = Lighting::from_options(serde_json::from_value(json!({ "host": "pharos.local", "secure": true })).unwrap()).unwrap();
		assert_eq!(secure.endpoint(), "https://pharos.local");
		assert_eq!(lighting().endpoint(), "http://pharos.local");
		assert_eq!(lighting().send_mode(), SendMode::Burst);
	}

	#[test]
	fn test_start_orders_by_priority() {
		let new = state(
			1000,
			vec![
				ResolvedObject::new("wash", "house", json!({ "type": "scene", "scene": 1 })).with_priority(5),
				ResolvedObject::new("chase", "stage", json!({ "type": "timeline", "timeline": 3, "pause": true, "rate": 0.5 })).with_priority(1),
			],
		);

		assert_eq!(
			commands(&state(0, vec![]), &new),
			vec![
				LightingCommand::StartTimeline { timeline: 3 },
				LightingCommand::PauseTimeline { timeline: 3 },
				LightingCommand::SetTimelineRate { timeline: 3, rate: 0.5 },
				LightingCommand::StartScene { scene: 1, fade_ms: None },
			]
		);
	}

	#[test]
	fn test_running_timeline_is_adjusted_in_place() {
		let running = state(1000, vec![ResolvedObject::new("chase", "stage", json!({ "type": "timeline", "timeline": 3 }))]);
		let paused = state(2000, vec![ResolvedObject::new("chase", "stage", json!({ "type": "timeline", "timeline": 3, "pause": true, "rate": 2.0 }))]);

		assert_eq!(
			commands(&running, &paused),
			vec![LightingCommand::PauseTimeline { timeline: 3 }, LightingCommand::SetTimelineRate { timeline: 3, rate: 2.0 }]
		);
		assert_eq!(
			commands(&paused, &running),
			vec![LightingCommand::ResumeTimeline { timeline: 3 }, LightingCommand::SetTimelineRate { timeline: 3, rate: 1.0 }]
		);
	}

	#[test]
	fn test_new_target_releases_old_first() {
		let before = state(1000, vec![ResolvedObject::new("wash", "house", json!({ "type": "scene", "scene": 1, "fade_ms": 500 }))]);
		let after = state(2000, vec![ResolvedObject::new("warm", "house", json!({ "type": "scene", "scene": 2 }))]);

		assert_eq!(
			commands(&before, &after),
			vec![LightingCommand::ReleaseScene { scene: 1, fade_ms: Some(500) }, LightingCommand::StartScene { scene: 2, fade_ms: None }]
		);
	}

	#[test]
	fn test_fade_only_change_does_nothing() {
		let before = state(1000, vec![ResolvedObject::new("wash", "house", json!({ "type": "scene", "scene": 1 }))]);
		let after = state(2000, vec![ResolvedObject::new("wash", "house", json!({ "type": "scene", "scene": 1, "fade_ms": 200 }))]);
		assert!(commands(&before, &after).is_empty());
		assert!(commands(&before, &before).is_empty());
	}

	#[test]
	fn test_removed_layers_release() {
		let before = state(1000, vec![ResolvedObject::new("chase", "fx", json!({ "type": "timeline", "timeline": 7, "fade_ms": 1000 }))]);
		assert_eq!(commands(&before, &state(2000, vec![])), vec![LightingCommand::ReleaseTimeline { timeline: 7, fade_ms: Some(1000) }]);
	}

	#[test]
	fn test_destructive_stand_down_releases_everything() {
		let commands = lighting().stand_down_commands(true, 1000);
		assert_eq!(commands.len(), 1);
		assert_eq!(commands[0].content, LightingCommand::ReleaseAll { fade_ms: None });
		assert!(lighting().make_ready_commands(false, None, 1000).is_empty());
	}
}
