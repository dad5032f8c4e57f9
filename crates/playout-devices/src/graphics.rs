//! VizMSE-style graphics engine.
//!
//! Elements are prepared (loaded into the engine) ahead of their on-air time, then either
//! cued or taken. Multi-step elements are advanced with continue commands, either through
//! the element's own `continue_step` or through a separate `continue` object that points at
//! the layer holding the element. Lookahead elements are only prepared, never shown.

use playout_core::device::Conversion;
use playout_core::diff::{diff_layers, LayerChange};
use playout_core::timeline::device_mappings;
use playout_core::{Command, DeviceError, DeviceIntegration, DiffOutcome, HistoryEntry, LayerState, Mappings, PrepareWindow, Result, SendMode, TimelineState, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::cmp::Ordering;
use tracing::warn;

pub const DEVICE_TYPE: &str = "graphics";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphicsOptions {
	pub host: String,
	/// Show profile activated by make-ready
	pub profile: String,
	#[serde(default)]
	pub preload_all_elements: bool,
	/// Channels cleared by destructive make-ready and stand-down
	#[serde(default)]
	pub clear_all_channels: Vec<String>,
	#[serde(default = "default_ideal_prepare_lead")]
	pub ideal_prepare_lead_ms: Timestamp,
	#[serde(default = "default_min_prepare_wait")]
	pub min_prepare_wait_ms: Timestamp,
}

fn default_ideal_prepare_lead() -> Timestamp {
	1000
}

fn default_min_prepare_wait() -> Timestamp {
	50
}

/// Addressing fields of a graphics mapping
#[derive(Debug, Clone, Default, Deserialize)]
struct ChannelAddress {
	#[serde(default)]
	channel: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinueDirection {
	#[default]
	Forward,
	Reverse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GraphicsContent {
	Element {
		template: String,
		#[serde(default)]
		fields: BTreeMap<String, String>,
		#[serde(default)]
		cue: bool,
		#[serde(default)]
		continue_step: i32,
		#[serde(default)]
		no_auto_preload: bool,
	},
	Continue {
		reference_layer: String,
		#[serde(default)]
		direction: ContinueDirection,
	},
	ClearAll {
		#[serde(default)]
		channels: Vec<String>,
	},
}

/// Identity of an element inside the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementRef {
	pub template: String,
	pub fields: BTreeMap<String, String>,
	pub channel: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementState {
	pub element: ElementRef,
	pub cue: bool,
	pub continue_step: i32,
	pub no_auto_preload: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GraphicsLayer {
	Element(ElementState),
	Continue { reference_layer: String, direction: ContinueDirection },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphicsState {
	/// Set when a clear-all object is on air; the layer map is then empty
	pub clear_all: Option<LayerState<Vec<String>>>,
	pub layers: BTreeMap<String, LayerState<GraphicsLayer>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum GraphicsCommand {
	Activate { profile: String },
	Prepare { element: ElementRef },
	Cue { element: ElementRef },
	Take { element: ElementRef },
	TakeOut { element: ElementRef },
	Continue { element: ElementRef },
	ContinueReverse { element: ElementRef },
	ClearAll { channels: Vec<String> },
}

#[derive(Debug)]
pub struct Graphics {
	options: GraphicsOptions,
	window: PrepareWindow,
}

impl Graphics {
	pub fn options(&self) -> &GraphicsOptions {
		&self.options
	}

	fn clear_all(&self, time: Timestamp, channels: &[String], timeline_obj_id: &str, context: &str) -> Command<GraphicsCommand> {
		let channels = if channels.is_empty() {
			self.options.clear_all_channels.clone()
		} else {
			channels.to_vec()
		};
		Command::remove(time, "", timeline_obj_id, GraphicsCommand::ClearAll { channels }).with_context(context)
	}

	fn preload(outcome: &mut DiffOutcome<GraphicsCommand>, prepare_time: Timestamp, layer: &str, source: &LayerState<GraphicsLayer>, element: &ElementState) {
		outcome.push(
			Command::create(prepare_time, layer, &source.timeline_obj_id, GraphicsCommand::Prepare { element: element.element.clone() })
				.with_priority(source.priority)
				.with_context(format!("Prepare {}", element.element.template)),
		);
	}

	/// Load an element ahead of time, then cue or take it on time
	fn bring_on(outcome: &mut DiffOutcome<GraphicsCommand>, prepare_time: Timestamp, time: Timestamp, layer: &str, source: &LayerState<GraphicsLayer>, element: &ElementState) {
		if !element.no_auto_preload {
			Self::preload(outcome, prepare_time, layer, source, element);
		}
		Self::show(outcome, time, layer, source, element);
	}

	fn show(outcome: &mut DiffOutcome<GraphicsCommand>, time: Timestamp, layer: &str, source: &LayerState<GraphicsLayer>, element: &ElementState) {
		let command = if element.cue {
			GraphicsCommand::Cue { element: element.element.clone() }
		} else {
			GraphicsCommand::Take { element: element.element.clone() }
		};
		outcome.push(
			Command::create(time, layer, &source.timeline_obj_id, command)
				.with_priority(source.priority)
				.with_context(format!("Show {}", element.element.template)),
		);
	}

	/// Changes between two states of the same element
	fn update_element(outcome: &mut DiffOutcome<GraphicsCommand>, time: Timestamp, layer: &str, source: &LayerState<GraphicsLayer>, old: &ElementState, new: &ElementState) {
		let element = new.element.clone();
		if old.cue && !new.cue {
			outcome.push(Command::create(time, layer, &source.timeline_obj_id, GraphicsCommand::Take { element: element.clone() }).with_priority(source.priority).with_context("Cued element taken"));
		}

		let command = match new.continue_step.cmp(&old.continue_step) {
			Ordering::Greater => GraphicsCommand::Continue { element },
			Ordering::Less => GraphicsCommand::ContinueReverse { element },
			Ordering::Equal => return,
		};
		outcome.push(Command::create(time, layer, &source.timeline_obj_id, command).with_priority(source.priority).with_context("Continue step changed"));
	}

	/// Continue the element on `reference_layer`. A missing reference is a warning.
	fn continue_reference(outcome: &mut DiffOutcome<GraphicsCommand>, state: &GraphicsState, time: Timestamp, layer: &str, source: &LayerState<GraphicsLayer>, reference_layer: &str, direction: ContinueDirection) {
		let Some(LayerState {
			content: GraphicsLayer::Element(target),
			..
		}) = state.layers.get(reference_layer)
		else {
			warn!(layer, reference_layer, "continue references a layer without an element");
			outcome.warn(format!("Continue on {layer} references {reference_layer}, which holds no element"));
			return;
		};

		let element = target.element.clone();
		let command = match direction {
			ContinueDirection::Forward => GraphicsCommand::Continue { element },
			ContinueDirection::Reverse => GraphicsCommand::ContinueReverse { element },
		};
		outcome.push(Command::create(time, layer, &source.timeline_obj_id, command).with_priority(source.priority).with_context(format!("Continue {reference_layer}")));
	}

	/// Lookahead elements were never on air, so there is nothing to take out
	fn take_out(outcome: &mut DiffOutcome<GraphicsCommand>, time: Timestamp, layer: &str, previous: &LayerState<GraphicsLayer>) {
		if previous.lookahead {
			return;
		}
		if let GraphicsLayer::Element(element) = &previous.content {
			outcome.push(
				Command::remove(time, layer, &previous.timeline_obj_id, GraphicsCommand::TakeOut { element: element.element.clone() })
					.with_priority(previous.priority)
					.with_context(format!("Removed {layer}")),
			);
		}
	}
}

impl DeviceIntegration for Graphics {
	const DEVICE_TYPE: &'static str = DEVICE_TYPE;

	type Options = GraphicsOptions;
	type State = GraphicsState;
	type Command = GraphicsCommand;

	fn from_options(options: GraphicsOptions) -> Result<Self> {
		if options.host.trim().is_empty() {
			return Err(DeviceError::Config("graphics host is required".into()));
		}
		if options.profile.trim().is_empty() {
			return Err(DeviceError::Config("graphics profile is required".into()));
		}
		if options.ideal_prepare_lead_ms < 0 || options.min_prepare_wait_ms < 0 {
			return Err(DeviceError::Config("graphics prepare timings must not be negative".into()));
		}

		let window = PrepareWindow::new(options.ideal_prepare_lead_ms, options.min_prepare_wait_ms);
		Ok(Self { options, window })
	}

	fn convert(&self, state: &TimelineState, mappings: &Mappings, device_id: &str) -> Conversion<GraphicsState> {
		let mut conversion = Conversion::new(GraphicsState::default());

		for (layer_id, mapping) in device_mappings(mappings, DEVICE_TYPE, device_id) {
			let Some(object) = state.layers.get(layer_id) else {
				continue;
			};
			let content: GraphicsContent = match object.content_as() {
				Ok(content) => content,
				Err(e) => {
					conversion.warn(format!("Unable to read content of {} on {layer_id}: {e}", object.id));
					continue;
				}
			};

			if object.is_lookahead && !matches!(content, GraphicsContent::Element { .. }) {
				conversion.warn(format!("Lookahead object {} on {layer_id} is not an element and was ignored", object.id));
				continue;
			}

			let layer = match content {
				GraphicsContent::ClearAll { channels } => {
					conversion.state.clear_all = Some(LayerState::new(&object.id, channels));
					continue;
				}
				GraphicsContent::Continue { reference_layer, direction } => GraphicsLayer::Continue { reference_layer, direction },
				GraphicsContent::Element {
					template,
					fields,
					cue,
					continue_step,
					no_auto_preload,
				} => {
					let target = object.lookahead_for_layer.as_ref().and_then(|target| mappings.get(target)).filter(|target| target.targets(DEVICE_TYPE, device_id)).unwrap_or(mapping);
					let address: ChannelAddress = target.options_as().unwrap_or_default();
					GraphicsLayer::Element(ElementState {
						element: ElementRef {
							template,
							fields,
							channel: address.channel,
						},
						cue,
						continue_step,
						no_auto_preload,
					})
				}
			};

			conversion.state.layers.insert(layer_id.clone(), LayerState::new(&object.id, layer).with_priority(object.priority).with_lookahead(object.is_lookahead));
		}

		if conversion.state.clear_all.is_some() {
			conversion.state.layers.clear();
		}
		conversion
	}

	fn diff(&self, old: &HistoryEntry<GraphicsState>, new: &HistoryEntry<GraphicsState>, now: Timestamp) -> DiffOutcome<GraphicsCommand> {
		let mut outcome = DiffOutcome::new();

		if let Some(clear_all) = &new.state.clear_all {
			if old.state.clear_all.as_ref() != Some(clear_all) {
				outcome.push(self.clear_all(new.time, &clear_all.content, &clear_all.timeline_obj_id, "Clear all"));
			}
			return outcome;
		}

		let prepare_time = self.window.prepare_time(new.time, old.time, now);
		for change in diff_layers(&old.state.layers, &new.state.layers) {
			match change {
				LayerChange::Added { layer, new: source } => match &source.content {
					GraphicsLayer::Element(element) if source.lookahead => Self::preload(&mut outcome, prepare_time, layer, source, element),
					GraphicsLayer::Element(element) => Self::bring_on(&mut outcome, prepare_time, new.time, layer, source, element),
					GraphicsLayer::Continue { reference_layer, direction } => Self::continue_reference(&mut outcome, &new.state, new.time, layer, source, reference_layer, *direction),
				},
				LayerChange::Changed { layer, old: previous, new: source } => match (&previous.content, &source.content) {
					(_, GraphicsLayer::Element(element)) if source.lookahead => {
						Self::take_out(&mut outcome, new.time, layer, previous);
						Self::preload(&mut outcome, prepare_time, layer, source, element);
					}
					(GraphicsLayer::Element(old_element), GraphicsLayer::Element(element)) if previous.lookahead && old_element.element == element.element => {
						Self::show(&mut outcome, new.time, layer, source, element);
					}
					(GraphicsLayer::Element(old_element), GraphicsLayer::Element(element)) if !previous.lookahead && old_element.element == element.element => {
						Self::update_element(&mut outcome, new.time, layer, source, old_element, element);
					}
					(_, GraphicsLayer::Element(element)) => Self::bring_on(&mut outcome, prepare_time, new.time, layer, source, element),
					(_, GraphicsLayer::Continue { reference_layer, direction }) => {
						Self::take_out(&mut outcome, new.time, layer, previous);
						Self::continue_reference(&mut outcome, &new.state, new.time, layer, source, reference_layer, *direction);
					}
				},
				LayerChange::Removed { layer, old: previous } => Self::take_out(&mut outcome, new.time, layer, previous),
			}
		}

		outcome
	}

	fn send_mode(&self) -> SendMode {
		SendMode::InOrder
	}

	fn make_ready_commands(&self, destructive: bool, current: Option<&HistoryEntry<GraphicsState>>, now: Timestamp) -> Vec<Command<GraphicsCommand>> {
		let mut commands = Vec::new();
		if destructive {
			commands.push(self.clear_all(now, &[], "", "Make ready"));
		}
		commands.push(Command::create(now, "", "", GraphicsCommand::Activate { profile: self.options.profile.clone() }).with_context("Make ready"));

		if self.options.preload_all_elements {
			let elements = current.into_iter().flat_map(|entry| entry.state.layers.iter());
			for (layer, source) in elements {
				if let GraphicsLayer::Element(element) = &source.content {
					commands.push(Command::create(now, layer, &source.timeline_obj_id, GraphicsCommand::Prepare { element: element.element.clone() }).with_context("Preload all elements"));
				}
			}
		}

		commands
	}

	fn stand_down_commands(&self, destructive: bool, now: Timestamp) -> Vec<Command<GraphicsCommand>> {
		if destructive {
			vec![self.clear_all(now, &[], "", "Stand down")]
		} else {
			Vec::new()
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use playout_core::{Mapping, ResolvedObject};
	use serde_json::json;

	fn graphics(extra: serde_json::Value) -> Graphics {
		let mut options = json!({ "host": "mse.local", "profile": "news", "clearAllChannels": ["GFX1"] });
		if let (Some(options), Some(extra)) = (options.as_object_mut(), extra.as_object()) {
			options.extend(extra.clone());
		}
		Graphics::from_options(serde_json::from_value(options).unwrap()).unwrap()
	}

	fn mappings() -> Mappings {
		let mut mappings = Mappings::new();
		mappings.insert("lower".into(), Mapping::new(DEVICE_TYPE, "viz").with_option("channel", "GFX1"));
		mappings.insert("full".into(), Mapping::new(DEVICE_TYPE, "viz"));
		mappings.insert("next".into(), Mapping::new(DEVICE_TYPE, "viz"));
		mappings.insert("global".into(), Mapping::new(DEVICE_TYPE, "viz"));
		mappings
	}

	fn element(id: &str, layer: &str, template: &str, extra: serde_json::Value) -> ResolvedObject {
		let mut content = json!({ "type": "element", "template": template });
		if let (Some(content), Some(extra)) = (content.as_object_mut(), extra.as_object()) {
			content.extend(extra.clone());
		}
		ResolvedObject::new(id, layer, content)
	}

	fn entry(graphics: &Graphics, state: &TimelineState) -> HistoryEntry<GraphicsState> {
		HistoryEntry::new(state.time, graphics.convert(state, &mappings(), "viz").state)
	}

	fn diff(graphics: &Graphics, old: &TimelineState, new: &TimelineState, now: Timestamp) -> DiffOutcome<GraphicsCommand> {
		let old = if old.time == 0 { HistoryEntry::new(0, GraphicsState::default()) } else { entry(graphics, old) };
		graphics.diff(&old, &entry(graphics, new), now).sorted()
	}

	fn names(outcome: &DiffOutcome<GraphicsCommand>) -> Vec<(Timestamp, &'static str)> {
		outcome
			.commands
			.iter()
			.map(|command| {
				let name = match command.content {
					GraphicsCommand::Activate { .. } => "activate",
					GraphicsCommand::Prepare { .. } => "prepare",
					GraphicsCommand::Cue { .. } => "cue",
					GraphicsCommand::Take { .. } => "take",
					GraphicsCommand::TakeOut { .. } => "take_out",
					GraphicsCommand::Continue { .. } => "continue",
					GraphicsCommand::ContinueReverse { .. } => "continue_reverse",
					GraphicsCommand::ClearAll { .. } => "clear_all",
				};
				(command.time, name)
			})
			.collect()
	}

	#[test]
	fn test_options_require_profile() {
		let options: GraphicsOptions = serde_json::from_value(json!({ "host": "mse.local", "profile": "" })).unwrap();
		assert!(matches!(Graphics::from_options(options), Err(DeviceError::Config(_))));
		assert!(serde_json::from_value::<GraphicsOptions>(json!({ "host": "mse.local" })).is_err());

		let graphics = graphics(json!({}));
		assert_eq!(graphics.options().ideal_prepare_lead_ms, 1000);
		assert_eq!(graphics.options().min_prepare_wait_ms, 50);
	}

	#[test]
	fn test_new_element_is_prepared_then_taken() {
		let graphics = graphics(json!({}));
		let state = TimelineState::new(15_100).with_object(element("l3", "lower", "name_strap", json!({ "fields": { "0": "Jane Doe" } })));

		let outcome = diff(&graphics, &TimelineState::new(0), &state, 14_000);
		assert_eq!(names(&outcome), vec![(14_100, "prepare"), (15_100, "take")]);

		let GraphicsCommand::Take { element } = &outcome.commands[1].content else {
			panic!("expected a take");
		};
		assert_eq!(element.channel.as_deref(), Some("GFX1"));
		assert_eq!(element.fields["0"], "Jane Doe");
	}

	#[test]
	fn test_elapsed_prepare_window_runs_now() {
		let graphics = graphics(json!({}));
		let state = TimelineState::new(15_100).with_object(element("l3", "lower", "name_strap", json!({})));

		let outcome = diff(&graphics, &TimelineState::new(0), &state, 15_000);
		assert_eq!(names(&outcome), vec![(15_000, "prepare"), (15_100, "take")]);
	}

	#[test]
	fn test_cued_element_waits_then_takes() {
		let graphics = graphics(json!({}));
		let cued = TimelineState::new(1000).with_object(element("l3", "lower", "name_strap", json!({ "cue": true, "no_auto_preload": true })));
		let taken = TimelineState::new(2000).with_object(element("l3", "lower", "name_strap", json!({ "no_auto_preload": true })));

		assert_eq!(names(&diff(&graphics, &TimelineState::new(0), &cued, 0)), vec![(1000, "cue")]);
		assert_eq!(names(&diff(&graphics, &cued, &taken, 0)), vec![(2000, "take")]);
	}

	#[test]
	fn test_continue_step_picks_direction() {
		let graphics = graphics(json!({}));
		let step = |time: Timestamp, step: i32| TimelineState::new(time).with_object(element("bars", "full", "chart", json!({ "continue_step": step })));

		assert_eq!(names(&diff(&graphics, &step(1000, 0), &step(2000, 1), 0)), vec![(2000, "continue")]);
		assert_eq!(names(&diff(&graphics, &step(2000, 2), &step(3000, 1), 0)), vec![(3000, "continue_reverse")]);
	}

	#[test]
	fn test_continue_object_targets_referenced_element() {
		let graphics = graphics(json!({}));
		let base = TimelineState::new(1000).with_object(element("bars", "full", "chart", json!({})));
		let mut continued = base.clone().with_object(ResolvedObject::new("step", "next", json!({ "type": "continue", "reference_layer": "full", "direction": "reverse" })));
		continued.time = 2000;

		let outcome = diff(&graphics, &base, &continued, 0);
		assert_eq!(names(&outcome), vec![(2000, "continue_reverse")]);
		assert_eq!(outcome.commands[0].timeline_obj_id, "step");
	}

	#[test]
	fn test_missing_continue_reference_is_a_warning() {
		let graphics = graphics(json!({}));
		let state = TimelineState::new(1000).with_object(ResolvedObject::new("step", "next", json!({ "type": "continue", "reference_layer": "full" })));

		let outcome = diff(&graphics, &TimelineState::new(0), &state, 0);
		assert!(outcome.commands.is_empty());
		assert_eq!(outcome.warnings, vec!["Continue on next references full, which holds no element".to_string()]);
	}

	#[test]
	fn test_removed_element_is_taken_out_first() {
		let graphics = graphics(json!({}));
		let before = TimelineState::new(1000).with_object(element("l3", "lower", "name_strap", json!({})));
		let after = TimelineState::new(3000).with_object(element("full", "full", "chart", json!({})));

		assert_eq!(names(&diff(&graphics, &before, &after, 0)), vec![(3000, "take_out"), (2000, "prepare"), (3000, "take")]);
	}

	#[test]
	fn test_lookahead_element_is_only_prepared() {
		let graphics = graphics(json!({}));
		let state = TimelineState::new(15_100).with_object(element("l3_next", "next", "name_strap", json!({})).as_lookahead_for("lower"));

		let outcome = diff(&graphics, &TimelineState::new(0), &state, 14_000);
		assert_eq!(names(&outcome), vec![(14_100, "prepare")]);
		let GraphicsCommand::Prepare { element } = &outcome.commands[0].content else {
			panic!("expected a prepare");
		};
		assert_eq!(element.channel.as_deref(), Some("GFX1"));

		assert!(diff(&graphics, &state, &TimelineState::new(16_000), 0).is_empty());
	}

	#[test]
	fn test_preloaded_lookahead_is_taken_without_second_prepare() {
		let graphics = graphics(json!({}));
		let lookahead = TimelineState::new(1000).with_object(element("l3_la", "lower", "name_strap", json!({})).as_lookahead_for("lower"));
		let on_air = TimelineState::new(2000).with_object(element("l3", "lower", "name_strap", json!({})));

		assert_eq!(names(&diff(&graphics, &TimelineState::new(0), &lookahead, 0)), vec![(50, "prepare")]);
		assert_eq!(names(&diff(&graphics, &lookahead, &on_air, 0)), vec![(2000, "take")]);

		let other = TimelineState::new(2000).with_object(element("bars", "lower", "chart", json!({})));
		assert_eq!(names(&diff(&graphics, &lookahead, &other, 0)), vec![(1050, "prepare"), (2000, "take")]);
	}

	#[test]
	fn test_lookahead_replacing_on_air_element_takes_it_out() {
		let graphics = graphics(json!({}));
		let on_air = TimelineState::new(1000).with_object(element("l3", "lower", "name_strap", json!({})));
		let lookahead = TimelineState::new(3000).with_object(element("bars_la", "lower", "chart", json!({})).as_lookahead_for("lower"));

		assert_eq!(names(&diff(&graphics, &on_air, &lookahead, 0)), vec![(3000, "take_out"), (2000, "prepare")]);
	}

	#[test]
	fn test_clear_all_short_circuits_once() {
		let graphics = graphics(json!({}));
		let before = TimelineState::new(1000).with_object(element("l3", "lower", "name_strap", json!({})));
		let mut clear = before.clone().with_object(ResolvedObject::new("wipe", "global", json!({ "type": "clear_all" })));
		clear.time = 2000;

		let converted = entry(&graphics, &clear);
		assert!(converted.state.layers.is_empty());

		let outcome = diff(&graphics, &before, &clear, 0);
		assert_eq!(names(&outcome), vec![(2000, "clear_all")]);
		assert_eq!(outcome.commands[0].content, GraphicsCommand::ClearAll { channels: vec!["GFX1".into()] });

		let mut later = clear.clone();
		later.time = 3000;
		assert!(diff(&graphics, &clear, &later, 0).is_empty());
	}

	#[test]
	fn test_make_ready_preloads_current_elements() {
		let graphics = graphics(json!({ "preloadAllElements": true }));
		let state = TimelineState::new(1000).with_object(element("l3", "lower", "name_strap", json!({}))).with_object(element("bars", "full", "chart", json!({})));
		let current = entry(&graphics, &state);

		let commands = graphics.make_ready_commands(true, Some(&current), 5000);
		let kinds: Vec<&str> = commands
			.iter()
			.map(|command| match command.content {
				GraphicsCommand::ClearAll { .. } => "clear_all",
				GraphicsCommand::Activate { .. } => "activate",
				GraphicsCommand::Prepare { .. } => "prepare",
				_ => "other",
			})
			.collect();
		assert_eq!(kinds, vec!["clear_all", "activate", "prepare", "prepare"]);
		assert!(graphics.stand_down_commands(false, 5000).is_empty());
	}
}
