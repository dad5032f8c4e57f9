//! CasparCG-style video server: channels of numbered layers playing clips, live inputs,
//! templates, web pages and routes.

use playout_core::device::Conversion;
use playout_core::diff::{diff_layers, LayerChange};
use playout_core::timeline::device_mappings;
use playout_core::{Command, DeviceError, DeviceIntegration, DiffOutcome, HistoryEntry, LayerState, Mappings, Result, SendMode, TimelineState, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

pub const DEVICE_TYPE: &str = "video_server";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoServerOptions {
	pub host: String,
	#[serde(default = "default_port")]
	pub port: u16,
	/// Channels cleared by destructive make-ready and stand-down
	#[serde(default)]
	pub channels: Vec<u32>,
}

fn default_port() -> u16 {
	5250
}

/// Addressing fields of a video server mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
struct LayerAddress {
	channel: u32,
	layer: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VideoContent {
	Media {
		file: String,
		#[serde(default)]
		looping: bool,
		#[serde(default)]
		seek: Option<u64>,
		#[serde(default)]
		paused: bool,
	},
	Input {
		device: u32,
		#[serde(default)]
		format: Option<String>,
	},
	Template {
		name: String,
		#[serde(default)]
		data: serde_json::Value,
		#[serde(default)]
		use_stopping: bool,
	},
	Html {
		url: String,
	},
	Route {
		channel: u32,
		#[serde(default)]
		layer: Option<u32>,
	},
}

impl VideoContent {
	/// Templates that animate out need a stop instead of a hard clear
	fn needs_stop(&self) -> bool {
		matches!(self, Self::Template { use_stopping: true, .. })
	}
}

/// One channel layer: what plays on it and what is preloaded behind it
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoLayer {
	pub channel: u32,
	pub layer: u32,
	pub foreground: Option<LayerState<VideoContent>>,
	pub next_up: Option<LayerState<VideoContent>>,
}

impl VideoLayer {
	fn empty(address: LayerAddress) -> Self {
		Self {
			channel: address.channel,
			layer: address.layer,
			foreground: None,
			next_up: None,
		}
	}

	fn address(&self) -> (u32, u32) {
		(self.channel, self.layer)
	}
}

pub type VideoServerState = BTreeMap<String, VideoLayer>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum VideoCommand {
	/// `preloaded` plays whatever was loaded in the background
	Play { channel: u32, layer: u32, content: VideoContent, preloaded: bool },
	LoadBg { channel: u32, layer: u32, content: VideoContent },
	UpdateTemplate { channel: u32, layer: u32, data: serde_json::Value },
	Pause { channel: u32, layer: u32 },
	Resume { channel: u32, layer: u32 },
	Stop { channel: u32, layer: u32 },
	Clear { channel: u32, layer: u32 },
	/// Drops whatever was loaded in the background, leaving the foreground playing
	ClearBg { channel: u32, layer: u32 },
	ClearChannel { channel: u32 },
}

impl VideoCommand {
	pub fn channel(&self) -> u32 {
		match self {
			Self::Play { channel, .. }
			| Self::LoadBg { channel, .. }
			| Self::UpdateTemplate { channel, .. }
			| Self::Pause { channel, .. }
			| Self::Resume { channel, .. }
			| Self::Stop { channel, .. }
			| Self::Clear { channel, .. }
			| Self::ClearBg { channel, .. }
			| Self::ClearChannel { channel } => *channel,
		}
	}
}

#[derive(Debug)]
pub struct VideoServer {
	options: VideoServerOptions,
}

impl VideoServer {
	pub fn options(&self) -> &VideoServerOptions {
		&self.options
	}

	fn clear_channels(&self, current: Option<&HistoryEntry<VideoServerState>>, now: Timestamp, context: &str) -> Vec<Command<VideoCommand>> {
		let mut channels: BTreeSet<u32> = self.options.channels.iter().copied().collect();
		if let Some(entry) = current {
			channels.extend(entry.state.values().map(|slot| slot.channel));
		}

		channels
			.into_iter()
			.map(|channel| Command::remove(now, format!("channel-{channel}"), "", VideoCommand::ClearChannel { channel }).with_context(context))
			.collect()
	}
}

/// Resolve the layer address from a mapping, if it has one
fn mapped_address(mappings: &Mappings, layer_id: &str, device_id: &str) -> Option<LayerAddress> {
	mappings.get(layer_id).filter(|mapping| mapping.targets(DEVICE_TYPE, device_id)).and_then(|mapping| mapping.options_as().ok())
}

/// Foreground went from `old` to `new`
fn foreground_command(old: Option<&VideoContent>, new: &VideoContent, preloaded: bool, channel: u32, layer: u32) -> VideoCommand {
	match (old, new) {
		(
			Some(VideoContent::Template {
				name: old_name,
				use_stopping: old_stopping,
				..
			}),
			VideoContent::Template { name, data, use_stopping },
		) if old_name == name && old_stopping == use_stopping => VideoCommand::UpdateTemplate {
			channel,
			layer,
			data: data.clone(),
		},
		(
			Some(VideoContent::Media {
				file: old_file,
				looping: old_looping,
				seek: old_seek,
				paused: old_paused,
			}),
			VideoContent::Media { file, looping, seek, paused },
		) if old_file == file && old_looping == looping && old_seek == seek && old_paused != paused => {
			if *paused {
				VideoCommand::Pause { channel, layer }
			} else {
				VideoCommand::Resume { channel, layer }
			}
		}
		_ => VideoCommand::Play {
			channel,
			layer,
			content: new.clone(),
			preloaded,
		},
	}
}

/// Take a layer out entirely
fn clear_slot(outcome: &mut DiffOutcome<VideoCommand>, time: Timestamp, layer_id: &str, previous: &VideoLayer) {
	let Some(source) = previous.foreground.as_ref().or(previous.next_up.as_ref()) else {
		return;
	};

	let (channel, layer) = previous.address();
	let command = if previous.foreground.as_ref().is_some_and(|fg| fg.content.needs_stop()) {
		VideoCommand::Stop { channel, layer }
	} else {
		VideoCommand::Clear { channel, layer }
	};
	outcome.push(Command::remove(time, layer_id, &source.timeline_obj_id, command).with_context(format!("Removed {layer_id}")));
}

fn slot_commands(outcome: &mut DiffOutcome<VideoCommand>, time: Timestamp, layer_id: &str, old: Option<&VideoLayer>, new: &VideoLayer) {
	let old_fg = old.and_then(|slot| slot.foreground.as_ref());
	let old_next = old.and_then(|slot| slot.next_up.as_ref());
	let (channel, layer) = new.address();
	let mut cleared = false;

	match (old_fg, new.foreground.as_ref()) {
		(old_fg, Some(fg)) if old_fg != Some(fg) => {
			let preloaded = old_next.is_some_and(|next| next.content == fg.content);
			let command = foreground_command(old_fg.map(|old| &old.content), &fg.content, preloaded, channel, layer);
			outcome.push(Command::create(time, layer_id, &fg.timeline_obj_id, command).with_context(format!("Foreground changed on {layer_id}")));
		}
		(Some(old_fg), None) => {
			let command = if old_fg.content.needs_stop() {
				VideoCommand::Stop { channel, layer }
			} else {
				cleared = true;
				VideoCommand::Clear { channel, layer }
			};
			outcome.push(Command::remove(time, layer_id, &old_fg.timeline_obj_id, command).with_context(format!("Foreground emptied on {layer_id}")));
		}
		_ => {}
	}

	if let Some(next) = &new.next_up {
		let already_loaded = old_next.is_some_and(|old| old.content == next.content);
		let is_playing = new.foreground.as_ref().is_some_and(|fg| fg.content == next.content);
		if !already_loaded && !is_playing {
			outcome.push(
				Command::create(
					time,
					layer_id,
					&next.timeline_obj_id,
					VideoCommand::LoadBg {
						channel,
						layer,
						content: next.content.clone(),
					},
				)
				.with_context(format!("Lookahead on {layer_id}")),
			);
		}
	} else if let Some(stale) = old_next {
		let played = new.foreground.as_ref().is_some_and(|fg| fg.content == stale.content);
		if !played && !cleared {
			outcome.push(Command::remove(time, layer_id, &stale.timeline_obj_id, VideoCommand::ClearBg { channel, layer }).with_context(format!("Lookahead removed on {layer_id}")));
		}
	}
}

impl DeviceIntegration for VideoServer {
	const DEVICE_TYPE: &'static str = DEVICE_TYPE;

	type Options = VideoServerOptions;
	type State = VideoServerState;
	type Command = VideoCommand;

	fn from_options(mut options: VideoServerOptions) -> Result<Self> {
		if options.host.trim().is_empty() {
			return Err(DeviceError::Config("video server host is required".into()));
		}
		if options.port == 0 {
			return Err(DeviceError::Config("video server port must not be 0".into()));
		}
		options.channels.sort_unstable();
		options.channels.dedup();
		Ok(Self { options })
	}

	fn convert(&self, state: &TimelineState, mappings: &Mappings, device_id: &str) -> Conversion<VideoServerState> {
		let mut conversion = Conversion::new(VideoServerState::new());
		let mut lookahead = Vec::new();

		for (layer_id, mapping) in device_mappings(mappings, DEVICE_TYPE, device_id) {
			let Some(object) = state.layers.get(layer_id) else {
				continue;
			};
			let address: LayerAddress = match mapping.options_as() {
				Ok(address) => address,
				Err(e) => {
					conversion.warn(format!("Mapping for layer {layer_id} has no channel/layer: {e}"));
					continue;
				}
			};
			let content: VideoContent = match object.content_as() {
				Ok(content) => content,
				Err(e) => {
					conversion.warn(format!("Unable to read content of {} on {layer_id}: {e}", object.id));
					continue;
				}
			};

			let layer_state = LayerState::new(&object.id, content).with_priority(object.priority);
			if object.is_lookahead {
				let target = object.lookahead_for_layer.clone().unwrap_or_else(|| layer_id.clone());
				let target_address = mapped_address(mappings, &target, device_id).unwrap_or(address);
				lookahead.push((target, target_address, layer_state.with_lookahead(true)));
			} else {
				conversion.state.entry(layer_id.clone()).or_insert_with(|| VideoLayer::empty(address)).foreground = Some(layer_state);
			}
		}

		for (target, address, layer_state) in lookahead {
			conversion.state.entry(target).or_insert_with(|| VideoLayer::empty(address)).next_up = Some(layer_state);
		}

		conversion
	}

	fn diff(&self, old: &HistoryEntry<VideoServerState>, new: &HistoryEntry<VideoServerState>, _now: Timestamp) -> DiffOutcome<VideoCommand> {
		let mut outcome = DiffOutcome::new();

		for change in diff_layers(&old.state, &new.state) {
			match change {
				LayerChange::Added { layer, new: slot } => slot_commands(&mut outcome, new.time, layer, None, slot),
				LayerChange::Changed { layer, old: previous, new: slot } if previous.address() != slot.address() => {
					debug!(layer, "layer moved to another channel");
					clear_slot(&mut outcome, new.time, layer, previous);
					slot_commands(&mut outcome, new.time, layer, None, slot);
				}
				LayerChange::Changed { layer, old: previous, new: slot } => slot_commands(&mut outcome, new.time, layer, Some(previous), slot),
				LayerChange::Removed { layer, old: previous } => clear_slot(&mut outcome, new.time, layer, previous),
			}
		}

		outcome
	}

	fn queue_id(&self, command: &Command<VideoCommand>) -> Option<String> {
		Some(format!("channel-{}", command.content.channel()))
	}

	fn send_mode(&self) -> SendMode {
		SendMode::InOrder
	}

	fn make_ready_commands(&self, destructive: bool, current: Option<&HistoryEntry<VideoServerState>>, now: Timestamp) -> Vec<Command<VideoCommand>> {
		if destructive {
			self.clear_channels(current, now, "Make ready")
		} else {
			Vec::new()
		}
	}

	fn stand_down_commands(&self, destructive: bool, now: Timestamp) -> Vec<Command<VideoCommand>> {
		if destructive {
			self.clear_channels(None, now, "Stand down")
		} else {
			Vec::new()
		}
	}
}
