//! Building blocks shared by every device's diff engine.
//!
//! A device diff is a pure function from (old state, new state, now) to an ordered list of
//! commands. Devices own their content vocabulary; this module supplies the layer walk, the
//! command envelope, the ordering rule and the prepare-time computation.

use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Content of one layer plus the timeline object that put it there.
///
/// Equality ignores `timeline_obj_id` and `priority`: the same content coming from a different
/// timeline object, or reordered by priority, must not re-trigger the device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerState<T> {
	pub timeline_obj_id: String,
	pub priority: i32,
	pub lookahead: bool,
	pub content: T,
}

impl<T> LayerState<T> {
	pub fn new(timeline_obj_id: impl Into<String>, content: T) -> Self {
		Self {
			timeline_obj_id: timeline_obj_id.into(),
			priority: 0,
			lookahead: false,
			content,
		}
	}

	pub fn with_priority(mut self, priority: i32) -> Self {
		self.priority = priority;
		self
	}

	pub fn with_lookahead(mut self, lookahead: bool) -> Self {
		self.lookahead = lookahead;
		self
	}
}

impl<T: PartialEq> PartialEq for LayerState<T> {
	fn eq(&self, other: &Self) -> bool {
		self.content == other.content && self.lookahead == other.lookahead
	}
}

/// One entry of a layer-by-layer comparison
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LayerChange<'a, T> {
	Added { layer: &'a str, new: &'a T },
	Changed { layer: &'a str, old: &'a T, new: &'a T },
	Removed { layer: &'a str, old: &'a T },
}

impl<T> LayerChange<'_, T> {
	pub fn layer(&self) -> &str {
		match self {
			Self::Added { layer, .. } | Self::Changed { layer, .. } | Self::Removed { layer, .. } => layer,
		}
	}
}

/// Compare two layer maps. Added and changed layers come first in lexical layer order,
/// followed by removed layers in lexical order. Equal layers produce nothing.
pub fn diff_layers<'a, T: PartialEq>(old: &'a BTreeMap<String, T>, new: &'a BTreeMap<String, T>) -> Vec<LayerChange<'a, T>> {
	let mut changes = Vec::new();

	for (layer, new_value) in new {
		match old.get(layer) {
			None => changes.push(LayerChange::Added { layer, new: new_value }),
			Some(old_value) if old_value != new_value => changes.push(LayerChange::Changed {
				layer,
				old: old_value,
				new: new_value,
			}),
			Some(_) => {}
		}
	}

	for (layer, old_value) in old {
		if !new.contains_key(layer) {
			changes.push(LayerChange::Removed { layer, old: old_value });
		}
	}

	changes
}

/// Removal commands always run ahead of creation commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommandPhase {
	Remove,
	Create,
}

/// A device command stamped with when it should run and what caused it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command<C> {
	pub time: Timestamp,
	pub phase: CommandPhase,
	pub layer: String,
	pub priority: i32,
	/// Human readable reason, carried into error reports
	pub context: String,
	pub timeline_obj_id: String,
	pub content: C,
}

impl<C> Command<C> {
	pub fn new(time: Timestamp, phase: CommandPhase, layer: impl Into<String>, timeline_obj_id: impl Into<String>, content: C) -> Self {
		Self {
			time,
			phase,
			layer: layer.into(),
			priority: 0,
			context: String::new(),
			timeline_obj_id: timeline_obj_id.into(),
			content,
		}
	}

	pub fn create(time: Timestamp, layer: impl Into<String>, timeline_obj_id: impl Into<String>, content: C) -> Self {
		Self::new(time, CommandPhase::Create, layer, timeline_obj_id, content)
	}

	pub fn remove(time: Timestamp, layer: impl Into<String>, timeline_obj_id: impl Into<String>, content: C) -> Self {
		Self::new(time, CommandPhase::Remove, layer, timeline_obj_id, content)
	}

	pub fn with_context(mut self, context: impl Into<String>) -> Self {
		self.context = context.into();
		self
	}

	pub fn with_priority(mut self, priority: i32) -> Self {
		self.priority = priority;
		self
	}
}

/// Order commands: removals first, then ascending priority, then layer.
///
/// The sort is stable so commands a device emits for one layer keep their relative order
/// (e.g. prepare before take).
pub fn sort_commands<C>(commands: &mut [Command<C>]) {
	commands.sort_by(|a, b| a.phase.cmp(&b.phase).then(a.priority.cmp(&b.priority)).then_with(|| a.layer.cmp(&b.layer)));
}

/// Result of a device diff. Unresolvable references end up as warnings, never as errors.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffOutcome<C> {
	pub commands: Vec<Command<C>>,
	pub warnings: Vec<String>,
}

impl<C> DiffOutcome<C> {
	pub fn new() -> Self {
		Self {
			commands: Vec::new(),
			warnings: Vec::new(),
		}
	}

	pub fn push(&mut self, command: Command<C>) {
		self.commands.push(command);
	}

	pub fn warn(&mut self, warning: impl Into<String>) {
		self.warnings.push(warning.into());
	}

	/// Apply the shared ordering rule and hand back the outcome
	pub fn sorted(mut self) -> Self {
		sort_commands(&mut self.commands);
		self
	}

	pub fn is_empty(&self) -> bool {
		self.commands.is_empty()
	}
}

impl<C> Default for DiffOutcome<C> {
	fn default() -> Self {
		Self::new()
	}
}

/// How far ahead of their nominal time "prepare" commands are issued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareWindow {
	pub ideal_lead_ms: Timestamp,
	pub min_wait_ms: Timestamp,
}

impl Default for PrepareWindow {
	fn default() -> Self {
		Self {
			ideal_lead_ms: 1000,
			min_wait_ms: 50,
		}
	}
}

impl PrepareWindow {
	pub fn new(ideal_lead_ms: Timestamp, min_wait_ms: Timestamp) -> Self {
		Self { ideal_lead_ms, min_wait_ms }
	}

	/// `clamp(state_time - lead, old_time + min_wait, state_time)`, never earlier than `now`.
	///
	/// A prepare window that has already elapsed collapses to "immediately" instead of being
	/// reported as a late command.
	pub fn prepare_time(&self, state_time: Timestamp, old_time: Timestamp, now: Timestamp) -> Timestamp {
		let ideal = state_time - self.ideal_lead_ms;
		let earliest = old_time + self.min_wait_ms;
		ideal.max(earliest).min(state_time).max(now)
	}
}
