use anyhow::{bail, Context, Result};
use playout_core::{Mappings, ResolvedObject, TimelineState, Timestamp};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// One device the script wants driven
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceSpec {
	#[serde(rename = "type")]
	pub device_type: String,
	#[serde(default)]
	pub options: serde_json::Value,
}

/// A timeline snapshot, relative to when the simulation starts
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptedState {
	pub offset_ms: Timestamp,
	#[serde(default)]
	pub layers: Vec<ResolvedObject>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Script {
	pub devices: BTreeMap<String, DeviceSpec>,
	pub mappings: Mappings,
	pub states: Vec<ScriptedState>,
}

impl Script {
	pub fn load(path: &Path) -> Result<Self> {
		let raw = std::fs::read_to_string(path).with_context(|| format!("reading script {}", path.display()))?;
		let mut script: Self = serde_json::from_str(&raw).with_context(|| format!("parsing script {}", path.display()))?;
		script.validate()?;
		script.states.sort_by_key(|state| state.offset_ms);
		Ok(script)
	}

	fn validate(&self) -> Result<()> {
		if self.states.iter().any(|state| state.offset_ms < 0) {
			bail!("state offsets must not be negative");
		}
		for (layer, mapping) in &self.mappings {
			if !self.devices.contains_key(&mapping.device_id) {
				bail!("layer {layer} is mapped to unknown device {}", mapping.device_id);
			}
		}
		Ok(())
	}

	/// Timeline states anchored at `start`, in time order
	pub fn timeline(&self, start: Timestamp) -> Vec<TimelineState> {
		self.states
			.iter()
			.map(|scripted| scripted.layers.iter().cloned().fold(TimelineState::new(start + scripted.offset_ms), TimelineState::with_object))
			.collect()
	}

	pub fn last_offset(&self) -> Timestamp {
		self.states.last().map_or(0, |state| state.offset_ms)
	}
}
