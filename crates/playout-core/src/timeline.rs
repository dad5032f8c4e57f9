use crate::time::Timestamp;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type LayerId = String;

/// A timeline object resolved onto a layer at a given instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedObject {
	pub id: String,
	pub layer: LayerId,
	/// Device specific content, decoded by each device during conversion
	pub content: serde_json::Value,
	#[serde(default)]
	pub priority: i32,
	#[serde(default)]
	pub is_lookahead: bool,
	#[serde(default)]
	pub lookahead_for_layer: Option<LayerId>,
}

impl ResolvedObject {
	pub fn new(id: impl Into<String>, layer: impl Into<LayerId>, content: serde_json::Value) -> Self {
		Self {
			id: id.into(),
			layer: layer.into(),
			content,
			priority: 0,
			is_lookahead: false,
			lookahead_for_layer: None,
		}
	}

	pub fn with_priority(mut self, priority: i32) -> Self {
		self.priority = priority;
		self
	}

	pub fn as_lookahead_for(mut self, layer: impl Into<LayerId>) -> Self {
		self.is_lookahead = true;
		self.lookahead_for_layer = Some(layer.into());
		self
	}

	/// Decode the content into a device's own vocabulary
	pub fn content_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
		T::deserialize(&self.content)
	}
}

/// Snapshot of everything that should be showing at `time`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimelineState {
	pub time: Timestamp,
	pub layers: BTreeMap<LayerId, ResolvedObject>,
}

impl TimelineState {
	pub fn new(time: Timestamp) -> Self {
		Self { time, layers: BTreeMap::new() }
	}

	pub fn with_object(mut self, object: ResolvedObject) -> Self {
		self.layers.insert(object.layer.clone(), object);
		self
	}
}

/// Binds a layer to a device instance, plus device specific addressing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mapping {
	pub device: String,
	pub device_id: String,
	#[serde(flatten)]
	pub options: serde_json::Map<String, serde_json::Value>,
}

impl Mapping {
	pub fn new(device: impl Into<String>, device_id: impl Into<String>) -> Self {
		Self {
			device: device.into(),
			device_id: device_id.into(),
			options: serde_json::Map::new(),
		}
	}

	pub fn with_option(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
		self.options.insert(key.into(), value.into());
		self
	}

	pub fn targets(&self, device_type: &str, device_id: &str) -> bool {
		self.device == device_type && self.device_id == device_id
	}

	/// Decode the addressing fields
	pub fn options_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
		serde_json::from_value(serde_json::Value::Object(self.options.clone()))
	}
}

pub type Mappings = BTreeMap<LayerId, Mapping>;

/// Layers mapped onto the given device instance, in layer order
pub fn device_mappings<'a>(mappings: &'a Mappings, device_type: &'a str, device_id: &'a str) -> impl Iterator<Item = (&'a LayerId, &'a Mapping)> + 'a {
	mappings.iter().filter(move |(_, mapping)| mapping.targets(device_type, device_id))
}
