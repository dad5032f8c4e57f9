//! Time-keyed cache of the states previously sent to a device.
//!
//! The timeline can be rewritten at any point, so this is not an append-only log: storing a
//! state invalidates everything at or after its time.

use crate::error::HistoryError;
use crate::time::{Clock, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::trace;

/// A device state together with the time it became authoritative
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry<S> {
	pub time: Timestamp,
	pub state: S,
}

impl<S> HistoryEntry<S> {
	pub fn new(time: Timestamp, state: S) -> Self {
		Self { time, state }
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
	/// Prune stale entries every N calls to `set_state`
	#[serde(default = "default_cleanup_every")]
	pub cleanup_every: u32,
}

fn default_cleanup_every() -> u32 {
	10
}

impl Default for HistoryConfig {
	fn default() -> Self {
		Self {
			cleanup_every: default_cleanup_every(),
		}
	}
}

impl HistoryConfig {
	pub fn with_cleanup_every(mut self, calls: u32) -> Self {
		self.cleanup_every = calls.max(1);
		self
	}
}

#[derive(Debug)]
pub struct StateHistory<S> {
	states: BTreeMap<Timestamp, S>,
	clock: Arc<dyn Clock>,
	config: HistoryConfig,
	set_count: u32,
}

impl<S: Clone> StateHistory<S> {
	pub fn new(clock: Arc<dyn Clock>) -> Self {
		Self::with_config(clock, HistoryConfig::default())
	}

	pub fn with_config(clock: Arc<dyn Clock>, config: HistoryConfig) -> Self {
		Self {
			states: BTreeMap::new(),
			clock,
			config,
			set_count: 0,
		}
	}

	/// Store `state` as authoritative from `time`, dropping every entry at or after it
	pub fn set_state(&mut self, state: S, time: Timestamp) -> Result<(), HistoryError> {
		if time <= 0 {
			return Err(HistoryError::InvalidTime(time));
		}

		let dropped = self.states.split_off(&time).len();
		if dropped > 0 {
			trace!(time, dropped, "rewrote future states");
		}
		self.states.insert(time, state);

		self.set_count += 1;
		if self.set_count >= self.config.cleanup_every {
			self.set_count = 0;
			self.prune_past(self.clock.now());
		}

		Ok(())
	}

	/// Newest entry strictly before `time`
	pub fn get_state_before(&self, time: Timestamp) -> Option<HistoryEntry<S>> {
		self.states.range(..time).next_back().map(|(&time, state)| HistoryEntry::new(time, state.clone()))
	}

	/// Newest entry at or before `time`
	pub fn get_state(&self, time: Timestamp) -> Option<HistoryEntry<S>> {
		self.states.range(..=time).next_back().map(|(&time, state)| HistoryEntry::new(time, state.clone()))
	}

	pub fn get_current_state(&self) -> Option<HistoryEntry<S>> {
		self.get_state(self.clock.now())
	}

	/// Drop every entry at or after `time`
	pub fn remove_states_from(&mut self, time: Timestamp) -> usize {
		self.states.split_off(&time).len()
	}

	pub fn clear_states(&mut self) {
		self.states.clear();
		self.set_count = 0;
	}

	pub fn len(&self) -> usize {
		self.states.len()
	}

	pub fn is_empty(&self) -> bool {
		self.states.is_empty()
	}

	/// Keep the newest entry at or before `now - 1` and everything after it
	fn prune_past(&mut self, now: Timestamp) {
		let Some(keep_from) = self.states.range(..now).next_back().map(|(&time, _)| time) else {
			return;
		};

		let retained = self.states.split_off(&keep_from);
		let pruned = std::mem::replace(&mut self.states, retained).len();
		if pruned > 0 {
			trace!(now, pruned, "pruned past states");
		}
	}
}
