use crate::error::DeviceError;
use serde::{Deserialize, Serialize};

/// Where a device instance is in its life. Independent of whether any layer is mapped to it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceLifecycle {
	#[default]
	Uninitialized,
	Initializing,
	Connected,
	Disconnected,
	Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleTransition {
	StartInit,
	InitFailed,
	ConnectionEstablished,
	ConnectionLost,
	Terminate,
}

impl LifecycleTransition {
	fn target(self) -> DeviceLifecycle {
		match self {
			Self::StartInit => DeviceLifecycle::Initializing,
			Self::InitFailed => DeviceLifecycle::Uninitialized,
			Self::ConnectionEstablished => DeviceLifecycle::Connected,
			Self::ConnectionLost => DeviceLifecycle::Disconnected,
			Self::Terminate => DeviceLifecycle::Terminated,
		}
	}
}

impl DeviceLifecycle {
	/// Validate a transition and return the resulting state
	pub fn transition(self, transition: LifecycleTransition) -> Result<Self, DeviceError> {
		use DeviceLifecycle::*;
		use LifecycleTransition::*;

		let next = match (self, transition) {
			(_, Terminate) => Terminated,
			(Terminated, _) => return Err(DeviceError::Terminated),
			(Uninitialized, StartInit) => Initializing,
			(Initializing, InitFailed) => Uninitialized,
			(Initializing | Disconnected | Connected, ConnectionEstablished) => Connected,
			(Initializing | Connected | Disconnected, ConnectionLost) => Disconnected,
			(current, transition) => {
				return Err(DeviceError::InvalidTransition {
					from: format!("{current:?}"),
					to: format!("{:?}", transition.target()),
				})
			}
		};

		Ok(next)
	}

	/// Init has completed, whether or not the connection is up
	pub fn is_initialized(self) -> bool {
		matches!(self, Self::Connected | Self::Disconnected)
	}

	pub fn is_terminal(self) -> bool {
		matches!(self, Self::Terminated)
	}
}
