//! The seam between the scheduling core and the device's actual protocol.

mod retry;

pub use retry::{RetryConfig, RetryingReceiver};

use crate::error::CommandError;
use crate::time::Timestamp;
use async_trait::async_trait;
use std::fmt::Debug;
use std::marker::PhantomData;
use tracing::info;

/// Sends one device command over the wire. The core only looks at whether it settled.
#[async_trait]
pub trait CommandReceiver<C>: Send + Sync + 'static
where
	C: Send + Sync + 'static,
{
	/// Open the connection or session. Called once by `init`.
	async fn connect(&self) -> Result<(), CommandError> {
		Ok(())
	}

	async fn send(&self, time: Timestamp, command: &C, context: &str, timeline_obj_id: &str) -> Result<(), CommandError>;

	async fn disconnect(&self) -> Result<(), CommandError> {
		Ok(())
	}
}

/// Dry-run receiver that logs every command instead of sending it
#[derive(Debug)]
pub struct TracingReceiver<C> {
	device_id: String,
	_command: PhantomData<fn(C)>,
}

impl<C> TracingReceiver<C> {
	pub fn new(device_id: impl Into<String>) -> Self {
		Self {
			device_id: device_id.into(),
			_command: PhantomData,
		}
	}
}

#[async_trait]
impl<C> CommandReceiver<C> for TracingReceiver<C>
where
	C: Debug + Send + Sync + 'static,
{
	async fn connect(&self) -> Result<(), CommandError> {
		info!(device = %self.device_id, "dry-run receiver connected");
		Ok(())
	}

	async fn send(&self, time: Timestamp, command: &C, context: &str, timeline_obj_id: &str) -> Result<(), CommandError> {
		info!(device = %self.device_id, time, obj = timeline_obj_id, context, command = ?command, "send");
		Ok(())
	}
}
