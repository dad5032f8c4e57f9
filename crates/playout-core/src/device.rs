//! Device lifecycle: the contract the owning conductor drives, and the generic shell that
//! composes history, diff and scheduler for one integration.

mod instance;
mod integration;
mod lifecycle;
mod status;

pub use instance::{DeviceInstance, DeviceSettings};
pub use integration::{Conversion, DeviceIntegration};
pub use lifecycle::{DeviceLifecycle, LifecycleTransition};
pub use status::{DeviceStatus, StatusCode};

use crate::error::Result;
use crate::events::DeviceEvent;
use crate::time::Timestamp;
use crate::timeline::{Mappings, TimelineState};
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Control surface of one connected piece of hardware.
///
/// Control operations return their outcome directly; everything observational goes out on
/// the event stream from [`Device::subscribe`].
#[async_trait]
pub trait Device: Send + Sync {
	fn device_id(&self) -> &str;

	fn device_type(&self) -> &'static str;

	/// Validate options and open the connection. Returns whether the device connected;
	/// invalid options are an error.
	async fn init(&self, options: serde_json::Value, active_session_id: Option<String>) -> Result<bool>;

	/// Cancel commands at or after `time` and forget states from `time` on
	async fn prepare_for_handle_state(&self, time: Timestamp) -> Result<()>;

	async fn handle_state(&self, state: &TimelineState, mappings: &Mappings) -> Result<()>;

	/// Cancel commands strictly after `time`. History is left alone.
	fn clear_future(&self, time: Timestamp) -> Result<()>;

	async fn make_ready(&self, destructive: bool, session_id: Option<String>) -> Result<()>;

	async fn stand_down(&self, destructive: bool) -> Result<()>;

	fn status(&self) -> DeviceStatus;

	/// Release the scheduler and the connection. Calling it again is a no-op.
	async fn terminate(&self) -> Result<()>;

	fn subscribe(&self) -> broadcast::Receiver<DeviceEvent>;
}
