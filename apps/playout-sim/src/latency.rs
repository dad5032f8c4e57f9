use async_trait::async_trait;
use playout_core::{CommandError, CommandReceiver, Timestamp};
use std::time::Duration;

/// Holds every send for a fixed time before handing it to `inner`, so the slow-command
/// reporting can be watched without real hardware
#[derive(Debug)]
pub struct Latency<R> {
	inner: R,
	delay: Duration,
}

impl<R> Latency<R> {
	pub const fn new(inner: R, delay: Duration) -> Self {
		Self { inner, delay }
	}
}

#[async_trait]
impl<C, R> CommandReceiver<C> for Latency<R>
where
	C: Send + Sync + 'static,
	R: CommandReceiver<C>,
{
	async fn connect(&self) -> Result<(), CommandError> {
		self.inner.connect().await
	}

	async fn send(&self, time: Timestamp, command: &C, context: &str, timeline_obj_id: &str) -> Result<(), CommandError> {
		if !self.delay.is_zero() {
			tokio::time::sleep(self.delay).await;
		}
		self.inner.send(time, command, context, timeline_obj_id).await
	}

	async fn disconnect(&self) -> Result<(), CommandError> {
		self.inner.disconnect().await
	}
}
