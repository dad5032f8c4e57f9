use super::CommandReceiver;
use crate::error::CommandError;
use crate::time::Timestamp;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
	#[serde(default = "default_max_attempts")]
	pub max_attempts: u32,
	#[serde(default = "default_backoff_ms")]
	pub backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
	4
}

fn default_backoff_ms() -> u64 {
	250
}

impl Default for RetryConfig {
	fn default() -> Self {
		Self {
			max_attempts: default_max_attempts(),
			backoff_ms: default_backoff_ms(),
		}
	}
}

impl RetryConfig {
	pub fn new(max_attempts: u32, backoff: Duration) -> Self {
		Self {
			max_attempts: max_attempts.max(1),
			backoff_ms: u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
		}
	}

	pub fn backoff(&self) -> Duration {
		Duration::from_millis(self.backoff_ms)
	}
}

/// Retries transient failures (objects the device has not caught up with yet) with a fixed
/// backoff. Any other failure, or running out of attempts, is returned to the scheduler.
#[derive(Debug)]
pub struct RetryingReceiver<R> {
	inner: R,
	config: RetryConfig,
}

impl<R> RetryingReceiver<R> {
	pub fn new(inner: R, config: RetryConfig) -> Self {
		Self { inner, config }
	}

	pub fn inner(&self) -> &R {
		&self.inner
	}
}

#[async_trait]
impl<C, R> CommandReceiver<C> for RetryingReceiver<R>
where
	C: Send + Sync + 'static,
	R: CommandReceiver<C>,
{
	async fn connect(&self) -> Result<(), CommandError> {
		self.inner.connect().await
	}

	async fn send(&self, time: Timestamp, command: &C, context: &str, timeline_obj_id: &str) -> Result<(), CommandError> {
		let mut attempt = 1;
		loop {
			match self.inner.send(time, command, context, timeline_obj_id).await {
				Ok(()) => return Ok(()),
				Err(e) if e.is_transient() && attempt < self.config.max_attempts => {
					debug!(attempt, obj = timeline_obj_id, error = %e, "transient command failure, retrying");
					tokio::time::sleep(self.config.backoff()).await;
					attempt += 1;
				}
				Err(e) if e.is_transient() => {
					warn!(attempts = attempt, obj = timeline_obj_id, error = %e, "giving up on command");
					return Err(CommandError::RetryExhausted {
						attempts: attempt,
						last: Box::new(e),
					});
				}
				Err(e) => return Err(e),
			}
		}
	}

	async fn disconnect(&self) -> Result<(), CommandError> {
		self.inner.disconnect().await
	}
}
