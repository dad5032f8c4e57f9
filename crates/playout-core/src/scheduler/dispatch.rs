use super::{lock, ReadyEntry, SendMode, Shared};
use crate::error::CommandError;
use crate::events::{DeviceEvent, TimingInfo, TimingReport};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

impl Shared {
	pub(super) fn dispatch(self: &Arc<Self>, entry: ReadyEntry) {
		match self.config.send_mode {
			SendMode::Burst => {
				let shared = Arc::clone(self);
				tokio::spawn(async move { shared.execute(entry).await });
			}
			SendMode::InOrder => self.hand_to_worker(entry),
		}
	}

	/// Each queue gets one worker task that executes its entries strictly one after another
	fn hand_to_worker(self: &Arc<Self>, entry: ReadyEntry) {
		let mut workers = lock(&self.workers);
		let sender = workers.entry(entry.queue_id.clone()).or_insert_with(|| self.spawn_worker(&entry.queue_id));

		if let Err(mpsc::error::SendError(entry)) = sender.send(entry) {
			debug!(id = entry.id, queue = %entry.queue_id, "queue worker stopped, dropping command");
		}
	}

	fn spawn_worker(self: &Arc<Self>, queue_id: &str) -> mpsc::UnboundedSender<ReadyEntry> {
		let (tx, mut rx) = mpsc::unbounded_channel::<ReadyEntry>();
		let shared = Arc::clone(self);
		let queue_id = queue_id.to_string();

		tokio::spawn(async move {
			debug!(queue = %queue_id, "queue worker started");
			loop {
				tokio::select! {
					() = shared.cancel.cancelled() => break,
					next = rx.recv() => match next {
						Some(entry) => shared.execute(entry).await,
						None => break,
					},
				}
			}
			debug!(queue = %queue_id, "queue worker stopped");
		});

		tx
	}

	/// Run one job and report its timing. Never propagates the job's failure.
	async fn execute(&self, entry: ReadyEntry) {
		let send = self.clock.now();
		let timing = TimingInfo {
			added: entry.added_time,
			prepare_time: entry.prepare_time,
			planned_send: entry.time,
			send,
			queue_id: entry.queue_id,
			send_delay: send - entry.time,
			added_delay: entry.added_time - entry.time,
			internal_delay: send - entry.added_time,
			args: entry.args,
		};

		if timing.send_delay > self.config.limit_slow_sent_command_ms {
			warn!(id = entry.id, send_delay = timing.send_delay, queue = %timing.queue_id, "slow sent command");
			self.events.emit(DeviceEvent::SlowCommand(format!(
				"Slow sent command, should have been sent at {}, was {} ms slow (was added {} ms before, negative means after). Queue: {}, send mode: {:?}",
				timing.planned_send, timing.send_delay, -timing.added_delay, timing.queue_id, self.config.send_mode
			)));
			self.events.emit(DeviceEvent::SlowSentCommand(timing.clone()));
		}

		let result = match AssertUnwindSafe((entry.job)()).catch_unwind().await {
			Ok(result) => result,
			Err(_) => Err(CommandError::Transport("command job panicked".to_string())),
		};

		let fulfilled = self.clock.now();
		if let Err(e) = &result {
			error!(id = entry.id, queue = %timing.queue_id, error = %e, "command failed");
			self.events.error("DoOnTime", e.to_string());
		}

		let report = TimingReport {
			fulfilled,
			fulfilled_delay: fulfilled - timing.planned_send,
			succeeded: result.is_ok(),
			timing,
		};

		if report.fulfilled_delay > self.config.limit_slow_fulfilled_command_ms {
			warn!(id = entry.id, fulfilled_delay = report.fulfilled_delay, "slow fulfilled command");
			self.events.emit(DeviceEvent::SlowFulfilledCommand(report.clone()));
		}

		if self.events.has_listeners() {
			self.events.emit(DeviceEvent::CommandReport(report));
		}
	}
}
