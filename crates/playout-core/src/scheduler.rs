//! `DoOnTime`: holds asynchronous jobs until their due time, then dispatches them.
//!
//! One loop task per scheduler polls the pending queues. Jobs that are due are taken out of
//! the pending map and dispatched according to the configured [`SendMode`]; failures and
//! lateness are reported on the device event stream and never reach the caller of `queue`.

mod config;
mod dispatch;

pub use config::{SchedulerConfig, SendMode};

use crate::error::{CommandError, SchedulerError};
use crate::events::{DeviceEvent, EventEmitter};
use crate::time::{Clock, Timestamp};
use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

pub type QueueId = String;
pub type EntryId = u64;

/// Queue used when the caller does not name one
pub const DEFAULT_QUEUE: &str = "_";

type Job = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), CommandError>> + Send>;

struct QueueEntry {
	id: EntryId,
	time: Timestamp,
	queue_id: QueueId,
	added_time: Timestamp,
	args: serde_json::Value,
	job: Job,
}

impl QueueEntry {
	fn into_ready(self, prepare_time: Timestamp) -> ReadyEntry {
		ReadyEntry {
			id: self.id,
			time: self.time,
			queue_id: self.queue_id,
			added_time: self.added_time,
			prepare_time,
			args: self.args,
			job: self.job,
		}
	}
}

/// An entry that was found due and is on its way to being executed
struct ReadyEntry {
	id: EntryId,
	time: Timestamp,
	queue_id: QueueId,
	added_time: Timestamp,
	prepare_time: Timestamp,
	args: serde_json::Value,
	job: Job,
}

/// Read-only view of a pending entry
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingEntry {
	pub id: EntryId,
	pub time: Timestamp,
	pub queue_id: QueueId,
	pub added_time: Timestamp,
	pub args: serde_json::Value,
}

#[derive(Default)]
struct QueueSet {
	queues: HashMap<QueueId, BTreeMap<EntryId, QueueEntry>>,
	next_id: EntryId,
	disposed: bool,
}

impl QueueSet {
	fn remove_where(&mut self, predicate: impl Fn(Timestamp) -> bool) -> usize {
		let mut removed = 0;
		for entries in self.queues.values_mut() {
			let before = entries.len();
			entries.retain(|_, entry| !predicate(entry.time));
			removed += before - entries.len();
		}
		self.queues.retain(|_, entries| !entries.is_empty());
		removed
	}
}

/// State shared between the scheduler handle, its loop and its queue workers
struct Shared {
	clock: Arc<dyn Clock>,
	config: SchedulerConfig,
	events: EventEmitter,
	pending: Mutex<QueueSet>,
	workers: Mutex<HashMap<QueueId, mpsc::UnboundedSender<ReadyEntry>>>,
	wake: Notify,
	cancel: CancellationToken,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
	/// Take every due entry out of the pending queues and dispatch it.
	/// Returns the time of the earliest entry still pending.
	fn check_queue(self: &Arc<Self>) -> Result<Option<Timestamp>, SchedulerError> {
		let now = self.clock.now();
		if now < 0 {
			error!(now, "clock returned an invalid time, stopping scheduler");
			self.events.error("DoOnTime", format!("Clock returned an invalid time: {now}"));
			self.cancel.cancel();
			return Err(SchedulerError::InvalidClock(now));
		}

		let mut due = Vec::new();
		let mut next_due: Option<Timestamp> = None;
		{
			let mut pending = lock(&self.pending);
			for entries in pending.queues.values_mut() {
				let due_ids: Vec<EntryId> = entries.iter().filter(|(_, entry)| entry.time <= now).map(|(&id, _)| id).collect();
				for id in due_ids {
					if let Some(entry) = entries.remove(&id) {
						due.push(entry.into_ready(now));
					}
				}
				if let Some(earliest) = entries.values().map(|entry| entry.time).min() {
					next_due = Some(next_due.map_or(earliest, |current| current.min(earliest)));
				}
			}
			pending.queues.retain(|_, entries| !entries.is_empty());
		}

		// Insertion order, so a prepare that was clamped past its take still goes first
		due.sort_by_key(|entry| entry.id);
		for entry in due {
			trace!(id = entry.id, time = entry.time, queue = %entry.queue_id, "dispatching command");
			self.dispatch(entry);
		}

		Ok(next_due)
	}

	fn next_wait(&self, next_due: Option<Timestamp>) -> Duration {
		let max = self.config.max_check_interval_ms;
		let wait_ms = next_due.map_or(max, |due| u64::try_from((due - self.clock.now()).max(1)).map_or(max, |delta| delta.min(max)));
		Duration::from_millis(wait_ms)
	}

	async fn run(self: Arc<Self>) {
		debug!(send_mode = ?self.config.send_mode, "scheduler loop started");

		loop {
			let wait = match self.check_queue() {
				Ok(next_due) => self.next_wait(next_due),
				Err(_) => break,
			};

			tokio::select! {
				() = tokio::time::sleep(wait) => {}
				() = self.wake.notified() => {}
				() = self.cancel.cancelled() => break,
			}
		}

		debug!("scheduler loop stopped");
	}
}

pub struct DoOnTime {
	shared: Arc<Shared>,
	task: Mutex<Option<JoinHandle<()>>>,
}

impl DoOnTime {
	/// Create a scheduler and start its loop. Must be called inside a tokio runtime.
	pub fn new(clock: Arc<dyn Clock>, config: SchedulerConfig, events: EventEmitter) -> Self {
		let shared = Arc::new(Shared {
			clock,
			config,
			events,
			pending: Mutex::new(QueueSet::default()),
			workers: Mutex::new(HashMap::new()),
			wake: Notify::new(),
			cancel: CancellationToken::new(),
		});

		let task = tokio::spawn(Arc::clone(&shared).run());

		Self {
			shared,
			task: Mutex::new(Some(task)),
		}
	}

	/// Hold `job` until `time`, then run it on `queue_id` (or [`DEFAULT_QUEUE`]).
	///
	/// `args` only travels into timing reports.
	pub fn queue<F, Fut>(&self, time: Timestamp, queue_id: Option<&str>, args: serde_json::Value, job: F) -> Result<EntryId, SchedulerError>
	where
		F: FnOnce() -> Fut + Send + 'static,
		Fut: Future<Output = Result<(), CommandError>> + Send + 'static,
	{
		if time < 0 {
			return Err(SchedulerError::InvalidTime(time));
		}

		let queue_id = queue_id.unwrap_or(DEFAULT_QUEUE).to_string();
		let added_time = self.shared.clock.now();
		let job: Job = Box::new(move || job().boxed());

		let id = {
			let mut pending = lock(&self.shared.pending);
			if pending.disposed {
				return Err(SchedulerError::Disposed);
			}
			pending.next_id += 1;
			let id = pending.next_id;
			pending.queues.entry(queue_id.clone()).or_default().insert(
				id,
				QueueEntry {
					id,
					time,
					queue_id: queue_id.clone(),
					added_time,
					args,
					job,
				},
			);
			id
		};

		trace!(id, time, queue = %queue_id, "queued command");
		self.shared.wake.notify_one();
		Ok(id)
	}

	/// Run one poll pass now. The loop does this on its own; callers driving a
	/// [`ManualClock`](crate::time::ManualClock) use it to step time deterministically.
	pub fn check_queue(&self) -> Result<Option<Timestamp>, SchedulerError> {
		self.shared.check_queue()
	}

	/// Remove pending entries due strictly after `time`
	pub fn clear_queue_after(&self, time: Timestamp) -> usize {
		let removed = lock(&self.shared.pending).remove_where(|entry_time| entry_time > time);
		if removed > 0 {
			debug!(time, removed, "cleared queue after");
		}
		removed
	}

	/// Remove pending entries due at or after `time`
	pub fn clear_queue_now_and_after(&self, time: Timestamp) -> usize {
		let removed = lock(&self.shared.pending).remove_where(|entry_time| entry_time >= time);
		if removed > 0 {
			debug!(time, removed, "cleared queue now and after");
		}
		removed
	}

	pub fn pending_count(&self) -> usize {
		lock(&self.shared.pending).queues.values().map(BTreeMap::len).sum()
	}

	/// Pending entries ordered by due time
	pub fn pending_entries(&self) -> Vec<PendingEntry> {
		let pending = lock(&self.shared.pending);
		let mut entries: Vec<PendingEntry> = pending
			.queues
			.values()
			.flat_map(BTreeMap::values)
			.map(|entry| PendingEntry {
				id: entry.id,
				time: entry.time,
				queue_id: entry.queue_id.clone(),
				added_time: entry.added_time,
				args: entry.args.clone(),
			})
			.collect();
		entries.sort_by_key(|entry| (entry.time, entry.id));
		entries
	}

	pub fn is_disposed(&self) -> bool {
		lock(&self.shared.pending).disposed
	}

	/// Drop everything pending and stop the loop. Terminal.
	pub fn dispose(&self) {
		{
			let mut pending = lock(&self.shared.pending);
			pending.disposed = true;
			pending.queues.clear();
		}
		lock(&self.shared.workers).clear();
		self.shared.cancel.cancel();

		if let Some(task) = lock(&self.task).take() {
			task.abort();
		}
		self.shared.events.emit(DeviceEvent::Debug("scheduler disposed".to_string()));
	}
}

impl Drop for DoOnTime {
	fn drop(&mut self) {
		self.shared.cancel.cancel();
	}
}

impl std::fmt::Debug for DoOnTime {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("DoOnTime")
			.field("send_mode", &self.shared.config.send_mode)
			.field("pending", &self.pending_count())
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::time::ManualClock;
	use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
	use tokio::time::timeout;

	fn scheduler(clock: &Arc<ManualClock>, send_mode: SendMode) -> (DoOnTime, EventEmitter) {
		let events = EventEmitter::default();
		let scheduler = DoOnTime::new(clock.clone(), SchedulerConfig::new(send_mode), events.clone());
		(scheduler, events)
	}

	fn record(scheduler: &DoOnTime, time: Timestamp, queue: Option<&str>, name: &'static str, tx: &UnboundedSender<&'static str>) {
		let tx = tx.clone();
		scheduler
			.queue(time, queue, serde_json::json!(name), move || async move {
				let _ = tx.send(name);
				Ok(())
			})
			.unwrap();
	}

	async fn next(rx: &mut UnboundedReceiver<&'static str>) -> &'static str {
		timeout(Duration::from_secs(1), rx.recv()).await.expect("command was not executed").unwrap()
	}

	async fn settle() {
		tokio::time::sleep(Duration::from_millis(50)).await;
	}

	#[tokio::test]
	async fn test_queue_rejects_negative_time() {
		let clock = Arc::new(ManualClock::new(0));
		let (scheduler, _) = scheduler(&clock, SendMode::Burst);

		let result = scheduler.queue(-1, None, serde_json::Value::Null, || async { Ok(()) });
		assert_eq!(result, Err(SchedulerError::InvalidTime(-1)));
		assert_eq!(scheduler.pending_count(), 0);
	}

	#[tokio::test]
	async fn test_entries_wait_for_their_time() {
		let clock = Arc::new(ManualClock::new(1000));
		let (scheduler, _) = scheduler(&clock, SendMode::Burst);
		let (tx, mut rx) = unbounded_channel();

		record(&scheduler, 14_090, None, "prepare", &tx);
		record(&scheduler, 15_100, None, "take", &tx);

		clock.set(14_500);
		assert_eq!(scheduler.check_queue(), Ok(Some(15_100)));
		assert_eq!(next(&mut rx).await, "prepare");
		settle().await;
		assert!(rx.try_recv().is_err());

		clock.set(15_500);
		scheduler.check_queue().unwrap();
		assert_eq!(next(&mut rx).await, "take");
		assert_eq!(scheduler.pending_count(), 0);
	}

	#[tokio::test]
	async fn test_due_entries_run_in_queue_order() {
		let clock = Arc::new(ManualClock::new(0));
		let (scheduler, _) = scheduler(&clock, SendMode::InOrder);
		let (tx, mut rx) = unbounded_channel();

		record(&scheduler, 15_200, None, "prepare", &tx);
		record(&scheduler, 15_100, None, "take", &tx);

		clock.set(16_000);
		scheduler.check_queue().unwrap();
		assert_eq!(next(&mut rx).await, "prepare");
		assert_eq!(next(&mut rx).await, "take");
	}

	#[tokio::test]
	async fn test_in_order_waits_for_previous_entry_to_settle() {
		let clock = Arc::new(ManualClock::new(0));
		let (scheduler, _) = scheduler(&clock, SendMode::InOrder);
		let (tx, mut rx) = unbounded_channel();

		let first_tx = tx.clone();
		scheduler
			.queue(100, Some("q"), serde_json::Value::Null, move || async move {
				let _ = first_tx.send("first");
				std::future::pending::<()>().await;
				Ok(())
			})
			.unwrap();
		record(&scheduler, 200, Some("q"), "second", &tx);

		clock.set(300);
		scheduler.check_queue().unwrap();

		assert_eq!(next(&mut rx).await, "first");
		settle().await;
		assert!(rx.try_recv().is_err(), "second entry must not start while the first is pending");
	}

	#[tokio::test]
	async fn test_burst_does_not_wait_for_previous_entry() {
		let clock = Arc::new(ManualClock::new(0));
		let (scheduler, _) = scheduler(&clock, SendMode::Burst);
		let (tx, mut rx) = unbounded_channel();

		let first_tx = tx.clone();
		scheduler
			.queue(100, Some("q"), serde_json::Value::Null, move || async move {
				let _ = first_tx.send("first");
				std::future::pending::<()>().await;
				Ok(())
			})
			.unwrap();
		record(&scheduler, 200, Some("q"), "second", &tx);

		clock.set(300);
		scheduler.check_queue().unwrap();

		let mut seen = vec![next(&mut rx).await, next(&mut rx).await];
		seen.sort_unstable();
		assert_eq!(seen, vec!["first", "second"]);
	}

	#[tokio::test]
	async fn test_in_order_queues_are_independent() {
		let clock = Arc::new(ManualClock::new(0));
		let (scheduler, _) = scheduler(&clock, SendMode::InOrder);
		let (tx, mut rx) = unbounded_channel();

		scheduler.queue(100, Some("blocked"), serde_json::Value::Null, || std::future::pending()).unwrap();
		record(&scheduler, 200, Some("free"), "free", &tx);

		clock.set(300);
		scheduler.check_queue().unwrap();
		assert_eq!(next(&mut rx).await, "free");
	}

	#[tokio::test]
	async fn test_failure_is_reported_and_queue_continues() {
		let clock = Arc::new(ManualClock::new(0));
		let (scheduler, events) = scheduler(&clock, SendMode::InOrder);
		let mut event_rx = events.subscribe();
		let (tx, mut rx) = unbounded_channel();

		scheduler
			.queue(100, None, serde_json::Value::Null, || async { Err(CommandError::Rejected("no such clip".into())) })
			.unwrap();
		record(&scheduler, 150, None, "after failure", &tx);

		clock.set(200);
		scheduler.check_queue().unwrap();
		assert_eq!(next(&mut rx).await, "after failure");

		let mut saw_error = false;
		while let Ok(Ok(event)) = timeout(Duration::from_millis(100), event_rx.recv()).await {
			if let DeviceEvent::Error { context, message } = event {
				assert_eq!(context, "DoOnTime");
				assert!(message.contains("no such clip"));
				saw_error = true;
			}
		}
		assert!(saw_error);
	}

	#[tokio::test]
	async fn test_panicking_job_is_isolated() {
		let clock = Arc::new(ManualClock::new(0));
		let (scheduler, _) = scheduler(&clock, SendMode::InOrder);
		let (tx, mut rx) = unbounded_channel();

		scheduler
			.queue(100, None, serde_json::Value::Null, || async {
				let missing: Option<()> = None;
				missing.expect("receiver bug");
				Ok(())
			})
			.unwrap();
		record(&scheduler, 150, None, "survivor", &tx);

		clock.set(200);
		scheduler.check_queue().unwrap();
		assert_eq!(next(&mut rx).await, "survivor");
	}

	#[tokio::test]
	async fn test_slow_sent_command_reported_once() {
		let clock = Arc::new(ManualClock::new(0));
		let (scheduler, events) = scheduler(&clock, SendMode::Burst);
		let mut event_rx = events.subscribe();
		let (tx, mut rx) = unbounded_channel();

		record(&scheduler, 100, None, "late", &tx);
		clock.set(300);
		scheduler.check_queue().unwrap();
		assert_eq!(next(&mut rx).await, "late");

		let mut slow_sent = Vec::new();
		let mut legacy = 0;
		loop {
			let event = timeout(Duration::from_secs(1), event_rx.recv()).await.unwrap().unwrap();
			match event {
				DeviceEvent::SlowSentCommand(info) => slow_sent.push(info),
				DeviceEvent::SlowCommand(_) => legacy += 1,
				DeviceEvent::CommandReport(report) => {
					assert!(report.succeeded);
					assert_eq!(report.fulfilled_delay, 200);
					break;
				}
				_ => {}
			}
		}

		assert_eq!(slow_sent.len(), 1);
		assert_eq!(legacy, 1);
		assert_eq!(slow_sent[0].send_delay, 200);
		assert_eq!(slow_sent[0].planned_send, 100);
		assert_eq!(slow_sent[0].send, 300);
		assert_eq!(slow_sent[0].args, serde_json::json!("late"));
	}

	#[tokio::test]
	async fn test_on_time_command_is_not_slow() {
		let clock = Arc::new(ManualClock::new(0));
		let (scheduler, events) = scheduler(&clock, SendMode::Burst);
		let mut event_rx = events.subscribe();
		let (tx, mut rx) = unbounded_channel();

		record(&scheduler, 100, None, "on time", &tx);
		clock.set(110);
		scheduler.check_queue().unwrap();
		assert_eq!(next(&mut rx).await, "on time");

		let event = timeout(Duration::from_secs(1), event_rx.recv()).await.unwrap().unwrap();
		match event {
			DeviceEvent::CommandReport(report) => {
				assert_eq!(report.timing.send_delay, 10);
				assert_eq!(report.timing.added_delay, -100);
				assert_eq!(report.timing.internal_delay, 110);
				assert_eq!(report.timing.prepare_time, 110);
				assert_eq!(report.timing.queue_id, DEFAULT_QUEUE);
			}
			other => panic!("unexpected event {other:?}"),
		}
	}

	#[tokio::test]
	async fn test_clear_queue_now_and_after_counts_removed() {
		let clock = Arc::new(ManualClock::new(0));
		let (scheduler, _) = scheduler(&clock, SendMode::Burst);
		let (tx, _rx) = unbounded_channel();

		for (time, queue) in [(100, "a"), (200, "a"), (200, "b"), (300, "b")] {
			record(&scheduler, time, Some(queue), "x", &tx);
		}

		assert_eq!(scheduler.clear_queue_now_and_after(200), 3);
		let remaining: Vec<_> = scheduler.pending_entries().into_iter().map(|entry| entry.time).collect();
		assert_eq!(remaining, vec![100]);
	}

	#[tokio::test]
	async fn test_clear_queue_after_is_strict() {
		let clock = Arc::new(ManualClock::new(0));
		let (scheduler, _) = scheduler(&clock, SendMode::Burst);
		let (tx, _rx) = unbounded_channel();

		for time in [100, 200, 300] {
			record(&scheduler, time, None, "x", &tx);
		}

		assert_eq!(scheduler.clear_queue_after(200), 1);
		let remaining: Vec<_> = scheduler.pending_entries().into_iter().map(|entry| entry.time).collect();
		assert_eq!(remaining, vec![100, 200]);
	}

	#[tokio::test]
	async fn test_dispose_is_terminal() {
		let clock = Arc::new(ManualClock::new(0));
		let (scheduler, _) = scheduler(&clock, SendMode::Burst);
		let (tx, _rx) = unbounded_channel();
		record(&scheduler, 100, None, "x", &tx);

		scheduler.dispose();

		assert!(scheduler.is_disposed());
		assert_eq!(scheduler.pending_count(), 0);
		assert_eq!(scheduler.queue(200, None, serde_json::Value::Null, || async { Ok(()) }), Err(SchedulerError::Disposed));
	}

	#[tokio::test]
	async fn test_invalid_clock_stops_scheduler() {
		let clock = Arc::new(ManualClock::new(0));
		let (scheduler, events) = scheduler(&clock, SendMode::Burst);
		let mut event_rx = events.subscribe();

		clock.set(-1);
		assert_eq!(scheduler.check_queue(), Err(SchedulerError::InvalidClock(-1)));

		let event = timeout(Duration::from_secs(1), event_rx.recv()).await.unwrap().unwrap();
		assert!(matches!(event, DeviceEvent::Error { .. }));
	}

	#[tokio::test]
	async fn test_loop_dispatches_without_manual_polling() {
		let clock = Arc::new(ManualClock::new(1000));
		let (scheduler, _) = scheduler(&clock, SendMode::Burst);
		let (tx, mut rx) = unbounded_channel();

		record(&scheduler, 500, None, "already due", &tx);
		assert_eq!(next(&mut rx).await, "already due");
	}
}
