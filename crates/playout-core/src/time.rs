use std::fmt::Debug;
use std::sync::atomic::{AtomicI64, Ordering};

/// Milliseconds since the Unix epoch
pub type Timestamp = i64;

/// Source of "now" for history cleanup and the scheduler loop
pub trait Clock: Debug + Send + Sync + 'static {
	fn now(&self) -> Timestamp;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now(&self) -> Timestamp {
		chrono::Utc::now().timestamp_millis()
	}
}

/// Clock that only moves when told to. Used by tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
	now: AtomicI64,
}

impl ManualClock {
	pub fn new(start: Timestamp) -> Self {
		Self { now: AtomicI64::new(start) }
	}

	pub fn set(&self, time: Timestamp) {
		self.now.store(time, Ordering::SeqCst);
	}

	pub fn advance(&self, delta: Timestamp) -> Timestamp {
		self.now.fetch_add(delta, Ordering::SeqCst) + delta
	}
}

impl Clock for ManualClock {
	fn now(&self) -> Timestamp {
		self.now.load(Ordering::SeqCst)
	}
}
