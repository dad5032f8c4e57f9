pub mod device;
pub mod diff;
pub mod error;
pub mod events;
pub mod history;
pub mod receiver;
pub mod scheduler;
pub mod time;
pub mod timeline;

pub use device::{Device, DeviceInstance, DeviceIntegration, DeviceLifecycle, DeviceSettings, DeviceStatus, StatusCode};
pub use diff::{Command, CommandPhase, DiffOutcome, LayerState, PrepareWindow};
pub use error::{CommandError, DeviceError, HistoryError, Result, SchedulerError};
pub use events::{DeviceEvent, EventEmitter, TimingInfo, TimingReport};
pub use history::{HistoryConfig, HistoryEntry, StateHistory};
pub use receiver::{CommandReceiver, RetryConfig, RetryingReceiver, TracingReceiver};
pub use scheduler::{DoOnTime, SchedulerConfig, SendMode};
pub use time::{Clock, ManualClock, SystemClock, Timestamp};
pub use timeline::{Mapping, Mappings, ResolvedObject, TimelineState};
