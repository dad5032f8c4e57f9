//! Device integrations for playout-core.
//!
//! Each module supplies the options, state vocabulary, diff and command routing for one
//! family of hardware; `playout_core::DeviceInstance` does the rest.

pub mod graphics;
pub mod lighting;
pub mod video_server;

pub use graphics::{Graphics, GraphicsCommand, GraphicsOptions};
pub use lighting::{Lighting, LightingCommand, LightingOptions};
pub use video_server::{VideoCommand, VideoServer, VideoServerOptions};

/// `Mapping::device` values handled by this crate
pub const DEVICE_TYPES: [&str; 3] = [video_server::DEVICE_TYPE, graphics::DEVICE_TYPE, lighting::DEVICE_TYPE];
