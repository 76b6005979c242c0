//! Core state: devices, schedule, and the inbound command path.

pub mod device;
pub mod processor;
pub mod queue;
pub mod scheduler;

pub use device::{DeviceInstance, DeviceKind, DeviceRegistry};
pub use queue::{CommandQueue, InboundCommand};
pub use scheduler::{FailurePolicy, PollScheduler};
