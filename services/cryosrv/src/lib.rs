//! cryosrv — instrument cooling telemetry and control
//!
//! Periodically polls serial-attached cooling hardware (vacuum gauges,
//! cryocooler controllers, temperature instruments) over TCP-to-serial
//! bridges, translates each family's ASCII protocol into numeric fields,
//! and publishes the results to a message bus and a time-series store.
//! Remote peers steer the daemon over the same bus: enable or disable a
//! device, move it to a new host/port, issue a device-family command, or
//! request an advertisement of the configured registry.
//!
//! Two concurrency domains exist. The main loop owns the device registry
//! and the poll scheduler; the bus event loop owns the subscriptions. The
//! only state they share is the inbound command queue.

pub mod bus;
pub mod compat;
pub mod config;
pub mod core;
pub mod error;
pub mod protocols;
pub mod publisher;
pub mod runtime;
pub mod storage;
pub mod transport;

pub use error::{CryoSrvError, Result};
