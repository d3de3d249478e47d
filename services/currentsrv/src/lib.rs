//! Current-value subsystem
//!
//! Polls a simulated Modbus slave once per period and persists the result as
//! `current.json`, plus the poller's own `modbus_log.json`.

pub mod config;
pub mod service;
pub mod snapshot;

pub use config::{CurrentConfig, OutputConfig, SensorsConfig};
pub use service::{CurrentService, CurrentStatus};
pub use snapshot::{CurrentSnapshot, ModbusStatus, PollStatistics, QuantitySnapshot, SensorSnapshot};
