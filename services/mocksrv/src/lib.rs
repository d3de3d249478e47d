//! Mock sensor stack
//!
//! Wires the current-value poller, the Modbus slave and the archive into one
//! [`MockStack`] driven by a single YAML configuration.

pub mod config;
pub mod stack;

pub use config::{LoggingConfig, StackConfig};
pub use stack::{MockStack, StackStatus, Subsystem};
