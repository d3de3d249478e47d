//! Modbus Simulation Service Library
//!
//! A simulated Modbus RTU slave. Sensor readings are encoded into a register map,
//! read requests are answered with genuine RTU frames, and every exchange lands in a
//! bounded TX/RX log. Nothing is sent over a wire.

pub mod config;
pub mod frame;
pub mod log;
pub mod registers;
pub mod server;
pub mod simulator;

pub use config::{DeviceConfig, ErrorConfig, ModbusConfig, RegisterConfig, TimingConfig};
pub use frame::{ExceptionCode, ReadRequest};
pub use log::{Direction, LogDocument, LogEntry, LogStatistics, ParsedFrame, TransactionLog};
pub use registers::{RegisterMap, RegisterSnapshot, SensorRegisters};
pub use server::{ModbusServer, ModbusStatus};
pub use simulator::{ModbusDevice, TimeoutReason, TransactionOutcome};
