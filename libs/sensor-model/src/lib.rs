//! Sensor Model Library
//!
//! Pure domain logic shared by the simulated subsystems: sensor and status types,
//! value ranges and alarm limits, the scenario catalogue, and the seeded generator
//! that advances every sensor by one tick.
//!
//! # Example
//!
//! ```
//! use sensor_model::{generator, GeneratorConfig, GeneratorState};
//! use chrono::Utc;
//!
//! let config = GeneratorConfig::default();
//! let state = GeneratorState::new(&config, 42);
//! let next = generator::tick(&config, &state, Utc::now());
//! assert_eq!(next.readings().len(), 10);
//! ```

pub mod config;
pub mod generator;
pub mod scenario;
pub mod status;
pub mod types;

pub use config::{
    GeneratorConfig, Limit, LimitsConfig, SensorOverride, ValueRange, ValuesConfig,
    MAX_SENSOR_COUNT,
};
pub use generator::{FaultBias, GeneratorState};
pub use scenario::{Scenario, ScenarioInfo};
pub use status::{combine, status_for, Band, Excursion};
pub use types::{
    CombinedStatus, FrameSample, FrameSink, OfflineReason, Quantity, QuantityStatus, SensorFrame,
    SensorId, SensorReading,
};

/// Round to one decimal place, the precision of every register and snapshot value
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Round to two decimal places, used for reported timings
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
