//! Modbus subsystem configuration
//!
//! The device-level sections ([`RegisterConfig`], [`ErrorConfig`], [`TimingConfig`])
//! are shared with the current-value subsystem, which polls its own simulated slave.

use std::collections::{BTreeMap, BTreeSet};

use errors::{config_error, SimResult};
use sensor_model::config::{validate_rate, validate_sensor_count, validate_sensor_set};
use sensor_model::{GeneratorConfig, LimitsConfig, Scenario, SensorId, SensorOverride, ValuesConfig};
use serde::{Deserialize, Serialize};

use crate::registers::RegisterMap;

/// Lower bound on the generation interval
pub const MIN_UPDATE_INTERVAL_MS: u64 = 100;

// ============================================================================
// Device sections
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterConfig {
    #[serde(default = "default_value_base")]
    pub value_base: u16,
    #[serde(default = "default_status_base")]
    pub status_base: u16,
}

fn default_value_base() -> u16 {
    30000
}

fn default_status_base() -> u16 {
    40000
}

impl Default for RegisterConfig {
    fn default() -> Self {
        Self {
            value_base: default_value_base(),
            status_base: default_status_base(),
        }
    }
}

/// Fault injection rates and the configured offline set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorConfig {
    #[serde(default)]
    pub error_rate: f64,
    #[serde(default)]
    pub timeout_rate: f64,
    #[serde(default)]
    pub crc_error_rate: f64,
    #[serde(default)]
    pub offline_sensors: BTreeSet<SensorId>,
}

impl ErrorConfig {
    pub fn validate(&self, sensor_count: u16) -> SimResult<()> {
        validate_rate("errors.error_rate", self.error_rate)?;
        validate_rate("errors.timeout_rate", self.timeout_rate)?;
        validate_rate("errors.crc_error_rate", self.crc_error_rate)?;
        validate_sensor_set("errors.offline_sensors", &self.offline_sensors, sensor_count)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_response_min_ms")]
    pub response_min_ms: u64,
    #[serde(default = "default_response_max_ms")]
    pub response_max_ms: u64,
    /// Window a master waits before declaring a timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Requests per second the device answers without slowing down
    #[serde(default = "default_load_threshold")]
    pub load_threshold: u32,
    #[serde(default = "default_load_penalty_ms")]
    pub load_penalty_ms: u64,
}

fn default_response_min_ms() -> u64 {
    5
}

fn default_response_max_ms() -> u64 {
    30
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_load_threshold() -> u32 {
    20
}

fn default_load_penalty_ms() -> u64 {
    2
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            response_min_ms: default_response_min_ms(),
            response_max_ms: default_response_max_ms(),
            timeout_ms: default_timeout_ms(),
            load_threshold: default_load_threshold(),
            load_penalty_ms: default_load_penalty_ms(),
        }
    }
}

impl TimingConfig {
    pub fn validate(&self) -> SimResult<()> {
        if self.response_min_ms > self.response_max_ms {
            return Err(config_error!(
                "timing.response_min_ms",
                "must not exceed response_max_ms ({} > {})",
                self.response_min_ms,
                self.response_max_ms
            ));
        }
        if self.timeout_ms == 0 {
            return Err(config_error!("timing.timeout_ms", "must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

pub(crate) fn default_max_entries() -> usize {
    1000
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
        }
    }
}

/// Validate a log capacity
pub fn validate_max_entries(field: &str, max_entries: usize) -> SimResult<()> {
    if max_entries == 0 {
        return Err(config_error!(field, "must be at least 1"));
    }
    Ok(())
}

/// Everything the transaction simulator needs, assembled from a subsystem record
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    pub unit_id: u8,
    pub sensor_count: u16,
    pub registers: RegisterConfig,
    pub errors: ErrorConfig,
    pub timing: TimingConfig,
    pub max_log_entries: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        ModbusConfig::default().device()
    }
}

impl DeviceConfig {
    pub fn register_map(&self) -> SimResult<RegisterMap> {
        RegisterMap::new(&self.registers, self.sensor_count)
    }

    pub fn validate(&self) -> SimResult<()> {
        validate_sensor_count("sensor_count", self.sensor_count)?;
        self.register_map()?;
        self.errors.validate(self.sensor_count)?;
        self.timing.validate()?;
        validate_max_entries("log.max_entries", self.max_log_entries)
    }
}

// ============================================================================
// Subsystem record
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModbusConfig {
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
    #[serde(default = "default_sensor_count")]
    pub sensor_count: u16,
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,
    #[serde(default)]
    pub scenario: Scenario,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub values: ValuesConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub overrides: BTreeMap<SensorId, SensorOverride>,
    #[serde(default)]
    pub registers: RegisterConfig,
    #[serde(default)]
    pub errors: ErrorConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub log: LogSettings,
}

pub(crate) fn default_unit_id() -> u8 {
    16
}

pub(crate) fn default_sensor_count() -> u16 {
    10
}

fn default_update_interval_ms() -> u64 {
    1000
}

pub(crate) fn default_seed() -> u64 {
    42
}

impl Default for ModbusConfig {
    fn default() -> Self {
        Self {
            unit_id: default_unit_id(),
            sensor_count: default_sensor_count(),
            update_interval_ms: default_update_interval_ms(),
            scenario: Scenario::default(),
            seed: default_seed(),
            values: ValuesConfig::default(),
            limits: LimitsConfig::default(),
            overrides: BTreeMap::new(),
            registers: RegisterConfig::default(),
            errors: ErrorConfig::default(),
            timing: TimingConfig::default(),
            log: LogSettings::default(),
        }
    }
}

impl ModbusConfig {
    pub fn generator(&self) -> GeneratorConfig {
        GeneratorConfig {
            sensor_count: self.sensor_count,
            scenario: self.scenario,
            values: self.values,
            limits: self.limits,
            offline_sensors: self.errors.offline_sensors.clone(),
            overrides: self.overrides.clone(),
        }
    }

    pub fn device(&self) -> DeviceConfig {
        DeviceConfig {
            unit_id: self.unit_id,
            sensor_count: self.sensor_count,
            registers: self.registers,
            errors: self.errors.clone(),
            timing: self.timing,
            max_log_entries: self.log.max_entries,
        }
    }

    pub fn validate(&self) -> SimResult<()> {
        if self.update_interval_ms < MIN_UPDATE_INTERVAL_MS {
            return Err(config_error!(
                "update_interval_ms",
                "must be at least {}, got {}",
                MIN_UPDATE_INTERVAL_MS,
                self.update_interval_ms
            ));
        }
        self.generator().validate()?;
        self.device().validate()
    }
}
