//! Current-value subsystem configuration

use std::collections::BTreeMap;
use std::path::PathBuf;

use errors::{config_error, SimResult};
use modbussrv::config::{
    validate_max_entries, DeviceConfig, ErrorConfig, RegisterConfig, TimingConfig,
    MIN_UPDATE_INTERVAL_MS,
};
use sensor_model::{
    GeneratorConfig, LimitsConfig, Scenario, SensorId, SensorOverride, ValuesConfig,
};
use serde::{Deserialize, Serialize};

pub const CURRENT_FILE: &str = "current.json";
pub const LOG_FILE: &str = "modbus_log.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorsConfig {
    #[serde(default = "default_count")]
    pub count: u16,
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
    #[serde(default = "default_slave_id")]
    pub modbus_slave_id: u8,
}

fn default_count() -> u16 {
    10
}

fn default_name_prefix() -> String {
    "Sensor".to_string()
}

fn default_slave_id() -> u8 {
    16
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            count: default_count(),
            name_prefix: default_name_prefix(),
            modbus_slave_id: default_slave_id(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_true")]
    pub write_files: bool,
    #[serde(default = "default_true")]
    pub generate_log: bool,
    #[serde(default = "default_log_max_entries")]
    pub log_max_entries: usize,
}

fn default_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_true() -> bool {
    true
}

fn default_log_max_entries() -> usize {
    1000
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            write_files: true,
            generate_log: true,
            log_max_entries: default_log_max_entries(),
        }
    }
}

impl OutputConfig {
    pub fn current_path(&self) -> PathBuf {
        self.dir.join(CURRENT_FILE)
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentConfig {
    #[serde(default = "default_poll_period_ms")]
    pub poll_period_ms: u64,
    #[serde(default)]
    pub scenario: Scenario,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub sensors: SensorsConfig,
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
    pub output: OutputConfig,
}

fn default_poll_period_ms() -> u64 {
    1000
}

fn default_seed() -> u64 {
    7
}

impl Default for CurrentConfig {
    fn default() -> Self {
        Self {
            poll_period_ms: default_poll_period_ms(),
            scenario: Scenario::default(),
            seed: default_seed(),
            sensors: SensorsConfig::default(),
            values: ValuesConfig::default(),
            limits: LimitsConfig::default(),
            overrides: BTreeMap::new(),
            registers: RegisterConfig::default(),
            errors: ErrorConfig::default(),
            timing: TimingConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl CurrentConfig {
    pub fn generator(&self) -> GeneratorConfig {
        GeneratorConfig {
            sensor_count: self.sensors.count,
            scenario: self.scenario,
            values: self.values,
            limits: self.limits,
            offline_sensors: self.errors.offline_sensors.clone(),
            overrides: self.overrides.clone(),
        }
    }

    /// The poller's own simulated slave
    pub fn device(&self) -> DeviceConfig {
        DeviceConfig {
            unit_id: self.sensors.modbus_slave_id,
            sensor_count: self.sensors.count,
            registers: self.registers,
            errors: self.errors.clone(),
            timing: self.timing,
            max_log_entries: self.output.log_max_entries,
        }
    }

    pub fn validate(&self) -> SimResult<()> {
        if self.poll_period_ms < MIN_UPDATE_INTERVAL_MS {
            return Err(config_error!(
                "poll_period_ms",
                "must be at least {}, got {}",
                MIN_UPDATE_INTERVAL_MS,
                self.poll_period_ms
            ));
        }
        if self.output.dir.as_os_str().is_empty() {
            return Err(config_error!("output.dir", "must not be empty"));
        }
        validate_max_entries("output.log_max_entries", self.output.log_max_entries)?;
        self.generator().validate()?;
        self.device().validate()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = CurrentConfig::default();
        config.validate().unwrap();
        assert_eq!(config.sensors.name_prefix, "Sensor");
        assert_eq!(config.output.current_path(), PathBuf::from("output/current.json"));
        assert_eq!(config.limits.temperature.max, 40.0);
        assert_eq!(config.limits.humidity.alarm_delta, 10.0);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: CurrentConfig = serde_yaml::from_str(
            "sensors:\n  count: 3\noutput:\n  write_files: false\n",
        )
        .unwrap();
        assert_eq!(config.sensors.count, 3);
        assert_eq!(config.sensors.modbus_slave_id, 16);
        assert!(!config.output.write_files);
        assert!(config.output.generate_log);
    }

    #[test]
    fn test_rejects_offline_sensor_outside_range() {
        let mut config = CurrentConfig::default();
        config.sensors.count = 2;
        config.errors.offline_sensors.insert(5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_log_capacity() {
        let mut config = CurrentConfig::default();
        config.output.log_max_entries = 0;
        assert!(config.validate().is_err());
    }
}
