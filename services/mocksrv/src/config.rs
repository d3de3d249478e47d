//! Stack configuration
//!
//! One YAML document with a section per subsystem. Environment variables prefixed
//! `MOCKSRV_` override nested keys with `__` as separator, for example
//! `MOCKSRV_ARCHIVE__HISTORY_DAYS=7`.

use std::fs;
use std::path::{Path, PathBuf};

use archivesrv::ArchiveConfig;
use currentsrv::CurrentConfig;
use errors::SimResult;
use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use modbussrv::ModbusConfig;
use serde::{Deserialize, Serialize};
use tracing::info;

pub const ENV_PREFIX: &str = "MOCKSRV_";
pub const DEFAULT_CONFIG_PATH: &str = "config/mocksrv.yaml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    /// Rolling log files go here; console only when unset
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub enable_json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            dir: None,
            enable_json: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackConfig {
    #[serde(default)]
    pub current: CurrentConfig,
    #[serde(default)]
    pub modbus: ModbusConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl StackConfig {
    /// Load `path` merged with `MOCKSRV_` environment overrides
    ///
    /// A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> SimResult<Self> {
        let config: StackConfig = Figment::new()
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    pub fn validate(&self) -> SimResult<()> {
        self.current.validate()?;
        self.modbus.validate()?;
        self.archive.validate()
    }

    /// Write as YAML, keeping the previous file as `*.yaml.bak`
    pub fn save(&self, path: impl AsRef<Path>) -> SimResult<()> {
        let path = path.as_ref();
        if path.exists() {
            fs::copy(path, path.with_extension("yaml.bak"))?;
        } else if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_yaml::to_string(self)?)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use errors::SimError;
    use sensor_model::Scenario;

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = StackConfig::load(dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config.current, CurrentConfig::default());
        assert_eq!(config.modbus, ModbusConfig::default());
        config.validate().unwrap();
    }

    #[test]
    fn test_yaml_sections_and_env_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mocksrv.yaml");
        fs::write(
            &path,
            "current:\n  scenario: drift_up\n  sensors:\n    count: 3\nmodbus:\n  unit_id: 7\narchive:\n  history_days: 5\n",
        )
        .unwrap();
        std::env::set_var("MOCKSRV_ARCHIVE__DATA_RESOLUTION_MS", "5000");

        let config = StackConfig::load(&path).unwrap();
        assert_eq!(config.current.scenario, Scenario::DriftUp);
        assert_eq!(config.current.sensors.count, 3);
        assert_eq!(config.current.poll_period_ms, 1000);
        assert_eq!(config.modbus.unit_id, 7);
        assert_eq!(config.archive.history_days, 5);
        assert_eq!(config.archive.data_resolution_ms, 5000);
        std::env::remove_var("MOCKSRV_ARCHIVE__DATA_RESOLUTION_MS");
    }

    #[test]
    fn test_invalid_section_fails_validation() {
        let mut config = StackConfig::default();
        config.modbus.errors.timeout_rate = 2.0;
        assert!(matches!(
            config.validate(),
            Err(SimError::ConfigValidation { .. })
        ));
    }

    #[test]
    fn test_save_round_trips_and_backs_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("mocksrv.yaml");
        let mut config = StackConfig::default();
        config.archive.history_days = 9;
        config.save(&path).unwrap();
        config.save(&path).unwrap();

        assert!(path.with_extension("yaml.bak").exists());
        let loaded = StackConfig::load(&path).unwrap();
        assert_eq!(loaded.archive.history_days, 9);
    }
}
