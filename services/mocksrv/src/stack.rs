//! The stack facade
//!
//! Owns one instance of each subsystem. Each keeps its own lifecycle, so one can
//! be stopped or fail without touching the others. Completed current-value polls
//! are forwarded to the archive.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use archivesrv::{ArchiveService, ArchiveStatus};
use common::SharedClock;
use currentsrv::{CurrentService, CurrentStatus};
use errors::{SimError, SimResult};
use modbussrv::{ModbusServer, ModbusStatus};
use parking_lot::RwLock;
use sensor_model::{Scenario, ScenarioInfo};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{LoggingConfig, StackConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subsystem {
    Current,
    Modbus,
    Archive,
}

impl Subsystem {
    pub const ALL: [Subsystem; 3] = [Subsystem::Current, Subsystem::Modbus, Subsystem::Archive];

    pub fn as_str(&self) -> &'static str {
        match self {
            Subsystem::Current => "current",
            Subsystem::Modbus => "modbus",
            Subsystem::Archive => "archive",
        }
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Subsystem {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|sub| sub.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| SimError::not_found(format!("subsystem '{}'", s)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackStatus {
    pub current: CurrentStatus,
    pub modbus: ModbusStatus,
    pub archive: ArchiveStatus,
}

pub struct MockStack {
    current: Arc<CurrentService>,
    modbus: Arc<ModbusServer>,
    archive: Arc<ArchiveService>,
    logging: RwLock<LoggingConfig>,
}

impl MockStack {
    pub fn new(config: StackConfig, clock: SharedClock) -> SimResult<Self> {
        let archive = Arc::new(ArchiveService::new(config.archive, clock.clone())?);
        let modbus = Arc::new(ModbusServer::new(config.modbus, clock.clone())?);
        let current = Arc::new(CurrentService::new(config.current, clock)?);
        current.subscribe(archive.clone());
        Ok(Self {
            current,
            modbus,
            archive,
            logging: RwLock::new(config.logging),
        })
    }

    pub fn current(&self) -> &Arc<CurrentService> {
        &self.current
    }

    pub fn modbus(&self) -> &Arc<ModbusServer> {
        &self.modbus
    }

    pub fn archive(&self) -> &Arc<ArchiveService> {
        &self.archive
    }

    /// Start one subsystem; `false` when it was already running
    pub fn start(&self, subsystem: Subsystem) -> bool {
        match subsystem {
            Subsystem::Current => self.current.start(),
            Subsystem::Modbus => self.modbus.start(),
            Subsystem::Archive => self.archive.start(),
        }
    }

    /// Stop one subsystem; `false` when it was not running
    pub async fn stop(&self, subsystem: Subsystem) -> bool {
        match subsystem {
            Subsystem::Current => self.current.stop().await,
            Subsystem::Modbus => self.modbus.stop().await,
            Subsystem::Archive => self.archive.stop().await,
        }
    }

    pub fn is_running(&self, subsystem: Subsystem) -> bool {
        match subsystem {
            Subsystem::Current => self.current.is_running(),
            Subsystem::Modbus => self.modbus.is_running(),
            Subsystem::Archive => self.archive.is_running(),
        }
    }

    /// The archive starts first so it records the first poll
    pub fn start_all(&self) {
        for subsystem in [Subsystem::Archive, Subsystem::Modbus, Subsystem::Current] {
            self.start(subsystem);
        }
        info!("All subsystems started");
    }

    pub async fn stop_all(&self) {
        for subsystem in [Subsystem::Current, Subsystem::Modbus, Subsystem::Archive] {
            self.stop(subsystem).await;
        }
        info!("All subsystems stopped");
    }

    pub fn set_scenario_all(&self, scenario: Scenario) {
        self.current.set_scenario(scenario);
        self.modbus.set_scenario(scenario);
    }

    pub fn scenarios(&self) -> Vec<ScenarioInfo> {
        Scenario::catalog()
    }

    /// Empty both transaction logs
    pub fn clear_logs(&self) {
        self.current.clear_log();
        self.modbus.clear_log();
    }

    pub fn status(&self) -> StackStatus {
        StackStatus {
            current: self.current.status(),
            modbus: self.modbus.status(),
            archive: self.archive.status(),
        }
    }

    /// The live configuration of every subsystem
    pub fn config(&self) -> StackConfig {
        StackConfig {
            current: self.current.config(),
            modbus: self.modbus.config(),
            archive: self.archive.config(),
            logging: self.logging.read().clone(),
        }
    }

    pub fn save_config(&self, path: impl AsRef<Path>) -> SimResult<()> {
        self.config().save(path)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use common::ManualClock;
    use tracing_test::traced_test;

    fn stack() -> MockStack {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StackConfig::default();
        config.current.output.dir = dir.path().to_path_buf();
        config.current.output.write_files = false;
        MockStack::new(config, ManualClock::from_millis(1_700_000_000_000).shared()).unwrap()
    }

    #[test]
    fn test_subsystem_names() {
        assert_eq!("Archive".parse::<Subsystem>().unwrap(), Subsystem::Archive);
        assert!("billing".parse::<Subsystem>().is_err());
    }

    #[test]
    fn test_scenario_listing() {
        let listing = stack().scenarios();
        assert_eq!(listing.len(), 14);
        assert!(listing.iter().any(|s| s.name == "power_outage"));
    }

    #[test]
    fn test_set_scenario_all() {
        let stack = stack();
        stack.set_scenario_all(Scenario::Offline);
        assert_eq!(stack.current().config().scenario, Scenario::Offline);
        assert_eq!(stack.modbus().config().scenario, Scenario::Offline);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_start_stop_each_subsystem() {
        let stack = stack();
        stack.start_all();
        for subsystem in Subsystem::ALL {
            assert!(stack.is_running(subsystem));
        }
        assert!(stack.stop(Subsystem::Modbus).await);
        assert!(!stack.status().modbus.running);
        assert!(stack.status().current.running);
        stack.stop_all().await;
        assert!(!stack.is_running(Subsystem::Archive));
        assert!(logs_contain("All subsystems started"));
    }
}
