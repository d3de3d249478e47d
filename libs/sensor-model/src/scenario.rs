//! Scenario catalogue
//!
//! A scenario selects how the generator perturbs values and which faults it
//! raises. The per-tick behavior lives in [`crate::generator`]; this module holds
//! the names, descriptions and tuning constants.

use std::fmt;
use std::str::FromStr;

use errors::{config_error, SimError};
use serde::{Deserialize, Serialize};

// Drift
pub const DRIFT_RATE: f64 = 0.1;

// Sine
pub const SINE_PERIOD_TICKS: f64 = 60.0;
pub const SINE_AMPLITUDE: f64 = 5.0;

// Fault injection
pub const INTERMITTENT_FAILURE_RATE: f64 = 0.2;
pub const TIMEOUT_SCENARIO_RATE: f64 = 0.3;
pub const CRC_SCENARIO_RATE: f64 = 0.15;
pub const PARTIAL_OFFLINE_PROBABILITY: f64 = 0.3;

// Daily cycle
pub const DAY_TEMPERATURE: f64 = 25.0;
pub const NIGHT_TEMPERATURE: f64 = 18.0;

// HVAC
pub const HVAC_SETPOINT: f64 = 22.0;
pub const HVAC_HYSTERESIS: f64 = 1.0;
pub const HVAC_RATE: f64 = 0.2;

// Door open
pub const DOOR_OPEN_PROBABILITY: f64 = 0.1;
pub const DOOR_OUTSIDE_TEMPERATURE: f64 = 35.0;
pub const DOOR_OPEN_TICKS: (u32, u32) = (5, 15);

// Power outage
pub const OUTAGE_PROBABILITY: f64 = 0.05;
pub const OUTAGE_TICKS: (u32, u32) = (10, 30);

// Sensor failure
pub const SENSOR_FAILURE_RATE: f64 = 0.01;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    #[default]
    Normal,
    DriftUp,
    DriftDown,
    Sine,
    Offline,
    Intermittent,
    Timeout,
    CrcError,
    PartialOffline,
    DailyCycle,
    HvacControl,
    DoorOpen,
    PowerOutage,
    SensorFailure,
}

impl Scenario {
    pub const ALL: [Scenario; 14] = [
        Scenario::Normal,
        Scenario::DriftUp,
        Scenario::DriftDown,
        Scenario::Sine,
        Scenario::Offline,
        Scenario::Intermittent,
        Scenario::Timeout,
        Scenario::CrcError,
        Scenario::PartialOffline,
        Scenario::DailyCycle,
        Scenario::HvacControl,
        Scenario::DoorOpen,
        Scenario::PowerOutage,
        Scenario::SensorFailure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scenario::Normal => "normal",
            Scenario::DriftUp => "drift_up",
            Scenario::DriftDown => "drift_down",
            Scenario::Sine => "sine",
            Scenario::Offline => "offline",
            Scenario::Intermittent => "intermittent",
            Scenario::Timeout => "timeout",
            Scenario::CrcError => "crc_error",
            Scenario::PartialOffline => "partial_offline",
            Scenario::DailyCycle => "daily_cycle",
            Scenario::HvacControl => "hvac_control",
            Scenario::DoorOpen => "door_open",
            Scenario::PowerOutage => "power_outage",
            Scenario::SensorFailure => "sensor_failure",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Scenario::Normal => "Values wander randomly around their base",
            Scenario::DriftUp => "Temperature rises steadily, humidity falls",
            Scenario::DriftDown => "Temperature falls steadily, humidity rises",
            Scenario::Sine => "Values follow a sine wave, humidity in antiphase",
            Scenario::Offline => "Every sensor is offline",
            Scenario::Intermittent => "Sensors drop out at random on individual ticks",
            Scenario::Timeout => "Device misses a share of requests",
            Scenario::CrcError => "Device corrupts the CRC of a share of responses",
            Scenario::PartialOffline => "A fixed random subset of sensors is offline",
            Scenario::DailyCycle => "Temperature follows the hour of day",
            Scenario::HvacControl => "Temperature cycles around an HVAC setpoint",
            Scenario::DoorOpen => "Doors open at random and let warm air in",
            Scenario::PowerOutage => "Occasional outages take every sensor offline",
            Scenario::SensorFailure => "Sensors fail permanently, going dark or reporting garbage",
        }
    }

    /// Scenarios that take sensors offline or inject protocol faults
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            Scenario::Offline
                | Scenario::Intermittent
                | Scenario::Timeout
                | Scenario::CrcError
                | Scenario::PartialOffline
                | Scenario::PowerOutage
                | Scenario::SensorFailure
        )
    }

    /// Listing used by the facade
    pub fn catalog() -> Vec<ScenarioInfo> {
        Self::ALL
            .iter()
            .map(|s| ScenarioInfo {
                name: s.as_str().to_string(),
                description: s.description().to_string(),
                fault: s.is_fault(),
            })
            .collect()
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scenario {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|scenario| scenario.as_str() == wanted)
            .ok_or_else(|| config_error!("scenario", "unknown scenario '{}'", s))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioInfo {
    pub name: String,
    pub description: String,
    pub fault: bool,
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_parse_every_name() {
        for scenario in Scenario::ALL {
            assert_eq!(scenario.as_str().parse::<Scenario>().unwrap(), scenario);
        }
        assert_eq!("Drift-Up".parse::<Scenario>().unwrap(), Scenario::DriftUp);
    }

    #[test]
    fn test_unknown_scenario_is_config_error() {
        let err = "earthquake".parse::<Scenario>().unwrap_err();
        assert!(matches!(err, SimError::ConfigValidation { .. }));
    }

    #[test]
    fn test_serde_matches_as_str() {
        for scenario in Scenario::ALL {
            let json = serde_json::to_string(&scenario).unwrap();
            assert_eq!(json, format!("\"{}\"", scenario.as_str()));
        }
    }

    #[test]
    fn test_catalog_lists_all() {
        let catalog = Scenario::catalog();
        assert_eq!(catalog.len(), Scenario::ALL.len());
        assert!(catalog.iter().any(|s| s.name == "hvac_control" && !s.fault));
    }
}
