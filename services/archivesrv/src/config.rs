//! Archive configuration

use errors::{config_error, SimResult};
use sensor_model::config::{validate_rate, validate_sensor_count};
use sensor_model::{LimitsConfig, Quantity};
use serde::{Deserialize, Serialize};

pub const MIN_RESOLUTION_MS: u64 = 1000;
pub const MAX_HISTORY_DAYS: u32 = 365;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_true")]
    pub include_events: bool,
    /// Chance per backfilled point of an injected excursion
    #[serde(default = "default_event_frequency")]
    pub event_frequency: f64,
}

fn default_true() -> bool {
    true
}

fn default_event_frequency() -> f64 {
    0.01
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            include_events: true,
            event_frequency: default_event_frequency(),
        }
    }
}

/// Daily-cycle model of one quantity
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfileQuantity {
    pub base: f64,
    pub variation: f64,
    pub daily_amplitude: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackfillProfile {
    #[serde(default = "default_temperature_profile")]
    pub temperature: ProfileQuantity,
    #[serde(default = "default_humidity_profile")]
    pub humidity: ProfileQuantity,
    /// Temperature offset between neighbouring sensors
    #[serde(default = "default_sensor_offset")]
    pub sensor_offset: f64,
}

fn default_temperature_profile() -> ProfileQuantity {
    ProfileQuantity {
        base: 22.0,
        variation: 3.0,
        daily_amplitude: 2.0,
    }
}

fn default_humidity_profile() -> ProfileQuantity {
    ProfileQuantity {
        base: 45.0,
        variation: 5.0,
        daily_amplitude: 10.0,
    }
}

fn default_sensor_offset() -> f64 {
    0.5
}

impl Default for BackfillProfile {
    fn default() -> Self {
        Self {
            temperature: default_temperature_profile(),
            humidity: default_humidity_profile(),
            sensor_offset: default_sensor_offset(),
        }
    }
}

impl BackfillProfile {
    pub fn quantity(&self, quantity: Quantity) -> &ProfileQuantity {
        match quantity {
            Quantity::Temperature => &self.temperature,
            Quantity::Humidity => &self.humidity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GapConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_gap_probability")]
    pub probability: f64,
    #[serde(default = "default_gap_minutes")]
    pub max_duration_minutes: u32,
}

fn default_gap_probability() -> f64 {
    0.05
}

fn default_gap_minutes() -> u32 {
    30
}

impl Default for GapConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            probability: default_gap_probability(),
            max_duration_minutes: default_gap_minutes(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackfillConfig {
    /// Backfill on construction
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_backfill_seed")]
    pub seed: u64,
    #[serde(default)]
    pub profile: BackfillProfile,
    #[serde(default)]
    pub gaps: GapConfig,
}

fn default_backfill_seed() -> u64 {
    2024
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            seed: default_backfill_seed(),
            profile: BackfillProfile::default(),
            gaps: GapConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveConfig {
    #[serde(default = "default_sensor_count")]
    pub sensor_count: u16,
    #[serde(default = "default_history_days")]
    pub history_days: u32,
    #[serde(default = "default_resolution_ms")]
    pub data_resolution_ms: u64,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub backfill: BackfillConfig,
}

fn default_sensor_count() -> u16 {
    10
}

fn default_history_days() -> u32 {
    30
}

fn default_resolution_ms() -> u64 {
    60_000
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            sensor_count: default_sensor_count(),
            history_days: default_history_days(),
            data_resolution_ms: default_resolution_ms(),
            limits: LimitsConfig::default(),
            events: EventsConfig::default(),
            backfill: BackfillConfig::default(),
        }
    }
}

impl ArchiveConfig {
    pub fn validate(&self) -> SimResult<()> {
        validate_sensor_count("sensor_count", self.sensor_count)?;
        if !(1..=MAX_HISTORY_DAYS).contains(&self.history_days) {
            return Err(config_error!(
                "history_days",
                "must be within 1..={}, got {}",
                MAX_HISTORY_DAYS,
                self.history_days
            ));
        }
        if self.data_resolution_ms < MIN_RESOLUTION_MS {
            return Err(config_error!(
                "data_resolution_ms",
                "must be at least {}, got {}",
                MIN_RESOLUTION_MS,
                self.data_resolution_ms
            ));
        }
        self.limits.validate("limits")?;
        validate_rate("events.event_frequency", self.events.event_frequency)?;

        let gaps = &self.backfill.gaps;
        validate_rate("backfill.gaps.probability", gaps.probability)?;
        if gaps.enabled && gaps.max_duration_minutes == 0 {
            return Err(config_error!(
                "backfill.gaps.max_duration_minutes",
                "must be positive when gaps are enabled"
            ));
        }
        for quantity in Quantity::ALL {
            let profile = self.backfill.profile.quantity(quantity);
            if !(profile.variation >= 0.0 && profile.daily_amplitude >= 0.0) {
                return Err(config_error!(
                    format!("backfill.profile.{}", quantity.as_str()),
                    "variation and daily_amplitude must not be negative"
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use errors::SimError;

    #[test]
    fn test_defaults() {
        let config = ArchiveConfig::default();
        config.validate().unwrap();
        assert_eq!(config.history_days, 30);
        assert_eq!(config.data_resolution_ms, 60_000);
        assert_eq!(config.backfill.profile.humidity.daily_amplitude, 10.0);
        assert!(!config.backfill.gaps.enabled);
    }

    #[test]
    fn test_empty_yaml() {
        let config: ArchiveConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, ArchiveConfig::default());
    }

    #[test]
    fn test_history_bounds() {
        for days in [0, 366] {
            let config = ArchiveConfig {
                history_days: days,
                ..Default::default()
            };
            assert!(matches!(
                config.validate(),
                Err(SimError::ConfigValidation { ref field, .. }) if field == "history_days"
            ));
        }
    }

    #[test]
    fn test_resolution_floor() {
        let config = ArchiveConfig {
            data_resolution_ms: 999,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_event_frequency_range() {
        let mut config = ArchiveConfig::default();
        config.events.event_frequency = -0.1;
        assert!(config.validate().is_err());
    }
}
