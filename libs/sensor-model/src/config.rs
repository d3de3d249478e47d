//! Value ranges, alarm limits and generator configuration

use std::collections::{BTreeMap, BTreeSet};

use errors::{config_error, SimResult};
use serde::{Deserialize, Serialize};

use crate::scenario::Scenario;
use crate::types::{Quantity, SensorId};

/// Upper bound on simulated sensors per device
pub const MAX_SENSOR_COUNT: u16 = 100;

// ============================================================================
// Value ranges
// ============================================================================

/// Physical range and nominal behavior of one quantity
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    /// Hard lower bound, never crossed
    pub min: f64,
    /// Hard upper bound, never crossed
    pub max: f64,
    /// Nominal value for sensor 1
    pub base: f64,
    /// Half-width of the normal wander band around the base
    pub variation: f64,
    /// Base offset added per sensor index, so sensors differ slightly
    #[serde(default)]
    pub spread: f64,
}

impl ValueRange {
    pub fn temperature() -> Self {
        Self {
            min: -40.0,
            max: 85.0,
            base: 22.0,
            variation: 2.0,
            spread: 0.3,
        }
    }

    pub fn humidity() -> Self {
        Self {
            min: 0.0,
            max: 100.0,
            base: 45.0,
            variation: 5.0,
            spread: 0.0,
        }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    /// Base for a given sensor, before overrides
    pub fn base_for(&self, sensor_id: SensorId) -> f64 {
        self.base + f64::from(sensor_id.saturating_sub(1)) * self.spread
    }

    pub fn validate(&self, field: &str) -> SimResult<()> {
        if !(self.min.is_finite() && self.max.is_finite() && self.min < self.max) {
            return Err(config_error!(
                field,
                "min ({}) must be below max ({})",
                self.min,
                self.max
            ));
        }
        if self.base < self.min || self.base > self.max {
            return Err(config_error!(
                field,
                "base {} outside [{}, {}]",
                self.base,
                self.min,
                self.max
            ));
        }
        if !self.variation.is_finite() || self.variation < 0.0 {
            return Err(config_error!(
                field,
                "variation must be finite and not negative, got {}",
                self.variation
            ));
        }
        if !self.spread.is_finite() {
            return Err(config_error!(field, "spread must be finite, got {}", self.spread));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValuesConfig {
    #[serde(default = "ValueRange::temperature")]
    pub temperature: ValueRange,
    #[serde(default = "ValueRange::humidity")]
    pub humidity: ValueRange,
}

impl Default for ValuesConfig {
    fn default() -> Self {
        Self {
            temperature: ValueRange::temperature(),
            humidity: ValueRange::humidity(),
        }
    }
}

impl ValuesConfig {
    pub fn range(&self, quantity: Quantity) -> &ValueRange {
        match quantity {
            Quantity::Temperature => &self.temperature,
            Quantity::Humidity => &self.humidity,
        }
    }

    pub fn validate(&self, prefix: &str) -> SimResult<()> {
        self.temperature
            .validate(&format!("{}.temperature", prefix))?;
        self.humidity.validate(&format!("{}.humidity", prefix))
    }
}

// ============================================================================
// Alarm limits
// ============================================================================

/// Acceptable band of one quantity, plus how far outside it escalates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Limit {
    pub min: f64,
    pub max: f64,
    pub warning_delta: f64,
    pub alarm_delta: f64,
}

impl Limit {
    pub fn temperature() -> Self {
        Self {
            min: -10.0,
            max: 40.0,
            warning_delta: 3.0,
            alarm_delta: 5.0,
        }
    }

    pub fn humidity() -> Self {
        Self {
            min: 20.0,
            max: 80.0,
            warning_delta: 5.0,
            alarm_delta: 10.0,
        }
    }

    pub fn validate(&self, field: &str) -> SimResult<()> {
        if self.min.is_nan() || self.max.is_nan() || self.min >= self.max {
            return Err(config_error!(
                field,
                "min ({}) must be below max ({})",
                self.min,
                self.max
            ));
        }
        if self.warning_delta < 0.0 || self.alarm_delta < 0.0 {
            return Err(config_error!(field, "deltas must not be negative"));
        }
        if self.alarm_delta < self.warning_delta {
            return Err(config_error!(
                field,
                "alarm_delta ({}) must be at least warning_delta ({})",
                self.alarm_delta,
                self.warning_delta
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "Limit::temperature")]
    pub temperature: Limit,
    #[serde(default = "Limit::humidity")]
    pub humidity: Limit,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            temperature: Limit::temperature(),
            humidity: Limit::humidity(),
        }
    }
}

impl LimitsConfig {
    pub fn limit(&self, quantity: Quantity) -> &Limit {
        match quantity {
            Quantity::Temperature => &self.temperature,
            Quantity::Humidity => &self.humidity,
        }
    }

    pub fn validate(&self, prefix: &str) -> SimResult<()> {
        self.temperature
            .validate(&format!("{}.temperature", prefix))?;
        self.humidity.validate(&format!("{}.humidity", prefix))
    }
}

// ============================================================================
// Generator configuration
// ============================================================================

/// Pinned base values for a single sensor
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
}

impl SensorOverride {
    pub fn validate(&self, field: &str) -> SimResult<()> {
        for (name, value) in [("temperature", self.temperature), ("humidity", self.humidity)] {
            if let Some(v) = value.filter(|v| !v.is_finite()) {
                return Err(config_error!(field, "{} must be finite, got {}", name, v));
            }
        }
        Ok(())
    }
}

/// Everything the generator needs to advance one tick
///
/// Subsystems assemble this from their own configuration records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub sensor_count: u16,
    #[serde(default)]
    pub scenario: Scenario,
    #[serde(default)]
    pub values: ValuesConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub offline_sensors: BTreeSet<SensorId>,
    #[serde(default)]
    pub overrides: BTreeMap<SensorId, SensorOverride>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            sensor_count: 10,
            scenario: Scenario::Normal,
            values: ValuesConfig::default(),
            limits: LimitsConfig::default(),
            offline_sensors: BTreeSet::new(),
            overrides: BTreeMap::new(),
        }
    }
}

impl GeneratorConfig {
    /// Base for `quantity` of `sensor_id`, honoring overrides
    pub fn base_for(&self, sensor_id: SensorId, quantity: Quantity) -> f64 {
        let pinned = self.overrides.get(&sensor_id).and_then(|o| match quantity {
            Quantity::Temperature => o.temperature,
            Quantity::Humidity => o.humidity,
        });
        let range = self.values.range(quantity);
        range.clamp(pinned.unwrap_or_else(|| range.base_for(sensor_id)))
    }

    pub fn sensor_ids(&self) -> impl Iterator<Item = SensorId> {
        1..=self.sensor_count
    }

    pub fn validate(&self) -> SimResult<()> {
        validate_sensor_count("sensor_count", self.sensor_count)?;
        self.values.validate("values")?;
        self.limits.validate("limits")?;
        validate_sensor_set("offline_sensors", &self.offline_sensors, self.sensor_count)?;
        for (id, pinned) in &self.overrides {
            if *id == 0 || *id > self.sensor_count {
                return Err(config_error!(
                    "overrides",
                    "sensor {} outside 1..={}",
                    id,
                    self.sensor_count
                ));
            }
            pinned.validate("overrides")?;
        }
        Ok(())
    }
}

/// Check a sensor count against `1..=MAX_SENSOR_COUNT`
pub fn validate_sensor_count(field: &str, count: u16) -> SimResult<()> {
    if count == 0 || count > MAX_SENSOR_COUNT {
        return Err(config_error!(
            field,
            "must be within 1..={}, got {}",
            MAX_SENSOR_COUNT,
            count
        ));
    }
    Ok(())
}

/// Check that every id in `ids` names an existing sensor
pub fn validate_sensor_set(field: &str, ids: &BTreeSet<SensorId>, count: u16) -> SimResult<()> {
    if let Some(bad) = ids.iter().find(|id| **id == 0 || **id > count) {
        return Err(config_error!(field, "sensor {} outside 1..={}", bad, count));
    }
    Ok(())
}

/// Check a probability in `[0, 1]`
pub fn validate_rate(field: &str, rate: f64) -> SimResult<()> {
    if !(0.0..=1.0).contains(&rate) {
        return Err(config_error!(field, "must be within [0, 1], got {}", rate));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use errors::SimError;

    #[test]
    fn test_defaults_are_valid() {
        GeneratorConfig::default().validate().unwrap();
    }

    #[test]
    fn test_sensor_count_bounds() {
        let mut config = GeneratorConfig {
            sensor_count: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SimError::ConfigValidation { ref field, .. }) if field == "sensor_count"
        ));
        config.sensor_count = MAX_SENSOR_COUNT + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_offline_sensor_outside_count_rejected() {
        let mut config = GeneratorConfig {
            sensor_count: 3,
            ..Default::default()
        };
        config.offline_sensors.insert(4);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_limit_deltas_ordered() {
        let limit = Limit {
            warning_delta: 6.0,
            ..Limit::temperature()
        };
        assert!(limit.validate("limits.temperature").is_err());
    }

    #[test]
    fn test_base_for_uses_spread_and_override() {
        let mut config = GeneratorConfig::default();
        assert!((config.base_for(3, Quantity::Temperature) - 22.6).abs() < 1e-9);
        config.overrides.insert(
            3,
            SensorOverride {
                temperature: Some(30.0),
                humidity: None,
            },
        );
        assert_eq!(config.base_for(3, Quantity::Temperature), 30.0);
        assert_eq!(config.base_for(3, Quantity::Humidity), 45.0);
    }

    #[test]
    fn test_non_finite_override_rejected() {
        let mut config = GeneratorConfig::default();
        config.overrides.insert(
            1,
            SensorOverride {
                temperature: Some(f64::NAN),
                humidity: None,
            },
        );
        assert!(matches!(
            config.validate(),
            Err(SimError::ConfigValidation { ref field, .. }) if field == "overrides"
        ));
        config.overrides.insert(
            1,
            SensorOverride {
                temperature: None,
                humidity: Some(f64::INFINITY),
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_infinite_variation_and_spread_rejected() {
        let range = ValueRange {
            variation: f64::INFINITY,
            ..ValueRange::temperature()
        };
        assert!(range.validate("values.temperature").is_err());
        let range = ValueRange {
            spread: f64::NAN,
            ..ValueRange::temperature()
        };
        assert!(range.validate("values.temperature").is_err());
    }

    #[test]
    fn test_negative_rate_rejected() {
        assert!(validate_rate("errors.error_rate", -0.1).is_err());
        assert!(validate_rate("errors.error_rate", 1.0).is_ok());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: GeneratorConfig = serde_yaml::from_str("sensor_count: 2\n").unwrap();
        assert_eq!(config.values.humidity.base, 45.0);
        assert_eq!(config.limits.temperature.max, 40.0);
    }
}
