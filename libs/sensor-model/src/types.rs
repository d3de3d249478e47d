//! Core domain types for simulated sensors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable sensor identifier, starting at 1
pub type SensorId = u16;

// ============================================================================
// Quantities
// ============================================================================

/// A measured quantity. Every sensor reports both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quantity {
    Temperature,
    Humidity,
}

impl Quantity {
    pub const ALL: [Quantity; 2] = [Quantity::Temperature, Quantity::Humidity];

    pub fn as_str(&self) -> &'static str {
        match self {
            Quantity::Temperature => "temperature",
            Quantity::Humidity => "humidity",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Quantity::Temperature => "°C",
            Quantity::Humidity => "%",
        }
    }

    /// Offset of this quantity inside a sensor's register pair
    pub fn register_offset(&self) -> u16 {
        match self {
            Quantity::Temperature => 0,
            Quantity::Humidity => 1,
        }
    }

    /// Temperature is stored two's complement, humidity unsigned
    pub fn is_signed(&self) -> bool {
        matches!(self, Quantity::Temperature)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Statuses
// ============================================================================

/// Status of a single quantity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuantityStatus {
    #[default]
    Normal,
    Warning,
    Alarm,
    Offline,
}

impl QuantityStatus {
    /// Value written to the status register
    pub fn status_word(&self) -> u16 {
        match self {
            QuantityStatus::Normal => 0,
            QuantityStatus::Warning => 1,
            QuantityStatus::Alarm => 2,
            QuantityStatus::Offline => 3,
        }
    }

    pub fn from_status_word(word: u16) -> Option<Self> {
        match word {
            0 => Some(QuantityStatus::Normal),
            1 => Some(QuantityStatus::Warning),
            2 => Some(QuantityStatus::Alarm),
            3 => Some(QuantityStatus::Offline),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QuantityStatus::Normal => "normal",
            QuantityStatus::Warning => "warning",
            QuantityStatus::Alarm => "alarm",
            QuantityStatus::Offline => "offline",
        }
    }
}

/// Sensor-level status derived from both quantities
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombinedStatus {
    #[default]
    #[serde(alias = "normal")]
    Ok,
    Warning,
    Alarm,
    Offline,
}

impl CombinedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CombinedStatus::Ok => "ok",
            CombinedStatus::Warning => "warning",
            CombinedStatus::Alarm => "alarm",
            CombinedStatus::Offline => "offline",
        }
    }
}

impl fmt::Display for CombinedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a sensor is not answering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfflineReason {
    /// Listed in the configured offline set
    Configured,
    /// Taken offline by the active scenario
    Scenario,
    NoPower,
    SensorFailure,
}

impl OfflineReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            OfflineReason::Configured => "configured",
            OfflineReason::Scenario => "scenario",
            OfflineReason::NoPower => "no_power",
            OfflineReason::SensorFailure => "sensor_failure",
        }
    }
}

// ============================================================================
// Readings
// ============================================================================

/// One sensor's state after a generator tick
///
/// Values keep evolving while a sensor is offline; consumers must check
/// [`SensorReading::is_online`] before publishing them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub sensor_id: SensorId,
    pub temperature: f64,
    pub humidity: f64,
    pub temperature_status: QuantityStatus,
    pub humidity_status: QuantityStatus,
    pub combined_status: CombinedStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offline: Option<OfflineReason>,
}

impl SensorReading {
    pub fn is_online(&self) -> bool {
        self.offline.is_none()
    }

    pub fn value(&self, quantity: Quantity) -> f64 {
        match quantity {
            Quantity::Temperature => self.temperature,
            Quantity::Humidity => self.humidity,
        }
    }

    pub fn status(&self, quantity: Quantity) -> QuantityStatus {
        match quantity {
            Quantity::Temperature => self.temperature_status,
            Quantity::Humidity => self.humidity_status,
        }
    }
}

/// What an observer saw for one sensor at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSample {
    pub sensor_id: SensorId,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub status: CombinedStatus,
}

impl FrameSample {
    pub fn offline(sensor_id: SensorId) -> Self {
        Self {
            sensor_id,
            temperature: None,
            humidity: None,
            status: CombinedStatus::Offline,
        }
    }

    pub fn value(&self, quantity: Quantity) -> Option<f64> {
        match quantity {
            Quantity::Temperature => self.temperature,
            Quantity::Humidity => self.humidity,
        }
    }
}

impl From<&SensorReading> for FrameSample {
    fn from(reading: &SensorReading) -> Self {
        if reading.is_online() {
            Self {
                sensor_id: reading.sensor_id,
                temperature: Some(reading.temperature),
                humidity: Some(reading.humidity),
                status: reading.combined_status,
            }
        } else {
            Self::offline(reading.sensor_id)
        }
    }
}

/// Snapshot of every sensor at one tick, handed to archive subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorFrame {
    pub timestamp: DateTime<Utc>,
    pub sensors: Vec<FrameSample>,
}

impl SensorFrame {
    pub fn from_readings(timestamp: DateTime<Utc>, readings: &[SensorReading]) -> Self {
        Self {
            timestamp,
            sensors: readings.iter().map(FrameSample::from).collect(),
        }
    }
}

/// Receiver of completed poll cycles
pub trait FrameSink: Send + Sync {
    fn publish(&self, frame: &SensorFrame);
}
