//! The `current.json` document, as a Modbus poller would write it

use chrono::{DateTime, Utc};
use sensor_model::{
    combine, CombinedStatus, FrameSample, Quantity, QuantityStatus, Scenario, SensorFrame,
    SensorId,
};
use serde::{Deserialize, Serialize};

/// Outcome of the poll that produced a quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModbusStatus {
    Ok,
    Timeout,
    Error,
    CrcError,
}

impl ModbusStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, ModbusStatus::Ok)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantitySnapshot {
    /// Decoded from the polled register; `None` when the poll failed
    pub value: Option<f64>,
    pub raw: Option<i32>,
    pub address: u16,
    pub status: QuantityStatus,
    pub modbus_status: ModbusStatus,
    pub timestamp: DateTime<Utc>,
}

impl QuantitySnapshot {
    pub fn failed(address: u16, modbus_status: ModbusStatus, timestamp: DateTime<Utc>) -> Self {
        Self {
            value: None,
            raw: None,
            address,
            status: QuantityStatus::Offline,
            modbus_status,
            timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSnapshot {
    pub id: SensorId,
    pub name: String,
    pub modbus_slave_id: u8,
    pub modbus_addr_temp: u16,
    pub modbus_addr_hum: u16,
    pub temperature: QuantitySnapshot,
    pub humidity: QuantitySnapshot,
    pub combined_status: CombinedStatus,
}

impl SensorSnapshot {
    pub fn quantity(&self, quantity: Quantity) -> &QuantitySnapshot {
        match quantity {
            Quantity::Temperature => &self.temperature,
            Quantity::Humidity => &self.humidity,
        }
    }

    pub fn derive_combined(&mut self) {
        self.combined_status = combine(self.temperature.status, self.humidity.status);
    }
}

impl From<&SensorSnapshot> for FrameSample {
    fn from(sensor: &SensorSnapshot) -> Self {
        if sensor.combined_status == CombinedStatus::Offline {
            return FrameSample::offline(sensor.id);
        }
        FrameSample {
            sensor_id: sensor.id,
            temperature: sensor.temperature.value,
            humidity: sensor.humidity.value,
            status: sensor.combined_status,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollStatistics {
    pub total_polls: u64,
    pub successful_polls: u64,
    pub failed_polls: u64,
    pub last_error: Option<String>,
}

impl PollStatistics {
    pub fn record(&mut self, error: Option<String>) {
        self.total_polls += 1;
        match error {
            Some(e) => {
                self.failed_polls += 1;
                self.last_error = Some(e);
            },
            None => self.successful_polls += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentSnapshot {
    pub timestamp: DateTime<Utc>,
    pub poll_period_ms: u64,
    pub com_port: String,
    pub baudrate: u32,
    pub scenario: Scenario,
    pub sensors: Vec<SensorSnapshot>,
    pub statistics: PollStatistics,
}

impl CurrentSnapshot {
    pub fn sensor(&self, id: SensorId) -> Option<&SensorSnapshot> {
        self.sensors.iter().find(|s| s.id == id)
    }

    pub fn to_frame(&self) -> SensorFrame {
        SensorFrame {
            timestamp: self.timestamp,
            sensors: self.sensors.iter().map(FrameSample::from).collect(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn quantity(value: f64, status: QuantityStatus) -> QuantitySnapshot {
        QuantitySnapshot {
            value: Some(value),
            raw: Some((value * 10.0).round() as i32),
            address: 30000,
            status,
            modbus_status: ModbusStatus::Ok,
            timestamp: Utc::now(),
        }
    }

    fn sensor() -> SensorSnapshot {
        SensorSnapshot {
            id: 1,
            name: "Sensor 1".to_string(),
            modbus_slave_id: 16,
            modbus_addr_temp: 30000,
            modbus_addr_hum: 30001,
            temperature: quantity(22.4, QuantityStatus::Normal),
            humidity: quantity(85.0, QuantityStatus::Warning),
            combined_status: CombinedStatus::Ok,
        }
    }

    #[test]
    fn test_combined_is_worst_status() {
        let mut sensor = sensor();
        sensor.derive_combined();
        assert_eq!(sensor.combined_status, CombinedStatus::Warning);

        sensor.temperature = QuantitySnapshot::failed(30000, ModbusStatus::Timeout, Utc::now());
        sensor.derive_combined();
        assert_eq!(sensor.combined_status, CombinedStatus::Offline);
        assert_eq!(FrameSample::from(&sensor).humidity, None);
    }

    #[test]
    fn test_statistics_record() {
        let mut stats = PollStatistics::default();
        stats.record(None);
        stats.record(Some("sensor 3: timeout".to_string()));
        stats.record(None);
        assert_eq!(stats.total_polls, 3);
        assert_eq!(stats.successful_polls, 2);
        assert_eq!(stats.failed_polls, 1);
        assert_eq!(stats.last_error.as_deref(), Some("sensor 3: timeout"));
    }

    #[test]
    fn test_wire_shape() {
        let json = serde_json::to_value(sensor()).unwrap();
        assert_eq!(json["temperature"]["modbus_status"], "ok");
        assert_eq!(json["humidity"]["status"], "warning");
        assert_eq!(json["modbus_addr_hum"], 30001);

        let failed = QuantitySnapshot::failed(30000, ModbusStatus::CrcError, Utc::now());
        let json = serde_json::to_value(failed).unwrap();
        assert!(json["value"].is_null());
        assert_eq!(json["modbus_status"], "crc_error");
    }
}
