//! Register map encoder
//!
//! Each sensor owns a pair of value registers and a pair of status registers:
//!
//! ```text
//! value_base  + (id-1)*2 + 0   temperature, i16, value * 10
//! value_base  + (id-1)*2 + 1   humidity,    u16, value * 10
//! status_base + (id-1)*2 + 0   temperature status word
//! status_base + (id-1)*2 + 1   humidity status word
//! ```
//!
//! A completed tick is published as an immutable [`RegisterSnapshot`]; readers
//! always see one whole tick.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use errors::{config_error, protocol_error, SimError, SimResult};
use sensor_model::{FaultBias, Quantity, QuantityStatus, SensorId, SensorReading};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::RegisterConfig;
use crate::frame::ExceptionCode;

/// Registers per sensor in each window
pub const REGISTER_STRIDE: u16 = 2;

const ADDRESS_SPACE: u32 = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterKind {
    Value,
    Status,
}

impl RegisterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegisterKind::Value => "value",
            RegisterKind::Status => "status",
        }
    }
}

/// What a single register address refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterLocation {
    pub kind: RegisterKind,
    pub sensor_id: SensorId,
    pub quantity: Quantity,
}

/// One encoded register word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedRegister {
    pub address: u16,
    pub raw: u16,
}

// ============================================================================
// Address layout
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterMap {
    value_base: u16,
    status_base: u16,
    sensor_count: u16,
}

impl RegisterMap {
    /// Build a map, rejecting windows that leave the address space or overlap
    pub fn new(config: &RegisterConfig, sensor_count: u16) -> SimResult<Self> {
        let span = u32::from(sensor_count) * u32::from(REGISTER_STRIDE);
        for (field, base) in [
            ("registers.value_base", config.value_base),
            ("registers.status_base", config.status_base),
        ] {
            let end = u32::from(base) + span;
            if end > ADDRESS_SPACE {
                return Err(config_error!(
                    field,
                    "window {}..{} exceeds the 16-bit address space",
                    base,
                    end
                ));
            }
        }

        let value = u32::from(config.value_base);
        let status = u32::from(config.status_base);
        if value < status + span && status < value + span {
            return Err(config_error!(
                "registers",
                "value window {}..{} overlaps status window {}..{}",
                value,
                value + span,
                status,
                status + span
            ));
        }

        Ok(Self {
            value_base: config.value_base,
            status_base: config.status_base,
            sensor_count,
        })
    }

    pub fn sensor_count(&self) -> u16 {
        self.sensor_count
    }

    pub fn base(&self, kind: RegisterKind) -> u16 {
        match kind {
            RegisterKind::Value => self.value_base,
            RegisterKind::Status => self.status_base,
        }
    }

    /// Address of `quantity` of `sensor_id` in the `kind` window
    ///
    /// `sensor_id` must be within `1..=sensor_count`.
    pub fn address(&self, kind: RegisterKind, sensor_id: SensorId, quantity: Quantity) -> u16 {
        self.base(kind) + (sensor_id - 1) * REGISTER_STRIDE + quantity.register_offset()
    }

    pub fn window(&self, kind: RegisterKind) -> Range<u32> {
        let start = u32::from(self.base(kind));
        start..start + u32::from(self.sensor_count) * u32::from(REGISTER_STRIDE)
    }

    pub fn locate(&self, address: u16) -> Option<RegisterLocation> {
        [RegisterKind::Value, RegisterKind::Status]
            .into_iter()
            .find(|kind| self.window(*kind).contains(&u32::from(address)))
            .map(|kind| {
                let offset = address - self.base(kind);
                RegisterLocation {
                    kind,
                    sensor_id: offset / REGISTER_STRIDE + 1,
                    quantity: if offset % REGISTER_STRIDE == 0 {
                        Quantity::Temperature
                    } else {
                        Quantity::Humidity
                    },
                }
            })
    }

    /// Window that fully contains `start..start+quantity`, if any
    pub fn window_of_range(&self, start: u16, quantity: u16) -> Option<RegisterKind> {
        let from = u32::from(start);
        let to = from + u32::from(quantity);
        [RegisterKind::Value, RegisterKind::Status]
            .into_iter()
            .find(|kind| {
                let window = self.window(*kind);
                quantity > 0 && window.start <= from && to <= window.end
            })
    }

    /// Sensors touched by a read of `start..start+quantity`
    pub fn sensors_in_range(&self, start: u16, quantity: u16) -> BTreeSet<SensorId> {
        (u32::from(start)..u32::from(start) + u32::from(quantity))
            .filter_map(|address| u16::try_from(address).ok())
            .filter_map(|address| self.locate(address))
            .map(|location| location.sensor_id)
            .collect()
    }

    /// Encode one reading into its value and status registers
    ///
    /// Values that do not fit 16 bits are clamped with a warning. An offline
    /// sensor reports zero values and status word 3.
    pub fn encode(&self, reading: &SensorReading) -> Vec<EncodedRegister> {
        Quantity::ALL
            .iter()
            .flat_map(|quantity| {
                let raw = if reading.is_online() {
                    encode_clamped(reading.value(*quantity), *quantity)
                } else {
                    0
                };
                [
                    EncodedRegister {
                        address: self.address(RegisterKind::Value, reading.sensor_id, *quantity),
                        raw,
                    },
                    EncodedRegister {
                        address: self.address(RegisterKind::Status, reading.sensor_id, *quantity),
                        raw: reading.status(*quantity).status_word(),
                    },
                ]
            })
            .collect()
    }
}

// ============================================================================
// Value encoding
// ============================================================================

/// Encode a physical value as `round(value * 10)` in one register word
pub fn encode_value(value: f64, quantity: Quantity) -> SimResult<u16> {
    let raw = (value * 10.0).round();
    let (low, high) = if quantity.is_signed() {
        (f64::from(i16::MIN), f64::from(i16::MAX))
    } else {
        (0.0, f64::from(u16::MAX))
    };
    if !raw.is_finite() || raw < low || raw > high {
        return Err(SimError::EncodingRange {
            value,
            quantity: quantity.as_str().to_string(),
        });
    }
    Ok(if quantity.is_signed() {
        raw as i16 as u16
    } else {
        raw as u16
    })
}

/// [`encode_value`], clamping to the representable bound instead of failing
pub fn encode_clamped(value: f64, quantity: Quantity) -> u16 {
    match encode_value(value, quantity) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("{}, clamping to register bound", e);
            let raw = (value * 10.0).round();
            if quantity.is_signed() {
                // NaN saturates to 0
                raw.clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16 as u16
            } else {
                raw.clamp(0.0, f64::from(u16::MAX)) as u16
            }
        },
    }
}

pub fn decode_value(raw: u16, quantity: Quantity) -> f64 {
    if quantity.is_signed() {
        f64::from(raw as i16) / 10.0
    } else {
        f64::from(raw) / 10.0
    }
}

// ============================================================================
// Published snapshot
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegisterValue {
    pub address: u16,
    pub value: f64,
    pub raw: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRegister {
    pub address: u16,
    pub raw: u16,
    /// `None` when the word was patched to a value outside the status codes
    pub status: Option<QuantityStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRegisters {
    pub temperature: StatusRegister,
    pub humidity: StatusRegister,
}

/// Register view of one sensor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorRegisters {
    pub temperature: RegisterValue,
    pub humidity: RegisterValue,
    pub status: StatusRegisters,
}

/// Encoded register state of one completed tick
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterSnapshot {
    timestamp: DateTime<Utc>,
    map: RegisterMap,
    values: Vec<u16>,
    statuses: Vec<u16>,
    readings: Vec<SensorReading>,
    fault_bias: FaultBias,
}

impl RegisterSnapshot {
    pub fn build(
        map: RegisterMap,
        timestamp: DateTime<Utc>,
        readings: &[SensorReading],
        fault_bias: FaultBias,
    ) -> Self {
        let len = usize::from(map.sensor_count) * usize::from(REGISTER_STRIDE);
        let mut snapshot = Self {
            timestamp,
            map,
            values: vec![0; len],
            statuses: vec![QuantityStatus::Offline.status_word(); len],
            readings: readings
                .iter()
                .filter(|r| r.sensor_id >= 1 && r.sensor_id <= map.sensor_count)
                .cloned()
                .collect(),
            fault_bias,
        };
        let encoded: Vec<EncodedRegister> = snapshot
            .readings
            .iter()
            .flat_map(|reading| map.encode(reading))
            .collect();
        for register in encoded {
            if let Some(slot) = snapshot.slot_mut(register.address) {
                *slot = register.raw;
            }
        }
        snapshot
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn map(&self) -> &RegisterMap {
        &self.map
    }

    pub fn readings(&self) -> &[SensorReading] {
        &self.readings
    }

    pub fn reading(&self, sensor_id: SensorId) -> Option<&SensorReading> {
        self.readings.iter().find(|r| r.sensor_id == sensor_id)
    }

    pub fn fault_bias(&self) -> FaultBias {
        self.fault_bias
    }

    fn slot_index(&self, address: u16) -> Option<(RegisterKind, usize)> {
        let location = self.map.locate(address)?;
        Some((
            location.kind,
            usize::from(address - self.map.base(location.kind)),
        ))
    }

    fn slot_mut(&mut self, address: u16) -> Option<&mut u16> {
        let (kind, index) = self.slot_index(address)?;
        match kind {
            RegisterKind::Value => self.values.get_mut(index),
            RegisterKind::Status => self.statuses.get_mut(index),
        }
    }

    pub fn word(&self, address: u16) -> Option<u16> {
        let (kind, index) = self.slot_index(address)?;
        match kind {
            RegisterKind::Value => self.values.get(index).copied(),
            RegisterKind::Status => self.statuses.get(index).copied(),
        }
    }

    /// Words of `start..start+quantity`, or `None` unless one window holds them all
    pub fn read(&self, start: u16, quantity: u16) -> Option<Vec<u16>> {
        let kind = self.map.window_of_range(start, quantity)?;
        let from = usize::from(start - self.map.base(kind));
        let to = from + usize::from(quantity);
        match kind {
            RegisterKind::Value => self.values.get(from..to).map(<[u16]>::to_vec),
            RegisterKind::Status => self.statuses.get(from..to).map(<[u16]>::to_vec),
        }
    }

    /// Copy of this snapshot with one word replaced
    pub fn with_word(&self, address: u16, raw: u16) -> Option<Self> {
        let mut next = self.clone();
        *next.slot_mut(address)? = raw;
        Some(next)
    }

    /// Per-sensor register view, keyed by sensor id
    pub fn sensors(&self) -> BTreeMap<SensorId, SensorRegisters> {
        (1..=self.map.sensor_count)
            .map(|id| {
                let value = |quantity: Quantity| {
                    let address = self.map.address(RegisterKind::Value, id, quantity);
                    let raw = self.word(address).unwrap_or(0);
                    RegisterValue {
                        address,
                        value: decode_value(raw, quantity),
                        raw,
                    }
                };
                let status = |quantity: Quantity| {
                    let address = self.map.address(RegisterKind::Status, id, quantity);
                    let raw = self.word(address).unwrap_or(0);
                    StatusRegister {
                        address,
                        raw,
                        status: QuantityStatus::from_status_word(raw),
                    }
                };
                (
                    id,
                    SensorRegisters {
                        temperature: value(Quantity::Temperature),
                        humidity: value(Quantity::Humidity),
                        status: StatusRegisters {
                            temperature: status(Quantity::Temperature),
                            humidity: status(Quantity::Humidity),
                        },
                    },
                )
            })
            .collect()
    }
}

/// Lock-free holder of the latest [`RegisterSnapshot`]
#[derive(Debug)]
pub struct RegisterBank {
    current: ArcSwap<RegisterSnapshot>,
}

impl RegisterBank {
    pub fn new(snapshot: RegisterSnapshot) -> Self {
        Self {
            current: ArcSwap::from_pointee(snapshot),
        }
    }

    pub fn load(&self) -> Arc<RegisterSnapshot> {
        self.current.load_full()
    }

    pub fn publish(&self, snapshot: RegisterSnapshot) {
        self.current.store(Arc::new(snapshot));
    }

    /// Overwrite one word until the next publish
    pub fn patch(&self, address: u16, raw: u16) -> SimResult<()> {
        if self.load().map().locate(address).is_none() {
            return Err(protocol_error!(
                ExceptionCode::IllegalDataAddress.code(),
                format!("register {} is not mapped", address)
            ));
        }
        self.current
            .rcu(|current| current.with_word(address, raw).unwrap_or_else(|| (**current).clone()));
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use proptest::prelude::*;
    use sensor_model::{round1, CombinedStatus, OfflineReason};

    fn map(count: u16) -> RegisterMap {
        RegisterMap::new(&RegisterConfig::default(), count).unwrap()
    }

    fn reading(id: SensorId, temperature: f64, humidity: f64) -> SensorReading {
        SensorReading {
            sensor_id: id,
            temperature,
            humidity,
            temperature_status: QuantityStatus::Normal,
            humidity_status: QuantityStatus::Warning,
            combined_status: CombinedStatus::Warning,
            offline: None,
        }
    }

    #[test]
    fn test_addresses_follow_stride() {
        let map = map(10);
        assert_eq!(map.address(RegisterKind::Value, 1, Quantity::Temperature), 30000);
        assert_eq!(map.address(RegisterKind::Value, 1, Quantity::Humidity), 30001);
        assert_eq!(map.address(RegisterKind::Value, 3, Quantity::Temperature), 30004);
        assert_eq!(map.address(RegisterKind::Status, 10, Quantity::Humidity), 40019);
        assert_eq!(map.window(RegisterKind::Value), 30000..30020);
    }

    #[test]
    fn test_locate() {
        let map = map(10);
        let location = map.locate(40005).unwrap();
        assert_eq!(location.kind, RegisterKind::Status);
        assert_eq!(location.sensor_id, 3);
        assert_eq!(location.quantity, Quantity::Humidity);
        assert!(map.locate(30020).is_none());
        assert!(map.locate(29999).is_none());
    }

    #[test]
    fn test_window_of_range() {
        let map = map(10);
        assert_eq!(map.window_of_range(30000, 20), Some(RegisterKind::Value));
        assert_eq!(map.window_of_range(30018, 3), None);
        assert_eq!(map.window_of_range(40000, 0), None);
        assert_eq!(
            map.sensors_in_range(30001, 4).into_iter().collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_rejects_overlapping_windows() {
        let config = RegisterConfig {
            value_base: 100,
            status_base: 110,
        };
        assert!(RegisterMap::new(&config, 5).is_ok());
        assert!(matches!(
            RegisterMap::new(&config, 6),
            Err(SimError::ConfigValidation { ref field, .. }) if field == "registers"
        ));
    }

    #[test]
    fn test_rejects_window_past_address_space() {
        let config = RegisterConfig {
            value_base: 65530,
            status_base: 0,
        };
        assert!(RegisterMap::new(&config, 3).is_ok());
        assert!(RegisterMap::new(&config, 4).is_err());
    }

    #[test]
    fn test_encode_signed_temperature() {
        assert_eq!(encode_value(22.4, Quantity::Temperature).unwrap(), 224);
        assert_eq!(encode_value(-5.3, Quantity::Temperature).unwrap(), 0xFFCB);
        assert_eq!(decode_value(0xFFCB, Quantity::Temperature), -5.3);
        assert_eq!(decode_value(451, Quantity::Humidity), 45.1);
    }

    #[test]
    fn test_encode_out_of_range() {
        assert!(matches!(
            encode_value(-1.0, Quantity::Humidity),
            Err(SimError::EncodingRange { .. })
        ));
        assert!(encode_value(4000.0, Quantity::Temperature).is_err());
        assert_eq!(encode_clamped(4000.0, Quantity::Temperature), 32767);
        assert_eq!(encode_clamped(-1.0, Quantity::Humidity), 0);
        assert_eq!(encode_clamped(f64::NAN, Quantity::Humidity), 0);
    }

    proptest! {
        #[test]
        fn prop_temperature_round_trip(v in -3000.0f64..3000.0) {
            let raw = encode_value(v, Quantity::Temperature).unwrap();
            prop_assert_eq!(decode_value(raw, Quantity::Temperature), round1(v));
        }

        #[test]
        fn prop_humidity_round_trip(v in 0.0f64..6000.0) {
            let raw = encode_value(v, Quantity::Humidity).unwrap();
            prop_assert_eq!(decode_value(raw, Quantity::Humidity), round1(v));
        }
    }

    #[test]
    fn test_encode_reading_registers() {
        let map = map(2);
        let registers = map.encode(&reading(2, 22.4, 45.1));
        assert_eq!(
            registers,
            vec![
                EncodedRegister { address: 30002, raw: 224 },
                EncodedRegister { address: 40002, raw: 0 },
                EncodedRegister { address: 30003, raw: 451 },
                EncodedRegister { address: 40003, raw: 1 },
            ]
        );
    }

    #[test]
    fn test_offline_encodes_zero_values() {
        let mut r = reading(1, 22.4, 45.1);
        r.offline = Some(OfflineReason::Configured);
        r.temperature_status = QuantityStatus::Offline;
        r.humidity_status = QuantityStatus::Offline;
        let snapshot = RegisterSnapshot::build(map(1), Utc::now(), &[r], FaultBias::default());
        assert_eq!(snapshot.read(30000, 2).unwrap(), vec![0, 0]);
        assert_eq!(snapshot.read(40000, 2).unwrap(), vec![3, 3]);
    }

    #[test]
    fn test_snapshot_read_and_view() {
        let snapshot = RegisterSnapshot::build(
            map(2),
            Utc::now(),
            &[reading(1, 22.4, 45.1), reading(2, -3.0, 50.0)],
            FaultBias::default(),
        );
        assert_eq!(snapshot.read(30000, 4).unwrap(), vec![224, 451, 0xFFE2, 500]);
        assert!(snapshot.read(30003, 2).is_none());

        let sensors = snapshot.sensors();
        assert_eq!(sensors[&2].temperature.value, -3.0);
        assert_eq!(sensors[&2].temperature.address, 30002);
        assert_eq!(sensors[&1].status.humidity.status, Some(QuantityStatus::Warning));
    }

    #[test]
    fn test_bank_patch_until_next_publish() {
        let map = map(1);
        let bank = RegisterBank::new(RegisterSnapshot::build(
            map,
            Utc::now(),
            &[reading(1, 22.4, 45.1)],
            FaultBias::default(),
        ));
        let before = bank.load();

        bank.patch(30000, 999).unwrap();
        assert_eq!(bank.load().word(30000), Some(999));
        assert_eq!(before.word(30000), Some(224));
        assert!(matches!(
            bank.patch(12, 1),
            Err(SimError::ModbusProtocol { code: 2, .. })
        ));

        bank.publish(RegisterSnapshot::build(
            map,
            Utc::now(),
            &[reading(1, 20.0, 40.0)],
            FaultBias::default(),
        ));
        assert_eq!(bank.load().word(30000), Some(200));
    }
}
