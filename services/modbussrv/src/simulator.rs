//! Modbus transaction simulator
//!
//! Every request walks the same path under the device mutex:
//!
//! ```text
//! Received -> Validated -> Offline | Timeout | Error | CrcError | Success -> Logged
//! ```
//!
//! A request always logs exactly one TX entry and at most one RX entry. Timeouts
//! (offline sensor, random draw) log no RX entry; the TX carries the timeout
//! window instead. A request for another unit id is answered with a gateway
//! exception.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use common::hex::encode_spaced;
use common::SharedClock;
use errors::{protocol_error, SimError, SimResult};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sensor_model::{round2, FaultBias, Quantity, SensorReading};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::DeviceConfig;
use crate::frame::{self, ExceptionCode, ReadRequest, MAX_READ_QUANTITY};
use crate::log::{Direction, LogEntry, ParsedFrame, TransactionLog};
use crate::registers::{decode_value, RegisterBank, RegisterKind, RegisterMap, RegisterSnapshot};

/// Trailing window for the load penalty
const LOAD_WINDOW_MS: i64 = 1000;
/// Keeps the fault stream independent of the value generator sharing the seed
const DEVICE_SEED_SALT: u64 = 0x4D42_5553;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutReason {
    /// A touched sensor is offline
    Offline,
    /// Random timeout draw
    Random,
}

impl TimeoutReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeoutReason::Offline => "offline",
            TimeoutReason::Random => "timeout",
        }
    }
}

/// What the master observed for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TransactionOutcome {
    Success {
        values: Vec<u16>,
        response_time_ms: f64,
    },
    Exception {
        code: ExceptionCode,
        response_time_ms: f64,
    },
    Timeout {
        reason: TimeoutReason,
        timeout_ms: u64,
    },
    /// Payload arrived intact but the CRC did not verify
    CrcError {
        values: Vec<u16>,
        response_time_ms: f64,
    },
}

impl TransactionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TransactionOutcome::Success { .. })
    }

    pub fn response_time_ms(&self) -> Option<f64> {
        match self {
            TransactionOutcome::Success { response_time_ms, .. }
            | TransactionOutcome::Exception { response_time_ms, .. }
            | TransactionOutcome::CrcError { response_time_ms, .. } => Some(*response_time_ms),
            TransactionOutcome::Timeout { .. } => None,
        }
    }

    /// Register words a master would accept, or the error it would raise
    pub fn into_values(self) -> SimResult<Vec<u16>> {
        match self {
            TransactionOutcome::Success { values, .. } => Ok(values),
            TransactionOutcome::Exception {
                code: ExceptionCode::ServerDeviceFailure,
                ..
            } => Err(SimError::SimulatedDeviceError(
                ExceptionCode::ServerDeviceFailure.description().to_string(),
            )),
            TransactionOutcome::Exception { code, .. } => {
                Err(protocol_error!(code.code(), code.description()))
            },
            TransactionOutcome::Timeout { reason, timeout_ms } => Err(SimError::SimulatedTimeout(
                format!("no response within {} ms ({})", timeout_ms, reason.as_str()),
            )),
            TransactionOutcome::CrcError { .. } => Err(protocol_error!(0, "response CRC mismatch")),
        }
    }
}

#[derive(Debug)]
struct DeviceState {
    config: DeviceConfig,
    map: RegisterMap,
    rng: StdRng,
    recent: VecDeque<DateTime<Utc>>,
    bus_free_at: Option<DateTime<Utc>>,
}

impl DeviceState {
    /// Requests never start before the previous answer finished
    fn start_time(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.bus_free_at.map_or(now, |free| free.max(now))
    }

    /// Record a request and return how many fall in the trailing window
    fn record_load(&mut self, at: DateTime<Utc>) -> usize {
        let horizon = at - Duration::milliseconds(LOAD_WINDOW_MS);
        while self.recent.front().is_some_and(|t| *t <= horizon) {
            self.recent.pop_front();
        }
        self.recent.push_back(at);
        self.recent.len()
    }

    fn draw(&mut self, rate: f64) -> bool {
        self.rng.gen_bool(rate.clamp(0.0, 1.0))
    }

    fn response_time_ms(&mut self, load: usize) -> f64 {
        let timing = self.config.timing;
        let base = if timing.response_min_ms >= timing.response_max_ms {
            timing.response_min_ms as f64
        } else {
            self.rng
                .gen_range(timing.response_min_ms as f64..=timing.response_max_ms as f64)
        };
        let excess = load.saturating_sub(timing.load_threshold as usize);
        round2(base + (excess as u64 * timing.load_penalty_ms) as f64)
    }
}

/// Validation failure as a Modbus exception code
fn validate(map: &RegisterMap, request: &ReadRequest) -> Result<(), ExceptionCode> {
    if request.function != frame::READ_HOLDING_REGISTERS
        && request.function != frame::READ_INPUT_REGISTERS
    {
        return Err(ExceptionCode::IllegalFunction);
    }
    if request.quantity == 0 || request.quantity > MAX_READ_QUANTITY {
        return Err(ExceptionCode::IllegalDataValue);
    }
    if map
        .window_of_range(request.start_address, request.quantity)
        .is_none()
    {
        return Err(ExceptionCode::IllegalDataAddress);
    }
    Ok(())
}

fn describe_request(map: &RegisterMap, request: &ReadRequest) -> String {
    let Some(kind) = map.window_of_range(request.start_address, request.quantity) else {
        return format!(
            "Read {} registers at {}",
            request.quantity, request.start_address
        );
    };
    let label = match kind {
        RegisterKind::Value => "values",
        RegisterKind::Status => "statuses",
    };
    let sensors = map.sensors_in_range(request.start_address, request.quantity);
    match (sensors.first(), sensors.last()) {
        (Some(first), Some(last)) if first == last => {
            format!("Read {} of sensor {}", label, first)
        },
        (Some(first), Some(last)) => format!("Read {} of sensors {}-{}", label, first, last),
        _ => format!("Read {}", label),
    }
}

/// `T=22.4°C, H=45.1%` for value registers, `OK` / `ERR:n` for status registers
fn describe_values(map: &RegisterMap, start: u16, values: &[u16]) -> String {
    values
        .iter()
        .zip(start..)
        .map(|(raw, address)| match map.locate(address) {
            Some(location) if location.kind == RegisterKind::Status => {
                if *raw == 0 {
                    "OK".to_string()
                } else {
                    format!("ERR:{}", raw)
                }
            },
            Some(location) => {
                let value = decode_value(*raw, location.quantity);
                match location.quantity {
                    Quantity::Temperature => format!("T={:.1}{}", value, Quantity::Temperature.unit()),
                    Quantity::Humidity => format!("H={:.1}{}", value, Quantity::Humidity.unit()),
                }
            },
            None => raw.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// One simulated slave: published registers, fault injection and its own log
#[derive(Debug)]
pub struct ModbusDevice {
    state: Mutex<DeviceState>,
    registers: RegisterBank,
    log: TransactionLog,
    clock: SharedClock,
}

impl ModbusDevice {
    pub fn new(
        config: DeviceConfig,
        seed: u64,
        clock: SharedClock,
        readings: &[SensorReading],
    ) -> SimResult<Self> {
        config.validate()?;
        let map = config.register_map()?;
        let snapshot = RegisterSnapshot::build(map, clock.now(), readings, FaultBias::default());
        Ok(Self {
            log: TransactionLog::new(config.max_log_entries),
            registers: RegisterBank::new(snapshot),
            state: Mutex::new(DeviceState {
                config,
                map,
                rng: StdRng::seed_from_u64(seed ^ DEVICE_SEED_SALT),
                recent: VecDeque::new(),
                bus_free_at: None,
            }),
            clock,
        })
    }

    pub fn config(&self) -> DeviceConfig {
        self.state.lock().config.clone()
    }

    /// Swap the device configuration, re-encoding the current readings
    pub fn set_config(&self, config: DeviceConfig) -> SimResult<()> {
        config.validate()?;
        let map = config.register_map()?;
        let mut state = self.state.lock();
        self.log.set_max_entries(config.max_log_entries);
        let current = self.registers.load();
        self.registers.publish(RegisterSnapshot::build(
            map,
            current.timestamp(),
            current.readings(),
            current.fault_bias(),
        ));
        state.map = map;
        state.config = config;
        Ok(())
    }

    /// Publish the registers of a completed tick
    pub fn publish(&self, timestamp: DateTime<Utc>, readings: &[SensorReading], fault_bias: FaultBias) {
        let state = self.state.lock();
        self.registers
            .publish(RegisterSnapshot::build(state.map, timestamp, readings, fault_bias));
    }

    pub fn registers(&self) -> Arc<RegisterSnapshot> {
        self.registers.load()
    }

    pub fn set_register(&self, address: u16, raw: u16) -> SimResult<()> {
        let _state = self.state.lock();
        self.registers.patch(address, raw)?;
        debug!("Register {} set to {}", address, raw);
        Ok(())
    }

    pub fn log(&self) -> &TransactionLog {
        &self.log
    }

    /// Serve one read request
    pub fn handle(&self, request: ReadRequest) -> TransactionOutcome {
        let mut state = self.state.lock();
        let snapshot = self.registers.load();
        let started = state.start_time(self.clock.now());
        let load = state.record_load(started);

        let tx = LogEntry {
            timestamp: started,
            direction: Direction::Tx,
            raw_hex: encode_spaced(&request.to_frame()),
            parsed: ParsedFrame {
                slave_id: request.slave_id,
                function: request.function,
                start_addr: Some(request.start_address),
                quantity: Some(request.quantity),
                description: describe_request(&state.map, &request),
                ..Default::default()
            },
            response_time_ms: None,
        };

        let checked = if request.slave_id != state.config.unit_id {
            Err(ExceptionCode::GatewayTargetFailedToRespond)
        } else {
            validate(&state.map, &request)
        };
        if let Err(code) = checked {
            debug!("Request rejected: {}", code.description());
            let response_time_ms = state.response_time_ms(load);
            self.log.append(tx);
            self.answer_exception(&mut state, &request, code, started, response_time_ms);
            return TransactionOutcome::Exception {
                code,
                response_time_ms,
            };
        }

        let offline = state
            .map
            .sensors_in_range(request.start_address, request.quantity)
            .into_iter()
            .any(|id| {
                state.config.errors.offline_sensors.contains(&id)
                    || snapshot.reading(id).is_some_and(|r| !r.is_online())
            });
        if offline {
            debug!("Request touches an offline sensor: {}", tx.parsed.description);
            return self.time_out(&state, tx, TimeoutReason::Offline);
        }

        let bias = snapshot.fault_bias();
        let timeout_rate = state.config.errors.timeout_rate.max(bias.timeout_rate);
        if state.draw(timeout_rate) {
            debug!("Simulated timeout: {}", tx.parsed.description);
            return self.time_out(&state, tx, TimeoutReason::Random);
        }

        let error_rate = state.config.errors.error_rate;
        if state.draw(error_rate) {
            debug!("Simulated device failure: {}", tx.parsed.description);
            let code = ExceptionCode::ServerDeviceFailure;
            let response_time_ms = state.response_time_ms(load);
            self.log.append(tx);
            self.answer_exception(&mut state, &request, code, started, response_time_ms);
            return TransactionOutcome::Exception {
                code,
                response_time_ms,
            };
        }

        let values = snapshot
            .read(request.start_address, request.quantity)
            .unwrap_or_default();
        let crc_rate = state.config.errors.crc_error_rate.max(bias.crc_error_rate);
        let crc_error = state.draw(crc_rate);
        let response_time_ms = state.response_time_ms(load);

        let mut response = frame::read_response(request.slave_id, request.function, &values);
        let mut parsed = ParsedFrame {
            slave_id: request.slave_id,
            function: request.function,
            byte_count: Some((values.len() * 2) as u8),
            values: Some(values.clone()),
            description: describe_values(&state.map, request.start_address, &values),
            ..Default::default()
        };
        if crc_error {
            debug!("Simulated CRC corruption: {}", tx.parsed.description);
            frame::corrupt_crc(&mut response);
            parsed.error = Some("crc_error".to_string());
        }

        self.log.append(tx);
        self.answer(&mut state, started, response_time_ms, &response, parsed);

        if crc_error {
            TransactionOutcome::CrcError {
                values,
                response_time_ms,
            }
        } else {
            TransactionOutcome::Success {
                values,
                response_time_ms,
            }
        }
    }

    fn time_out(&self, state: &DeviceState, mut tx: LogEntry, reason: TimeoutReason) -> TransactionOutcome {
        let timeout_ms = state.config.timing.timeout_ms;
        tx.parsed.error = Some(reason.as_str().to_string());
        tx.parsed.timeout_ms = Some(timeout_ms);
        self.log.append(tx);
        TransactionOutcome::Timeout { reason, timeout_ms }
    }

    fn answer_exception(
        &self,
        state: &mut DeviceState,
        request: &ReadRequest,
        code: ExceptionCode,
        started: DateTime<Utc>,
        response_time_ms: f64,
    ) {
        let response = frame::exception_response(request.slave_id, request.function, code);
        let parsed = ParsedFrame {
            slave_id: request.slave_id,
            function: request.function | frame::EXCEPTION_FLAG,
            description: format!("Exception {:02X}: {}", code.code(), code.description()),
            error: Some(code.as_str().to_string()),
            exception_code: Some(code.code()),
            ..Default::default()
        };
        self.answer(state, started, response_time_ms, &response, parsed);
    }

    fn answer(
        &self,
        state: &mut DeviceState,
        started: DateTime<Utc>,
        response_time_ms: f64,
        response: &[u8],
        parsed: ParsedFrame,
    ) {
        let answered = started + Duration::microseconds((response_time_ms * 1000.0).round() as i64);
        state.bus_free_at = Some(answered);
        self.log.append(LogEntry {
            timestamp: answered,
            direction: Direction::Rx,
            raw_hex: encode_spaced(response),
            parsed,
            response_time_ms: Some(response_time_ms),
        });
    }
}
