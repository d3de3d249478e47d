//! Current-value poller
//!
//! Every cycle advances the generator, publishes the registers on the poller's own
//! simulated slave, then reads each sensor back over the simulated bus: one value
//! read and one status read per sensor. What the master decodes becomes the
//! snapshot, so injected faults show up as `null` values.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::fs::write_json_atomic;
use common::ticker::spawn_ticking;
use common::{IntervalTicker, SharedClock, TaskLifecycle, Ticker};
use errors::{SimError, SimErrorTrait, SimResult};
use modbussrv::registers::{decode_value, RegisterKind, RegisterMap};
use modbussrv::{LogDocument, ModbusDevice, ReadRequest, TransactionOutcome};
use parking_lot::{Mutex, RwLock};
use sensor_model::{
    generator, CombinedStatus, FrameSink, GeneratorState, Quantity, QuantityStatus, Scenario,
    SensorId, SensorOverride,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn, Level};

use crate::config::CurrentConfig;
use crate::snapshot::{
    CurrentSnapshot, ModbusStatus, PollStatistics, QuantitySnapshot, SensorSnapshot,
};

const COM_PORT: &str = "MOCK";
const BAUDRATE: u32 = 9600;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentStatus {
    pub running: bool,
    pub scenario: Scenario,
    pub poll_period_ms: u64,
    pub sensor_count: u16,
    pub current_file: PathBuf,
    pub log_file: PathBuf,
    pub statistics: PollStatistics,
}

fn modbus_status(outcome: &TransactionOutcome) -> ModbusStatus {
    match outcome {
        TransactionOutcome::Success { .. } => ModbusStatus::Ok,
        TransactionOutcome::Timeout { .. } => ModbusStatus::Timeout,
        TransactionOutcome::Exception { .. } => ModbusStatus::Error,
        TransactionOutcome::CrcError { .. } => ModbusStatus::CrcError,
    }
}

/// Decoded result of one register pair read
enum PairRead {
    Words([u16; 2]),
    Failed(ModbusStatus, String),
}

pub struct CurrentService {
    config: RwLock<CurrentConfig>,
    generator: Mutex<GeneratorState>,
    device: ModbusDevice,
    statistics: Mutex<PollStatistics>,
    last: RwLock<Option<CurrentSnapshot>>,
    sinks: RwLock<Vec<Arc<dyn FrameSink>>>,
    clock: SharedClock,
    lifecycle: TaskLifecycle,
}

impl CurrentService {
    pub fn new(config: CurrentConfig, clock: SharedClock) -> SimResult<Self> {
        config.validate()?;
        let state = GeneratorState::new(&config.generator(), config.seed);
        let device = ModbusDevice::new(config.device(), config.seed, clock.clone(), state.readings())?;
        Ok(Self {
            config: RwLock::new(config),
            generator: Mutex::new(state),
            device,
            statistics: Mutex::new(PollStatistics::default()),
            last: RwLock::new(None),
            sinks: RwLock::new(Vec::new()),
            clock,
            lifecycle: TaskLifecycle::new(),
        })
    }

    pub fn config(&self) -> CurrentConfig {
        self.config.read().clone()
    }

    pub async fn set_config(self: &Arc<Self>, config: CurrentConfig) -> SimResult<()> {
        if let Err(e) = config.validate() {
            warn!("Current config rejected: {}", e);
            return Err(e);
        }
        let was_running = self.stop().await;

        {
            let mut generator = self.generator.lock();
            let previous = self.config();
            self.device.set_config(config.device())?;
            if config.seed != previous.seed || config.sensors.count != previous.sensors.count {
                *generator = GeneratorState::new(&config.generator(), config.seed);
                self.device
                    .publish(self.clock.now(), generator.readings(), generator.fault_bias());
            }
            *self.config.write() = config;
        }
        info!("Current config updated");

        if was_running {
            self.start();
        }
        Ok(())
    }

    /// Register a receiver for every completed poll cycle
    pub fn subscribe(&self, sink: Arc<dyn FrameSink>) {
        self.sinks.write().push(sink);
    }

    /// Poll once, persist the documents and notify subscribers
    pub fn generate_once(&self) -> SimResult<CurrentSnapshot> {
        self.generate_at(self.clock.now())
    }

    /// Poll once without writing any file
    ///
    /// The generator still advances, so the next cycle continues from here.
    pub fn preview(&self) -> CurrentSnapshot {
        self.poll(self.clock.now())
    }

    pub fn tick_at(&self, now: DateTime<Utc>) {
        if let Err(e) = self.generate_at(now) {
            match e.log_level() {
                Level::ERROR => error!("Failed to persist current snapshot: {}", e),
                Level::WARN => warn!("Failed to persist current snapshot: {}", e),
                _ => debug!("Failed to persist current snapshot: {}", e),
            }
        }
    }

    fn generate_at(&self, now: DateTime<Utc>) -> SimResult<CurrentSnapshot> {
        let snapshot = self.poll(now);
        let frame = snapshot.to_frame();
        for sink in self.sinks.read().iter() {
            sink.publish(&frame);
        }
        self.persist(&snapshot)?;
        Ok(snapshot)
    }

    fn persist(&self, snapshot: &CurrentSnapshot) -> SimResult<()> {
        let output = self.config.read().output.clone();
        if !output.write_files {
            return Ok(());
        }
        write_json_atomic(&output.current_path(), snapshot)?;
        if output.generate_log {
            let document = self.device.log().document(output.log_max_entries);
            write_json_atomic(&output.log_path(), &document)?;
        }
        debug!("Snapshot written to {}", output.dir.display());
        Ok(())
    }

    fn poll(&self, now: DateTime<Utc>) -> CurrentSnapshot {
        let config = self.config();
        let mut generator = self.generator.lock();
        let next = generator::tick(&config.generator(), &generator, now);
        self.device.publish(now, next.readings(), next.fault_bias());
        *generator = next;

        let map = *self.device.registers().map();
        let mut last_error = None;
        let sensors = (1..=config.sensors.count)
            .map(|id| {
                let (sensor, error) = self.poll_sensor(&config, &map, id, now);
                if error.is_some() {
                    last_error = error;
                }
                sensor
            })
            .collect();

        let statistics = {
            let mut statistics = self.statistics.lock();
            statistics.record(last_error);
            statistics.clone()
        };

        let snapshot = CurrentSnapshot {
            timestamp: now,
            poll_period_ms: config.poll_period_ms,
            com_port: COM_PORT.to_string(),
            baudrate: BAUDRATE,
            scenario: config.scenario,
            sensors,
            statistics,
        };
        *self.last.write() = Some(snapshot.clone());
        snapshot
    }

    fn read_pair(&self, request: ReadRequest, id: SensorId) -> PairRead {
        let outcome = self.device.handle(request);
        let status = modbus_status(&outcome);
        match outcome.into_values() {
            Ok(words) if words.len() == 2 => PairRead::Words([words[0], words[1]]),
            Ok(words) => PairRead::Failed(
                ModbusStatus::Error,
                format!("sensor {}: expected 2 registers, got {}", id, words.len()),
            ),
            Err(e) => PairRead::Failed(status, format!("sensor {}: {}", id, e)),
        }
    }

    fn poll_sensor(
        &self,
        config: &CurrentConfig,
        map: &RegisterMap,
        id: SensorId,
        now: DateTime<Utc>,
    ) -> (SensorSnapshot, Option<String>) {
        let slave = config.sensors.modbus_slave_id;
        let value_address = map.address(RegisterKind::Value, id, Quantity::Temperature);
        let status_address = map.address(RegisterKind::Status, id, Quantity::Temperature);

        let values = self.read_pair(ReadRequest::read_input(slave, value_address, 2), id);
        let statuses = self.read_pair(ReadRequest::read_holding(slave, status_address, 2), id);

        let (quantities, error) = match (values, statuses) {
            (PairRead::Words(values), PairRead::Words(statuses)) => {
                let decoded = Quantity::ALL.map(|quantity| {
                    let index = usize::from(quantity.register_offset());
                    let raw = values[index];
                    QuantitySnapshot {
                        value: Some(decode_value(raw, quantity)),
                        raw: Some(if quantity.is_signed() {
                            i32::from(raw as i16)
                        } else {
                            i32::from(raw)
                        }),
                        address: value_address + quantity.register_offset(),
                        status: QuantityStatus::from_status_word(statuses[index])
                            .unwrap_or(QuantityStatus::Offline),
                        modbus_status: ModbusStatus::Ok,
                        timestamp: now,
                    }
                });
                (decoded, None)
            },
            (PairRead::Failed(status, message), _) | (_, PairRead::Failed(status, message)) => {
                let failed = Quantity::ALL.map(|quantity| {
                    QuantitySnapshot::failed(value_address + quantity.register_offset(), status, now)
                });
                (failed, Some(message))
            },
        };
        let [temperature, humidity] = quantities;

        let mut sensor = SensorSnapshot {
            id,
            name: format!("{} {}", config.sensors.name_prefix, id),
            modbus_slave_id: slave,
            modbus_addr_temp: value_address,
            modbus_addr_hum: value_address + Quantity::Humidity.register_offset(),
            temperature,
            humidity,
            combined_status: CombinedStatus::Offline,
        };
        sensor.derive_combined();
        (sensor, error)
    }

    /// Most recent snapshot, if any cycle has run
    pub fn last_snapshot(&self) -> Option<CurrentSnapshot> {
        self.last.read().clone()
    }

    pub fn start(self: &Arc<Self>) -> bool {
        let period = Duration::from_millis(self.config.read().poll_period_ms);
        self.start_with_ticker(IntervalTicker::new(period, self.clock.clone()))
    }

    pub fn start_with_ticker<T: Ticker + 'static>(self: &Arc<Self>, ticker: T) -> bool {
        let service = Arc::clone(self);
        let started = self.lifecycle.start_with(move |token| {
            spawn_ticking("current", ticker, token, move |at| service.tick_at(at))
        });
        if started {
            info!("Current subsystem started");
        }
        started
    }

    pub async fn stop(&self) -> bool {
        let stopped = self.lifecycle.stop().await;
        if stopped {
            info!("Current subsystem stopped");
        }
        stopped
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    pub fn set_scenario(&self, scenario: Scenario) {
        self.config.write().scenario = scenario;
        info!("Current scenario set to {}", scenario.as_str());
    }

    pub fn set_sensor_value(
        &self,
        sensor_id: SensorId,
        temperature: Option<f64>,
        humidity: Option<f64>,
    ) -> SimResult<()> {
        let pinned = SensorOverride {
            temperature,
            humidity,
        };
        pinned.validate("overrides")?;
        let mut config = self.config.write();
        if sensor_id == 0 || sensor_id > config.sensors.count {
            return Err(SimError::not_found(format!("sensor {}", sensor_id)));
        }
        if temperature.is_none() && humidity.is_none() {
            config.overrides.remove(&sensor_id);
        } else {
            config.overrides.insert(sensor_id, pinned);
        }
        Ok(())
    }

    pub fn modbus_log(&self, limit: usize) -> LogDocument {
        self.device.log().document(limit)
    }

    pub fn clear_log(&self) {
        self.device.log().clear();
        info!("Current poll log cleared");
    }

    pub fn status(&self) -> CurrentStatus {
        let config = self.config.read();
        CurrentStatus {
            running: self.is_running(),
            scenario: config.scenario,
            poll_period_ms: config.poll_period_ms,
            sensor_count: config.sensors.count,
            current_file: config.output.current_path(),
            log_file: config.output.log_path(),
            statistics: self.statistics.lock().clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use common::ManualClock;
    use modbussrv::Direction;
    use sensor_model::SensorFrame;
    use tracing_test::traced_test;

    fn config_in(dir: &std::path::Path) -> CurrentConfig {
        let mut config = CurrentConfig::default();
        config.sensors.count = 3;
        config.output.dir = dir.to_path_buf();
        config
    }

    fn service(config: CurrentConfig) -> CurrentService {
        let clock = ManualClock::from_millis(1_700_000_000_000);
        CurrentService::new(config, clock.shared()).unwrap()
    }

    #[derive(Default)]
    struct Collect(Mutex<Vec<SensorFrame>>);

    impl FrameSink for Collect {
        fn publish(&self, frame: &SensorFrame) {
            self.0.lock().push(frame.clone());
        }
    }

    #[test]
    fn test_clean_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(config_in(dir.path()));
        let snapshot = service.generate_once().unwrap();

        assert_eq!(snapshot.sensors.len(), 3);
        assert_eq!(snapshot.com_port, "MOCK");
        assert_eq!(snapshot.baudrate, 9600);
        let sensor = snapshot.sensor(2).unwrap();
        assert_eq!(sensor.name, "Sensor 2");
        assert_eq!(sensor.modbus_addr_temp, 30002);
        assert_eq!(sensor.modbus_addr_hum, 30003);
        assert_eq!(sensor.temperature.modbus_status, ModbusStatus::Ok);
        assert!(sensor.temperature.value.is_some());
        assert_eq!(snapshot.statistics.successful_polls, 1);

        // one value read and one status read per sensor
        let log = service.modbus_log(100);
        assert_eq!(log.statistics.tx_count, 6);
        assert_eq!(log.statistics.rx_count, 6);
        assert_eq!(log.entries[2].direction, Direction::Tx);
        assert_eq!(log.entries[2].parsed.function, 0x03);
    }

    #[test]
    fn test_generate_once_writes_documents() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(config_in(dir.path()));
        let snapshot = service.generate_once().unwrap();

        let written: CurrentSnapshot =
            common::fs::read_json(&dir.path().join("current.json")).unwrap();
        assert_eq!(written, snapshot);

        let log: LogDocument = common::fs::read_json(&dir.path().join("modbus_log.json")).unwrap();
        assert_eq!(log.entries.len(), 12);
        assert_eq!(log.max_entries, 1000);
    }

    #[test]
    fn test_preview_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(config_in(dir.path()));
        let snapshot = service.preview();
        assert_eq!(snapshot.statistics.total_polls, 1);
        assert!(!dir.path().join("current.json").exists());
        assert_eq!(service.last_snapshot(), Some(snapshot));
    }

    #[test]
    fn test_log_file_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.output.generate_log = false;
        let service = service(config);
        service.generate_once().unwrap();
        assert!(dir.path().join("current.json").exists());
        assert!(!dir.path().join("modbus_log.json").exists());
    }

    #[test]
    fn test_offline_sensor_fails_poll() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.errors.offline_sensors.insert(2);
        let service = service(config);
        let snapshot = service.generate_once().unwrap();

        let sensor = snapshot.sensor(2).unwrap();
        assert_eq!(sensor.combined_status, CombinedStatus::Offline);
        assert_eq!(sensor.temperature.value, None);
        assert_eq!(sensor.humidity.modbus_status, ModbusStatus::Timeout);
        assert_eq!(snapshot.statistics.failed_polls, 1);
        assert!(snapshot
            .statistics
            .last_error
            .as_deref()
            .unwrap()
            .starts_with("sensor 2"));
        assert_eq!(snapshot.sensor(1).unwrap().combined_status, CombinedStatus::Ok);
    }

    #[test]
    fn test_crc_fault_yields_null_values() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.errors.crc_error_rate = 1.0;
        let service = service(config);
        let snapshot = service.preview();
        assert!(snapshot
            .sensors
            .iter()
            .all(|s| s.temperature.modbus_status == ModbusStatus::CrcError && s.temperature.value.is_none()));
    }

    #[test]
    fn test_subscribers_receive_frames() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(config_in(dir.path()));
        let sink = Arc::new(Collect::default());
        service.subscribe(sink.clone());

        service.generate_once().unwrap();
        service.preview();
        service.generate_once().unwrap();

        let frames = sink.0.lock();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].sensors.len(), 3);
        assert!(frames[0].sensors[0].temperature.is_some());
    }

    #[test]
    fn test_persistence_failure_still_publishes() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let service = service(config_in(&blocker));
        let sink = Arc::new(Collect::default());
        service.subscribe(sink.clone());

        assert!(service.generate_once().is_err());
        assert_eq!(sink.0.lock().len(), 1);
    }

    #[test]
    fn test_clear_log() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(config_in(dir.path()));
        service.preview();
        service.clear_log();
        let log = service.modbus_log(100);
        assert!(log.entries.is_empty());
        assert_eq!(log.statistics.total_entries, 0);
    }

    #[test]
    fn test_set_sensor_value_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(config_in(dir.path()));
        service.set_sensor_value(3, None, Some(70.0)).unwrap();
        assert_eq!(service.config().overrides[&3].humidity, Some(70.0));
        assert!(matches!(
            service.set_sensor_value(4, Some(1.0), None),
            Err(SimError::NotFound { .. })
        ));
    }

    #[test]
    #[traced_test]
    fn test_failed_persist_is_logged_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, "x").unwrap();
        let service = service(config_in(&blocker.join("out")));

        service.tick_at(Utc::now());
        assert!(logs_contain("ERROR"));
        assert!(logs_contain("Failed to persist current snapshot"));
        assert!(service.last_snapshot().is_some());
    }

    #[test]
    fn test_non_finite_sensor_value_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(config_in(dir.path()));
        assert!(matches!(
            service.set_sensor_value(1, Some(f64::NAN), None),
            Err(SimError::ConfigValidation { .. })
        ));
        assert!(service.config().overrides.is_empty());
        let snapshot = service.preview();
        assert!(snapshot.sensors[0].temperature.value.is_none_or(f64::is_finite));
    }
}
