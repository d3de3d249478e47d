//! Modbus server subsystem
//!
//! Owns the generator state, the simulated device and the tick scheduler. Client
//! requests go straight to the device and never wait on a tick.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::ticker::spawn_ticking;
use common::{IntervalTicker, SharedClock, TaskLifecycle, Ticker};
use errors::{SimError, SimResult};
use parking_lot::{Mutex, RwLock};
use sensor_model::{generator, GeneratorState, Scenario, SensorId, SensorOverride};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ModbusConfig;
use crate::frame::ReadRequest;
use crate::log::{LogDocument, LogStatistics};
use crate::registers::SensorRegisters;
use crate::simulator::{ModbusDevice, TransactionOutcome};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModbusStatus {
    pub running: bool,
    pub unit_id: u8,
    pub sensor_count: u16,
    pub scenario: Scenario,
    pub update_interval_ms: u64,
    pub ticks: u64,
    pub statistics: LogStatistics,
}

#[derive(Debug)]
pub struct ModbusServer {
    config: RwLock<ModbusConfig>,
    generator: Mutex<GeneratorState>,
    device: ModbusDevice,
    clock: SharedClock,
    lifecycle: TaskLifecycle,
}

impl ModbusServer {
    pub fn new(config: ModbusConfig, clock: SharedClock) -> SimResult<Self> {
        config.validate()?;
        let state = GeneratorState::new(&config.generator(), config.seed);
        let device = ModbusDevice::new(config.device(), config.seed, clock.clone(), state.readings())?;
        Ok(Self {
            config: RwLock::new(config),
            generator: Mutex::new(state),
            device,
            clock,
            lifecycle: TaskLifecycle::new(),
        })
    }

    pub fn config(&self) -> ModbusConfig {
        self.config.read().clone()
    }

    /// Validate and swap the configuration, restarting the scheduler if it was running
    pub async fn set_config(self: &Arc<Self>, config: ModbusConfig) -> SimResult<()> {
        if let Err(e) = config.validate() {
            warn!("Modbus config rejected: {}", e);
            return Err(e);
        }
        let was_running = self.stop().await;

        let previous = self.config();
        self.device.set_config(config.device())?;
        if config.seed != previous.seed || config.sensor_count != previous.sensor_count {
            let state = GeneratorState::new(&config.generator(), config.seed);
            self.device
                .publish(self.clock.now(), state.readings(), state.fault_bias());
            *self.generator.lock() = state;
        }
        *self.config.write() = config;
        info!("Modbus config updated");

        if was_running {
            self.start();
        }
        Ok(())
    }

    /// Advance the generator one tick and publish the registers
    pub fn tick_at(&self, now: DateTime<Utc>) {
        let generator_config = self.config.read().generator();
        let mut state = self.generator.lock();
        let next = generator::tick(&generator_config, &state, now);
        self.device.publish(now, next.readings(), next.fault_bias());
        *state = next;
    }

    pub fn ticks(&self) -> u64 {
        self.generator.lock().ticks()
    }

    /// Start ticking every `update_interval_ms`
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self: &Arc<Self>) -> bool {
        let period = Duration::from_millis(self.config.read().update_interval_ms);
        self.start_with_ticker(IntervalTicker::new(period, self.clock.clone()))
    }

    pub fn start_with_ticker<T: Ticker + 'static>(self: &Arc<Self>, ticker: T) -> bool {
        let server = Arc::clone(self);
        let started = self.lifecycle.start_with(move |token| {
            spawn_ticking("modbus", ticker, token, move |at| server.tick_at(at))
        });
        if started {
            info!("Modbus subsystem started");
        }
        started
    }

    pub async fn stop(&self) -> bool {
        let stopped = self.lifecycle.stop().await;
        if stopped {
            info!("Modbus subsystem stopped");
        }
        stopped
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    pub fn set_scenario(&self, scenario: Scenario) {
        self.config.write().scenario = scenario;
        info!("Modbus scenario set to {}", scenario.as_str());
    }

    pub fn handle_request(&self, request: ReadRequest) -> TransactionOutcome {
        self.device.handle(request)
    }

    pub fn registers(&self) -> BTreeMap<SensorId, SensorRegisters> {
        self.device.registers().sensors()
    }

    pub fn set_register(&self, address: u16, raw: u16) -> SimResult<()> {
        self.device.set_register(address, raw)
    }

    /// Pin the base of one sensor; `None` for both clears the override
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
        if sensor_id == 0 || sensor_id > config.sensor_count {
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
        info!("Modbus log cleared");
    }

    pub fn status(&self) -> ModbusStatus {
        let config = self.config.read();
        ModbusStatus {
            running: self.is_running(),
            unit_id: config.unit_id,
            sensor_count: config.sensor_count,
            scenario: config.scenario,
            update_interval_ms: config.update_interval_ms,
            ticks: self.ticks(),
            statistics: self.device.log().statistics(),
        }
    }
}
