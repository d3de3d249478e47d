//! Sensor Value Generator
//!
//! [`tick`] is a pure function: it takes the configuration and the previous
//! [`GeneratorState`] and returns the next one. All randomness comes from the
//! seeded `StdRng` carried inside the state, so the same seed and configuration
//! always yield the same sequence.

use std::collections::{BTreeMap, BTreeSet};
use std::f64::consts::PI;

use chrono::{DateTime, Timelike, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::GeneratorConfig;
use crate::round1;
use crate::scenario::{self, Scenario};
use crate::status::{combine, status_for};
use crate::types::{CombinedStatus, OfflineReason, Quantity, QuantityStatus, SensorId, SensorReading};

/// Share of the variation a normal walk may move per tick
const WALK_STEP: f64 = 0.25;
/// Pull toward the center while inside the band
const REVERSION: f64 = 0.05;
/// Pull toward the band once outside it
const RELAX_RATE: f64 = 0.3;

/// Device-level fault probabilities raised by the active scenario for one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FaultBias {
    pub timeout_rate: f64,
    pub crc_error_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HvacPhase {
    Heating,
    Cooling,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Failure {
    Dark,
    Stuck { temperature: f64, humidity: f64 },
}

/// State that only some scenarios carry between ticks
#[derive(Debug, Clone, Default)]
struct ScenarioMemory {
    drift: f64,
    partial_offline: Option<BTreeSet<SensorId>>,
    hvac: BTreeMap<SensorId, HvacPhase>,
    doors: BTreeMap<SensorId, u32>,
    outage_remaining: u32,
    failures: BTreeMap<SensorId, Failure>,
}

#[derive(Debug, Clone)]
pub struct GeneratorState {
    rng: StdRng,
    ticks: u64,
    scenario: Scenario,
    memory: ScenarioMemory,
    readings: Vec<SensorReading>,
    fault_bias: FaultBias,
}

impl GeneratorState {
    /// Fresh state with every sensor sitting on its base value
    pub fn new(config: &GeneratorConfig, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            ticks: 0,
            scenario: config.scenario,
            memory: ScenarioMemory::default(),
            readings: config
                .sensor_ids()
                .map(|id| initial_reading(config, id))
                .collect(),
            fault_bias: FaultBias::default(),
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn scenario(&self) -> Scenario {
        self.scenario
    }

    pub fn readings(&self) -> &[SensorReading] {
        &self.readings
    }

    pub fn reading(&self, sensor_id: SensorId) -> Option<&SensorReading> {
        let index = usize::from(sensor_id.checked_sub(1)?);
        match self.readings.get(index) {
            Some(r) if r.sensor_id == sensor_id => Some(r),
            _ => self.readings.iter().find(|r| r.sensor_id == sensor_id),
        }
    }

    pub fn fault_bias(&self) -> FaultBias {
        self.fault_bias
    }
}

/// Advance every sensor by one tick
///
/// `now` only matters for time-of-day scenarios. Sensors added by a larger
/// `sensor_count` start from their base; removed sensors are dropped.
pub fn tick(config: &GeneratorConfig, previous: &GeneratorState, now: DateTime<Utc>) -> GeneratorState {
    let mut next = previous.clone();
    if next.scenario != config.scenario {
        debug!(
            "Scenario changed from {} to {}, resetting scenario state",
            next.scenario, config.scenario
        );
        next.memory = ScenarioMemory::default();
        next.scenario = config.scenario;
    }
    next.ticks += 1;
    next.fault_bias = FaultBias::default();

    let GeneratorState {
        rng,
        ticks,
        memory,
        fault_bias,
        ..
    } = &mut next;

    // Scenario-wide updates
    let mut in_outage = false;
    match config.scenario {
        Scenario::DriftUp => memory.drift += scenario::DRIFT_RATE,
        Scenario::DriftDown => memory.drift -= scenario::DRIFT_RATE,
        Scenario::Timeout => fault_bias.timeout_rate = scenario::TIMEOUT_SCENARIO_RATE,
        Scenario::CrcError => fault_bias.crc_error_rate = scenario::CRC_SCENARIO_RATE,
        Scenario::PartialOffline => {
            if memory.partial_offline.is_none() {
                let chosen: BTreeSet<SensorId> = config
                    .sensor_ids()
                    .filter(|_| rng.gen_bool(scenario::PARTIAL_OFFLINE_PROBABILITY))
                    .collect();
                info!("Partial offline scenario selected sensors {:?}", chosen);
                memory.partial_offline = Some(chosen);
            }
        },
        Scenario::PowerOutage => {
            if memory.outage_remaining > 0 {
                memory.outage_remaining -= 1;
                in_outage = true;
            } else if rng.gen_bool(scenario::OUTAGE_PROBABILITY) {
                let (lo, hi) = scenario::OUTAGE_TICKS;
                let duration = rng.gen_range(lo..=hi);
                info!("Simulated power outage for {} ticks", duration);
                memory.outage_remaining = duration - 1;
                in_outage = true;
            }
        },
        _ => {},
    }

    let t_range = config.values.temperature;
    let h_range = config.values.humidity;
    let tick_index = *ticks;

    let readings = config
        .sensor_ids()
        .map(|id| {
            let prev = previous
                .reading(id)
                .cloned()
                .unwrap_or_else(|| initial_reading(config, id));
            let base_t = config.base_for(id, Quantity::Temperature);
            let base_h = config.base_for(id, Quantity::Humidity);

            let mut offline = None;
            let mut t = walk(rng, prev.temperature, base_t, t_range.variation);
            let mut h = walk(rng, prev.humidity, base_h, h_range.variation);

            match config.scenario {
                Scenario::Normal | Scenario::Timeout | Scenario::CrcError => {},
                Scenario::DriftUp | Scenario::DriftDown => {
                    t = walk(rng, prev.temperature, base_t + memory.drift, t_range.variation);
                    h = walk(rng, prev.humidity, base_h - memory.drift * 0.5, h_range.variation);
                },
                Scenario::Sine => {
                    let phase = f64::from(id - 1) * 2.0 * PI / 10.0;
                    let x = 2.0 * PI * tick_index as f64 / scenario::SINE_PERIOD_TICKS + phase;
                    let noise_t = rng.gen_range(-0.1..=0.1) * t_range.variation;
                    let noise_h = rng.gen_range(-0.1..=0.1) * h_range.variation;
                    t = base_t + scenario::SINE_AMPLITUDE * x.sin() + noise_t;
                    h = base_h - 2.0 * scenario::SINE_AMPLITUDE * x.sin() + noise_h;
                },
                Scenario::Offline => offline = Some(OfflineReason::Scenario),
                Scenario::Intermittent => {
                    if rng.gen_bool(scenario::INTERMITTENT_FAILURE_RATE) {
                        offline = Some(OfflineReason::Scenario);
                    }
                },
                Scenario::PartialOffline => {
                    if memory
                        .partial_offline
                        .as_ref()
                        .is_some_and(|set| set.contains(&id))
                    {
                        offline = Some(OfflineReason::Scenario);
                    }
                },
                Scenario::DailyCycle => {
                    let hour = f64::from(now.hour()) + f64::from(now.minute()) / 60.0;
                    let day_share = ((hour - 8.0) * PI / 12.0).sin() * 0.5 + 0.5;
                    let target_t = scenario::NIGHT_TEMPERATURE
                        + (scenario::DAY_TEMPERATURE - scenario::NIGHT_TEMPERATURE) * day_share
                        + (base_t - t_range.base);
                    let target_h = base_h + (0.5 - day_share) * 2.0 * h_range.variation;
                    t = walk(rng, prev.temperature, target_t, t_range.variation * 0.5);
                    h = walk(rng, prev.humidity, target_h, h_range.variation * 0.5);
                },
                Scenario::HvacControl => {
                    let phase = memory.hvac.entry(id).or_insert(
                        if prev.temperature > scenario::HVAC_SETPOINT {
                            HvacPhase::Cooling
                        } else {
                            HvacPhase::Heating
                        },
                    );
                    let noise = rng.gen_range(-0.05..=0.05);
                    t = match phase {
                        HvacPhase::Heating => prev.temperature + scenario::HVAC_RATE + noise,
                        HvacPhase::Cooling => prev.temperature - scenario::HVAC_RATE + noise,
                    };
                    if *phase == HvacPhase::Heating
                        && t >= scenario::HVAC_SETPOINT + scenario::HVAC_HYSTERESIS
                    {
                        *phase = HvacPhase::Cooling;
                    } else if *phase == HvacPhase::Cooling
                        && t <= scenario::HVAC_SETPOINT - scenario::HVAC_HYSTERESIS
                    {
                        *phase = HvacPhase::Heating;
                    }
                },
                Scenario::DoorOpen => {
                    let remaining = memory.doors.get(&id).copied().unwrap_or(0);
                    let open = if remaining > 0 {
                        if remaining == 1 {
                            memory.doors.remove(&id);
                        } else {
                            memory.doors.insert(id, remaining - 1);
                        }
                        true
                    } else if rng.gen_bool(scenario::DOOR_OPEN_PROBABILITY) {
                        let (lo, hi) = scenario::DOOR_OPEN_TICKS;
                        let duration = rng.gen_range(lo..=hi);
                        debug!("Door at sensor {} open for {} ticks", id, duration);
                        memory.doors.insert(id, duration - 1);
                        true
                    } else {
                        false
                    };
                    if open {
                        t = prev.temperature
                            + (scenario::DOOR_OUTSIDE_TEMPERATURE - prev.temperature) * 0.2;
                    }
                },
                Scenario::PowerOutage => {
                    if in_outage {
                        offline = Some(OfflineReason::NoPower);
                    }
                },
                Scenario::SensorFailure => {
                    if !memory.failures.contains_key(&id)
                        && rng.gen_bool(scenario::SENSOR_FAILURE_RATE)
                    {
                        let failure = if rng.gen_bool(0.5) {
                            Failure::Dark
                        } else {
                            Failure::Stuck {
                                temperature: if rng.gen_bool(0.5) { t_range.max } else { t_range.min },
                                humidity: if rng.gen_bool(0.5) { h_range.max } else { h_range.min },
                            }
                        };
                        info!("Sensor {} failed: {:?}", id, failure);
                        memory.failures.insert(id, failure);
                    }
                    match memory.failures.get(&id) {
                        Some(Failure::Dark) => offline = Some(OfflineReason::SensorFailure),
                        Some(Failure::Stuck {
                            temperature,
                            humidity,
                        }) => {
                            t = *temperature;
                            h = *humidity;
                        },
                        None => {},
                    }
                },
            }

            if config.offline_sensors.contains(&id) {
                offline = Some(OfflineReason::Configured);
            }

            evaluate(config, id, t, h, offline)
        })
        .collect();

    next.readings = readings;
    next
}

/// Bounded random walk around `center`
///
/// Inside `center ± variation` the value takes a small random step and is held in
/// the band. Outside it (after a base change or a transient) it relaxes back.
fn walk(rng: &mut StdRng, previous: f64, center: f64, variation: f64) -> f64 {
    let step = rng.gen_range(-1.0..=1.0) * variation * WALK_STEP;
    let low = center - variation;
    let high = center + variation;
    if previous < low || previous > high {
        previous + (center - previous) * RELAX_RATE + step * 0.5
    } else {
        (previous + step + (center - previous) * REVERSION).clamp(low, high)
    }
}

fn initial_reading(config: &GeneratorConfig, id: SensorId) -> SensorReading {
    let offline = config
        .offline_sensors
        .contains(&id)
        .then_some(OfflineReason::Configured);
    evaluate(
        config,
        id,
        config.base_for(id, Quantity::Temperature),
        config.base_for(id, Quantity::Humidity),
        offline,
    )
}

/// Round, clamp to the physical range and derive statuses
fn evaluate(
    config: &GeneratorConfig,
    id: SensorId,
    temperature: f64,
    humidity: f64,
    offline: Option<OfflineReason>,
) -> SensorReading {
    let temperature = config.values.temperature.clamp(round1(temperature));
    let humidity = config.values.humidity.clamp(round1(humidity));

    let (temperature_status, humidity_status, combined_status) = if offline.is_some() {
        (
            QuantityStatus::Offline,
            QuantityStatus::Offline,
            CombinedStatus::Offline,
        )
    } else {
        let ts = status_for(temperature, &config.limits.temperature);
        let hs = status_for(humidity, &config.limits.humidity);
        (ts, hs, combine(ts, hs))
    };

    SensorReading {
        sensor_id: id,
        temperature,
        humidity,
        temperature_status,
        humidity_status,
        combined_status,
        offline,
    }
}
