//! Synthetic history
//!
//! A daily cycle peaking at noon UTC, uniform noise, optional gaps and
//! occasional limit excursions so detection has something to report.

use std::f64::consts::PI;

use chrono::{DateTime, Duration, Timelike, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sensor_model::{
    combine, round1, status_for, CombinedStatus, FrameSample, Quantity, SensorId, ValueRange,
};

use crate::config::ArchiveConfig;

/// Seeded source of per-sensor history
pub struct Backfill<'a> {
    config: &'a ArchiveConfig,
    rng: StdRng,
}

impl<'a> Backfill<'a> {
    pub fn new(config: &'a ArchiveConfig) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(config.backfill.seed),
        }
    }

    /// Samples for `sensor_id` every `data_resolution_ms` over `[start, end)`
    pub fn series(
        &mut self,
        sensor_id: SensorId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<(DateTime<Utc>, FrameSample)> {
        let step = Duration::milliseconds(self.config.data_resolution_ms as i64);
        let gaps = self.config.backfill.gaps;
        let mut samples = Vec::new();
        let mut at = start;
        while at < end {
            if gaps.enabled && self.rng.gen_bool(gaps.probability) {
                let minutes = self.rng.gen_range(1..=i64::from(gaps.max_duration_minutes));
                at += Duration::minutes(minutes);
                continue;
            }
            samples.push((at, self.sample(sensor_id, at)));
            at += step;
        }
        samples
    }

    fn sample(&mut self, sensor_id: SensorId, at: DateTime<Utc>) -> FrameSample {
        let hour = f64::from(at.num_seconds_from_midnight()) / 3600.0;
        let daily = ((hour - 6.0) * PI / 12.0).sin();
        let profile = &self.config.backfill.profile;
        let offset = f64::from(sensor_id - 1) * profile.sensor_offset;

        let mut temperature = profile.temperature.base
            + offset
            + profile.temperature.daily_amplitude * daily
            + self.noise(profile.temperature.variation);
        let mut humidity = profile.humidity.base - profile.humidity.daily_amplitude * daily
            + self.noise(profile.humidity.variation);

        if self.rng.gen_bool(self.config.events.event_frequency) {
            let quantity = if self.rng.gen_bool(0.5) {
                Quantity::Temperature
            } else {
                Quantity::Humidity
            };
            let value = self.excursion(quantity);
            match quantity {
                Quantity::Temperature => temperature = value,
                Quantity::Humidity => humidity = value,
            }
        }

        let temperature = round1(ValueRange::temperature().clamp(temperature));
        let humidity = round1(ValueRange::humidity().clamp(humidity));
        let limits = &self.config.limits;
        let status = combine(
            status_for(temperature, &limits.temperature),
            status_for(humidity, &limits.humidity),
        );
        FrameSample {
            sensor_id,
            temperature: Some(temperature),
            humidity: Some(humidity),
            status,
        }
    }

    fn noise(&mut self, variation: f64) -> f64 {
        if variation > 0.0 {
            self.rng.gen_range(-variation..=variation)
        } else {
            0.0
        }
    }

    /// A value past one of the limits, by up to one and a half alarm deltas
    fn excursion(&mut self, quantity: Quantity) -> f64 {
        let limit = self.config.limits.limit(quantity);
        let excess = self.rng.gen_range(0.5..=0.5 + limit.alarm_delta * 1.5);
        if self.rng.gen_bool(0.5) {
            limit.max + excess
        } else {
            limit.min - excess
        }
    }
}
