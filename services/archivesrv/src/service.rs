//! Archive subsystem
//!
//! Frames arrive through [`FrameSink`] while the subsystem runs, or through
//! [`ArchiveService::ingest`] directly. A frame is stored only when it is at
//! least one native resolution newer than the last stored frame. Retention is
//! applied lazily on each write and by the periodic sweep.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::ticker::spawn_ticking;
use common::{IntervalTicker, SharedClock, TaskLifecycle, Ticker};
use errors::{SimError, SimResult};
use parking_lot::RwLock;
use sensor_model::{round2, FrameSample, FrameSink, SensorFrame, SensorId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::backfill::Backfill;
use crate::config::ArchiveConfig;
use crate::events::{
    Event, EventDetector, EventDraft, EventFilter, EventPage, EventStatistics, EventStore, Priority,
};
use crate::export;
use crate::query::{align_down, shape, QueryResult, Resolution, DAY_MS};
use crate::store::{ArchivePoint, SeriesStore};

/// Estimated in-memory footprint of one stored point
const BYTES_PER_POINT: usize = 100;

/// Start of the UTC day holding `now - days`
pub fn retention_cutoff(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    align_down(now - chrono::Duration::days(i64::from(days)), DAY_MS)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArchiveDataStatus {
    pub sensor_count: u16,
    pub total_records: usize,
    pub history_days: u32,
    pub resolution_ms: u64,
    pub memory_usage_mb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveStatus {
    pub running: bool,
    pub data: ArchiveDataStatus,
    pub events: EventStatistics,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub removed_points: usize,
    pub removed_events: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillReport {
    pub points: usize,
    pub events: usize,
}

#[derive(Debug, Default)]
struct ArchiveState {
    store: SeriesStore,
    events: EventStore,
    detector: EventDetector,
    last_stored: Option<DateTime<Utc>>,
}

impl ArchiveState {
    fn prune(&mut self, cutoff: DateTime<Utc>) -> CleanupReport {
        CleanupReport {
            removed_points: self.store.prune_before(cutoff),
            removed_events: self.events.prune_before(cutoff),
        }
    }

    /// Store one sample and run detection on it
    fn record(
        &mut self,
        config: &ArchiveConfig,
        timestamp: DateTime<Utc>,
        sample: &FrameSample,
    ) -> (bool, usize) {
        let stored = self
            .store
            .push(sample.sensor_id, ArchivePoint::from_sample(timestamp, sample));
        if !stored || !config.events.include_events {
            return (stored, 0);
        }
        let drafts = self.detector.observe(timestamp, sample, &config.limits);
        let fired = drafts.len();
        for draft in drafts {
            let event = self.events.insert(draft);
            debug!(
                "Event {} {} on sensor {}: {}",
                event.id, event.event_type, event.sensor_id, event.message
            );
        }
        (stored, fired)
    }
}

pub struct ArchiveService {
    config: RwLock<ArchiveConfig>,
    state: RwLock<ArchiveState>,
    clock: SharedClock,
    lifecycle: TaskLifecycle,
}

impl ArchiveService {
    pub fn new(config: ArchiveConfig, clock: SharedClock) -> SimResult<Self> {
        config.validate()?;
        let backfill = config.backfill.enabled;
        let service = Self {
            config: RwLock::new(config),
            state: RwLock::new(ArchiveState::default()),
            clock,
            lifecycle: TaskLifecycle::new(),
        };
        if backfill {
            service.regenerate();
        }
        Ok(service)
    }

    pub fn config(&self) -> ArchiveConfig {
        self.config.read().clone()
    }

    pub async fn set_config(self: &Arc<Self>, config: ArchiveConfig) -> SimResult<()> {
        if let Err(e) = config.validate() {
            warn!("Archive config rejected: {}", e);
            return Err(e);
        }
        let was_running = self.stop().await;

        {
            let mut state = self.state.write();
            state.store.retain_sensors(config.sensor_count);
            state.detector.retain_sensors(config.sensor_count);
            state.prune(retention_cutoff(self.clock.now(), config.history_days));
            *self.config.write() = config;
        }
        info!("Archive config updated");

        if was_running {
            self.start();
        }
        Ok(())
    }

    /// Store `frame` if it is at least one resolution newer than the last one
    ///
    /// Returns the number of points stored.
    pub fn ingest(&self, frame: &SensorFrame) -> usize {
        let config = self.config();
        let mut state = self.state.write();

        if let Some(last) = state.last_stored {
            let elapsed = (frame.timestamp - last).num_milliseconds();
            if elapsed < config.data_resolution_ms as i64 {
                trace!("Frame at {} dropped, {} ms after last stored", frame.timestamp, elapsed);
                return 0;
            }
        }

        state.prune(retention_cutoff(self.clock.now(), config.history_days));

        let mut stored = 0;
        for sample in &frame.sensors {
            if sample.sensor_id == 0 || sample.sensor_id > config.sensor_count {
                debug!("Ignoring sample from unconfigured sensor {}", sample.sensor_id);
                continue;
            }
            if state.record(&config, frame.timestamp, sample).0 {
                stored += 1;
            }
        }
        state.last_stored = Some(frame.timestamp);
        stored
    }

    fn ensure_sensor(&self, sensor_id: SensorId) -> SimResult<()> {
        let known = (1..=self.config.read().sensor_count).contains(&sensor_id)
            || self.state.read().store.contains(sensor_id);
        if known {
            Ok(())
        } else {
            Err(SimError::not_found(format!("sensor {}", sensor_id)))
        }
    }

    /// Points of `sensor_id` in `[from, to)` at `resolution`, ascending
    pub fn query(
        &self,
        sensor_id: SensorId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        resolution: Resolution,
    ) -> SimResult<QueryResult> {
        self.ensure_sensor(sensor_id)?;
        let points = self.state.read().store.range(sensor_id, from, to);
        let native_ms = self.config.read().data_resolution_ms;
        Ok(QueryResult {
            sensor_id,
            from,
            to,
            resolution,
            data: shape(points, resolution, native_ms),
        })
    }

    pub fn events(&self, filter: &EventFilter) -> EventPage {
        self.state.read().events.query(filter)
    }

    pub fn acknowledge(&self, event_id: u64, user: Option<&str>) -> SimResult<Event> {
        let event = self
            .state
            .write()
            .events
            .acknowledge(event_id, user, self.clock.now())?;
        info!(
            "Event {} acknowledged by {}",
            event.id,
            event.acknowledged_by.as_deref().unwrap_or_default()
        );
        Ok(event)
    }

    /// Insert a manual event stamped with the current time
    pub fn add_event(
        &self,
        sensor_id: SensorId,
        priority: Priority,
        message: impl Into<String>,
    ) -> SimResult<Event> {
        self.ensure_sensor(sensor_id)?;
        let draft = EventDraft::manual(self.clock.now(), sensor_id, priority, message);
        Ok(self.state.write().events.insert(draft))
    }

    pub fn event_statistics(&self) -> EventStatistics {
        self.state.read().events.statistics()
    }

    /// Drop points and events older than `days_to_keep` whole days
    pub fn cleanup(&self, days_to_keep: u32) -> CleanupReport {
        let cutoff = retention_cutoff(self.clock.now(), days_to_keep);
        let report = self.state.write().prune(cutoff);
        info!(
            "Archive cleanup before {}: {} points, {} events removed",
            cutoff, report.removed_points, report.removed_events
        );
        report
    }

    /// Discard everything and backfill the retention window with synthetic history
    pub fn regenerate(&self) -> BackfillReport {
        let config = self.config();
        let now = self.clock.now();
        let start = retention_cutoff(now, config.history_days);

        let mut state = ArchiveState::default();
        let mut report = BackfillReport::default();
        let mut backfill = Backfill::new(&config);
        for sensor_id in 1..=config.sensor_count {
            for (timestamp, sample) in backfill.series(sensor_id, start, now) {
                let (stored, fired) = state.record(&config, timestamp, &sample);
                if stored {
                    report.points += 1;
                    state.last_stored = state.last_stored.max(Some(timestamp));
                }
                report.events += fired;
            }
        }
        *self.state.write() = state;

        info!(
            "Archive regenerated from {}: {} points, {} events",
            start, report.points, report.events
        );
        report
    }

    pub fn export_csv(&self, sensor_id: SensorId, from: DateTime<Utc>, to: DateTime<Utc>) -> SimResult<String> {
        self.ensure_sensor(sensor_id)?;
        let points = self.state.read().store.range(sensor_id, from, to);
        export::to_csv(&points)
    }

    pub fn export_json(
        &self,
        sensor_id: SensorId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        resolution: Resolution,
    ) -> SimResult<String> {
        export::to_json(&self.query(sensor_id, from, to, resolution)?)
    }

    pub fn status(&self) -> ArchiveStatus {
        let config = self.config.read();
        let state = self.state.read();
        let total_records = state.store.total_records();
        ArchiveStatus {
            running: self.is_running(),
            data: ArchiveDataStatus {
                sensor_count: config.sensor_count,
                total_records,
                history_days: config.history_days,
                resolution_ms: config.data_resolution_ms,
                memory_usage_mb: round2((total_records * BYTES_PER_POINT) as f64 / 1024.0 / 1024.0),
            },
            events: state.events.statistics(),
        }
    }

    /// Retention sweep
    pub fn tick_at(&self, now: DateTime<Utc>) {
        let history_days = self.config.read().history_days;
        let report = self.state.write().prune(retention_cutoff(now, history_days));
        if report.removed_points > 0 || report.removed_events > 0 {
            debug!(
                "Retention removed {} points, {} events",
                report.removed_points, report.removed_events
            );
        }
    }

    pub fn start(self: &Arc<Self>) -> bool {
        let period = Duration::from_millis(self.config.read().data_resolution_ms);
        self.start_with_ticker(IntervalTicker::new(period, self.clock.clone()))
    }

    pub fn start_with_ticker<T: Ticker + 'static>(self: &Arc<Self>, ticker: T) -> bool {
        let service = Arc::clone(self);
        let started = self.lifecycle.start_with(move |token| {
            spawn_ticking("archive", ticker, token, move |at| service.tick_at(at))
        });
        if started {
            info!("Archive subsystem started");
        }
        started
    }

    pub async fn stop(&self) -> bool {
        let stopped = self.lifecycle.stop().await;
        if stopped {
            info!("Archive subsystem stopped");
        }
        stopped
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }
}

impl FrameSink for ArchiveService {
    fn publish(&self, frame: &SensorFrame) {
        if self.is_running() {
            self.ingest(frame);
        }
    }
}
