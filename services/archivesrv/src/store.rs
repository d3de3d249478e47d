//! In-memory per-sensor series

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use sensor_model::{CombinedStatus, FrameSample, SensorId};
use serde::{Deserialize, Serialize};

/// One stored native sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArchivePoint {
    pub timestamp: DateTime<Utc>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub status: CombinedStatus,
}

impl ArchivePoint {
    pub fn from_sample(timestamp: DateTime<Utc>, sample: &FrameSample) -> Self {
        if sample.status == CombinedStatus::Offline {
            return Self {
                timestamp,
                temperature: None,
                humidity: None,
                status: CombinedStatus::Offline,
            };
        }
        Self {
            timestamp,
            temperature: sample.temperature,
            humidity: sample.humidity,
            status: sample.status,
        }
    }
}

/// Series kept strictly increasing by timestamp
#[derive(Debug, Default)]
pub struct SeriesStore {
    series: BTreeMap<SensorId, VecDeque<ArchivePoint>>,
}

impl SeriesStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `point`; rejected unless newer than the series tail
    pub fn push(&mut self, sensor_id: SensorId, point: ArchivePoint) -> bool {
        let series = self.series.entry(sensor_id).or_default();
        if series.back().is_some_and(|last| last.timestamp >= point.timestamp) {
            return false;
        }
        series.push_back(point);
        true
    }

    pub fn contains(&self, sensor_id: SensorId) -> bool {
        self.series.contains_key(&sensor_id)
    }

    /// Points in `[from, to)`, ascending
    pub fn range(&self, sensor_id: SensorId, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<ArchivePoint> {
        let Some(series) = self.series.get(&sensor_id) else {
            return Vec::new();
        };
        if from >= to {
            return Vec::new();
        }
        let start = series.partition_point(|p| p.timestamp < from);
        let end = series.partition_point(|p| p.timestamp < to);
        series.range(start..end).copied().collect()
    }

    /// Drop every point strictly older than `cutoff`
    pub fn prune_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let mut removed = 0;
        for series in self.series.values_mut() {
            let stale = series.partition_point(|p| p.timestamp < cutoff);
            series.drain(..stale);
            removed += stale;
        }
        removed
    }

    /// Forget sensors above `sensor_count`
    pub fn retain_sensors(&mut self, sensor_count: u16) {
        self.series.retain(|id, _| *id <= sensor_count);
    }

    pub fn clear(&mut self) {
        self.series.clear();
    }

    pub fn sensor_count(&self) -> usize {
        self.series.len()
    }

    pub fn total_records(&self) -> usize {
        self.series.values().map(VecDeque::len).sum()
    }
}
