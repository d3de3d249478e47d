//! Query resolutions and bucket aggregation
//!
//! Buckets are aligned to the UTC epoch: a bucket of width `w` covers
//! `[k*w, (k+1)*w)`. Empty buckets are omitted.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use errors::{validation_error, SimError};
use sensor_model::{CombinedStatus, SensorId};
use serde::{Deserialize, Serialize};

use crate::store::ArchivePoint;

const MINUTE_MS: i64 = 60_000;
const HOUR_MS: i64 = 60 * MINUTE_MS;
pub const DAY_MS: i64 = 24 * HOUR_MS;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    #[default]
    #[serde(alias = "raw")]
    Native,
    Minute,
    Hour,
    Day,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Native => "native",
            Resolution::Minute => "minute",
            Resolution::Hour => "hour",
            Resolution::Day => "day",
        }
    }

    /// Bucket width; `None` for native points
    pub fn width_ms(&self) -> Option<i64> {
        match self {
            Resolution::Native => None,
            Resolution::Minute => Some(MINUTE_MS),
            Resolution::Hour => Some(HOUR_MS),
            Resolution::Day => Some(DAY_MS),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "native" | "raw" => Ok(Resolution::Native),
            "minute" => Ok(Resolution::Minute),
            "hour" => Ok(Resolution::Hour),
            "day" => Ok(Resolution::Day),
            other => Err(validation_error!("unknown resolution '{}'", other)),
        }
    }
}

/// Start of the epoch-aligned bucket of width `width_ms` holding `timestamp`
pub fn align_down(timestamp: DateTime<Utc>, width_ms: i64) -> DateTime<Utc> {
    let ms = timestamp.timestamp_millis();
    DateTime::from_timestamp_millis(ms - ms.rem_euclid(width_ms)).unwrap_or(timestamp)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

impl Aggregate {
    fn over(values: impl Iterator<Item = f64>) -> Option<Self> {
        let (mut count, mut sum) = (0usize, 0.0);
        let (mut min, mut max) = (f64::INFINITY, f64::NEG_INFINITY);
        for v in values {
            count += 1;
            sum += v;
            min = min.min(v);
            max = max.max(v);
        }
        (count > 0).then(|| Aggregate {
            avg: sum / count as f64,
            min,
            max,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AggregatedPoint {
    pub timestamp: DateTime<Utc>,
    pub temperature: Option<Aggregate>,
    pub humidity: Option<Aggregate>,
    pub status: CombinedStatus,
    pub sample_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArchiveRecord {
    Aggregated(AggregatedPoint),
    Native(ArchivePoint),
}

impl ArchiveRecord {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ArchiveRecord::Native(p) => p.timestamp,
            ArchiveRecord::Aggregated(p) => p.timestamp,
        }
    }
}

/// Group ascending points into buckets of `width_ms`
pub fn aggregate(points: &[ArchivePoint], width_ms: i64) -> Vec<AggregatedPoint> {
    points
        .chunk_by(|a, b| align_down(a.timestamp, width_ms) == align_down(b.timestamp, width_ms))
        .map(|bucket| AggregatedPoint {
            timestamp: align_down(bucket[0].timestamp, width_ms),
            temperature: Aggregate::over(bucket.iter().filter_map(|p| p.temperature)),
            humidity: Aggregate::over(bucket.iter().filter_map(|p| p.humidity)),
            status: bucket
                .iter()
                .map(|p| p.status)
                .max()
                .unwrap_or_default(),
            sample_count: bucket.len(),
        })
        .collect()
}

/// Native points when the bucket is no wider than the stored resolution
pub fn shape(points: Vec<ArchivePoint>, resolution: Resolution, native_ms: u64) -> Vec<ArchiveRecord> {
    match resolution.width_ms() {
        Some(width) if width > native_ms as i64 => aggregate(&points, width)
            .into_iter()
            .map(ArchiveRecord::Aggregated)
            .collect(),
        _ => points.into_iter().map(ArchiveRecord::Native).collect(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub sensor_id: SensorId,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub resolution: Resolution,
    pub data: Vec<ArchiveRecord>,
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn at_ms(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    fn point(ms: i64, temperature: Option<f64>, status: CombinedStatus) -> ArchivePoint {
        ArchivePoint {
            timestamp: at_ms(ms),
            temperature,
            humidity: temperature.map(|t| t * 2.0),
            status,
        }
    }

    #[test]
    fn test_resolution_parse() {
        assert_eq!("raw".parse::<Resolution>().unwrap(), Resolution::Native);
        assert_eq!("hour".parse::<Resolution>().unwrap(), Resolution::Hour);
        assert!("week".parse::<Resolution>().is_err());
        let parsed: Resolution = serde_json::from_str("\"raw\"").unwrap();
        assert_eq!(parsed, Resolution::Native);
    }

    #[test]
    fn test_align_down() {
        let ts = at_ms(DAY_MS * 3 + HOUR_MS * 5 + 1234);
        assert_eq!(align_down(ts, DAY_MS), at_ms(DAY_MS * 3));
        assert_eq!(align_down(ts, HOUR_MS), at_ms(DAY_MS * 3 + HOUR_MS * 5));
        assert_eq!(align_down(at_ms(-1), MINUTE_MS), at_ms(-MINUTE_MS));
    }

    #[test]
    fn test_hour_buckets() {
        let base = DAY_MS * 100;
        let points = vec![
            point(base, Some(20.0), CombinedStatus::Ok),
            point(base + MINUTE_MS, Some(22.0), CombinedStatus::Warning),
            point(base + 2 * MINUTE_MS, None, CombinedStatus::Offline),
            point(base + HOUR_MS * 2, Some(25.0), CombinedStatus::Ok),
        ];
        let buckets = aggregate(&points, HOUR_MS);
        assert_eq!(buckets.len(), 2);

        let first = buckets[0];
        assert_eq!(first.timestamp, at_ms(base));
        assert_eq!(first.sample_count, 3);
        assert_eq!(first.status, CombinedStatus::Offline);
        let t = first.temperature.unwrap();
        assert_eq!((t.avg, t.min, t.max), (21.0, 20.0, 22.0));

        let second = buckets[1];
        assert_eq!(second.timestamp, at_ms(base + HOUR_MS * 2));
        let t = second.temperature.unwrap();
        assert_eq!((t.avg, t.min, t.max), (25.0, 25.0, 25.0));
    }

    #[test]
    fn test_all_null_bucket() {
        let points = vec![point(0, None, CombinedStatus::Offline)];
        let buckets = aggregate(&points, HOUR_MS);
        assert_eq!(buckets[0].temperature, None);
        assert_eq!(buckets[0].sample_count, 1);
    }

    #[test]
    fn test_shape_falls_back_to_native() {
        let points = vec![point(0, Some(1.0), CombinedStatus::Ok)];
        let shaped = shape(points.clone(), Resolution::Minute, 60_000);
        assert!(matches!(shaped[0], ArchiveRecord::Native(_)));
        let shaped = shape(points, Resolution::Minute, 1_000);
        assert!(matches!(shaped[0], ArchiveRecord::Aggregated(_)));
    }

    proptest! {
        #[test]
        fn prop_bucket_avg_is_mean(values in proptest::collection::vec(-40.0f64..85.0, 1..50)) {
            let points: Vec<ArchivePoint> = values
                .iter()
                .enumerate()
                .map(|(i, v)| point(i as i64 * 1000, Some(*v), CombinedStatus::Ok))
                .collect();
            let buckets = aggregate(&points, HOUR_MS);
            prop_assert_eq!(buckets.len(), 1);
            let t = buckets[0].temperature.unwrap();
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            prop_assert!((t.avg - mean).abs() < 1e-9);
            prop_assert!(t.min <= t.avg && t.avg <= t.max);
            prop_assert_eq!(buckets[0].sample_count, values.len());
        }
    }
}
