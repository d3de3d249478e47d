//! Bounded TX/RX transaction log
//!
//! Entries live in a ring buffer; the oldest are evicted first once
//! `max_entries` is reached. Statistics are computed over the entries currently
//! held, so a clear resets them too.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sensor_model::round2;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Tx,
    Rx,
}

/// Decoded view of a logged frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedFrame {
    pub slave_id: u8,
    pub function: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_addr: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byte_count: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<u16>>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_code: Option<u8>,
    /// Set on a TX that never got an answer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    pub raw_hex: String,
    pub parsed: ParsedFrame,
    pub response_time_ms: Option<f64>,
}

impl LogEntry {
    pub fn is_timeout(&self) -> bool {
        self.direction == Direction::Tx && self.parsed.timeout_ms.is_some()
    }

    pub fn is_error(&self) -> bool {
        self.direction == Direction::Rx && self.parsed.error.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogStatistics {
    pub total_entries: usize,
    pub tx_count: usize,
    pub rx_count: usize,
    pub error_count: usize,
    pub timeout_count: usize,
    pub avg_response_time_ms: f64,
    pub min_response_time_ms: f64,
    pub max_response_time_ms: f64,
}

impl LogStatistics {
    fn from_entries<'a>(entries: impl Iterator<Item = &'a LogEntry>) -> Self {
        let mut stats = Self::default();
        let mut times = Vec::new();
        for entry in entries {
            stats.total_entries += 1;
            match entry.direction {
                Direction::Tx => stats.tx_count += 1,
                Direction::Rx => stats.rx_count += 1,
            }
            if entry.is_error() {
                stats.error_count += 1;
            }
            if entry.is_timeout() {
                stats.timeout_count += 1;
            }
            if let Some(ms) = entry.response_time_ms {
                times.push(ms);
            }
        }
        if !times.is_empty() {
            let sum: f64 = times.iter().sum();
            stats.avg_response_time_ms = round2(sum / times.len() as f64);
            stats.min_response_time_ms = round2(times.iter().copied().fold(f64::INFINITY, f64::min));
            stats.max_response_time_ms =
                round2(times.iter().copied().fold(f64::NEG_INFINITY, f64::max));
        }
        stats
    }
}

/// Serialized form of the log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogDocument {
    pub max_entries: usize,
    pub entries: Vec<LogEntry>,
    pub statistics: LogStatistics,
}

#[derive(Debug)]
struct LogInner {
    entries: VecDeque<LogEntry>,
    max_entries: usize,
}

impl LogInner {
    fn trim(&mut self) {
        while self.entries.len() > self.max_entries {
            self.entries.pop_front();
        }
    }
}

#[derive(Debug)]
pub struct TransactionLog {
    inner: RwLock<LogInner>,
}

impl TransactionLog {
    /// A capacity of 0 is raised to 1
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: RwLock::new(LogInner {
                entries: VecDeque::with_capacity(max_entries.clamp(1, 4096)),
                max_entries: max_entries.max(1),
            }),
        }
    }

    pub fn append(&self, entry: LogEntry) {
        let mut inner = self.inner.write();
        inner.entries.push_back(entry);
        inner.trim();
    }

    /// Newest `limit` entries, oldest first
    pub fn entries(&self, limit: usize) -> Vec<LogEntry> {
        let inner = self.inner.read();
        let skip = inner.entries.len().saturating_sub(limit);
        inner.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_entries(&self) -> usize {
        self.inner.read().max_entries
    }

    /// Change the capacity, evicting the oldest entries right away
    pub fn set_max_entries(&self, max_entries: usize) {
        let mut inner = self.inner.write();
        inner.max_entries = max_entries.max(1);
        inner.trim();
    }

    pub fn clear(&self) {
        self.inner.write().entries.clear();
    }

    pub fn statistics(&self) -> LogStatistics {
        LogStatistics::from_entries(self.inner.read().entries.iter())
    }

    pub fn document(&self, limit: usize) -> LogDocument {
        let inner = self.inner.read();
        let skip = inner.entries.len().saturating_sub(limit);
        LogDocument {
            max_entries: inner.max_entries,
            entries: inner.entries.iter().skip(skip).cloned().collect(),
            statistics: LogStatistics::from_entries(inner.entries.iter()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn entry(seq: i64, direction: Direction, response_time_ms: Option<f64>) -> LogEntry {
        LogEntry {
            timestamp: DateTime::from_timestamp_millis(seq).unwrap(),
            direction,
            raw_hex: String::new(),
            parsed: ParsedFrame {
                slave_id: 16,
                function: 4,
                description: format!("entry {}", seq),
                ..Default::default()
            },
            response_time_ms,
        }
    }

    #[test]
    fn test_evicts_oldest_first() {
        let log = TransactionLog::new(3);
        for seq in 0..5 {
            log.append(entry(seq, Direction::Tx, None));
        }
        let kept: Vec<i64> = log
            .entries(10)
            .iter()
            .map(|e| e.timestamp.timestamp_millis())
            .collect();
        assert_eq!(kept, vec![2, 3, 4]);
    }

    #[test]
    fn test_entries_limit_returns_newest() {
        let log = TransactionLog::new(10);
        for seq in 0..6 {
            log.append(entry(seq, Direction::Tx, None));
        }
        let newest: Vec<i64> = log
            .entries(2)
            .iter()
            .map(|e| e.timestamp.timestamp_millis())
            .collect();
        assert_eq!(newest, vec![4, 5]);
    }

    #[test]
    fn test_set_max_entries_trims_immediately() {
        let log = TransactionLog::new(10);
        for seq in 0..8 {
            log.append(entry(seq, Direction::Tx, None));
        }
        log.set_max_entries(3);
        assert_eq!(log.len(), 3);
        assert_eq!(log.max_entries(), 3);
    }

    #[test]
    fn test_statistics() {
        let log = TransactionLog::new(10);
        log.append(entry(0, Direction::Tx, None));
        log.append(entry(1, Direction::Rx, Some(10.0)));
        log.append(entry(2, Direction::Tx, None));
        log.append(entry(3, Direction::Rx, Some(20.0)));

        let mut timeout = entry(4, Direction::Tx, None);
        timeout.parsed.timeout_ms = Some(1000);
        log.append(timeout);

        let mut failed = entry(5, Direction::Rx, Some(5.5));
        failed.parsed.error = Some("crc_error".to_string());
        log.append(failed);

        let stats = log.statistics();
        assert_eq!(stats.total_entries, 6);
        assert_eq!(stats.tx_count, 3);
        assert_eq!(stats.rx_count, 3);
        assert_eq!(stats.timeout_count, 1);
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.min_response_time_ms, 5.5);
        assert_eq!(stats.max_response_time_ms, 20.0);
        assert_eq!(stats.avg_response_time_ms, 11.83);
    }

    #[test]
    fn test_clear_resets_statistics() {
        let log = TransactionLog::new(10);
        log.append(entry(0, Direction::Rx, Some(12.0)));
        log.clear();
        assert!(log.is_empty());
        assert_eq!(log.statistics(), LogStatistics::default());
    }

    #[test]
    fn test_document_shape() {
        let log = TransactionLog::new(5);
        log.append(entry(0, Direction::Tx, None));
        let json = serde_json::to_value(log.document(100)).unwrap();
        assert_eq!(json["max_entries"], 5);
        assert_eq!(json["entries"][0]["direction"], "TX");
        assert!(json["entries"][0]["response_time_ms"].is_null());
        assert_eq!(json["statistics"]["tx_count"], 1);
    }
}
