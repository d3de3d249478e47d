//! Archive events: edge-triggered detection and an acknowledgeable store

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use errors::{SimError, SimResult};
use sensor_model::{Band, CombinedStatus, FrameSample, LimitsConfig, Quantity, SensorId};
use serde::{Deserialize, Serialize};

pub const DEFAULT_ACK_USER: &str = "operator";
pub const DEFAULT_PAGE_LIMIT: usize = 100;

/// Event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ThresholdHigh,
    ThresholdLow,
    SensorOffline,
    SensorRecovered,
    Manual,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ThresholdHigh => "threshold_high",
            EventType::ThresholdLow => "threshold_low",
            EventType::SensorOffline => "sensor_offline",
            EventType::SensorRecovered => "sensor_recovered",
            EventType::Manual => "manual",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    /// Priority of a threshold crossing `excess` past the violated bound
    pub fn for_excess(excess: f64, warning_delta: f64, alarm_delta: f64) -> Self {
        if excess >= alarm_delta {
            Priority::High
        } else if excess >= warning_delta {
            Priority::Medium
        } else {
            Priority::Low
        }
    }
}

/// Event fields before the store assigns an id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDraft {
    pub timestamp: DateTime<Utc>,
    pub sensor_id: SensorId,
    pub event_type: EventType,
    #[serde(default)]
    pub quantity: Option<Quantity>,
    #[serde(default)]
    pub value: Option<f64>,
    pub priority: Priority,
    pub message: String,
}

impl EventDraft {
    /// A manual event raised by an operator
    pub fn manual(
        timestamp: DateTime<Utc>,
        sensor_id: SensorId,
        priority: Priority,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            sensor_id,
            event_type: EventType::Manual,
            quantity: None,
            value: None,
            priority,
            message: message.into(),
        }
    }
}

/// Stored event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic, starting at 1
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub sensor_id: SensorId,
    pub event_type: EventType,
    pub quantity: Option<Quantity>,
    pub value: Option<f64>,
    pub priority: Priority,
    pub message: String,
    pub acknowledged: bool,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

impl Event {
    fn from_draft(id: u64, draft: EventDraft) -> Self {
        Self {
            id,
            timestamp: draft.timestamp,
            sensor_id: draft.sensor_id,
            event_type: draft.event_type,
            quantity: draft.quantity,
            value: draft.value,
            priority: draft.priority,
            message: draft.message,
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
        }
    }

    /// Acknowledge once; later calls keep the first acknowledgement
    pub fn acknowledge(&mut self, user: &str, at: DateTime<Utc>) {
        if self.acknowledged {
            return;
        }
        self.acknowledged = true;
        self.acknowledged_by = Some(user.to_string());
        self.acknowledged_at = Some(at);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventFilter {
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sensor_id: Option<SensorId>,
    #[serde(default)]
    pub event_type: Option<EventType>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub acknowledged: Option<bool>,
    /// Page size; `None` means 100
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

impl EventFilter {
    fn matches(&self, event: &Event) -> bool {
        self.from.is_none_or(|from| event.timestamp >= from)
            && self.to.is_none_or(|to| event.timestamp < to)
            && self.sensor_id.is_none_or(|id| event.sensor_id == id)
            && self.event_type.is_none_or(|t| event.event_type == t)
            && self.priority.is_none_or(|p| event.priority == p)
            && self.acknowledged.is_none_or(|a| event.acknowledged == a)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPage {
    pub events: Vec<Event>,
    /// Matches before paging
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityCounts {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventStatistics {
    pub total_events: usize,
    pub unacknowledged: usize,
    pub by_priority: PriorityCounts,
}

#[derive(Debug)]
pub struct EventStore {
    events: Vec<Event>,
    next_id: u64,
}

impl Default for EventStore {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            next_id: 1,
        }
    }
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, draft: EventDraft) -> Event {
        let event = Event::from_draft(self.next_id, draft);
        self.next_id += 1;
        self.events.push(event.clone());
        event
    }

    pub fn get(&self, id: u64) -> Option<&Event> {
        self.events.iter().find(|e| e.id == id)
    }

    pub fn acknowledge(&mut self, id: u64, user: Option<&str>, at: DateTime<Utc>) -> SimResult<Event> {
        let event = self
            .events
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| SimError::not_found(format!("event {}", id)))?;
        event.acknowledge(user.unwrap_or(DEFAULT_ACK_USER), at);
        Ok(event.clone())
    }

    /// Matching events, newest first
    pub fn query(&self, filter: &EventFilter) -> EventPage {
        let limit = filter.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
        let mut matching: Vec<&Event> = self.events.iter().filter(|e| filter.matches(e)).collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        EventPage {
            total: matching.len(),
            events: matching
                .into_iter()
                .skip(filter.offset)
                .take(limit)
                .cloned()
                .collect(),
            limit,
            offset: filter.offset,
        }
    }

    pub fn statistics(&self) -> EventStatistics {
        let mut stats = EventStatistics {
            total_events: self.events.len(),
            ..Default::default()
        };
        for event in &self.events {
            if !event.acknowledged {
                stats.unacknowledged += 1;
            }
            match event.priority {
                Priority::High => stats.by_priority.high += 1,
                Priority::Medium => stats.by_priority.medium += 1,
                Priority::Low => stats.by_priority.low += 1,
            }
        }
        stats
    }

    /// Drop events strictly older than `cutoff`
    pub fn prune_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.events.len();
        self.events.retain(|e| e.timestamp >= cutoff);
        before - self.events.len()
    }

    /// Forget every event; ids restart at 1
    pub fn clear(&mut self) {
        self.events.clear();
        self.next_id = 1;
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct SensorTrack {
    offline: bool,
    temperature: Option<Band>,
    humidity: Option<Band>,
}

impl SensorTrack {
    fn band_mut(&mut self, quantity: Quantity) -> &mut Option<Band> {
        match quantity {
            Quantity::Temperature => &mut self.temperature,
            Quantity::Humidity => &mut self.humidity,
        }
    }
}

/// Remembers the last band of every sensor quantity and reports transitions
///
/// Entering `high`, `low` or `offline` raises an event. Leaving `offline`
/// raises `sensor_recovered`. Returning to `normal` is silent.
#[derive(Debug, Default)]
pub struct EventDetector {
    tracks: BTreeMap<SensorId, SensorTrack>,
}

impl EventDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(
        &mut self,
        timestamp: DateTime<Utc>,
        sample: &FrameSample,
        limits: &LimitsConfig,
    ) -> Vec<EventDraft> {
        let sensor_id = sample.sensor_id;
        let track = self.tracks.entry(sensor_id).or_default();
        let mut drafts = Vec::new();

        if sample.status == CombinedStatus::Offline {
            if !track.offline {
                *track = SensorTrack {
                    offline: true,
                    ..Default::default()
                };
                drafts.push(EventDraft {
                    timestamp,
                    sensor_id,
                    event_type: EventType::SensorOffline,
                    quantity: None,
                    value: None,
                    priority: Priority::High,
                    message: format!("Sensor {} went offline", sensor_id),
                });
            }
            return drafts;
        }

        if track.offline {
            track.offline = false;
            drafts.push(EventDraft {
                timestamp,
                sensor_id,
                event_type: EventType::SensorRecovered,
                quantity: None,
                value: None,
                priority: Priority::Low,
                message: format!("Sensor {} recovered", sensor_id),
            });
        }

        for quantity in Quantity::ALL {
            let Some(value) = sample.value(quantity) else {
                continue;
            };
            let limit = limits.limit(quantity);
            let excursion = limit.excursion(value);
            let band = excursion.map_or(Band::Normal, |e| e.band);
            let previous = track.band_mut(quantity).replace(band);
            if previous == Some(band) {
                continue;
            }
            let Some(excursion) = excursion else {
                continue;
            };
            let (event_type, word, bound) = match excursion.band {
                Band::High => (EventType::ThresholdHigh, "above", limit.max),
                Band::Low => (EventType::ThresholdLow, "below", limit.min),
                Band::Normal => continue,
            };
            drafts.push(EventDraft {
                timestamp,
                sensor_id,
                event_type,
                quantity: Some(quantity),
                value: Some(value),
                priority: Priority::for_excess(excursion.excess, limit.warning_delta, limit.alarm_delta),
                message: format!(
                    "Sensor {} {} {} limit: {:.1}{} (limit {}{})",
                    sensor_id,
                    quantity,
                    word,
                    value,
                    quantity.unit(),
                    bound,
                    quantity.unit()
                ),
            });
        }
        drafts
    }

    /// Forget the state of sensors above `sensor_count`
    pub fn retain_sensors(&mut self, sensor_count: u16) {
        self.tracks.retain(|id, _| *id <= sensor_count);
    }

    pub fn reset(&mut self) {
        self.tracks.clear();
    }
}
