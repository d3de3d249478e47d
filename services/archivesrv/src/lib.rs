//! Time-series archive
//!
//! Stores native points per sensor at a fixed resolution, answers range queries
//! at native or aggregated resolution, derives threshold and connectivity events
//! from what it stores, and prunes both after the retention window.

pub mod backfill;
pub mod config;
pub mod events;
pub mod export;
pub mod query;
pub mod service;
pub mod store;

pub use config::{ArchiveConfig, BackfillConfig, EventsConfig, GapConfig};
pub use events::{
    Event, EventDetector, EventFilter, EventPage, EventStatistics, EventStore, EventType, Priority,
};
pub use query::{AggregatedPoint, Aggregate, ArchiveRecord, QueryResult, Resolution};
pub use service::{ArchiveService, ArchiveStatus, BackfillReport, CleanupReport};
pub use store::{ArchivePoint, SeriesStore};
