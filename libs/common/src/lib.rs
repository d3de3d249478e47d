//! Shared building blocks for the simulated sensor stack
//!
//! Provides the pieces every subsystem needs but none of them owns:
//! - logging bootstrap
//! - shutdown signal handling
//! - environment overrides for scalar settings
//! - hex formatting for logged frames
//! - injectable clocks and tickers so tests can drive time by hand
//! - start/stop bookkeeping for background tasks

pub mod clock;
pub mod config_loader;
pub mod fs;
pub mod hex;
pub mod lifecycle;
pub mod logging;
pub mod shutdown;
pub mod ticker;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use lifecycle::TaskLifecycle;
pub use ticker::{IntervalTicker, ManualTicker, Ticker};

// Re-export common dependencies
pub use serde;
pub use serde_json;
pub use tokio;
