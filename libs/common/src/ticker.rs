//! Tick sources for periodic subsystems
//!
//! Business logic never owns a timer. A subsystem exposes a synchronous tick
//! method and a [`Ticker`] decides when it runs: [`IntervalTicker`] in production,
//! [`ManualTicker`] in tests that step time explicitly.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::clock::SharedClock;

#[async_trait]
pub trait Ticker: Send {
    /// Wait for the next tick and return the instant it represents
    async fn tick(&mut self) -> DateTime<Utc>;
}

/// Fixed-period ticker backed by `tokio::time::interval`
///
/// The first tick completes immediately. Missed ticks are delayed, not bursted.
pub struct IntervalTicker {
    interval: tokio::time::Interval,
    clock: SharedClock,
}

impl IntervalTicker {
    pub fn new(period: Duration, clock: SharedClock) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval, clock }
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) -> DateTime<Utc> {
        self.interval.tick().await;
        self.clock.now()
    }
}

/// Ticker fired by hand through a [`ManualTickHandle`]
pub struct ManualTicker {
    rx: mpsc::UnboundedReceiver<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct ManualTickHandle {
    tx: mpsc::UnboundedSender<DateTime<Utc>>,
}

impl ManualTicker {
    pub fn new() -> (Self, ManualTickHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx }, ManualTickHandle { tx })
    }
}

impl ManualTickHandle {
    /// Queue a tick at `at`. Returns false once the ticker is gone.
    pub fn fire(&self, at: DateTime<Utc>) -> bool {
        self.tx.send(at).is_ok()
    }
}

#[async_trait]
impl Ticker for ManualTicker {
    async fn tick(&mut self) -> DateTime<Utc> {
        match self.rx.recv().await {
            Some(at) => at,
            // All handles dropped: never tick again
            None => std::future::pending().await,
        }
    }
}

/// Drive `on_tick` from `ticker` until `token` is cancelled
///
/// Ticks run on the blocking pool, one at a time, since they may touch the file
/// system. `on_tick` runs to completion before cancellation is observed, so a stop
/// never interrupts a tick halfway. A panicking tick ends the scheduler.
pub fn spawn_ticking<T, F>(
    name: &'static str,
    mut ticker: T,
    token: CancellationToken,
    mut on_tick: F,
) -> JoinHandle<()>
where
    T: Ticker + 'static,
    F: FnMut(DateTime<Utc>) + Send + 'static,
{
    tokio::spawn(async move {
        info!("{} scheduler started", name);
        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => {
                    debug!("{} scheduler received cancellation signal", name);
                    break;
                }
                at = ticker.tick() => {
                    let run = tokio::task::spawn_blocking(move || {
                        on_tick(at);
                        on_tick
                    });
                    match run.await {
                        Ok(next) => on_tick = next,
                        Err(e) => {
                            error!("{} tick failed, scheduler halted: {}", name, e);
                            break;
                        }
                    }
                }
            }
        }
        info!("{} scheduler stopped", name);
    })
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_manual_ticker_delivers_in_order() {
        let (mut ticker, handle) = ManualTicker::new();
        let t1 = DateTime::from_timestamp_millis(1_000).unwrap();
        let t2 = DateTime::from_timestamp_millis(2_000).unwrap();
        assert!(handle.fire(t1));
        assert!(handle.fire(t2));
        assert_eq!(ticker.tick().await, t1);
        assert_eq!(ticker.tick().await, t2);
    }

    #[tokio::test]
    async fn test_spawn_ticking_stops_on_cancel() {
        let (ticker, handle) = ManualTicker::new();
        let token = CancellationToken::new();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);

        let task = spawn_ticking("test", ticker, token.clone(), move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        for ms in [1_000, 2_000, 3_000] {
            handle.fire(DateTime::from_timestamp_millis(ms).unwrap());
        }
        // Let the task drain the queued ticks
        while count.load(Ordering::SeqCst) < 3 {
            tokio::task::yield_now().await;
        }

        token.cancel();
        task.await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_panicking_tick_halts_scheduler() {
        let (ticker, handle) = ManualTicker::new();
        let token = CancellationToken::new();
        let task = spawn_ticking("test", ticker, token, |_| panic!("tick failed"));

        handle.fire(DateTime::from_timestamp_millis(1_000).unwrap());
        task.await.unwrap();
        assert!(!handle.fire(DateTime::from_timestamp_millis(2_000).unwrap()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_ticker_first_tick_immediate() {
        let clock = crate::ManualClock::from_millis(5_000).shared();
        let mut ticker = IntervalTicker::new(Duration::from_millis(1000), clock);
        let at = ticker.tick().await;
        assert_eq!(at.timestamp_millis(), 5_000);
    }
}
