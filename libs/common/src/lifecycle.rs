//! Start/stop bookkeeping for a subsystem's background task
//!
//! Each subsystem owns one [`TaskLifecycle`]. Starting twice or stopping a stopped
//! subsystem is a no-op. A task that ended on its own counts as stopped.

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug)]
struct RunningTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Debug, Default)]
pub struct TaskLifecycle {
    running: Mutex<Option<RunningTask>>,
}

impl TaskLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    /// Launch the task built by `spawn` unless one is already running
    ///
    /// Returns `false` when the subsystem was already running.
    pub fn start_with<F>(&self, spawn: F) -> bool
    where
        F: FnOnce(CancellationToken) -> JoinHandle<()>,
    {
        let mut running = self.running.lock();
        match running.as_ref() {
            Some(task) if !task.handle.is_finished() => {
                debug!("Start requested while already running");
                return false;
            }
            Some(_) => warn!("Background task had exited, restarting"),
            None => {}
        }
        let token = CancellationToken::new();
        let handle = spawn(token.clone());
        *running = Some(RunningTask { token, handle });
        true
    }

    /// Cancel the task and wait for it to finish
    ///
    /// Returns `false` when nothing was running.
    pub async fn stop(&self) -> bool {
        let task = self.running.lock().take();
        let Some(RunningTask { token, handle }) = task else {
            return false;
        };
        let was_running = !handle.is_finished();
        token.cancel();
        if let Err(e) = handle.await {
            warn!("Background task ended abnormally: {}", e);
        }
        was_running
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let lifecycle = TaskLifecycle::new();
        assert!(!lifecycle.is_running());

        let spawn = |token: CancellationToken| tokio::spawn(async move { token.cancelled().await });
        assert!(lifecycle.start_with(spawn));
        assert!(!lifecycle.start_with(spawn));
        assert!(lifecycle.is_running());

        assert!(lifecycle.stop().await);
        assert!(!lifecycle.stop().await);
        assert!(!lifecycle.is_running());
    }

    #[tokio::test]
    async fn test_task_that_exits_counts_as_stopped() {
        let lifecycle = TaskLifecycle::new();
        assert!(lifecycle.start_with(|_| tokio::spawn(async {})));
        for _ in 0..1000 {
            if !lifecycle.is_running() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!lifecycle.is_running());

        let spawn = |token: CancellationToken| tokio::spawn(async move { token.cancelled().await });
        assert!(lifecycle.start_with(spawn));
        assert!(lifecycle.is_running());
        assert!(lifecycle.stop().await);
    }

    #[tokio::test]
    async fn test_panicked_task_can_restart() {
        let lifecycle = TaskLifecycle::new();
        assert!(lifecycle.start_with(|_| tokio::spawn(async { panic!("tick failed") })));
        for _ in 0..1000 {
            if !lifecycle.is_running() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!lifecycle.is_running());
        assert!(!lifecycle.stop().await);
        assert!(lifecycle.start_with(|token| tokio::spawn(async move { token.cancelled().await })));
        assert!(lifecycle.stop().await);
    }
}
