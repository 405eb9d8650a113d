//! Periodic eviction of idle limiter state.

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::limiter::RateLimiter;
use super::sliding_window::SlidingWindow;
use super::store::StateStore;
use super::token_bucket::TokenBucket;

/// Handle to a running cleanup task.
///
/// Dropping the handle aborts the task; [`shutdown`](CleanupHandle::shutdown)
/// stops it gracefully.
pub struct CleanupHandle {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl CleanupHandle {
    /// Signal the task to stop and wait for it to exit.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    /// Whether the task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for CleanupHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Spawn a Tokio task that calls [`RateLimiter::cleanup`] every `interval`,
/// evicting state idle for longer than `max_age`.
///
/// The first pass runs one full `interval` after spawning. Must be called
/// from within a Tokio runtime.
pub fn spawn_cleanup_task<Tb, Sw>(
    limiter: RateLimiter<Tb, Sw>,
    interval: Duration,
    max_age: Duration,
) -> CleanupHandle
where
    Tb: StateStore<TokenBucket> + 'static,
    Sw: StateStore<SlidingWindow> + 'static,
{
    let (shutdown, mut signal) = watch::channel(false);
    let interval = interval.max(Duration::from_millis(1));
    let max_age_ms = u64::try_from(max_age.as_millis()).unwrap_or(u64::MAX);

    info!(
        interval_ms = interval.as_millis() as u64,
        max_age_ms,
        "Starting rate limiter cleanup task"
    );

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    limiter.cleanup(max_age_ms);
                }
                changed = signal.changed() => {
                    if changed.is_err() || *signal.borrow() {
                        break;
                    }
                }
            }
        }

        debug!("Rate limiter cleanup task stopped");
    });

    CleanupHandle {
        shutdown,
        task: Some(task),
    }
}
