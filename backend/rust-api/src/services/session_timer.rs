use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::models::{TimeExpired, TimerEvent, TimerTick};

/// Countdown clock for one session.
///
/// Emits a `TimerTick` per tick and a single `TimeExpired` when the remaining
/// time reaches zero, then stops. Runs on wall time; there is no pause.
pub struct SessionTimer {
    cancelled: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl SessionTimer {
    pub fn start<F>(total_seconds: u32, tick_interval: Duration, emit: F) -> Self
    where
        F: Fn(TimerEvent) + Send + Sync + 'static,
    {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);

        let task = tokio::spawn(async move {
            let mut remaining = total_seconds;
            let mut interval = tokio::time::interval_at(
                tokio::time::Instant::now() + tick_interval,
                tick_interval,
            );

            while remaining > 0 {
                interval.tick().await;
                if flag.load(Ordering::SeqCst) {
                    return;
                }
                remaining -= 1;
                emit(TimerEvent::TimerTick(TimerTick {
                    remaining_seconds: remaining,
                    elapsed_seconds: total_seconds - remaining,
                    total_seconds,
                    timestamp: Utc::now(),
                }));
            }

            if flag.load(Ordering::SeqCst) {
                return;
            }
            tracing::info!("Session timer expired after {}s", total_seconds);
            emit(TimerEvent::TimeExpired(TimeExpired {
                total_seconds,
                timestamp: Utc::now(),
                message: "Time limit exceeded".to_string(),
            }));
        });

        Self {
            cancelled,
            task: Some(task),
        }
    }

    /// Stops the clock. Nothing is emitted once this returns.
    pub fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Drop for SessionTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
