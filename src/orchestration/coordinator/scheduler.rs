//! Cancellable fixed-delay background task.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

/// A task that runs `tick` every `period` until cancelled. Cancelling never
/// interrupts a tick that is already running; the loop exits at its next wait.
#[derive(Debug)]
pub struct ScheduledTask {
    name: &'static str,
    cancelled: Arc<AtomicBool>,
    cancel_notify: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, tick: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancelled = Arc::new(AtomicBool::new(false));
        let cancel_notify = Arc::new(Notify::new());

        let loop_cancelled = cancelled.clone();
        let loop_notify = cancel_notify.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(period) => {
                        if loop_cancelled.load(Ordering::SeqCst) {
                            break;
                        }
                        tick().await;
                    }
                    _ = loop_notify.notified() => {
                        break;
                    }
                }
            }
            debug!(task = name, "SCHEDULER: Background task stopped");
        });

        Self {
            name,
            cancelled,
            cancel_notify,
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Idempotent
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            // notify_one keeps a permit when the loop is mid-tick
            self.cancel_notify.notify_one();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.cancel();
    }
}
