//! Background maintenance for shared limiters.
//!
//! A [`Compactor`] owns a tokio task that calls
//! [`compact`](crate::rate_limit::RateLimiter::compact) on a [`SharedLimiter`]
//! at a fixed interval, and on demand through [`Compactor::trigger`]. This keeps
//! memory bounded for limiters that see long idle gaps, when no call to `consume`
//! comes along to sweep expired state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::rate_limit::RateLimiter;
use crate::rate_limit::shared::SharedLimiter;

/// Handle to a background compaction task.
///
/// Dropping the handle stops the task.
#[derive(Debug)]
pub struct Compactor {
    task: Option<JoinHandle<()>>,
    shutdown: Option<oneshot::Sender<()>>,
    trigger: mpsc::Sender<()>,
    passes: Arc<AtomicU64>,
}

impl Compactor {
    /// Start compacting `limiter` every `interval`.
    ///
    /// The first pass runs one interval after spawning. Must be called from
    /// within a tokio runtime.
    pub fn spawn<L>(limiter: SharedLimiter<L>, interval: Duration) -> Self
    where
        L: RateLimiter + Send + 'static,
    {
        let (trigger, mut triggered) = mpsc::channel(1);
        let (shutdown, mut shutdown_rx) = oneshot::channel();
        let passes = Arc::new(AtomicU64::new(0));
        let task_passes = Arc::clone(&passes);

        let task = tokio::spawn(async move {
            let period = interval.max(Duration::from_millis(1));
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(interval_ms = period.as_millis() as u64, "Compactor started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    Some(()) = triggered.recv() => {}
                    _ = &mut shutdown_rx => break,
                }
                limiter.compact().await;
                let pass = task_passes.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::debug!(pass, "Compaction pass finished");
            }

            tracing::info!(
                passes = task_passes.load(Ordering::Relaxed),
                "Compactor stopped"
            );
        });

        Self {
            task: Some(task),
            shutdown: Some(shutdown),
            trigger,
            passes,
        }
    }

    /// Request an immediate pass.
    ///
    /// Returns `false` only if the task has stopped. A request made while one is
    /// already pending is merged into it.
    pub fn trigger(&self) -> bool {
        match self.trigger.try_send(()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => true,
            Err(mpsc::error::TrySendError::Closed(())) => false,
        }
    }

    /// Number of passes completed so far.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    /// Stop the task and wait for it to finish.
    pub async fn shutdown(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    std::panic::resume_unwind(e.into_panic());
                }
            }
        }
    }
}

impl Drop for Compactor {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}
