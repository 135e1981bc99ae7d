//! Deferred device reset
//!
//! The simulated device cannot power-cycle itself; a reset is delivered as a
//! notification the daemon turns into a graceful shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fwrest_core::ResetScheduler;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct ResetSignal {
    notify: Notify,
    scheduled: AtomicBool,
}

/// Reset scheduler that fires a notification after the requested delay
#[derive(Debug, Clone, Default)]
pub struct ResetNotifier {
    signal: Arc<ResetSignal>,
}

impl ResetNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a reset is pending or already fired
    pub fn is_scheduled(&self) -> bool {
        self.signal.scheduled.load(Ordering::Acquire)
    }

    /// Resolve once a scheduled reset fires
    pub async fn wait(&self) {
        self.signal.notify.notified().await;
    }
}

impl ResetScheduler for ResetNotifier {
    fn schedule_reset(&self, delay: Duration) {
        if self.signal.scheduled.swap(true, Ordering::AcqRel) {
            tracing::debug!("reset already scheduled");
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no runtime available, resetting immediately");
            self.signal.notify.notify_one();
            return;
        };

        tracing::info!(delay_ms = delay.as_millis() as u64, "reset scheduled");
        let signal = self.signal.clone();
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            tracing::info!("resetting device");
            signal.notify.notify_one();
        });
    }
}
