//! Flush scheduling.
//!
//! The mode is fixed when the logger is configured: either every log call
//! flushes right away, or a single recurring timer flushes on a fixed
//! interval. At most one timer is active per scheduler; arming a new one
//! aborts the previous task first.

use std::future::Future;
use std::time::Duration;

use tokio::runtime::{Handle, TryCurrentError};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

/// When queued entries are flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Flush after every accepted log call.
    Immediate,
    /// Flush on a recurring timer; log calls only enqueue.
    Periodic(Duration),
}

impl FlushMode {
    /// Zero selects immediate mode, anything else periodic mode.
    pub fn from_interval(interval: Duration) -> Self {
        if interval.is_zero() {
            FlushMode::Immediate
        } else {
            FlushMode::Periodic(interval)
        }
    }
}

/// Owns the flush mode and the recurring timer task.
#[derive(Debug)]
pub struct FlushScheduler {
    mode: FlushMode,
    timer: Option<JoinHandle<()>>,
}

impl Default for FlushScheduler {
    fn default() -> Self {
        Self {
            mode: FlushMode::Immediate,
            timer: None,
        }
    }
}

impl FlushScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> FlushMode {
        self.mode
    }

    /// Whether log calls should trigger a flush themselves.
    pub fn flushes_on_log(&self) -> bool {
        self.mode == FlushMode::Immediate
    }

    pub fn has_timer(&self) -> bool {
        self.timer.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Switch to `mode`, cancelling any existing timer. In periodic mode a
    /// new timer calls `on_tick` every period, starting one period from now.
    ///
    /// # Errors
    ///
    /// Periodic mode needs a Tokio runtime; without one the scheduler falls
    /// back to immediate mode and the error is returned.
    pub fn arm<F, Fut>(&mut self, mode: FlushMode, on_tick: F) -> Result<(), TryCurrentError>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        self.mode = mode;

        let FlushMode::Periodic(period) = mode else {
            return Ok(());
        };

        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                self.mode = FlushMode::Immediate;
                return Err(e);
            }
        };
        debug!(
            interval_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX),
            "Arming flush timer"
        );

        self.timer = Some(handle.spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Skip the first immediate tick
            ticker.tick().await;

            loop {
                ticker.tick().await;
                on_tick().await;
            }
        }));

        Ok(())
    }

    /// Abort the timer, if any, and return to immediate mode.
    pub fn cancel(&mut self) {
        if let Some(timer) = self.timer.take() {
            debug!("Cancelling flush timer");
            timer.abort();
        }
        self.mode = FlushMode::Immediate;
    }
}

impl Drop for FlushScheduler {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_tick(count: Arc<AtomicUsize>) -> impl Fn() -> std::future::Ready<()> + Send + 'static {
        move || {
            count.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    #[test]
    fn test_mode_from_interval() {
        assert_eq!(FlushMode::from_interval(Duration::ZERO), FlushMode::Immediate);
        assert_eq!(
            FlushMode::from_interval(Duration::from_millis(250)),
            FlushMode::Periodic(Duration::from_millis(250))
        );
    }

    #[test]
    fn test_immediate_mode_needs_no_runtime() {
        let mut scheduler = FlushScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));

        assert!(scheduler.arm(FlushMode::Immediate, counting_tick(count)).is_ok());
        assert!(scheduler.flushes_on_log());
        assert!(!scheduler.has_timer());
    }

    #[test]
    fn test_periodic_mode_without_runtime_fails() {
        let mut scheduler = FlushScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));

        let result = scheduler.arm(FlushMode::Periodic(Duration::from_secs(1)), counting_tick(count));
        assert!(result.is_err());
        assert!(!scheduler.has_timer());
        assert_eq!(scheduler.mode(), FlushMode::Immediate);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_timer_ticks_every_interval() {
        let mut scheduler = FlushScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));

        scheduler
            .arm(FlushMode::Periodic(Duration::from_secs(5)), counting_tick(count.clone()))
            .unwrap();
        assert!(!scheduler.flushes_on_log());
        assert!(scheduler.has_timer());

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_previous_timer() {
        let mut scheduler = FlushScheduler::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        scheduler
            .arm(FlushMode::Periodic(Duration::from_secs(1)), counting_tick(first.clone()))
            .unwrap();
        scheduler
            .arm(FlushMode::Periodic(Duration::from_secs(1)), counting_tick(second.clone()))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_timer() {
        let mut scheduler = FlushScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));

        scheduler
            .arm(FlushMode::Periodic(Duration::from_secs(1)), counting_tick(count.clone()))
            .unwrap();
        scheduler.cancel();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.mode(), FlushMode::Immediate);
    }
}
