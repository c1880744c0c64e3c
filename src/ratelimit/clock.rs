//! One-shot window timer.
//!
//! A [`WindowTimer`] runs a callback once its window has elapsed. It also
//! carries a liveness flag: a timer that *keeps alive* is load-bearing for
//! queued work and must be waited on before shutting down, while an idle
//! timer may be abandoned with the process.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

/// A one-shot timer that fires a callback after a window has elapsed.
#[derive(Debug)]
pub struct WindowTimer {
    /// Task sleeping until the deadline
    handle: JoinHandle<()>,
    /// When the timer fires
    deadline: Instant,
    /// Whether pending work depends on this timer firing
    keep_alive: bool,
}

impl WindowTimer {
    /// Start a timer that calls `on_fire` once `after` has elapsed.
    ///
    /// Must be called from within a tokio runtime. New timers keep the
    /// process alive until demoted with [`WindowTimer::allow_idle`].
    pub fn start<F>(after: Duration, on_fire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let deadline = Instant::now() + after;
        let handle = tokio::spawn(async move {
            time::sleep_until(deadline).await;
            on_fire();
        });

        Self {
            handle,
            deadline,
            keep_alive: true,
        }
    }

    /// Mark the timer as load-bearing for pending work.
    ///
    /// Returns `true` if the timer was idle before.
    pub fn keep_alive(&mut self) -> bool {
        !std::mem::replace(&mut self.keep_alive, true)
    }

    /// Let the process shut down without waiting for this timer.
    pub fn allow_idle(&mut self) {
        self.keep_alive = false;
    }

    /// Whether pending work depends on this timer firing.
    pub fn keeps_alive(&self) -> bool {
        self.keep_alive
    }

    /// The instant at which the timer fires.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left until the timer fires.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Stop the timer without running its callback.
    pub fn cancel(self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_window() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let timer = WindowTimer::start(Duration::from_millis(1000), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        time::sleep(Duration::from_millis(999)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(timer.remaining(), Duration::from_millis(1));

        time::sleep(Duration::from_millis(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(timer.remaining(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let timer = WindowTimer::start(Duration::from_millis(100), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        timer.cancel();
        time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_liveness_flag() {
        let mut timer = WindowTimer::start(Duration::from_secs(1), || {});
        assert!(timer.keeps_alive());

        timer.allow_idle();
        assert!(!timer.keeps_alive());

        assert!(timer.keep_alive());
        assert!(!timer.keep_alive());
        assert!(timer.keeps_alive());
        timer.cancel();
    }
}
