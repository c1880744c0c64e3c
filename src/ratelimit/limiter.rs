//! Core rate limiter implementation.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use super::cancel::CancelToken;
use super::clock::WindowTimer;
use super::queue::{Admission, AdmissionQueue, AdmissionRecord, PendingRecord};
use super::window::WindowConfig;
use crate::config::RateLimitOptions;
use crate::error::Result;

/// Admission-control queue for one client.
///
/// Requests are admitted in arrival order, at most
/// [`WindowConfig::max_requests`] per window. A window starts with its first
/// admission and lasts [`WindowConfig::length`]; when it ends the counter is
/// reset and the queue is drained again.
///
/// The handle is cheap to clone. All clones share the same queue, so one
/// limiter should be created per client and handed to whatever issues or
/// completes requests through it.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<RateLimiterState>,
    /// Signalled after every state transition that may unpin the limiter
    settled: Notify,
}

#[derive(Debug)]
struct RateLimiterState {
    window: WindowConfig,
    admitted_in_window: u32,
    queue: AdmissionQueue,
    /// Pending window reset, present iff something was admitted in this window
    timer: Option<WindowTimer>,
}

/// Point-in-time view of a rate limiter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimiterStatus {
    /// Active window configuration
    pub window: WindowConfig,
    /// Requests admitted in the current window
    pub admitted_in_window: u32,
    /// Requests waiting for admission
    pub queued: usize,
    /// The pending window reset, if a window is open
    pub timer: Option<TimerStatus>,
}

/// State of the pending window reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerStatus {
    /// When the current window ends
    pub deadline: Instant,
    /// Time left until the reset
    pub remaining: Duration,
    /// Whether queued work is waiting on this reset
    pub keep_alive: bool,
}

impl RateLimiter {
    /// Create a rate limiter with the given window.
    pub fn new(window: WindowConfig) -> Self {
        debug!(
            max_requests = window.max_requests(),
            window_ms = window.length().as_millis() as u64,
            "Creating rate limiter"
        );

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(RateLimiterState {
                    window,
                    admitted_in_window: 0,
                    queue: AdmissionQueue::new(),
                    timer: None,
                }),
                settled: Notify::new(),
            }),
        }
    }

    /// Create a rate limiter from possibly partial options.
    ///
    /// Fails unless the options describe a complete, positive window.
    pub fn from_options(options: &RateLimitOptions) -> Result<Self> {
        Ok(Self::new(options.resolve(None)?))
    }

    /// Queue a request for admission.
    ///
    /// The request's position is fixed by this call; the returned future
    /// completes once it is admitted. Dropping the future withdraws it.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn admit(&self) -> Admission {
        self.enqueue(None)
    }

    /// Queue a request that can be aborted through `token`.
    ///
    /// The returned future fails with [`SluiceError::Cancelled`] as soon as
    /// the token is cancelled.
    ///
    /// [`SluiceError::Cancelled`]: crate::error::SluiceError::Cancelled
    pub fn admit_with(&self, token: &CancelToken) -> Admission {
        self.enqueue(Some(token.clone()))
    }

    /// Signal that a request finished, successfully or not.
    ///
    /// This only advances the queue; window capacity is freed by the window
    /// reset alone.
    pub fn complete(&self) {
        self.shared.drain();
    }

    /// Replace the window configuration.
    ///
    /// Affects admission decisions taken after this call; an open window
    /// keeps its original deadline.
    pub fn set_window(&self, max_requests: u32, length: Duration) -> Result<()> {
        let window = WindowConfig::new(max_requests, length)?;
        self.shared.reconfigure(|_| Ok(window))
    }

    /// Admit at most `requests_per_second` requests per second.
    pub fn set_rate(&self, requests_per_second: u32) -> Result<()> {
        let window = WindowConfig::per_second(requests_per_second)?;
        self.shared.reconfigure(|_| Ok(window))
    }

    /// Apply possibly partial options on top of the current window.
    ///
    /// `max_rps` takes precedence over `max_requests` and `per_milliseconds`.
    pub fn set_options(&self, options: &RateLimitOptions) -> Result<()> {
        self.shared
            .reconfigure(|current| options.resolve(Some(current)))
    }

    /// Current window configuration.
    pub fn window(&self) -> WindowConfig {
        self.shared.state.lock().window
    }

    /// Effective admission rate in requests per second.
    pub fn rate(&self) -> f64 {
        self.window().rate()
    }

    /// Copy of the records still waiting, head first.
    pub fn queue_snapshot(&self) -> Vec<PendingRecord> {
        self.shared.state.lock().queue.snapshot()
    }

    /// Current counters and timer state.
    pub fn status(&self) -> LimiterStatus {
        let state = self.shared.state.lock();
        LimiterStatus {
            window: state.window,
            admitted_in_window: state.admitted_in_window,
            queued: state.queue.len(),
            timer: state.timer.as_ref().map(|timer| TimerStatus {
                deadline: timer.deadline(),
                remaining: timer.remaining(),
                keep_alive: timer.keeps_alive(),
            }),
        }
    }

    /// Whether pending work still depends on this limiter making progress.
    ///
    /// An open window whose timer is idle does not pin the limiter.
    pub fn is_pinned(&self) -> bool {
        self.shared.state.lock().is_pinned()
    }

    /// Wait until no queued work depends on this limiter.
    pub async fn settled(&self) {
        loop {
            let notified = self.shared.settled.notified();
            if !self.is_pinned() {
                return;
            }
            notified.await;
        }
    }

    fn enqueue(&self, cancel: Option<CancelToken>) -> Admission {
        let (record, admission) = AdmissionRecord::new(cancel);
        {
            let mut state = self.shared.state.lock();
            state.queue.enqueue(record);
            trace!(
                id = %admission.id(),
                queued = state.queue.len(),
                "Request queued for admission"
            );
        }

        // The drain runs as its own task so callers never re-enter the
        // limiter while it is still being set up.
        let shared = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            if let Some(shared) = shared.upgrade() {
                shared.drain();
            }
        });

        admission
    }
}

impl Shared {
    fn drain(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            self.drain_locked(&mut state);
        }
        self.settled.notify_waiters();
    }

    /// Admit at most one record from the head of the queue.
    ///
    /// Cancelled records are discarded without consuming capacity and the
    /// next record is considered in their place.
    fn drain_locked(self: &Arc<Self>, state: &mut RateLimiterState) {
        loop {
            if state.queue.is_empty() {
                return;
            }

            if state.admitted_in_window >= state.window.max_requests() {
                if let Some(timer) = state.timer.as_mut() {
                    if timer.keep_alive() {
                        debug!(
                            queued = state.queue.len(),
                            "Window full, holding window reset for queued requests"
                        );
                    }
                }
                return;
            }

            let Some(record) = state.queue.dequeue_head() else {
                return;
            };
            let id = record.id();
            let waited = record.enqueued_at().elapsed();

            if !record.resolve() {
                continue;
            }

            let opens_window = state.admitted_in_window == 0;
            state.admitted_in_window += 1;

            trace!(
                id = %id,
                waited_ms = waited.as_millis() as u64,
                admitted = state.admitted_in_window,
                max_requests = state.window.max_requests(),
                "Request admitted"
            );

            if opens_window {
                self.open_window(state);
            }
            return;
        }
    }

    fn open_window(self: &Arc<Self>, state: &mut RateLimiterState) {
        let shared: Weak<Shared> = Arc::downgrade(self);
        let mut timer = WindowTimer::start(state.window.length(), move || {
            if let Some(shared) = shared.upgrade() {
                shared.roll_over();
            }
        });

        if state.queue.is_empty() {
            timer.allow_idle();
        }
        state.timer = Some(timer);
    }

    fn roll_over(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            debug!(
                admitted = state.admitted_in_window,
                queued = state.queue.len(),
                "Admission window elapsed"
            );
            state.admitted_in_window = 0;
            state.timer = None;
            self.drain_locked(&mut state);
        }
        self.settled.notify_waiters();
    }

    fn reconfigure<F>(&self, update: F) -> Result<()>
    where
        F: FnOnce(WindowConfig) -> Result<WindowConfig>,
    {
        let mut state = self.state.lock();
        let window = update(state.window)?;
        let previous = std::mem::replace(&mut state.window, window);

        info!(
            max_requests = window.max_requests(),
            window_ms = window.length().as_millis() as u64,
            previous_max_requests = previous.max_requests(),
            previous_window_ms = previous.length().as_millis() as u64,
            "Rate limit updated"
        );
        Ok(())
    }
}

impl RateLimiterState {
    fn is_pinned(&self) -> bool {
        !self.queue.is_empty() || self.timer.as_ref().is_some_and(WindowTimer::keeps_alive)
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(timer) = self.state.get_mut().timer.take() {
            timer.cancel();
        }
    }
}
