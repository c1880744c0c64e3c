//! Admission control: the request queue, window accounting and the window
//! reset timer.

mod cancel;
mod clock;
mod limiter;
mod queue;
mod window;

pub use cancel::CancelToken;
pub use clock::WindowTimer;
pub use limiter::{LimiterStatus, RateLimiter, TimerStatus};
pub use queue::{Admission, AdmissionQueue, AdmissionRecord, PendingRecord};
pub use window::{WindowConfig, RATE_WINDOW};
