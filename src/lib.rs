//! Sluice - admission control for outgoing client requests
//!
//! This crate throttles the requests an HTTP client sends so that no more
//! than a configured number are admitted per fixed time window. Requests
//! wait in a FIFO queue and are released as window capacity allows.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod ratelimit;

pub use error::{Result, SluiceError};
pub use pipeline::{ClientError, Interceptor, ThrottledClient, Transport};
pub use ratelimit::{Admission, CancelToken, RateLimiter, WindowConfig};
