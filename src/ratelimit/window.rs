//! Admission window configuration.

use std::time::Duration;

use crate::error::{Result, SluiceError};

/// Length of the window `set_rate` derives its configuration for.
pub const RATE_WINDOW: Duration = Duration::from_secs(1);

/// Capacity and length of one admission window.
///
/// Both values are strictly positive; construction goes through
/// [`WindowConfig::new`] so a zero capacity or an empty window is rejected
/// instead of clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    max_requests: u32,
    length: Duration,
}

impl WindowConfig {
    /// Create a window admitting at most `max_requests` per `length`.
    pub fn new(max_requests: u32, length: Duration) -> Result<Self> {
        if max_requests == 0 {
            return Err(SluiceError::Config(
                "max_requests must be a positive integer".to_string(),
            ));
        }
        if length.is_zero() {
            return Err(SluiceError::Config(
                "window length must be a positive duration".to_string(),
            ));
        }
        Ok(Self {
            max_requests,
            length,
        })
    }

    /// Window admitting `requests_per_second` requests per second.
    pub fn per_second(requests_per_second: u32) -> Result<Self> {
        Self::new(requests_per_second, RATE_WINDOW)
    }

    /// Window given as a request count per number of milliseconds.
    pub fn per_millis(max_requests: u32, window_ms: u64) -> Result<Self> {
        Self::new(max_requests, Duration::from_millis(window_ms))
    }

    /// Maximum number of admissions per window.
    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Length of one window.
    pub fn length(&self) -> Duration {
        self.length
    }

    /// Effective admission rate in requests per second.
    pub fn rate(&self) -> f64 {
        f64::from(self.max_requests) / self.length.as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_zero_capacity() {
        let err = WindowConfig::new(0, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, SluiceError::Config(_)));
    }

    #[test]
    fn test_rejects_empty_window() {
        let err = WindowConfig::new(5, Duration::ZERO).unwrap_err();
        assert!(matches!(err, SluiceError::Config(_)));
    }

    #[test]
    fn test_per_second_matches_explicit_window() {
        assert_eq!(
            WindowConfig::per_second(7).unwrap(),
            WindowConfig::new(7, Duration::from_millis(1000)).unwrap()
        );
    }

    #[test]
    fn test_rate() {
        assert_eq!(WindowConfig::per_millis(2, 1000).unwrap().rate(), 2.0);
        assert_eq!(WindowConfig::per_millis(1, 500).unwrap().rate(), 2.0);
        assert_eq!(WindowConfig::per_millis(30, 60_000).unwrap().rate(), 0.5);
    }
}
