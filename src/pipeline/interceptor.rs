//! Request and response hooks of a rate limited client.

use async_trait::async_trait;

use crate::error::Result;
use crate::ratelimit::{CancelToken, RateLimiter};

/// Hooks a client runs around every request it sends.
///
/// `on_request` runs before a request is sent and may hold it back or
/// reject it. Exactly one of `on_response` or `on_error` runs once the
/// request is done.
#[async_trait]
pub trait Interceptor<Req, Resp, E>: Send + Sync
where
    Req: Send + 'static,
{
    /// Decide whether `request` may be sent, returning it unchanged if so.
    async fn on_request(&self, request: Req) -> Result<Req>;

    /// Like `on_request`, but gives up once `cancel` fires.
    async fn on_request_with(&self, request: Req, cancel: &CancelToken) -> Result<Req>;

    /// Observe a successful response.
    fn on_response(&self, response: Resp) -> Resp;

    /// Observe a failed request, passing the error through.
    fn on_error(&self, error: E) -> std::result::Result<Resp, E>;
}

#[async_trait]
impl<Req, Resp, E> Interceptor<Req, Resp, E> for RateLimiter
where
    Req: Send + 'static,
{
    async fn on_request(&self, request: Req) -> Result<Req> {
        self.admit().await?;
        Ok(request)
    }

    async fn on_request_with(&self, request: Req, cancel: &CancelToken) -> Result<Req> {
        self.admit_with(cancel).await?;
        Ok(request)
    }

    fn on_response(&self, response: Resp) -> Resp {
        self.complete();
        response
    }

    fn on_error(&self, error: E) -> std::result::Result<Resp, E> {
        self.complete();
        Err(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SluiceError;
    use crate::ratelimit::WindowConfig;
    use std::time::Duration;
    use tokio::time::{self, Instant};

    type Hooks = dyn Interceptor<&'static str, u16, String>;

    fn limiter(max_requests: u32) -> RateLimiter {
        RateLimiter::new(WindowConfig::per_millis(max_requests, 1000).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_passes_through_unchanged() {
        let limiter = limiter(1);
        let hooks: &Hooks = &limiter;

        assert_eq!(hooks.on_request("GET /").await.unwrap(), "GET /");
        assert_eq!(hooks.on_response(200), 200);
        assert_eq!(hooks.on_error("reset".to_string()), Err("reset".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_hook_advances_queue() {
        let limiter = limiter(2);
        let hooks: &Hooks = &limiter;
        let start = Instant::now();

        let mut admissions: Vec<_> = (0..4).map(|_| limiter.admit()).collect();
        let fourth = admissions.pop().unwrap();
        for admission in admissions {
            admission.await.unwrap();
        }

        // The reset admitted the third request only, leaving one slot free.
        assert_eq!(start.elapsed(), Duration::from_millis(1000));
        assert_eq!(limiter.status().queued, 1);

        let _ = hooks.on_error("timeout".to_string());
        assert_eq!(limiter.status().queued, 0);

        fourth.await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(1000));
        assert_eq!(limiter.status().admitted_in_window, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_does_not_free_capacity() {
        let limiter = limiter(1);
        let hooks: &Hooks = &limiter;
        let start = Instant::now();

        hooks.on_request("first").await.unwrap();
        let second = tokio::spawn({
            let limiter = limiter.clone();
            async move { Interceptor::<_, u16, String>::on_request(&limiter, "second").await }
        });
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(hooks.on_response(204), 204);

        assert_eq!(second.await.unwrap().unwrap(), "second");
        assert_eq!(start.elapsed(), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_request_is_rejected() {
        let limiter = limiter(1);
        let hooks: &Hooks = &limiter;
        let token = CancelToken::new();

        hooks.on_request("first").await.unwrap();
        token.cancel();

        let result = hooks.on_request_with("second", &token).await;
        assert!(matches!(result, Err(SluiceError::Cancelled)));
    }
}
