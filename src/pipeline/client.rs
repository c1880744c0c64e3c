//! A client whose requests go through a rate limiter.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, instrument};

use super::interceptor::Interceptor;
use crate::error::{Result, SluiceError};
use crate::ratelimit::{CancelToken, RateLimiter, WindowConfig};

/// The underlying client that actually sends requests.
///
/// Sluice never interprets responses or errors produced by a transport; a
/// finished request only advances the admission queue.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Outgoing request type.
    type Request: Send + 'static;
    /// Successful response type.
    type Response: Send;
    /// Transport failure type.
    type Error: Send;

    /// Send a request.
    async fn send(
        &self,
        request: Self::Request,
    ) -> std::result::Result<Self::Response, Self::Error>;
}

/// Error returned by [`ThrottledClient`].
#[derive(Error, Debug)]
pub enum ClientError<E> {
    /// The request never reached the transport
    #[error("Request was not admitted: {0}")]
    Throttle(#[from] SluiceError),

    /// The transport failed to complete the request
    #[error("Transport error: {0}")]
    Transport(E),
}

impl<E> ClientError<E> {
    /// Whether the caller cancelled the request before it was admitted.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ClientError::Throttle(e) if e.is_cancelled())
    }
}

/// A transport bound to the rate limiter that throttles it.
pub struct ThrottledClient<T> {
    /// The underlying transport
    transport: T,
    /// Limiter shared by every request of this client
    limiter: RateLimiter,
}

impl<T: Transport> ThrottledClient<T> {
    /// Throttle `transport` with a new limiter using `window`.
    pub fn new(transport: T, window: WindowConfig) -> Self {
        Self::with_limiter(transport, RateLimiter::new(window))
    }

    /// Throttle `transport` with an existing limiter.
    pub fn with_limiter(transport: T, limiter: RateLimiter) -> Self {
        Self { transport, limiter }
    }

    /// The limiter, for reconfiguration and inspection.
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Wait for admission, then send `request`.
    #[instrument(skip_all)]
    pub async fn send(
        &self,
        request: T::Request,
    ) -> std::result::Result<T::Response, ClientError<T::Error>> {
        let request = Interceptor::<_, T::Response, T::Error>::on_request(&self.limiter, request)
            .await?;
        self.dispatch(request).await
    }

    /// Like [`ThrottledClient::send`], but gives up if `cancel` fires
    /// before the request is admitted.
    #[instrument(skip_all)]
    pub async fn send_with(
        &self,
        request: T::Request,
        cancel: &CancelToken,
    ) -> std::result::Result<T::Response, ClientError<T::Error>> {
        let request =
            Interceptor::<_, T::Response, T::Error>::on_request_with(&self.limiter, request, cancel)
                .await?;
        self.dispatch(request).await
    }

    async fn dispatch(
        &self,
        request: T::Request,
    ) -> std::result::Result<T::Response, ClientError<T::Error>> {
        debug!("Request admitted, sending");
        match self.transport.send(request).await {
            Ok(response) => Ok(Interceptor::<T::Request, _, T::Error>::on_response(
                &self.limiter,
                response,
            )),
            Err(error) => Interceptor::<T::Request, T::Response, _>::on_error(&self.limiter, error)
                .map_err(ClientError::Transport),
        }
    }

    /// Reconfigure the window of this client's limiter.
    pub fn set_window(&self, max_requests: u32, length: std::time::Duration) -> Result<()> {
        self.limiter.set_window(max_requests, length)
    }

    /// Admit at most `requests_per_second` requests per second.
    pub fn set_rate(&self, requests_per_second: u32) -> Result<()> {
        self.limiter.set_rate(requests_per_second)
    }

    /// Effective admission rate in requests per second.
    pub fn rate(&self) -> f64 {
        self.limiter.rate()
    }
}
