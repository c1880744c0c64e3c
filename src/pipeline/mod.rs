//! Binding a rate limiter into a client's request pipeline.

mod client;
mod interceptor;

pub use client::{ClientError, ThrottledClient, Transport};
pub use interceptor::Interceptor;
