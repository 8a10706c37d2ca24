use bytes::Bytes;
use http::{Request, Response};

use crate::pipeline::error::{BoxError, PipelineError};

pub type AdaptCallback = Box<dyn FnOnce(Result<Request<Bytes>, BoxError>) + Send + 'static>;
pub type RetryCallback = Box<dyn FnOnce(bool) + Send + 'static>;

/// What a retrier knows about the attempt that just failed.
#[derive(Debug)]
pub struct RetryContext<'a> {
    /// Retries performed so far. `0` after the first attempt.
    pub retry_count: usize,
    /// The request that failed, as sent.
    pub request: &'a Request<Bytes>,
}

/// Hooks into the lifecycle of a [`RequestPipeline`](crate::pipeline::RequestPipeline).
///
/// `adapt` and `retry` answer through their callbacks, which may be invoked
/// synchronously or later from any thread. Each must be invoked exactly once.
/// A pipeline never calls `adapt` and `retry` concurrently.
pub trait RequestInterceptor: Send + Sync {
    /// Rewrites the request before the first attempt. Failing here ends the
    /// request without any transport attempt.
    fn adapt(&self, request: Request<Bytes>, completion: AdaptCallback) {
        completion(Ok(request))
    }

    /// Decides whether a failed attempt is repeated.
    fn retry(&self, context: &RetryContext<'_>, error: &PipelineError, completion: RetryCallback) {
        let _ = (context, error);
        completion(false)
    }

    fn request_will_start(&self, _request: &Request<Bytes>) {}

    fn request_did_end(&self, _result: &Result<Response<Bytes>, PipelineError>) {}
}

/// Retries retryable failures up to a fixed number of times.
#[derive(Debug, Clone, Copy)]
pub struct RetryLimit {
    max_retries: usize,
}

impl RetryLimit {
    pub fn new(max_retries: usize) -> Self {
        Self { max_retries }
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }
}

impl RequestInterceptor for RetryLimit {
    fn retry(&self, context: &RetryContext<'_>, error: &PipelineError, completion: RetryCallback) {
        let retry = error.is_retryable() && context.retry_count < self.max_retries;
        tracing::debug!(
            "Retry {} of {} for {}: {}",
            context.retry_count + 1,
            self.max_retries,
            context.request.uri(),
            if retry { "granted" } else { "refused" }
        );
        completion(retry)
    }
}
