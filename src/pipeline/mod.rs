//! A single resilient HTTP exchange: adaptation, transport, validation and
//! retry, cancellable at any point, with a completion that fires exactly once.
//!
//! The pipeline is an explicit state machine. Every external callback
//! (adapter, transport, retrier) turns into an [`Event`](state::Event) that is
//! queued and applied under one lock. Side effects run outside the lock, and
//! events raised while they run are drained by the same loop, so a transport
//! that completes synchronously never re-enters a transition.
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http::{Request, Response};
use tokio::sync::oneshot;

use crate::{
    common::util::lock,
    pipeline::state::{Action, Event, Inner, State},
    transport::{Transport, TransportError, TransportOutcome},
};

pub mod error;
pub mod executor;
pub mod interceptor;
pub(crate) mod state;
pub mod validation;

pub use error::{BoxError, PipelineError};
pub use executor::{CompletionExecutor, ImmediateExecutor, TokioExecutor};
pub use interceptor::{AdaptCallback, RequestInterceptor, RetryCallback, RetryContext, RetryLimit};
pub use validation::{
    ContentTypeValidator, ResponseValidator, StatusCodeValidator, ValidationError,
};

pub type PipelineResult = Result<Response<Bytes>, PipelineError>;

/// Receives the result of a pipeline exactly once.
pub type Completion = Box<dyn FnOnce(PipelineResult) + Send + 'static>;

/// The collaborators of a pipeline, shared by every request built from them.
#[derive(Clone)]
pub struct PipelineOptions {
    pub(crate) validators: Vec<Arc<dyn ResponseValidator>>,
    pub(crate) interceptor: Option<Arc<dyn RequestInterceptor>>,
    pub(crate) executor: Arc<dyn CompletionExecutor>,
}

impl PipelineOptions {
    pub fn new() -> Self {
        Self {
            validators: Vec::new(),
            interceptor: None,
            executor: Arc::new(ImmediateExecutor),
        }
    }

    /// Appends a validator. Validators run in insertion order and the first
    /// failure wins.
    pub fn validator<V: ResponseValidator + 'static>(mut self, validator: V) -> Self {
        self.validators.push(Arc::new(validator));
        self
    }

    pub fn shared_validator(mut self, validator: Arc<dyn ResponseValidator>) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn interceptor<I: RequestInterceptor + 'static>(self, interceptor: I) -> Self {
        self.shared_interceptor(Arc::new(interceptor))
    }

    pub fn shared_interceptor(mut self, interceptor: Arc<dyn RequestInterceptor>) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    pub fn executor<E: CompletionExecutor + 'static>(mut self, executor: E) -> Self {
        self.executor = Arc::new(executor);
        self
    }

    pub fn has_interceptor(&self) -> bool {
        self.interceptor.is_some()
    }

    pub fn validator_count(&self) -> usize {
        self.validators.len()
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::new()
    }
}

struct Shared {
    transport: Arc<dyn Transport>,
    options: PipelineOptions,
    inner: Mutex<Inner>,
}

/// Runs one request to completion.
///
/// Clones share the same exchange, so a clone can be handed to whoever needs
/// to [`cancel`](RequestPipeline::cancel) it. A pipeline performs at most one
/// request.
#[derive(Clone)]
pub struct RequestPipeline {
    shared: Arc<Shared>,
}

impl RequestPipeline {
    pub fn new(transport: Arc<dyn Transport>, options: PipelineOptions) -> Self {
        let has_interceptor = options.interceptor.is_some();
        Self {
            shared: Arc::new(Shared {
                transport,
                options,
                inner: Mutex::new(Inner::new(has_interceptor)),
            }),
        }
    }

    /// Starts the request. `on_complete` is called exactly once, on the
    /// configured executor, with the final response or the reason it failed.
    pub fn perform<F>(&self, request: Request<Bytes>, on_complete: F)
    where
        F: FnOnce(PipelineResult) + Send + 'static,
    {
        let accepted = {
            let mut inner = lock(&self.shared.inner);
            if matches!(inner.state, State::Idle) && inner.completion.is_none() {
                let completion: Completion = Box::new(on_complete);
                inner.completion = Some(completion);
                None
            } else {
                Some(on_complete)
            }
        };

        match accepted {
            None => {
                tracing::debug!("Performing {} {}", request.method(), request.uri());
                self.shared.dispatch(Event::Start(request));
            }
            Some(on_complete) => {
                tracing::warn!("Rejecting second request on pipeline: {}", request.uri());
                self.shared
                    .options
                    .executor
                    .execute(Box::new(move || on_complete(Err(PipelineError::AlreadyPerformed))));
            }
        }
    }

    /// Like [`perform`](RequestPipeline::perform), resolving a future instead
    /// of calling back.
    pub async fn perform_async(&self, request: Request<Bytes>) -> PipelineResult {
        let (sender, receiver) = oneshot::channel();
        self.perform(request, move |result| {
            let _ = sender.send(result);
        });
        receiver.await.unwrap_or(Err(PipelineError::Cancelled))
    }

    /// Cancels the request. A live transport task is cancelled right away.
    /// Otherwise the request ends as cancelled as soon as the pending
    /// adaptation or retry decision answers. Repeated calls have no effect.
    pub fn cancel(&self) {
        self.shared.dispatch(Event::Cancel);
    }

    /// Retries performed so far.
    pub fn retry_count(&self) -> usize {
        lock(&self.shared.inner).retry_count
    }

    pub fn is_finished(&self) -> bool {
        lock(&self.shared.inner).state.is_terminal()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(lock(&self.shared.inner).state, State::Cancelled)
    }
}

impl Shared {
    fn dispatch(self: &Arc<Self>, event: Event) {
        {
            let mut inner = lock(&self.inner);
            inner.queue.push_back(event);
            if inner.draining {
                return;
            }
            inner.draining = true;
        }

        loop {
            let action = {
                let mut inner = lock(&self.inner);
                match inner.queue.pop_front() {
                    Some(event) => inner.transition(event),
                    None => {
                        inner.draining = false;
                        return;
                    }
                }
            };
            self.run(action);
        }
    }

    fn run(self: &Arc<Self>, action: Action) {
        match action {
            Action::Nothing => {}

            Action::Begin(request) => {
                if let Some(interceptor) = &self.options.interceptor {
                    interceptor.request_will_start(&request);
                }
                self.dispatch(Event::Began(request));
            }

            Action::Adapt(request) => {
                if let Some(interceptor) = &self.options.interceptor {
                    let shared = self.clone();
                    interceptor.adapt(
                        request,
                        Box::new(move |result| {
                            let result = result.map_err(PipelineError::adaptation_failed);
                            shared.dispatch(Event::Adapted(result));
                        }),
                    );
                }
            }

            Action::Perform { attempt, request } => {
                tracing::debug!(
                    "Attempt {} for {} {}",
                    attempt,
                    request.method(),
                    request.uri()
                );
                let shared = self.clone();
                let task = self.transport.perform_request(
                    request,
                    Box::new(move |outcome| {
                        shared.dispatch(Event::TransportCompleted { attempt, outcome });
                    }),
                );
                self.dispatch(Event::TaskStarted { attempt, task });
            }

            Action::CancelTask(task) => {
                tracing::debug!("Cancelling live transport task");
                task.cancel();
            }

            Action::Evaluate { attempt, outcome } => {
                let result = self.evaluate(outcome);
                self.dispatch(Event::Evaluated { attempt, result });
            }

            Action::AskRetrier {
                retry_count,
                request,
                error,
            } => {
                if let Some(interceptor) = &self.options.interceptor {
                    let shared = self.clone();
                    let context = RetryContext {
                        retry_count,
                        request: &request,
                    };
                    interceptor.retry(
                        &context,
                        &error,
                        Box::new(move |retry| shared.dispatch(Event::RetryDecided(retry))),
                    );
                }
            }

            Action::Finish { result, completion } => {
                match &result {
                    Ok(response) => tracing::debug!("Request finished with {}", response.status()),
                    Err(error) => tracing::debug!("Request failed: {}", error),
                }
                if let Some(interceptor) = &self.options.interceptor {
                    interceptor.request_did_end(&result);
                }
                self.options
                    .executor
                    .execute(Box::new(move || completion(result)));
            }
        }
    }

    fn evaluate(&self, outcome: TransportOutcome) -> PipelineResult {
        if let Some(error) = outcome.error {
            return Err(match error {
                TransportError::Cancelled => PipelineError::Cancelled,
                TransportError::InvalidRequestUrl(url) => PipelineError::InvalidRequestUrl(url),
                source => PipelineError::TransportFailed {
                    source,
                    response: outcome.response,
                },
            });
        }

        let metadata = outcome.response.ok_or(PipelineError::UnexpectedEmptyResult)?;

        for validator in &self.options.validators {
            if let Err(source) = validator.validate(&metadata, outcome.body.as_ref()) {
                tracing::debug!("Response {} rejected: {}", metadata.status, source);
                return Err(PipelineError::ValidationFailed {
                    source,
                    response: metadata,
                    body: outcome.body,
                });
            }
        }

        Ok(metadata.into_response(outcome.body))
    }
}

#[cfg(test)]
mod test {
    use super::{PipelineOptions, RequestPipeline};
    use crate::{
        pipeline::error::PipelineError,
        transport::{CompletedTask, TaskHandle, Transport, TransportCallback, TransportOutcome},
    };
    use bytes::Bytes;
    use http::{Request, Response};
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    };

    /// Answers synchronously from inside `perform_request`.
    struct InlineOk(AtomicUsize);

    impl Transport for InlineOk {
        fn perform_request(
            &self,
            _: Request<Bytes>,
            on_complete: TransportCallback,
        ) -> Box<dyn TaskHandle> {
            self.0.fetch_add(1, Ordering::SeqCst);
            let response = Response::builder()
                .status(200)
                .body(Bytes::from_static(b"ok"))
                .unwrap();
            on_complete(TransportOutcome::from_response(response));
            Box::new(CompletedTask)
        }
    }

    struct Empty;

    impl Transport for Empty {
        fn perform_request(
            &self,
            _: Request<Bytes>,
            on_complete: TransportCallback,
        ) -> Box<dyn TaskHandle> {
            on_complete(TransportOutcome::default());
            Box::new(CompletedTask)
        }
    }

    fn request() -> Request<Bytes> {
        Request::builder()
            .uri("http://x.com/a")
            .body(Bytes::new())
            .unwrap()
    }

    #[test]
    fn synchronous_transport_completes_once() {
        // Arrange
        let transport = Arc::new(InlineOk(AtomicUsize::new(0)));
        let pipeline = RequestPipeline::new(transport.clone(), PipelineOptions::new());
        let results = Arc::new(Mutex::new(Vec::new()));
        let sink = results.clone();

        // Act
        pipeline.perform(request(), move |result| sink.lock().unwrap().push(result));

        // Assert
        let results = results.lock().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].as_ref().unwrap().body().as_ref(), b"ok");
        assert_eq!(transport.0.load(Ordering::SeqCst), 1);
        assert!(pipeline.is_finished());
    }

    #[test]
    fn empty_outcome_is_reported() {
        let pipeline = RequestPipeline::new(Arc::new(Empty), PipelineOptions::new());
        let result = Arc::new(Mutex::new(None));
        let sink = result.clone();

        pipeline.perform(request(), move |r| *sink.lock().unwrap() = Some(r));

        assert!(matches!(
            result.lock().unwrap().take(),
            Some(Err(PipelineError::UnexpectedEmptyResult))
        ));
    }

    #[test]
    fn second_perform_is_rejected() {
        let transport = Arc::new(InlineOk(AtomicUsize::new(0)));
        let pipeline = RequestPipeline::new(transport.clone(), PipelineOptions::new());
        let second = Arc::new(Mutex::new(None));
        let sink = second.clone();

        pipeline.perform(request(), |_| {});
        pipeline.perform(request(), move |r| *sink.lock().unwrap() = Some(r));

        assert!(matches!(
            second.lock().unwrap().take(),
            Some(Err(PipelineError::AlreadyPerformed))
        ));
        assert_eq!(transport.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn perform_async_resolves() {
        let pipeline = RequestPipeline::new(
            Arc::new(InlineOk(AtomicUsize::new(0))),
            PipelineOptions::new(),
        );

        let response = pipeline.perform_async(request()).await.unwrap();

        assert_eq!(response.status(), 200);
    }
}
