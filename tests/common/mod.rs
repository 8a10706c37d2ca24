#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, Once,
    },
    thread,
    time::Duration,
};

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Request, Response};
use httpstub::{
    pipeline::{
        AdaptCallback, PipelineError, PipelineResult, RequestInterceptor, RetryCallback,
        RetryContext,
    },
    transport::{
        CompletedTask, TaskHandle, Transport, TransportCallback, TransportError, TransportOutcome,
    },
};
use tracing_subscriber::EnvFilter;

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn get(uri: &str) -> Request<Bytes> {
    Request::builder()
        .uri(uri)
        .body(Bytes::new())
        .expect("cannot build request")
}

pub fn ok(status: u16, body: &'static str) -> TransportOutcome {
    let response = Response::builder()
        .status(status)
        .header("content-type", "text/plain")
        .body(Bytes::from_static(body.as_bytes()))
        .expect("cannot build response");
    TransportOutcome::from_response(response)
}

pub fn connection_refused() -> TransportOutcome {
    TransportOutcome::failed(TransportError::Connection("connection refused".to_string()))
}

// ***********************************************************************************************
// Completion collection
// ***********************************************************************************************
pub type Results = Arc<Mutex<Vec<PipelineResult>>>;

pub fn collector() -> (Results, impl FnOnce(PipelineResult) + Send + 'static) {
    let results: Results = Arc::new(Mutex::new(Vec::new()));
    let sink = results.clone();
    (results, move |result| sink.lock().unwrap().push(result))
}

/// Polls until `results` holds at least one entry.
pub fn wait_for(results: &Results) {
    for _ in 0..500 {
        if !results.lock().unwrap().is_empty() {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("the request did not complete in time");
}

// ***********************************************************************************************
// Transports
// ***********************************************************************************************
/// Answers synchronously with the next scripted outcome, `200 OK` once the
/// script is exhausted.
pub struct ScriptedTransport {
    outcomes: Mutex<VecDeque<TransportOutcome>>,
    requests: Mutex<Vec<(String, HeaderMap)>>,
}

impl ScriptedTransport {
    pub fn new(outcomes: Vec<TransportOutcome>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn attempts(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn uris(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(uri, _)| uri.clone())
            .collect()
    }

    pub fn headers(&self, attempt: usize) -> HeaderMap {
        self.requests.lock().unwrap()[attempt].1.clone()
    }
}

impl Transport for ScriptedTransport {
    fn perform_request(
        &self,
        request: Request<Bytes>,
        on_complete: TransportCallback,
    ) -> Box<dyn TaskHandle> {
        self.requests
            .lock()
            .unwrap()
            .push((request.uri().to_string(), request.headers().clone()));
        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ok(200, "ok"));
        on_complete(outcome);
        Box::new(CompletedTask)
    }
}

/// Runs another transport on a fresh thread after a short delay.
pub struct ThreadedTransport<T> {
    inner: Arc<T>,
}

impl<T: Transport + 'static> ThreadedTransport<T> {
    pub fn new(inner: Arc<T>) -> Arc<Self> {
        Arc::new(Self { inner })
    }
}

impl<T: Transport + 'static> Transport for ThreadedTransport<T> {
    fn perform_request(
        &self,
        request: Request<Bytes>,
        on_complete: TransportCallback,
    ) -> Box<dyn TaskHandle> {
        let inner = self.inner.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            inner.perform_request(request, on_complete);
        });
        Box::new(CompletedTask)
    }
}

struct PendingState {
    callbacks: Mutex<Vec<Option<TransportCallback>>>,
    cancellations: AtomicUsize,
    ignore_cancel: bool,
}

impl PendingState {
    fn complete(&self, task: usize, outcome: TransportOutcome) -> bool {
        let callback = self
            .callbacks
            .lock()
            .unwrap()
            .get_mut(task)
            .and_then(Option::take);
        match callback {
            Some(callback) => {
                callback(outcome);
                true
            }
            None => false,
        }
    }
}

/// Holds every task open until it is released or cancelled.
#[derive(Clone)]
pub struct PendingTransport {
    state: Arc<PendingState>,
}

impl PendingTransport {
    pub fn new() -> Self {
        Self::with_cancel_support(true)
    }

    /// A transport whose tasks keep running when cancelled.
    pub fn ignoring_cancel() -> Self {
        Self::with_cancel_support(false)
    }

    fn with_cancel_support(supported: bool) -> Self {
        Self {
            state: Arc::new(PendingState {
                callbacks: Mutex::new(Vec::new()),
                cancellations: AtomicUsize::new(0),
                ignore_cancel: !supported,
            }),
        }
    }

    pub fn started(&self) -> usize {
        self.state.callbacks.lock().unwrap().len()
    }

    pub fn cancellations(&self) -> usize {
        self.state.cancellations.load(Ordering::SeqCst)
    }

    /// Completes a task. Returns `false` if it had already completed.
    pub fn release(&self, task: usize, outcome: TransportOutcome) -> bool {
        self.state.complete(task, outcome)
    }
}

struct PendingTask {
    state: Arc<PendingState>,
    index: usize,
}

impl TaskHandle for PendingTask {
    fn cancel(&self) {
        self.state.cancellations.fetch_add(1, Ordering::SeqCst);
        if !self.state.ignore_cancel {
            self.state
                .complete(self.index, TransportOutcome::failed(TransportError::Cancelled));
        }
    }
}

impl Transport for PendingTransport {
    fn perform_request(
        &self,
        _: Request<Bytes>,
        on_complete: TransportCallback,
    ) -> Box<dyn TaskHandle> {
        let mut callbacks = self.state.callbacks.lock().unwrap();
        callbacks.push(Some(on_complete));
        Box::new(PendingTask {
            state: self.state.clone(),
            index: callbacks.len() - 1,
        })
    }
}

// ***********************************************************************************************
// Interceptor
// ***********************************************************************************************
/// Records every hook call. Retries retryable failures up to a limit.
#[derive(Default)]
pub struct RecordingInterceptor {
    events: Mutex<Vec<&'static str>>,
    max_retries: usize,
    defer_adaptation: bool,
    fail_adaptation: bool,
    extra_header: Option<(&'static str, &'static str)>,
    pending_adaptation: Mutex<Option<(Request<Bytes>, AdaptCallback)>>,
    adapting: AtomicBool,
}

impl RecordingInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Holds adaptation until [`RecordingInterceptor::release_adaptation`].
    pub fn deferred(mut self) -> Self {
        self.defer_adaptation = true;
        self
    }

    pub fn failing_adaptation(mut self) -> Self {
        self.fail_adaptation = true;
        self
    }

    pub fn adding_header(mut self, name: &'static str, value: &'static str) -> Self {
        self.extra_header = Some((name, value));
        self
    }

    pub fn release_adaptation(&self) {
        let pending = self.pending_adaptation.lock().unwrap().take();
        let (request, completion) = pending.expect("no adaptation is pending");
        self.adapting.store(false, Ordering::SeqCst);
        completion(Ok(request));
    }

    pub fn is_adapting(&self) -> bool {
        self.adapting.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().clone()
    }

    /// Only the lifecycle hooks, in call order.
    pub fn hooks(&self) -> Vec<&'static str> {
        self.events()
            .into_iter()
            .filter(|e| *e == "will_start" || *e == "did_end")
            .collect()
    }

    fn record(&self, event: &'static str) {
        self.events.lock().unwrap().push(event);
    }
}

impl RequestInterceptor for RecordingInterceptor {
    fn adapt(&self, mut request: Request<Bytes>, completion: AdaptCallback) {
        self.record("adapt");
        if self.fail_adaptation {
            completion(Err("adaptation refused".into()));
            return;
        }
        if let Some((name, value)) = self.extra_header {
            request
                .headers_mut()
                .insert(name, HeaderValue::from_static(value));
        }
        if self.defer_adaptation {
            self.adapting.store(true, Ordering::SeqCst);
            *self.pending_adaptation.lock().unwrap() = Some((request, completion));
            return;
        }
        completion(Ok(request))
    }

    fn retry(&self, context: &RetryContext<'_>, error: &PipelineError, completion: RetryCallback) {
        self.record("retry");
        completion(error.is_retryable() && context.retry_count < self.max_retries)
    }

    fn request_will_start(&self, _: &Request<Bytes>) {
        self.record("will_start");
    }

    fn request_did_end(&self, _: &Result<Response<Bytes>, PipelineError>) {
        self.record("did_end");
    }
}
