use std::{collections::VecDeque, fmt};

use bytes::Bytes;
use http::{Request, Response};

use crate::{
    pipeline::{error::PipelineError, Completion},
    transport::{TaskHandle, TransportOutcome},
};

pub(crate) enum State {
    Idle,
    /// `perform` was accepted, `request_will_start` has not run yet.
    Starting,
    Adapting,
    InFlight {
        attempt: u64,
        task: Option<Box<dyn TaskHandle>>,
    },
    Evaluating {
        attempt: u64,
    },
    Retrying {
        error: PipelineError,
    },
    Completed,
    Cancelled,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::Idle => "idle",
            State::Starting => "starting",
            State::Adapting => "adapting",
            State::InFlight { .. } => "in-flight",
            State::Evaluating { .. } => "evaluating",
            State::Retrying { .. } => "retrying",
            State::Completed => "completed",
            State::Cancelled => "cancelled",
        }
    }

    pub(crate) fn is_terminal(&self) -> bool {
        matches!(self, State::Completed | State::Cancelled)
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub(crate) enum Event {
    Start(Request<Bytes>),
    Began(Request<Bytes>),
    Adapted(Result<Request<Bytes>, PipelineError>),
    TaskStarted {
        attempt: u64,
        task: Box<dyn TaskHandle>,
    },
    TransportCompleted {
        attempt: u64,
        outcome: TransportOutcome,
    },
    Evaluated {
        attempt: u64,
        result: Result<Response<Bytes>, PipelineError>,
    },
    RetryDecided(bool),
    Cancel,
}

/// Side effects requested by a transition. They run outside the state lock.
pub(crate) enum Action {
    Nothing,
    Begin(Request<Bytes>),
    Adapt(Request<Bytes>),
    Perform {
        attempt: u64,
        request: Request<Bytes>,
    },
    CancelTask(Box<dyn TaskHandle>),
    Evaluate {
        attempt: u64,
        outcome: TransportOutcome,
    },
    AskRetrier {
        retry_count: usize,
        request: Request<Bytes>,
        error: PipelineError,
    },
    Finish {
        result: Result<Response<Bytes>, PipelineError>,
        completion: Completion,
    },
}

pub(crate) struct Inner {
    pub(crate) state: State,
    pub(crate) has_interceptor: bool,
    /// The adapted request. Every retry re-sends it.
    pub(crate) request: Option<Request<Bytes>>,
    pub(crate) retry_count: usize,
    pub(crate) attempt: u64,
    pub(crate) cancel_requested: bool,
    pub(crate) completion: Option<Completion>,
    pub(crate) queue: VecDeque<Event>,
    pub(crate) draining: bool,
}

impl Inner {
    pub(crate) fn new(has_interceptor: bool) -> Self {
        Self {
            state: State::Idle,
            has_interceptor,
            request: None,
            retry_count: 0,
            attempt: 0,
            cancel_requested: false,
            completion: None,
            queue: VecDeque::new(),
            draining: false,
        }
    }

    pub(crate) fn transition(&mut self, event: Event) -> Action {
        let from = self.state.name();
        let action = self.apply(event);
        tracing::trace!("Pipeline transition {} -> {}", from, self.state.name());
        action
    }

    fn apply(&mut self, event: Event) -> Action {
        match event {
            Event::Start(request) => {
                if !matches!(self.state, State::Idle) {
                    return Action::Nothing;
                }
                self.state = State::Starting;
                Action::Begin(request)
            }

            Event::Began(request) => {
                if !matches!(self.state, State::Starting) {
                    return Action::Nothing;
                }
                if self.cancel_requested {
                    return self.finish(Err(PipelineError::Cancelled));
                }
                if self.has_interceptor {
                    self.state = State::Adapting;
                    Action::Adapt(request)
                } else {
                    self.start_attempt(request)
                }
            }

            Event::Adapted(result) => {
                if !matches!(self.state, State::Adapting) {
                    tracing::warn!("Ignoring adapter completion in state {:?}", self.state);
                    return Action::Nothing;
                }
                if self.cancel_requested {
                    return self.finish(Err(PipelineError::Cancelled));
                }
                match result {
                    Ok(request) => self.start_attempt(request),
                    Err(error) => self.finish(Err(error)),
                }
            }

            Event::TaskStarted { attempt, task } => match &mut self.state {
                State::InFlight {
                    attempt: current,
                    task: slot,
                } if *current == attempt && slot.is_none() => {
                    if self.cancel_requested {
                        Action::CancelTask(task)
                    } else {
                        *slot = Some(task);
                        Action::Nothing
                    }
                }
                _ => Action::Nothing,
            },

            Event::TransportCompleted { attempt, outcome } => {
                let is_current = match self.state {
                    State::InFlight { attempt: current, .. } => current == attempt,
                    _ => false,
                };
                if !is_current {
                    tracing::debug!("Ignoring completion of superseded attempt {}", attempt);
                    return Action::Nothing;
                }
                if self.cancel_requested {
                    return self.finish(Err(PipelineError::Cancelled));
                }
                self.state = State::Evaluating { attempt };
                Action::Evaluate { attempt, outcome }
            }

            Event::Evaluated { attempt, result } => {
                let is_current = match self.state {
                    State::Evaluating { attempt: current } => current == attempt,
                    _ => false,
                };
                if !is_current {
                    return Action::Nothing;
                }
                if self.cancel_requested {
                    return self.finish(Err(PipelineError::Cancelled));
                }
                match result {
                    Err(error) if error.is_retryable() && self.has_interceptor => {
                        match self.request.as_ref().map(clone_request) {
                            Some(request) => {
                                self.state = State::Retrying {
                                    error: error.clone(),
                                };
                                Action::AskRetrier {
                                    retry_count: self.retry_count,
                                    request,
                                    error,
                                }
                            }
                            None => self.finish(Err(error)),
                        }
                    }
                    result => self.finish(result),
                }
            }

            Event::RetryDecided(retry) => {
                let error = match std::mem::replace(&mut self.state, State::Idle) {
                    State::Retrying { error } => error,
                    other => {
                        self.state = other;
                        tracing::warn!("Ignoring retry decision in state {:?}", self.state);
                        return Action::Nothing;
                    }
                };
                if self.cancel_requested {
                    return self.finish(Err(PipelineError::Cancelled));
                }
                if !retry {
                    return self.finish(Err(error));
                }
                match self.request.as_ref().map(clone_request) {
                    Some(request) => {
                        self.retry_count += 1;
                        tracing::debug!(
                            "Retrying {} (retry {})",
                            request.uri(),
                            self.retry_count
                        );
                        self.start_attempt(request)
                    }
                    None => self.finish(Err(error)),
                }
            }

            Event::Cancel => {
                if self.cancel_requested || self.state.is_terminal() {
                    return Action::Nothing;
                }
                self.cancel_requested = true;
                match &mut self.state {
                    State::InFlight { task, .. } => match task.take() {
                        Some(task) => Action::CancelTask(task),
                        None => Action::Nothing,
                    },
                    _ => Action::Nothing,
                }
            }
        }
    }

    fn start_attempt(&mut self, request: Request<Bytes>) -> Action {
        self.attempt += 1;
        self.request = Some(clone_request(&request));
        self.state = State::InFlight {
            attempt: self.attempt,
            task: None,
        };
        Action::Perform {
            attempt: self.attempt,
            request,
        }
    }

    fn finish(&mut self, result: Result<Response<Bytes>, PipelineError>) -> Action {
        self.state = if matches!(result, Err(PipelineError::Cancelled)) {
            State::Cancelled
        } else {
            State::Completed
        };
        self.request = None;

        match self.completion.take() {
            Some(completion) => Action::Finish { result, completion },
            None => Action::Nothing,
        }
    }
}

/// Copies method, URI, version, headers and body. Extensions are not carried over.
pub(crate) fn clone_request(request: &Request<Bytes>) -> Request<Bytes> {
    let mut clone = Request::new(request.body().clone());
    *clone.method_mut() = request.method().clone();
    *clone.uri_mut() = request.uri().clone();
    *clone.version_mut() = request.version();
    *clone.headers_mut() = request.headers().clone();
    clone
}
