//! The transport boundary.
//!
//! A [`Transport`] performs one HTTP exchange per call and reports its result
//! through a callback that must be invoked exactly once. Everything above this
//! layer (stub interception, the request pipeline) is written against this
//! callback contract only.
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use http::{Request, Response};
use thiserror::Error;

use crate::common::data::ResponseMetadata;

pub mod spawned;

pub use spawned::SpawnedTransport;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("the request was cancelled")]
    Cancelled,
    #[error("request URL cannot be resolved: {0}")]
    InvalidRequestUrl(String),
    #[error("cannot connect: {0}")]
    Connection(String),
    #[error("cannot send request: {0}")]
    Http(String),
    #[error("{0}")]
    Simulated(String),
}

/// What a transport hands back when an exchange ends.
///
/// A correct transport sets either `response` or `error`. An outcome that
/// carries neither is reported by the pipeline as an unexpected empty result.
#[derive(Debug, Clone, Default)]
pub struct TransportOutcome {
    pub body: Option<Bytes>,
    pub response: Option<ResponseMetadata>,
    pub error: Option<TransportError>,
}

impl TransportOutcome {
    pub fn from_response(response: Response<Bytes>) -> Self {
        let metadata = ResponseMetadata::from(&response);
        let body = response.into_body();
        Self {
            body: if body.is_empty() { None } else { Some(body) },
            response: Some(metadata),
            error: None,
        }
    }

    pub fn failed(error: TransportError) -> Self {
        Self {
            body: None,
            response: None,
            error: Some(error),
        }
    }
}

/// Called exactly once per transport task.
pub type TransportCallback = Box<dyn FnOnce(TransportOutcome) + Send + 'static>;

/// A handle to a running transport task.
pub trait TaskHandle: Send + Sync {
    /// Asks the transport to abort the task. The task still completes through
    /// its callback, usually with [`TransportError::Cancelled`].
    fn cancel(&self);
}

/// A task that has already finished by the time its handle is returned.
pub struct CompletedTask;

impl TaskHandle for CompletedTask {
    fn cancel(&self) {}
}

pub trait Transport: Send + Sync {
    fn perform_request(
        &self,
        request: Request<Bytes>,
        on_complete: TransportCallback,
    ) -> Box<dyn TaskHandle>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn perform_request(
        &self,
        request: Request<Bytes>,
        on_complete: TransportCallback,
    ) -> Box<dyn TaskHandle> {
        (**self).perform_request(request, on_complete)
    }
}

/// A strategy that can answer requests in place of the network.
pub trait TransportInterceptor: Send + Sync {
    fn should_intercept(&self, request: &Request<Bytes>) -> bool;

    fn intercept(&self, request: &Request<Bytes>) -> TransportOutcome;
}

/// A transport that fails every request. Used underneath interceptors when
/// no request may ever reach the network.
#[derive(Debug, Default, Clone)]
pub struct OfflineTransport;

impl Transport for OfflineTransport {
    fn perform_request(
        &self,
        request: Request<Bytes>,
        on_complete: TransportCallback,
    ) -> Box<dyn TaskHandle> {
        tracing::debug!("Offline transport refused request to {}", request.uri());
        on_complete(TransportOutcome::failed(TransportError::Connection(format!(
            "no network transport available for {}",
            request.uri()
        ))));
        Box::new(CompletedTask)
    }
}

/// Wraps a transport and routes requests through installed interceptors
/// before they reach it.
pub struct InterceptingTransport {
    inner: Arc<dyn Transport>,
    interceptors: RwLock<Vec<Arc<dyn TransportInterceptor>>>,
}

impl InterceptingTransport {
    pub fn new<T: Transport + 'static>(inner: T) -> Self {
        Self {
            inner: Arc::new(inner),
            interceptors: RwLock::new(Vec::new()),
        }
    }

    /// Installs an interceptor. Interceptors are consulted in installation order.
    pub fn install(&self, interceptor: Arc<dyn TransportInterceptor>) {
        let mut interceptors = self.interceptors.write().unwrap_or_else(|e| e.into_inner());
        if !interceptors.iter().any(|i| Arc::ptr_eq(i, &interceptor)) {
            interceptors.push(interceptor);
        }
    }

    /// Removes a previously installed interceptor. Returns `false` if it was not installed.
    pub fn uninstall(&self, interceptor: &Arc<dyn TransportInterceptor>) -> bool {
        let mut interceptors = self.interceptors.write().unwrap_or_else(|e| e.into_inner());
        let before = interceptors.len();
        interceptors.retain(|i| !Arc::ptr_eq(i, interceptor));
        before != interceptors.len()
    }

    pub fn interceptor_count(&self) -> usize {
        self.interceptors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    fn find_interceptor(&self, request: &Request<Bytes>) -> Option<Arc<dyn TransportInterceptor>> {
        self.interceptors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|i| i.should_intercept(request))
            .cloned()
    }
}

impl Transport for InterceptingTransport {
    fn perform_request(
        &self,
        request: Request<Bytes>,
        on_complete: TransportCallback,
    ) -> Box<dyn TaskHandle> {
        match self.find_interceptor(&request) {
            Some(interceptor) => {
                tracing::trace!("Intercepting request to {}", request.uri());
                on_complete(interceptor.intercept(&request));
                Box::new(CompletedTask)
            }
            None => self.inner.perform_request(request, on_complete),
        }
    }
}
