use std::{
    convert::TryFrom,
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use bytes::Bytes;
use http::{
    header::CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, Request, Response, StatusCode,
};
use thiserror::Error;

use crate::{
    common::data::{self, RequestDescriptor},
    stubs::{registry::StubRegistry, response::StubResponse},
    transport::{TransportError, TransportInterceptor, TransportOutcome},
};

/// Header set on the response synthesized for requests without a matching stub.
pub const UNMATCHED_HEADER: &str = "x-httpstub-unmatched";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InterceptError {
    #[error("request URL cannot be resolved: {0}")]
    InvalidRequestUrl(String),
    #[error("invalid HTTP method {0}")]
    InvalidMethod(String),
    #[error("stub response cannot be built: {0}")]
    InvalidStubResponse(String),
}

/// The result of answering a request from stubs.
#[derive(Debug)]
pub enum Interception {
    /// A stub answered with a response.
    Resolved(Response<Bytes>),
    /// A stub answered with a simulated transport error.
    Failed(TransportError),
    /// No stub matched. A `400 Bad Request` carrying [`UNMATCHED_HEADER`] stands in.
    Unresolved(Response<Bytes>),
}

/// Answers outgoing requests from a [`StubRegistry`] instead of the network.
///
/// Install it on an [`InterceptingTransport`](crate::transport::InterceptingTransport).
/// Requests are intercepted when a registered rule can match them, or always
/// when "mock all" is switched on. In that mode requests without a stub fail
/// with a 400 response rather than reaching the network.
pub struct MockTransportInterceptor {
    registry: Arc<StubRegistry>,
    mock_all: AtomicBool,
}

impl MockTransportInterceptor {
    pub fn new(registry: Arc<StubRegistry>) -> Self {
        Self {
            registry,
            mock_all: AtomicBool::new(false),
        }
    }

    /// An interceptor backed by [`StubRegistry::shared`].
    pub fn shared() -> Self {
        Self::new(StubRegistry::shared())
    }

    pub fn mock_all(self, mock_all: bool) -> Self {
        self.set_mock_all(mock_all);
        self
    }

    pub fn set_mock_all(&self, mock_all: bool) {
        self.mock_all.store(mock_all, Ordering::SeqCst);
    }

    pub fn is_mock_all(&self) -> bool {
        self.mock_all.load(Ordering::SeqCst)
    }

    pub fn registry(&self) -> &Arc<StubRegistry> {
        &self.registry
    }

    pub fn should_intercept_request<B>(&self, request: &Request<B>) -> bool {
        if self.is_mock_all() {
            return true;
        }

        match RequestDescriptor::try_from(request) {
            Ok(descriptor) => self.registry.has_stub(&descriptor),
            Err(_) => false,
        }
    }

    /// Produces the stubbed result for a request.
    pub fn handle(&self, request: &Request<Bytes>) -> Result<Interception, InterceptError> {
        let descriptor = RequestDescriptor::try_from(request).map_err(|err| match err {
            data::Error::InvalidRequestUrl(url) => InterceptError::InvalidRequestUrl(url),
            data::Error::InvalidMethod(method) => InterceptError::InvalidMethod(method),
        })?;

        let stub = match self.registry.resolve(&descriptor) {
            Some(stub) => stub,
            None => {
                tracing::debug!("No stub matched {}, answering with 400", descriptor);
                return Ok(Interception::Unresolved(unmatched_response(&descriptor)));
            }
        };

        if let Some(error) = stub.simulated_error() {
            return Ok(Interception::Failed(TransportError::from(error)));
        }

        Ok(Interception::Resolved(build_response(&stub, request.headers())?))
    }
}

impl TransportInterceptor for MockTransportInterceptor {
    fn should_intercept(&self, request: &Request<Bytes>) -> bool {
        self.should_intercept_request(request)
    }

    fn intercept(&self, request: &Request<Bytes>) -> TransportOutcome {
        match self.handle(request) {
            Ok(Interception::Resolved(response)) | Ok(Interception::Unresolved(response)) => {
                TransportOutcome::from_response(response)
            }
            Ok(Interception::Failed(error)) => TransportOutcome::failed(error),
            Err(InterceptError::InvalidRequestUrl(url)) => {
                TransportOutcome::failed(TransportError::InvalidRequestUrl(url))
            }
            Err(err @ InterceptError::InvalidMethod(_))
            | Err(err @ InterceptError::InvalidStubResponse(_)) => {
                TransportOutcome::failed(TransportError::Http(err.to_string()))
            }
        }
    }
}

fn build_response(
    stub: &StubResponse,
    request_headers: &HeaderMap,
) -> Result<Response<Bytes>, InterceptError> {
    let status = StatusCode::from_u16(stub.status)
        .map_err(|err| InterceptError::InvalidStubResponse(err.to_string()))?;

    let mut headers = if stub.replace_headers {
        HeaderMap::new()
    } else {
        request_headers.clone()
    };

    for (name, value) in &stub.headers {
        let name = HeaderName::from_str(name)
            .map_err(|err| InterceptError::InvalidStubResponse(err.to_string()))?;
        let value = HeaderValue::from_str(value)
            .map_err(|err| InterceptError::InvalidStubResponse(err.to_string()))?;
        headers.insert(name, value);
    }

    if let Some(mime_type) = &stub.content_type {
        if !headers.contains_key(CONTENT_TYPE) {
            let value = HeaderValue::from_str(mime_type)
                .map_err(|err| InterceptError::InvalidStubResponse(err.to_string()))?;
            headers.insert(CONTENT_TYPE, value);
        }
    }

    let mut response = Response::new(stub.body.clone().unwrap_or_default());
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

fn unmatched_response(descriptor: &RequestDescriptor) -> Response<Bytes> {
    let mut response = Response::new(Bytes::from(format!(
        "no stub matched {}",
        descriptor
    )));
    *response.status_mut() = StatusCode::BAD_REQUEST;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response.headers_mut().insert(
        HeaderName::from_static(UNMATCHED_HEADER),
        HeaderValue::from_static("true"),
    );
    response
}

#[cfg(test)]
mod test {
    use super::{Interception, MockTransportInterceptor, UNMATCHED_HEADER};
    use crate::stubs::{registry::StubRegistry, response::StubResponse, rule::StubRule};
    use bytes::Bytes;
    use http::Request;
    use std::sync::Arc;

    #[test]
    fn unmatched_response_is_flagged() {
        let interceptor = MockTransportInterceptor::new(Arc::new(StubRegistry::new()));
        let request = Request::get("http://x.com/missing").body(Bytes::new()).unwrap();

        match interceptor.handle(&request).unwrap() {
            Interception::Unresolved(response) => {
                assert_eq!(response.status(), 400);
                assert_eq!(response.headers()[UNMATCHED_HEADER], "true");
                assert_eq!(response.body().as_ref(), b"no stub matched GET http://x.com/missing");
            }
            other => panic!("unexpected interception {:?}", other),
        }
    }

    #[test]
    fn invalid_status_is_reported() {
        let registry = Arc::new(StubRegistry::new());
        registry
            .register(StubRule::get("/a"), StubResponse::new().status(1000))
            .unwrap();
        let interceptor = MockTransportInterceptor::new(registry);
        let request = Request::get("http://x.com/a").body(Bytes::new()).unwrap();

        assert!(interceptor.handle(&request).is_err());
    }
}
