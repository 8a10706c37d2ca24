//! `httpstub` answers outgoing HTTP requests from registered stubs and runs
//! real ones through a resilient request pipeline. It contains two major components:
//!
//! * a **stub engine** that resolves requests against a registry of rules, picking the most
//!   specific rule when several match, and
//! * a **request pipeline** that adapts, sends, validates and retries a single request, can be
//!   cancelled at any point and reports its result exactly once.
//!
//! Both meet in the transport layer: the
//! [MockTransportInterceptor](stubs::MockTransportInterceptor) is installed on an
//! [InterceptingTransport](transport::InterceptingTransport) and answers every request a stub
//! can match before it reaches the network.
//!
//! # Getting Started
//! ```rust
//! use std::sync::Arc;
//! use httpstub::prelude::*;
//!
//! // Arrange
//! let registry = Arc::new(StubRegistry::new());
//! registry
//!     .register(
//!         StubRule::get("https://api.example.com/users"),
//!         StubResponse::new()
//!             .status(200)
//!             .content_type("application/json")
//!             .body(r#"[{"name":"ferris"}]"#),
//!     )
//!     .unwrap();
//!
//! let client = HttpClient::mocked(registry);
//!
//! // Act
//! let response = client
//!     .get("https://api.example.com/users")
//!     .send_blocking()
//!     .unwrap();
//!
//! // Assert
//! assert_eq!(response.status(), 200);
//! assert_eq!(response.headers()["content-type"], "application/json");
//! ```
//!
//! # Matching
//! A [StubRule](stubs::StubRule) names a method and a URL pattern. Absent URL components are
//! wildcards, so `StubRule::get("/users")` answers `GET /users` on every host. A request whose
//! method and normalized URL equal a rule exactly is answered by that rule. Otherwise every rule
//! that can match is scored by the number of components it shares with the request and the
//! highest score wins. On a tie the most recently registered stub wins.
//!
//! Query strings are compared after sorting their `&`-separated items. With
//! [QueryMatchPolicy::AllowMissingQueryParameters](stubs::QueryMatchPolicy) a rule only requires
//! its own query items to be present in the request.
//!
//! Requests no stub can match are passed on to the wrapped transport. When the interceptor is
//! switched to "mock all" they are answered with `400 Bad Request` instead, flagged with the
//! [UNMATCHED_HEADER](stubs::UNMATCHED_HEADER) header.
//!
//! # Pipeline
//! A [RequestPipeline](pipeline::RequestPipeline) runs one request through its
//! [RequestInterceptor](pipeline::RequestInterceptor) (adaptation, retry decisions and lifecycle
//! hooks) and its [ResponseValidator](pipeline::ResponseValidator)s. The pipeline imposes no
//! retry limit of its own; [RetryLimit](pipeline::RetryLimit) is a ready made bound.
//!
//! # Configuration
//! [HttpClient::new](client::HttpClient::new) reads its defaults from the environment:
//!
//! | Variable                   | Default | Effect                                          |
//! |----------------------------|---------|-------------------------------------------------|
//! | `HTTPSTUB_MOCK_ALL`        | `false` | answer every request from stubs                 |
//! | `HTTPSTUB_VALIDATE_STATUS` | `true`  | reject responses outside `200..300`             |
//! | `HTTPSTUB_WORKER_THREADS`  | `2`     | worker threads of the network transport runtime |
//!
//! # Static stubs
//! With the `yaml` feature, stubs can be loaded from YAML documents, see
//! [stubs::persistence].
pub mod client;
pub mod common;
pub mod pipeline;
pub mod stubs;
pub mod transport;

pub use crate::client::{
    ClientError, HttpClient, HttpClientBuilder, HttpClientConfig, RequestBuilder,
};
pub use crate::common::data::{Method, RequestDescriptor, ResponseMetadata, UrlParts};

pub mod prelude {
    #[doc(no_inline)]
    pub use crate::client::{ClientError, HttpClient, HttpClientBuilder, HttpClientConfig};
    #[doc(no_inline)]
    pub use crate::common::data::{Method, RequestDescriptor, ResponseMetadata};
    #[doc(no_inline)]
    pub use crate::pipeline::{
        ContentTypeValidator, PipelineError, PipelineOptions, RequestInterceptor,
        RequestPipeline, RetryLimit, StatusCodeValidator,
    };
    #[doc(no_inline)]
    pub use crate::stubs::{
        MockTransportInterceptor, QueryMatchPolicy, SimulatedError, StubRegistry, StubResponse,
        StubRule,
    };
    #[doc(no_inline)]
    pub use crate::transport::{InterceptingTransport, Transport, TransportError};
}
