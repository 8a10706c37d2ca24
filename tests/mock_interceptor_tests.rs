use std::sync::Arc;

use bytes::Bytes;
use http::Request;
use httpstub::{
    pipeline::{PipelineError, PipelineOptions, RequestPipeline},
    stubs::{
        InterceptError, Interception, MockTransportInterceptor, SimulatedError, StubRegistry,
        StubResponse, StubRule, UNMATCHED_HEADER,
    },
    transport::{InterceptingTransport, TransportError, TransportInterceptor},
    ClientError, HttpClient, HttpClientBuilder, HttpClientConfig,
};
use serde_json::json;

mod common;

use common::{collector, get, init_logging, ScriptedTransport};

fn registry_with(rule: StubRule, response: StubResponse) -> Arc<StubRegistry> {
    let registry = Arc::new(StubRegistry::new());
    registry.register(rule, response).unwrap();
    registry
}

#[test]
fn stubbed_response_is_served() {
    // Arrange
    init_logging();
    let registry = registry_with(
        StubRule::get("https://api.x.com/users"),
        StubResponse::new()
            .status(200)
            .header("x-total", "1")
            .json_body(json!([{ "name": "ferris" }])),
    );
    let client = HttpClient::mocked(registry);

    // Act
    let response = client
        .get("https://api.x.com/users")
        .send_blocking()
        .unwrap();

    // Assert
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-total"], "1");
    assert_eq!(response.headers()["content-type"], "application/json");
    let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body, json!([{ "name": "ferris" }]));
}

#[test]
fn explicit_content_type_header_is_kept() {
    let registry = registry_with(
        StubRule::get("/doc"),
        StubResponse::new()
            .header("content-type", "text/markdown")
            .content_type("text/plain")
            .body("# title"),
    );
    let client = HttpClient::mocked(registry);

    let response = client.get("/doc").send_blocking().unwrap();

    assert_eq!(response.headers()["content-type"], "text/markdown");
}

#[test]
fn request_headers_are_merged_unless_replaced() {
    let registry = Arc::new(StubRegistry::new());
    registry
        .register(
            StubRule::get("/merged"),
            StubResponse::new()
                .replace_headers(false)
                .header("x-stub", "yes"),
        )
        .unwrap();
    registry
        .register(
            StubRule::get("/replaced"),
            StubResponse::new().header("x-stub", "yes"),
        )
        .unwrap();
    let client = HttpClient::mocked(registry);

    let merged = client
        .get("/merged")
        .header("x-request-id", "42")
        .send_blocking()
        .unwrap();
    let replaced = client
        .get("/replaced")
        .header("x-request-id", "42")
        .send_blocking()
        .unwrap();

    assert_eq!(merged.headers()["x-request-id"], "42");
    assert_eq!(merged.headers()["x-stub"], "yes");
    assert!(replaced.headers().get("x-request-id").is_none());
    assert_eq!(replaced.headers()["x-stub"], "yes");
}

#[test]
fn unmatched_request_gets_flagged_bad_request() {
    // Arrange
    let client = HttpClient::mocked(Arc::new(StubRegistry::new()));

    // Act
    let response = client
        .post("https://api.x.com/unknown")
        .send_blocking()
        .unwrap();

    // Assert
    assert_eq!(response.status(), 400);
    assert_eq!(response.headers()[UNMATCHED_HEADER], "true");
    let body = String::from_utf8(response.body().to_vec()).unwrap();
    assert!(body.contains("POST https://api.x.com/unknown"));
}

#[test]
fn unmatched_request_fails_status_validation() {
    let client = HttpClientBuilder::with_config(HttpClientConfig {
        mock_all: true,
        ..HttpClientConfig::default()
    })
    .transport(httpstub::transport::OfflineTransport)
    .registry(Arc::new(StubRegistry::new()))
    .build()
    .unwrap();

    let error = client.get("/missing").send_blocking().unwrap_err();

    let response = error.pipeline_error().and_then(|e| e.response()).unwrap();
    assert_eq!(response.status, 400);
    assert!(response.headers.contains_key(UNMATCHED_HEADER));
}

#[test]
fn simulated_error_takes_precedence() {
    let registry = registry_with(
        StubRule::get("/flaky"),
        StubResponse::new()
            .status(200)
            .body("never seen")
            .error(SimulatedError::Connection("cable unplugged".to_string())),
    );
    let client = HttpClient::mocked(registry);

    let error = client.get("/flaky").send_blocking().unwrap_err();

    assert!(matches!(
        error,
        ClientError::Pipeline(PipelineError::TransportFailed {
            source: TransportError::Connection(_),
            ..
        })
    ));
}

#[test]
fn only_matching_requests_are_intercepted() {
    // Arrange
    let network = ScriptedTransport::new(vec![]);
    let registry = registry_with(StubRule::get("/stubbed"), StubResponse::new().status(201));
    let client = HttpClientBuilder::with_config(HttpClientConfig::default())
        .transport(network.clone())
        .registry(registry)
        .build()
        .unwrap();

    // Act
    let stubbed = client.get("http://localhost/stubbed").send_blocking().unwrap();
    let passed = client.get("http://localhost/real").send_blocking().unwrap();

    // Assert
    assert_eq!(stubbed.status(), 201);
    assert_eq!(passed.body().as_ref(), b"ok");
    assert_eq!(network.uris(), vec!["http://localhost/real".to_string()]);
}

#[test]
fn should_intercept_uses_the_candidate_filter() {
    let registry = registry_with(StubRule::get("/a?x=1"), StubResponse::new());
    let interceptor = MockTransportInterceptor::new(registry);

    assert!(interceptor.should_intercept(&get("http://h/a?x=1")));
    assert!(!interceptor.should_intercept(&get("http://h/a?x=2")));
    assert!(!interceptor.should_intercept(
        &Request::post("http://h/a?x=1").body(Bytes::new()).unwrap()
    ));

    interceptor.set_mock_all(true);
    assert!(interceptor.should_intercept(&get("http://h/anything")));
}

#[test]
fn interception_can_be_uninstalled() {
    // Arrange
    let network = ScriptedTransport::new(vec![]);
    let transport = Arc::new(InterceptingTransport::new(network.clone()));
    let interceptor: Arc<dyn TransportInterceptor> = Arc::new(MockTransportInterceptor::new(
        registry_with(StubRule::get("/a"), StubResponse::new().status(202)),
    ));
    transport.install(interceptor.clone());

    let perform = |transport: &Arc<InterceptingTransport>| {
        let (results, on_complete) = collector();
        RequestPipeline::new(transport.clone(), PipelineOptions::new())
            .perform(get("http://localhost/a"), on_complete);
        let status = results.lock().unwrap()[0].as_ref().unwrap().status();
        status
    };

    // Act
    let intercepted = perform(&transport);
    assert!(transport.uninstall(&interceptor));
    let passed = perform(&transport);

    // Assert
    assert_eq!(intercepted, 202);
    assert_eq!(passed, 200);
    assert_eq!(network.attempts(), 1);
}

#[test]
fn invalid_request_url_is_reported() {
    let interceptor = MockTransportInterceptor::new(Arc::new(StubRegistry::new())).mock_all(true);
    let request = Request::builder().uri("*").body(Bytes::new()).unwrap();

    assert!(matches!(
        interceptor.handle(&request),
        Err(InterceptError::InvalidRequestUrl(_))
    ));

    let transport = Arc::new(InterceptingTransport::new(httpstub::transport::OfflineTransport));
    transport.install(Arc::new(interceptor));
    let (results, on_complete) = collector();
    RequestPipeline::new(transport, PipelineOptions::new()).perform(request, on_complete);

    assert!(matches!(
        results.lock().unwrap()[0],
        Err(PipelineError::InvalidRequestUrl(_))
    ));
}

#[test]
fn handle_reports_the_resolution_kind() {
    let registry = registry_with(StubRule::get("/a"), StubResponse::new().status(203));
    let interceptor = MockTransportInterceptor::new(registry);

    match interceptor.handle(&get("http://h/a")).unwrap() {
        Interception::Resolved(response) => assert_eq!(response.status(), 203),
        other => panic!("unexpected interception: {:?}", other),
    }
    assert!(matches!(
        interceptor.handle(&get("http://h/b")).unwrap(),
        Interception::Unresolved(_)
    ));
}

#[test]
fn extension_methods_are_stubbed() {
    // Arrange
    let registry = registry_with(StubRule::all_requests(), StubResponse::new().status(202));
    registry
        .register(
            StubRule::new(Some("PROPFIND".parse().unwrap()), "https://x.com/dav"),
            StubResponse::new().status(207),
        )
        .unwrap();
    let client = HttpClient::mocked(registry);
    let propfind = http::Method::from_bytes(b"PROPFIND").unwrap();
    let mkcol = http::Method::from_bytes(b"MKCOL").unwrap();

    // Act
    let listed = client
        .request(propfind, "https://x.com/dav")
        .send_blocking()
        .unwrap();
    let created = client
        .request(mkcol, "https://x.com/dav/new")
        .send_blocking()
        .unwrap();

    // Assert
    assert_eq!(listed.status(), 207);
    assert_eq!(created.status(), 202);
}
