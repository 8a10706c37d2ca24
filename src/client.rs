//! A small HTTP client that wires a transport, the stub interceptor and the
//! request pipeline together.
use std::{str::FromStr, sync::Arc};

use bytes::Bytes;
use http::{header::CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, Request, Response};
use serde::Serialize;
use thiserror::Error;

use crate::{
    common::util::{read_env, read_env_flag, Join},
    pipeline::{
        CompletionExecutor, PipelineError, PipelineOptions, PipelineResult, RequestInterceptor,
        RequestPipeline, ResponseValidator, StatusCodeValidator,
    },
    stubs::{MockTransportInterceptor, StubRegistry},
    transport::{InterceptingTransport, OfflineTransport, Transport, TransportInterceptor},
};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("cannot start transport runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("cannot build request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl ClientError {
    pub fn pipeline_error(&self) -> Option<&PipelineError> {
        match self {
            ClientError::Pipeline(err) => Some(err),
            _ => None,
        }
    }
}

// ***********************************************************************************************
// Configuration
// ***********************************************************************************************
#[derive(Debug, Clone, PartialEq)]
pub struct HttpClientConfig {
    /// Answer every request from stubs. Unmatched requests get a 400 response.
    pub mock_all: bool,
    /// Reject responses outside `200..300`.
    pub validate_status: bool,
    /// Worker threads of the runtime owned by the network transport.
    pub worker_threads: usize,
}

impl HttpClientConfig {
    /// Reads `HTTPSTUB_MOCK_ALL`, `HTTPSTUB_VALIDATE_STATUS` and
    /// `HTTPSTUB_WORKER_THREADS`, falling back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let worker_threads = read_env("HTTPSTUB_WORKER_THREADS", "")
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .unwrap_or(defaults.worker_threads);

        Self {
            mock_all: read_env_flag("HTTPSTUB_MOCK_ALL", defaults.mock_all),
            validate_status: read_env_flag("HTTPSTUB_VALIDATE_STATUS", defaults.validate_status),
            worker_threads,
        }
    }
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            mock_all: false,
            validate_status: true,
            worker_threads: 2,
        }
    }
}

// ***********************************************************************************************
// Builder
// ***********************************************************************************************
pub struct HttpClientBuilder {
    config: HttpClientConfig,
    transport: Option<Arc<dyn Transport>>,
    registry: Option<Arc<StubRegistry>>,
    options: PipelineOptions,
    default_headers: Vec<(String, String)>,
}

impl HttpClientBuilder {
    pub fn new() -> Self {
        Self::with_config(HttpClientConfig::from_env())
    }

    pub fn with_config(config: HttpClientConfig) -> Self {
        Self {
            config,
            transport: None,
            registry: None,
            options: PipelineOptions::new(),
            default_headers: Vec::new(),
        }
    }

    pub fn mock_all(mut self, mock_all: bool) -> Self {
        self.config.mock_all = mock_all;
        self
    }

    pub fn validate_status(mut self, validate_status: bool) -> Self {
        self.config.validate_status = validate_status;
        self
    }

    pub fn worker_threads(mut self, worker_threads: usize) -> Self {
        self.config.worker_threads = worker_threads;
        self
    }

    /// The transport requests go to when no stub answers them.
    pub fn transport<T: Transport + 'static>(mut self, transport: T) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// The registry stubs are resolved from. Defaults to [`StubRegistry::shared`].
    pub fn registry(mut self, registry: Arc<StubRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn validator<V: ResponseValidator + 'static>(mut self, validator: V) -> Self {
        self.options = self.options.validator(validator);
        self
    }

    pub fn interceptor<I: RequestInterceptor + 'static>(mut self, interceptor: I) -> Self {
        self.options = self.options.interceptor(interceptor);
        self
    }

    pub fn executor<E: CompletionExecutor + 'static>(mut self, executor: E) -> Self {
        self.options = self.options.executor(executor);
        self
    }

    pub fn default_header<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    pub fn build(self) -> Result<HttpClient, ClientError> {
        let inner = match self.transport {
            Some(transport) => transport,
            None => default_transport(&self.config)?,
        };

        let registry = self.registry.unwrap_or_else(StubRegistry::shared);
        let mock = Arc::new(MockTransportInterceptor::new(registry).mock_all(self.config.mock_all));

        let transport = Arc::new(InterceptingTransport::new(inner));
        let installed: Arc<dyn TransportInterceptor> = mock.clone();
        transport.install(installed);

        let mut validators = Vec::new();
        if self.config.validate_status {
            let status: Arc<dyn ResponseValidator> = Arc::new(StatusCodeValidator::success());
            validators.push(status);
        }
        validators.extend(self.options.validators);
        let options = PipelineOptions {
            validators,
            ..self.options
        };

        tracing::debug!(
            "Built HTTP client (mock all: {}, validators: {}, interceptor: {})",
            self.config.mock_all,
            options.validator_count(),
            options.has_interceptor()
        );

        Ok(HttpClient {
            transport,
            mock,
            options,
            default_headers: parse_headers(&self.default_headers)?,
        })
    }
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "remote")]
fn default_transport(config: &HttpClientConfig) -> Result<Arc<dyn Transport>, ClientError> {
    use crate::{common::http::HyperTransport, transport::SpawnedTransport};

    let transport =
        SpawnedTransport::with_own_runtime(HyperTransport::new(), config.worker_threads)?;
    Ok(Arc::new(transport))
}

#[cfg(not(feature = "remote"))]
fn default_transport(_: &HttpClientConfig) -> Result<Arc<dyn Transport>, ClientError> {
    Ok(Arc::new(OfflineTransport))
}

// ***********************************************************************************************
// Client
// ***********************************************************************************************
/// Sends requests through a [`RequestPipeline`], answering from stubs where
/// a stub matches.
#[derive(Clone)]
pub struct HttpClient {
    transport: Arc<InterceptingTransport>,
    mock: Arc<MockTransportInterceptor>,
    options: PipelineOptions,
    default_headers: HeaderMap,
}

impl HttpClient {
    /// A client configured from the environment.
    pub fn new() -> Result<Self, ClientError> {
        Self::builder().build()
    }

    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::new()
    }

    /// A client that never touches the network. Every request is answered
    /// from `registry` and no status validation is applied.
    pub fn mocked(registry: Arc<StubRegistry>) -> Self {
        let mock = Arc::new(MockTransportInterceptor::new(registry).mock_all(true));
        let transport = Arc::new(InterceptingTransport::new(OfflineTransport));
        let installed: Arc<dyn TransportInterceptor> = mock.clone();
        transport.install(installed);

        Self {
            transport,
            mock,
            options: PipelineOptions::new(),
            default_headers: HeaderMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<StubRegistry> {
        self.mock.registry()
    }

    pub fn mock_interceptor(&self) -> &Arc<MockTransportInterceptor> {
        &self.mock
    }

    /// The transport used by this client. Further interceptors may be installed on it.
    pub fn transport(&self) -> &Arc<InterceptingTransport> {
        &self.transport
    }

    /// A fresh pipeline sharing this client's transport and options.
    pub fn pipeline(&self) -> RequestPipeline {
        RequestPipeline::new(self.transport.clone(), self.options.clone())
    }

    pub fn request<U: Into<String>>(&self, method: http::Method, url: U) -> RequestBuilder {
        RequestBuilder::new(self.clone(), method, url.into())
    }

    pub fn get<U: Into<String>>(&self, url: U) -> RequestBuilder {
        self.request(http::Method::GET, url)
    }

    pub fn post<U: Into<String>>(&self, url: U) -> RequestBuilder {
        self.request(http::Method::POST, url)
    }

    pub fn put<U: Into<String>>(&self, url: U) -> RequestBuilder {
        self.request(http::Method::PUT, url)
    }

    pub fn patch<U: Into<String>>(&self, url: U) -> RequestBuilder {
        self.request(http::Method::PATCH, url)
    }

    pub fn delete<U: Into<String>>(&self, url: U) -> RequestBuilder {
        self.request(http::Method::DELETE, url)
    }

    pub fn head<U: Into<String>>(&self, url: U) -> RequestBuilder {
        self.request(http::Method::HEAD, url)
    }
}

// ***********************************************************************************************
// Request builder
// ***********************************************************************************************
pub struct RequestBuilder {
    client: HttpClient,
    method: http::Method,
    url: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: Bytes,
    error: Option<ClientError>,
}

impl RequestBuilder {
    fn new(client: HttpClient, method: http::Method, url: String) -> Self {
        Self {
            client,
            method,
            url,
            query: Vec::new(),
            headers: Vec::new(),
            body: Bytes::new(),
            error: None,
        }
    }

    pub fn header<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Appends a URL-encoded query parameter.
    pub fn query_param<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn body<B: Into<Bytes>>(mut self, body: B) -> Self {
        self.body = body.into();
        self
    }

    /// Serializes `value` as the body and sets `Content-Type: application/json`.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => {
                self.body = Bytes::from(body);
                self.header(CONTENT_TYPE.as_str(), "application/json")
            }
            Err(err) => {
                self.error = Some(ClientError::InvalidRequest(err.to_string()));
                self
            }
        }
    }

    pub fn build(self) -> Result<(HttpClient, Request<Bytes>), ClientError> {
        if let Some(err) = self.error {
            return Err(err);
        }

        let url = append_query(&self.url, &self.query)?;
        let mut request = Request::builder()
            .method(self.method)
            .uri(url.as_str())
            .body(self.body)
            .map_err(|err| ClientError::InvalidRequest(err.to_string()))?;

        let headers = request.headers_mut();
        for (name, value) in self.client.default_headers.iter() {
            headers.insert(name.clone(), value.clone());
        }
        for (name, value) in parse_headers(&self.headers)? {
            if let Some(name) = name {
                headers.insert(name, value);
            }
        }

        Ok((self.client, request))
    }

    /// Starts the request and returns its pipeline, which can be used to cancel it.
    pub fn send<F>(self, on_complete: F) -> Result<RequestPipeline, ClientError>
    where
        F: FnOnce(PipelineResult) + Send + 'static,
    {
        let (client, request) = self.build()?;
        let pipeline = client.pipeline();
        pipeline.perform(request, on_complete);
        Ok(pipeline)
    }

    pub async fn send_async(self) -> Result<Response<Bytes>, ClientError> {
        let (client, request) = self.build()?;
        Ok(client.pipeline().perform_async(request).await?)
    }

    /// Blocks the current thread until the request has finished.
    pub fn send_blocking(self) -> Result<Response<Bytes>, ClientError> {
        self.send_async().join()
    }
}

fn append_query(url: &str, query: &[(String, String)]) -> Result<String, ClientError> {
    if query.is_empty() {
        return Ok(url.to_string());
    }

    match url::Url::parse(url) {
        Ok(mut parsed) => {
            parsed.query_pairs_mut().extend_pairs(query);
            Ok(parsed.to_string())
        }
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let encoded = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(query)
                .finish();
            let separator = if url.contains('?') { '&' } else { '?' };
            Ok(format!("{}{}{}", url, separator, encoded))
        }
        Err(err) => Err(ClientError::InvalidRequest(format!("{}: {}", url, err))),
    }
}

fn parse_headers(headers: &[(String, String)]) -> Result<HeaderMap, ClientError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_str(name)
            .map_err(|err| ClientError::InvalidRequest(format!("header '{}': {}", name, err)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|err| ClientError::InvalidRequest(format!("header '{}': {}", name, err)))?;
        map.insert(name, value);
    }
    Ok(map)
}
