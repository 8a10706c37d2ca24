use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt, path::Path};

use crate::{common::util::read_file, transport::TransportError};

/// An error a stub reports instead of a response.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SimulatedError {
    /// The connection could not be established.
    Connection(String),
    /// Any other transport failure.
    Other(String),
}

impl From<&SimulatedError> for TransportError {
    fn from(value: &SimulatedError) -> Self {
        match value {
            SimulatedError::Connection(msg) => TransportError::Connection(msg.clone()),
            SimulatedError::Other(msg) => TransportError::Simulated(msg.clone()),
        }
    }
}

/// The canned response paired with a [`StubRule`](crate::stubs::StubRule).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StubResponse {
    pub(crate) status: u16,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: Option<Bytes>,
    pub(crate) content_type: Option<String>,
    pub(crate) replace_headers: bool,
    pub(crate) error: Option<SimulatedError>,
}

impl StubResponse {
    pub fn new() -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: None,
            content_type: None,
            replace_headers: true,
            error: None,
        }
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Adds a header. Later values for the same name win when the response is built.
    pub fn header<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn body<B: Into<Bytes>>(mut self, body: B) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Sets a JSON body and declares `application/json` as its content type.
    pub fn json_body(mut self, body: Value) -> Self {
        self.body = Some(Bytes::from(body.to_string()));
        self.content_type = Some("application/json".to_string());
        self
    }

    /// Reads the body from a file.
    pub fn body_from_file<P: AsRef<Path>>(self, path: P) -> std::io::Result<Self> {
        let content = read_file(path)?;
        Ok(self.body(content))
    }

    /// A mime type that is added as `Content-Type` unless a header already declares one.
    pub fn content_type<S: Into<String>>(mut self, mime_type: S) -> Self {
        self.content_type = Some(mime_type.into());
        self
    }

    /// With `true` (the default) the response carries only the stub headers.
    /// With `false` the stub headers are merged over the headers of the request.
    pub fn replace_headers(mut self, replace: bool) -> Self {
        self.replace_headers = replace;
        self
    }

    /// Makes the stub fail with a transport error. Takes precedence over status and body.
    pub fn error(mut self, error: SimulatedError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn status_code(&self) -> u16 {
        self.status
    }

    pub fn body_bytes(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn simulated_error(&self) -> Option<&SimulatedError> {
        self.error.as_ref()
    }
}

impl Default for StubResponse {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StubResponse {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(error) = &self.error {
            return write!(f, "error {:?}", error);
        }
        write!(f, "status {}", self.status)?;
        if let Some(body) = &self.body {
            write!(f, ", {} byte body", body.len())?;
        }
        if let Some(content_type) = &self.content_type {
            write!(f, ", {}", content_type)?;
        }
        Ok(())
    }
}
