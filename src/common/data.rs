use bytes::Bytes;
use http::{HeaderMap, StatusCode, Version};
use serde::{Deserialize, Serialize};
use std::{convert::TryFrom, fmt, str::FromStr};
use url::Url;

use crate::common::data::Error::{InvalidMethod, InvalidRequestUrl};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("invalid HTTP method {0}")]
    InvalidMethod(String),
    #[error("request URL cannot be resolved: {0}")]
    InvalidRequestUrl(String),
}

/// Represents an HTTP method.
///
/// Methods without a variant of their own, such as WebDAV's `PROPFIND`, are
/// kept verbatim in [`Method::Other`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub enum Method {
    GET,
    HEAD,
    POST,
    PUT,
    DELETE,
    CONNECT,
    OPTIONS,
    TRACE,
    PATCH,
    Other(String),
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.to_uppercase().as_str() {
            "GET" => Ok(Method::GET),
            "HEAD" => Ok(Method::HEAD),
            "POST" => Ok(Method::POST),
            "PUT" => Ok(Method::PUT),
            "DELETE" => Ok(Method::DELETE),
            "CONNECT" => Ok(Method::CONNECT),
            "OPTIONS" => Ok(Method::OPTIONS),
            "TRACE" => Ok(Method::TRACE),
            "PATCH" => Ok(Method::PATCH),
            _ => match http::Method::from_bytes(input.as_bytes()) {
                Ok(_) => Ok(Method::Other(input.to_string())),
                Err(_) => Err(InvalidMethod(input.to_string())),
            },
        }
    }
}

impl TryFrom<String> for Method {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Method> for String {
    fn from(value: Method) -> Self {
        value.to_string()
    }
}

impl TryFrom<&http::Method> for Method {
    type Error = Error;

    fn try_from(value: &http::Method) -> Result<Self, Self::Error> {
        value.as_str().parse()
    }
}

impl TryFrom<&Method> for http::Method {
    type Error = Error;

    fn try_from(value: &Method) -> Result<Self, Self::Error> {
        let method = match value {
            Method::GET => http::Method::GET,
            Method::HEAD => http::Method::HEAD,
            Method::POST => http::Method::POST,
            Method::PUT => http::Method::PUT,
            Method::DELETE => http::Method::DELETE,
            Method::CONNECT => http::Method::CONNECT,
            Method::OPTIONS => http::Method::OPTIONS,
            Method::TRACE => http::Method::TRACE,
            Method::PATCH => http::Method::PATCH,
            Method::Other(name) => http::Method::from_bytes(name.as_bytes())
                .map_err(|_| InvalidMethod(name.clone()))?,
        };
        Ok(method)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Method::Other(name) => f.write_str(name),
            _ => fmt::Debug::fmt(self, f),
        }
    }
}

/// The components of a URL as they take part in stub matching.
///
/// Every component except the path is optional. An absent component acts as a
/// wildcard when the value belongs to a stub rule. The query is stored in its
/// normalized form: raw `key=value` tokens sorted lexicographically and joined
/// with `&`. Tokens are not percent-decoded.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct UrlParts {
    pub scheme: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: String,
    pub query: Option<String>,
}

impl UrlParts {
    /// Splits a URL-like string into its components.
    ///
    /// Absolute URLs (`https://x.com:8080/a?b=1`) are parsed with [`Url`], which
    /// drops fragments and ports that are the default for the scheme. Patterns
    /// that are not absolute URLs, such as scheme-only fragments (`https://`),
    /// plain paths (`/a/b`) and bare queries (`?a=1`), are split by hand.
    pub fn parse(value: &str) -> Self {
        match Url::parse(value) {
            Ok(url) if url.has_host() => UrlParts::from(&url),
            _ => Self::parse_partial(value),
        }
    }

    fn parse_partial(value: &str) -> Self {
        let value = match value.find('#') {
            Some(idx) => &value[..idx],
            None => value,
        };

        let (scheme, rest) = match value.find("://") {
            Some(idx) => (non_empty(&value[..idx]), &value[idx + 3..]),
            None => (None, value),
        };

        let (authority, rest) = if scheme.is_some() {
            let end = rest.find(|c: char| c == '/' || c == '?').unwrap_or(rest.len());
            (&rest[..end], &rest[end..])
        } else {
            ("", rest)
        };

        let (host, port) = split_authority(authority);

        let (path, query) = match rest.find('?') {
            Some(idx) => (&rest[..idx], Some(&rest[idx + 1..])),
            None => (rest, None),
        };

        Self {
            scheme,
            host,
            port,
            path: path.to_string(),
            query: query.and_then(normalize_query),
        }
    }

    /// The path with leading and trailing slashes removed, lowercased.
    pub fn trimmed_path(&self) -> String {
        self.path.trim_matches('/').to_lowercase()
    }

    /// Percent-decoded query items, in normalized order.
    pub fn query_items(&self) -> Vec<(String, String)> {
        match &self.query {
            None => Vec::new(),
            Some(query) => form_urlencoded::parse(query.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
        }
    }
}

impl fmt::Display for UrlParts {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(scheme) = &self.scheme {
            write!(f, "{}://", scheme)?;
        }
        if let Some(host) = &self.host {
            write!(f, "{}", host)?;
        }
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        write!(f, "{}", self.path)?;
        if let Some(query) = &self.query {
            write!(f, "?{}", query)?;
        }
        Ok(())
    }
}

impl From<&Url> for UrlParts {
    fn from(url: &Url) -> Self {
        Self {
            scheme: non_empty(url.scheme()),
            host: url.host_str().and_then(non_empty),
            port: url.port(),
            path: url.path().to_string(),
            query: url.query().and_then(normalize_query),
        }
    }
}

impl From<&str> for UrlParts {
    fn from(value: &str) -> Self {
        UrlParts::parse(value)
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn split_authority(authority: &str) -> (Option<String>, Option<u16>) {
    // Drop user info, it never takes part in matching.
    let authority = match authority.rfind('@') {
        Some(idx) => &authority[idx + 1..],
        None => authority,
    };

    if let Some(idx) = authority.rfind(':') {
        // IPv6 literals carry colons inside the brackets.
        if !authority[idx..].contains(']') {
            if let Ok(port) = authority[idx + 1..].parse::<u16>() {
                return (non_empty(&authority[..idx]), Some(port));
            }
        }
    }

    (non_empty(authority), None)
}

/// Sorts the raw `&`-separated tokens of a query string.
pub(crate) fn normalize_query(query: &str) -> Option<String> {
    let mut tokens: Vec<&str> = query.split('&').filter(|t| !t.is_empty()).collect();
    if tokens.is_empty() {
        return None;
    }
    tokens.sort_unstable();
    Some(tokens.join("&"))
}

/// Describes an outgoing request as far as stub resolution is concerned.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    pub method: Method,
    pub url: UrlParts,
}

impl RequestDescriptor {
    pub fn new<IntoUrl: AsRef<str>>(method: Method, url: IntoUrl) -> Self {
        Self {
            method,
            url: UrlParts::parse(url.as_ref()),
        }
    }

    pub fn get<IntoUrl: AsRef<str>>(url: IntoUrl) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post<IntoUrl: AsRef<str>>(url: IntoUrl) -> Self {
        Self::new(Method::POST, url)
    }
}

impl fmt::Display for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

impl<B> TryFrom<&http::Request<B>> for RequestDescriptor {
    type Error = Error;

    fn try_from(value: &http::Request<B>) -> Result<Self, Self::Error> {
        let uri = value.uri();
        let url = match (uri.scheme(), uri.authority()) {
            (Some(_), Some(_)) => Url::parse(&uri.to_string())
                .map(|url| UrlParts::from(&url))
                .map_err(|_| InvalidRequestUrl(uri.to_string()))?,
            (None, None) if uri.path().starts_with('/') => UrlParts {
                scheme: None,
                host: None,
                port: None,
                path: uri.path().to_string(),
                query: uri.query().and_then(normalize_query),
            },
            _ => return Err(InvalidRequestUrl(uri.to_string())),
        };

        Ok(Self {
            method: Method::try_from(value.method())?,
            url,
        })
    }
}

/// Status line and headers of a received response.
#[derive(Debug, Clone)]
pub struct ResponseMetadata {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub version: Version,
}

impl ResponseMetadata {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            version: Version::HTTP_11,
        }
    }

    /// The mime type of the `Content-Type` header without parameters.
    pub fn mime_type(&self) -> Option<String> {
        self.headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_lowercase())
    }

    pub fn into_response(self, body: Option<Bytes>) -> http::Response<Bytes> {
        let mut response = http::Response::new(body.unwrap_or_default());
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        *response.version_mut() = self.version;
        response
    }
}

impl<B> From<&http::Response<B>> for ResponseMetadata {
    fn from(value: &http::Response<B>) -> Self {
        Self {
            status: value.status(),
            headers: value.headers().clone(),
            version: value.version(),
        }
    }
}
