use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::common::data::{Method, RequestDescriptor, UrlParts};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuleError {
    #[error("stub rule '{0}' needs a path or a concrete host")]
    MissingPathOrHost(String),
}

/// How the query of a rule is compared against the query of a request.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QueryMatchPolicy {
    /// The sorted query strings must be identical. A rule without a query
    /// accepts any query.
    #[default]
    ExactMatch,
    /// Every query item of the rule must be present in the request with the
    /// same value. Additional request items are ignored.
    AllowMissingQueryParameters,
}

/// The URL side of a stub rule.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub enum UrlPattern {
    /// Matches every URL, regardless of scheme, host, port, path and query.
    AnyRoute,
    /// Matches URLs component by component. Absent components are wildcards.
    Url(UrlParts),
}

impl UrlPattern {
    pub fn parts(&self) -> Option<&UrlParts> {
        match self {
            UrlPattern::AnyRoute => None,
            UrlPattern::Url(parts) => Some(parts),
        }
    }
}

impl fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            UrlPattern::AnyRoute => write!(f, "*"),
            UrlPattern::Url(parts) => write!(f, "{}", parts),
        }
    }
}

/// A pattern that recognizes requests which should receive a canned response.
///
/// Two rules are the same registry key when method, URL pattern and query
/// policy are all equal.
///
/// # Example
/// ```
/// use httpstub::prelude::*;
///
/// let rule = StubRule::get("https://api.example.com/users?page=1")
///     .query_match_policy(QueryMatchPolicy::AllowMissingQueryParameters);
///
/// assert_eq!(rule.method(), Some(&Method::GET));
/// assert!(rule.validate().is_ok());
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct StubRule {
    method: Option<Method>,
    url: UrlPattern,
    query_match_policy: QueryMatchPolicy,
}

impl StubRule {
    pub fn new<IntoUrl: AsRef<str>>(method: Option<Method>, url: IntoUrl) -> Self {
        Self {
            method,
            url: UrlPattern::Url(UrlParts::parse(url.as_ref())),
            query_match_policy: QueryMatchPolicy::default(),
        }
    }

    pub fn get<IntoUrl: AsRef<str>>(url: IntoUrl) -> Self {
        Self::new(Some(Method::GET), url)
    }

    pub fn post<IntoUrl: AsRef<str>>(url: IntoUrl) -> Self {
        Self::new(Some(Method::POST), url)
    }

    pub fn put<IntoUrl: AsRef<str>>(url: IntoUrl) -> Self {
        Self::new(Some(Method::PUT), url)
    }

    pub fn patch<IntoUrl: AsRef<str>>(url: IntoUrl) -> Self {
        Self::new(Some(Method::PATCH), url)
    }

    pub fn delete<IntoUrl: AsRef<str>>(url: IntoUrl) -> Self {
        Self::new(Some(Method::DELETE), url)
    }

    pub fn head<IntoUrl: AsRef<str>>(url: IntoUrl) -> Self {
        Self::new(Some(Method::HEAD), url)
    }

    /// Matches requests of any method to any URL.
    pub fn all_requests() -> Self {
        Self::any_route(None)
    }

    /// Matches every URL once the method matches. `None` accepts any method.
    pub fn any_route(method: Option<Method>) -> Self {
        Self {
            method,
            url: UrlPattern::AnyRoute,
            query_match_policy: QueryMatchPolicy::default(),
        }
    }

    /// The rule an incoming request would have if it had been registered verbatim.
    pub(crate) fn exact_for(request: &RequestDescriptor) -> Self {
        Self {
            method: Some(request.method.clone()),
            url: UrlPattern::Url(request.url.clone()),
            query_match_policy: QueryMatchPolicy::ExactMatch,
        }
    }

    pub fn query_match_policy(mut self, policy: QueryMatchPolicy) -> Self {
        self.query_match_policy = policy;
        self
    }

    pub fn allow_missing_query_parameters(self) -> Self {
        self.query_match_policy(QueryMatchPolicy::AllowMissingQueryParameters)
    }

    pub fn method(&self) -> Option<&Method> {
        self.method.as_ref()
    }

    pub fn url(&self) -> &UrlPattern {
        &self.url
    }

    pub fn policy(&self) -> QueryMatchPolicy {
        self.query_match_policy
    }

    pub fn is_all_requests(&self) -> bool {
        self.method.is_none() && self.url == UrlPattern::AnyRoute
    }

    /// A rule can be registered if it is a route wildcard or names a path or a
    /// concrete host. Scheme-only and query-only patterns are rejected.
    pub fn validate(&self) -> Result<(), RuleError> {
        let parts = match &self.url {
            UrlPattern::AnyRoute => return Ok(()),
            UrlPattern::Url(parts) => parts,
        };

        let has_path = !parts.trimmed_path().is_empty();
        let has_host = parts
            .host
            .as_deref()
            .map_or(false, |h| !h.is_empty() && h != "*");

        if has_path || has_host {
            Ok(())
        } else {
            Err(RuleError::MissingPathOrHost(self.to_string()))
        }
    }
}

impl fmt::Display for StubRule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.method {
            Some(method) => write!(f, "{} {}", method, self.url)?,
            None => write!(f, "ANY {}", self.url)?,
        }
        if self.query_match_policy == QueryMatchPolicy::AllowMissingQueryParameters {
            write!(f, " (allow missing query parameters)")?;
        }
        Ok(())
    }
}
