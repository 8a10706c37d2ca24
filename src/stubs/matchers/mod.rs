//! Decides whether a stub rule can answer a request and how specific the fit is.
//!
//! Each matcher looks at one attribute (method, scheme, host, port, path or
//! query). A matcher *matches* when the rule leaves the attribute open or the
//! values agree. It *scores* one point when the rule value and the request value
//! agree, counting two absent values as agreement.
use std::fmt::Debug;

use crate::{
    common::data::{Method, RequestDescriptor},
    stubs::{
        matchers::comparators::{CaseInsensitiveComparator, ExactMatchComparator, ValueComparator},
        rule::{QueryMatchPolicy, StubRule, UrlPattern},
    },
};

pub(crate) mod comparators;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MatcherScope {
    /// Checked for every rule.
    Request,
    /// Skipped for rules with an [`UrlPattern::AnyRoute`] pattern.
    Url,
}

pub(crate) trait Matcher {
    fn scope(&self) -> MatcherScope;
    fn matches(&self, req: &RequestDescriptor, rule: &StubRule) -> bool;
    fn score(&self, req: &RequestDescriptor, rule: &StubRule) -> usize;
}

pub(crate) fn all() -> Vec<Box<dyn Matcher + Sync + Send>> {
    vec![
        // method
        Box::new(AttributeMatcher::<Method> {
            entity_name: "method",
            scope: MatcherScope::Request,
            expectation: |rule| rule.method().cloned(),
            request_value: |req| Some(req.method.clone()),
            comparator: Box::new(ExactMatchComparator),
        }),
        // scheme
        Box::new(AttributeMatcher::<String> {
            entity_name: "scheme",
            scope: MatcherScope::Url,
            expectation: |rule| rule.url().parts().and_then(|p| p.scheme.clone()),
            request_value: |req| req.url.scheme.clone(),
            comparator: Box::new(CaseInsensitiveComparator),
        }),
        // host
        Box::new(AttributeMatcher::<String> {
            entity_name: "host",
            scope: MatcherScope::Url,
            expectation: |rule| {
                rule.url()
                    .parts()
                    .and_then(|p| p.host.clone())
                    .filter(|h| h.as_str() != "*")
            },
            request_value: |req| req.url.host.clone(),
            comparator: Box::new(CaseInsensitiveComparator),
        }),
        // port
        Box::new(AttributeMatcher::<u16> {
            entity_name: "port",
            scope: MatcherScope::Url,
            expectation: |rule| rule.url().parts().and_then(|p| p.port),
            request_value: |req| req.url.port,
            comparator: Box::new(ExactMatchComparator),
        }),
        // path
        Box::new(AttributeMatcher::<String> {
            entity_name: "path",
            scope: MatcherScope::Url,
            expectation: |rule| {
                rule.url()
                    .parts()
                    .map(|p| p.trimmed_path())
                    .filter(|p| !p.is_empty())
            },
            request_value: |req| Some(req.url.trimmed_path()).filter(|p| !p.is_empty()),
            comparator: Box::new(ExactMatchComparator),
        }),
        // query
        Box::new(QueryMatcher),
    ]
}

/// Whether `rule` is a candidate for `req` at all.
pub(crate) fn rule_can_match(
    matchers: &[Box<dyn Matcher + Sync + Send>],
    rule: &StubRule,
    req: &RequestDescriptor,
) -> bool {
    if rule.is_all_requests() {
        return true;
    }

    let any_route = *rule.url() == UrlPattern::AnyRoute;

    matchers
        .iter()
        .filter(|m| !(any_route && m.scope() == MatcherScope::Url))
        .all(|m| m.matches(req, rule))
}

/// The number of attributes on which `rule` and `req` agree.
pub(crate) fn score(
    matchers: &[Box<dyn Matcher + Sync + Send>],
    rule: &StubRule,
    req: &RequestDescriptor,
) -> usize {
    matchers.iter().map(|m| m.score(req, rule)).sum()
}

// ************************************************************************************************
// AttributeMatcher
// ************************************************************************************************
pub(crate) struct AttributeMatcher<T> {
    pub entity_name: &'static str,
    pub scope: MatcherScope,
    pub expectation: fn(&StubRule) -> Option<T>,
    pub request_value: fn(&RequestDescriptor) -> Option<T>,
    pub comparator: Box<dyn ValueComparator<T> + Send + Sync>,
}

impl<T: Debug> Matcher for AttributeMatcher<T> {
    fn scope(&self) -> MatcherScope {
        self.scope
    }

    fn matches(&self, req: &RequestDescriptor, rule: &StubRule) -> bool {
        let expected = match (self.expectation)(rule) {
            None => return true,
            Some(v) => v,
        };

        let is_match = match (self.request_value)(req) {
            Some(actual) => self.comparator.matches(&expected, &actual),
            None => false,
        };

        if !is_match {
            tracing::trace!(
                "Rule '{}' rejects {}: expected {} {} {:?}",
                rule,
                req,
                self.entity_name,
                self.comparator.name(),
                expected
            );
        }

        is_match
    }

    fn score(&self, req: &RequestDescriptor, rule: &StubRule) -> usize {
        match ((self.expectation)(rule), (self.request_value)(req)) {
            (None, None) => 1,
            (Some(expected), Some(actual)) if self.comparator.matches(&expected, &actual) => 1,
            _ => 0,
        }
    }
}

// ************************************************************************************************
// QueryMatcher
// ************************************************************************************************
pub(crate) struct QueryMatcher;

impl QueryMatcher {
    fn contains_all(req: &RequestDescriptor, rule_items: &[(String, String)]) -> bool {
        let req_items = req.url.query_items();
        rule_items.iter().all(|item| req_items.contains(item))
    }
}

impl Matcher for QueryMatcher {
    fn scope(&self) -> MatcherScope {
        MatcherScope::Url
    }

    fn matches(&self, req: &RequestDescriptor, rule: &StubRule) -> bool {
        let parts = match rule.url().parts() {
            Some(parts) => parts,
            None => return true,
        };

        let expected = match &parts.query {
            None => return true,
            Some(query) => query,
        };

        match rule.policy() {
            QueryMatchPolicy::ExactMatch => req.url.query.as_ref() == Some(expected),
            QueryMatchPolicy::AllowMissingQueryParameters => {
                Self::contains_all(req, &parts.query_items())
            }
        }
    }

    fn score(&self, req: &RequestDescriptor, rule: &StubRule) -> usize {
        let rule_query = rule.url().parts().and_then(|p| p.query.as_ref());
        if rule_query == req.url.query.as_ref() {
            return 1;
        }

        match (rule.policy(), rule.url().parts()) {
            (QueryMatchPolicy::AllowMissingQueryParameters, Some(parts))
                if parts.query.is_some() && Self::contains_all(req, &parts.query_items()) =>
            {
                1
            }
            _ => 0,
        }
    }
}
