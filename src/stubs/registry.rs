use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Mutex, OnceLock},
};

use thiserror::Error;

use crate::{
    common::{data::RequestDescriptor, util::lock},
    stubs::{
        matchers,
        matchers::Matcher,
        response::StubResponse,
        rule::{RuleError, StubRule},
    },
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("cannot register stub: {0}")]
    InvalidRule(#[from] RuleError),
}

/// How a resolution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// A rule registered verbatim for the request was found.
    Exact,
    /// The best scoring candidate rule was chosen.
    Fuzzy { score: usize, candidates: usize },
    /// No rule can answer the request.
    None,
}

/// Everything a [`ResolutionLogger`] learns about one resolution.
#[derive(Debug)]
pub struct ResolutionEvent<'a> {
    pub request: &'a RequestDescriptor,
    pub kind: MatchKind,
    pub rule: Option<&'a StubRule>,
    pub response: Option<&'a StubResponse>,
}

impl fmt::Display for ResolutionEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (self.kind, self.rule, self.response) {
            (MatchKind::Exact, Some(rule), Some(response)) => {
                write!(f, "{} matched '{}' exactly: {}", self.request, rule, response)
            }
            (MatchKind::Fuzzy { score, candidates }, Some(rule), Some(response)) => write!(
                f,
                "{} matched '{}' with score {} out of {} candidates: {}",
                self.request, rule, score, candidates, response
            ),
            _ => write!(f, "{} did not match any stub", self.request),
        }
    }
}

/// Receives a note for every stub resolution.
///
/// Implementations must not block. A panicking logger is contained and the
/// resolution continues.
pub trait ResolutionLogger: Send + Sync {
    fn log(&self, event: &ResolutionEvent<'_>);
}

/// Forwards resolution events to `tracing` at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingResolutionLogger;

impl ResolutionLogger for TracingResolutionLogger {
    fn log(&self, event: &ResolutionEvent<'_>) {
        tracing::debug!("{}", event);
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ActiveStub {
    pub rule: StubRule,
    pub response: StubResponse,
}

struct RegistryState {
    next_stub_id: usize,
    stubs: BTreeMap<usize, ActiveStub>,
    index: HashMap<StubRule, usize>,
}

impl RegistryState {
    fn new() -> Self {
        Self {
            next_stub_id: 0,
            stubs: BTreeMap::new(),
            index: HashMap::new(),
        }
    }
}

/// Maps stub rules to canned responses and resolves requests against them.
///
/// All operations lock an internal mutex, so a registry can be shared between
/// threads. Tests that should not see each other's stubs use their own
/// registry instead of [`StubRegistry::shared`].
pub struct StubRegistry {
    state: Mutex<RegistryState>,
    matchers: Vec<Box<dyn Matcher + Sync + Send>>,
    logger: Arc<dyn ResolutionLogger>,
}

static SHARED_REGISTRY: OnceLock<Arc<StubRegistry>> = OnceLock::new();

impl StubRegistry {
    pub fn new() -> Self {
        Self::with_logger(Arc::new(TracingResolutionLogger))
    }

    pub fn with_logger(logger: Arc<dyn ResolutionLogger>) -> Self {
        Self {
            state: Mutex::new(RegistryState::new()),
            matchers: matchers::all(),
            logger,
        }
    }

    /// The process wide default registry.
    pub fn shared() -> Arc<StubRegistry> {
        SHARED_REGISTRY
            .get_or_init(|| Arc::new(StubRegistry::new()))
            .clone()
    }

    /// Registers a stub. Registering a rule that is already present replaces
    /// its response and keeps its position in registration order.
    pub fn register(&self, rule: StubRule, response: StubResponse) -> Result<(), RegistryError> {
        rule.validate()?;

        let mut state = lock(&self.state);

        if let Some(id) = state.index.get(&rule).copied() {
            tracing::warn!(
                "Stub for '{}' was already registered (id={}), replacing its response",
                rule,
                id
            );
            if let Some(stub) = state.stubs.get_mut(&id) {
                stub.response = response;
            }
            return Ok(());
        }

        let id = state.next_stub_id;
        tracing::debug!("Adding new stub with id={} for '{}'", id, rule);

        state.index.insert(rule.clone(), id);
        state.stubs.insert(id, ActiveStub { rule, response });
        state.next_stub_id += 1;

        Ok(())
    }

    /// Removes the stub registered for exactly this rule.
    pub fn remove(&self, rule: &StubRule) -> Option<StubResponse> {
        let mut state = lock(&self.state);
        let id = state.index.remove(rule)?;
        tracing::debug!("Deleting stub with id={}", id);
        state.stubs.remove(&id).map(|s| s.response)
    }

    pub fn contains_rule(&self, rule: &StubRule) -> bool {
        lock(&self.state).index.contains_key(rule)
    }

    /// Whether any registered rule can answer the request.
    pub fn has_stub(&self, request: &RequestDescriptor) -> bool {
        let state = lock(&self.state);
        state.index.contains_key(&StubRule::exact_for(request))
            || state
                .stubs
                .values()
                .any(|s| matchers::rule_can_match(&self.matchers, &s.rule, request))
    }

    pub fn has_stubs(&self) -> bool {
        !lock(&self.state).stubs.is_empty()
    }

    pub fn len(&self) -> usize {
        lock(&self.state).stubs.len()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_stubs()
    }

    pub fn clear_all(&self) {
        let mut state = lock(&self.state);
        state.stubs.clear();
        state.index.clear();
        tracing::trace!("Deleted all stubs");
    }

    /// Finds the response for a request.
    ///
    /// A rule registered verbatim for the request wins immediately, ahead of any
    /// other rule with the same score. Otherwise the candidates that can match
    /// are scored and the highest score wins. Among equal scores the stub
    /// registered last wins.
    ///
    /// The [`ResolutionLogger`] is called after the registry lock is released,
    /// so a logger may use the registry itself.
    pub fn resolve(&self, request: &RequestDescriptor) -> Option<StubResponse> {
        let (kind, stub) = self.find(request);
        self.notify(request, kind, stub.as_ref());
        stub.map(|s| s.response)
    }

    fn find(&self, request: &RequestDescriptor) -> (MatchKind, Option<ActiveStub>) {
        let state = lock(&self.state);

        let exact = state
            .index
            .get(&StubRule::exact_for(request))
            .and_then(|id| state.stubs.get(id));
        if let Some(stub) = exact {
            return (MatchKind::Exact, Some(stub.clone()));
        }

        let candidates: Vec<&ActiveStub> = state
            .stubs
            .values()
            .filter(|s| matchers::rule_can_match(&self.matchers, &s.rule, request))
            .collect();

        // `max_by_key` keeps the last of equal elements, and stubs iterate in id order.
        let best = candidates
            .iter()
            .map(|s| (matchers::score(&self.matchers, &s.rule, request), *s))
            .max_by_key(|(score, _)| *score);

        match best {
            Some((score, stub)) => {
                let kind = MatchKind::Fuzzy {
                    score,
                    candidates: candidates.len(),
                };
                (kind, Some(stub.clone()))
            }
            None => (MatchKind::None, None),
        }
    }

    fn notify(&self, request: &RequestDescriptor, kind: MatchKind, stub: Option<&ActiveStub>) {
        let event = ResolutionEvent {
            request,
            kind,
            rule: stub.map(|s| &s.rule),
            response: stub.map(|s| &s.response),
        };

        let logger = &self.logger;
        if catch_unwind(AssertUnwindSafe(|| logger.log(&event))).is_err() {
            tracing::trace!("Resolution logger panicked, dropping the event");
        }
    }
}

impl Default for StubRegistry {
    fn default() -> Self {
        StubRegistry::new()
    }
}

impl fmt::Debug for StubRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("StubRegistry")
            .field("stubs", &self.len())
            .finish()
    }
}
