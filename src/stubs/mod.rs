//! Request stubbing: rules, canned responses, the registry that resolves
//! requests against them, and the transport interceptor that serves them.
pub mod interceptor;
pub(crate) mod matchers;
#[cfg(feature = "yaml")]
pub mod persistence;
pub mod registry;
pub mod response;
pub mod rule;

pub use interceptor::{InterceptError, Interception, MockTransportInterceptor, UNMATCHED_HEADER};
pub use registry::{
    MatchKind, RegistryError, ResolutionEvent, ResolutionLogger, StubRegistry,
    TracingResolutionLogger,
};
pub use response::{SimulatedError, StubResponse};
pub use rule::{QueryMatchPolicy, RuleError, StubRule, UrlPattern};
