//! Per-request evaluation context.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Authenticated identity supplied by the hosting pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    name: String,
}

impl Principal {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Context available while evaluating templates for one exchange.
///
/// The context is owned by the request's task. Evaluation only ever borrows it
/// immutably; captured URL parameters are folded in between phases through
/// [`EvaluationContext::bind_parameters`], which consumes the old value.
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    /// Authenticated principal, if any
    principal: Option<Principal>,
    /// Active cluster (topology) identifier
    cluster: String,
    /// Parameter bindings captured from URL matching
    parameters: HashMap<String, String>,
    /// Correlation ID used in log records
    correlation_id: String,
    /// Upper bound for each function resolver call
    timeout: Option<Duration>,
    /// Cancellation of the enclosing request
    cancellation: CancellationToken,
}

impl EvaluationContext {
    /// Create a new context for a request served by `cluster`.
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            principal: None,
            cluster: cluster.into(),
            parameters: HashMap::new(),
            correlation_id: String::new(),
            timeout: None,
            cancellation: CancellationToken::new(),
        }
    }

    /// Attach the authenticated principal.
    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    /// Attach a correlation ID.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    /// Bound every function resolver call by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Tie evaluation to the request's cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Add parameter bindings, overriding existing names.
    pub fn bind_parameters<I, K, V>(mut self, parameters: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.parameters
            .extend(parameters.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Look up a bound parameter.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    pub fn parameters(&self) -> &HashMap<String, String> {
        &self.parameters
    }

    /// Whether the enclosing request has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_context() -> EvaluationContext {
        EvaluationContext::new("test-cluster")
            .with_principal(Principal::new("test-user"))
            .with_correlation_id("test-correlation-id")
            .bind_parameters([("path", "tmp/data"), ("op", "OPEN")])
    }

    #[test]
    fn test_accessors() {
        let ctx = make_context();

        assert_eq!(ctx.cluster(), "test-cluster");
        assert_eq!(ctx.principal().map(Principal::name), Some("test-user"));
        assert_eq!(ctx.correlation_id(), "test-correlation-id");
        assert_eq!(ctx.parameter("path"), Some("tmp/data"));
        assert_eq!(ctx.parameter("missing"), None);
        assert!(ctx.timeout().is_none());
    }

    #[test]
    fn test_bind_parameters_overrides() {
        let ctx = make_context().bind_parameters([("op", "CREATE"), ("user", "bob")]);

        assert_eq!(ctx.parameter("op"), Some("CREATE"));
        assert_eq!(ctx.parameter("user"), Some("bob"));
        assert_eq!(ctx.parameter("path"), Some("tmp/data"));
        assert_eq!(ctx.parameters().len(), 3);
    }

    #[test]
    fn test_cancellation() {
        let token = CancellationToken::new();
        let ctx = make_context().with_cancellation(token.clone());

        assert!(!ctx.is_cancelled());
        token.cancel();
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn test_clones_are_independent() {
        let base = make_context();
        let request = base.clone().bind_parameters([("extra", "1")]);

        assert_eq!(base.parameter("extra"), None);
        assert_eq!(request.parameter("extra"), Some("1"));
    }
}
