//! Pluggable function namespace used by templates.
//!
//! Functions are registered by name into an immutable [`FunctionRegistry`].
//! Every call goes through [`FunctionRegistry::resolve`], which checks the
//! request's cancellation token first and bounds the resolver by the caller's
//! timeout.

mod identity;
mod service;

pub use identity::UsernameFunction;
pub use service::{
    DirectoryError, ServiceDirectory, ServiceFunction, ServicePart, StaticServiceDirectory,
};

use crate::context::EvaluationContext;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// A named resolver producing one string from evaluated arguments.
#[async_trait]
pub trait Function: Send + Sync {
    /// Resolve the function for the given context and arguments.
    async fn resolve(
        &self,
        ctx: &EvaluationContext,
        args: &[String],
    ) -> Result<String, FunctionError>;
}

/// Immutable mapping from function name to resolver.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn Function>>,
    /// Used when the context carries no timeout of its own
    default_timeout: Option<Duration>,
}

impl FunctionRegistry {
    pub fn builder() -> FunctionRegistryBuilder {
        FunctionRegistryBuilder::default()
    }

    /// Registry with the built-in service and identity functions.
    pub fn standard(directory: Arc<dyn ServiceDirectory>) -> Self {
        Self::builder()
            .with_service_functions(directory)
            .with_identity_functions()
            .build()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }

    /// Copy of this registry with a different fallback timeout.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Build a registry exposing only `bindings`, as `(alias, function)` pairs.
    ///
    /// Fails with [`FunctionError::UnknownFunction`] naming the first target
    /// that is not registered here.
    pub fn select<'a, I>(&self, bindings: I) -> Result<FunctionRegistry, FunctionError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut functions = HashMap::new();
        for (alias, target) in bindings {
            let function = self
                .functions
                .get(target)
                .ok_or_else(|| FunctionError::UnknownFunction(target.to_string()))?;
            functions.insert(alias.to_string(), Arc::clone(function));
        }
        Ok(FunctionRegistry {
            functions,
            default_timeout: self.default_timeout,
        })
    }

    /// Resolve `name` with already-evaluated arguments.
    pub async fn resolve(
        &self,
        name: &str,
        ctx: &EvaluationContext,
        args: &[String],
    ) -> Result<String, FunctionError> {
        let function = self
            .functions
            .get(name)
            .ok_or_else(|| FunctionError::UnknownFunction(name.to_string()))?;

        if ctx.is_cancelled() {
            return Err(FunctionError::resolution(name, ResolutionCause::Cancelled));
        }

        trace!(
            correlation_id = ctx.correlation_id(),
            function = name,
            args = ?args,
            "Resolving function"
        );

        let call = function.resolve(ctx, args);
        let result = match ctx.timeout().or(self.default_timeout) {
            Some(limit) => tokio::select! {
                _ = ctx.cancellation().cancelled() => {
                    Err(FunctionError::resolution(name, ResolutionCause::Cancelled))
                }
                outcome = tokio::time::timeout(limit, call) => outcome.unwrap_or_else(|_| {
                    Err(FunctionError::resolution(name, ResolutionCause::Timeout(limit)))
                }),
            },
            None => tokio::select! {
                _ = ctx.cancellation().cancelled() => {
                    Err(FunctionError::resolution(name, ResolutionCause::Cancelled))
                }
                outcome = call => outcome,
            },
        };

        if let Err(ref e) = result {
            debug!(
                correlation_id = ctx.correlation_id(),
                function = name,
                error = %e,
                "Function resolution failed"
            );
        }
        result
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

/// Builder for [`FunctionRegistry`].
#[derive(Default)]
pub struct FunctionRegistryBuilder {
    functions: HashMap<String, Arc<dyn Function>>,
    default_timeout: Option<Duration>,
}

impl FunctionRegistryBuilder {
    /// Register a resolver, replacing any previous one with the same name.
    pub fn register(mut self, name: impl Into<String>, function: Arc<dyn Function>) -> Self {
        self.functions.insert(name.into(), function);
        self
    }

    /// Register `serviceUrl`, `serviceScheme`, `serviceHost`, `servicePort`,
    /// `serviceAddr` and `servicePath` over `directory`.
    pub fn with_service_functions(mut self, directory: Arc<dyn ServiceDirectory>) -> Self {
        for part in ServicePart::ALL {
            self.functions.insert(
                part.function_name().to_string(),
                Arc::new(ServiceFunction::new(part, Arc::clone(&directory))),
            );
        }
        self
    }

    /// Register `username`.
    pub fn with_identity_functions(self) -> Self {
        self.register(UsernameFunction::NAME, Arc::new(UsernameFunction))
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> FunctionRegistry {
        FunctionRegistry {
            functions: self.functions,
            default_timeout: self.default_timeout,
        }
    }
}

/// Check a function's argument count.
pub fn expect_args(function: &str, args: &[String], expected: usize) -> Result<(), FunctionError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(FunctionError::resolution(
            function,
            ResolutionCause::Arity {
                expected,
                actual: args.len(),
            },
        ))
    }
}

/// Why a bound function could not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionCause {
    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("request cancelled")]
    Cancelled,

    #[error("expected {expected} argument(s), got {actual}")]
    Arity { expected: usize, actual: usize },

    #[error("service directory error: {0}")]
    Directory(String),

    #[error("{0}")]
    Failed(String),
}

/// Errors raised by function resolution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FunctionError {
    #[error("Unknown function '{0}'")]
    UnknownFunction(String),

    #[error("Service '{service}' not found in cluster '{cluster}'")]
    ServiceNotFound { cluster: String, service: String },

    #[error("Function '{function}' failed: {cause}")]
    Resolution {
        function: String,
        cause: ResolutionCause,
    },
}

impl FunctionError {
    pub fn resolution(function: &str, cause: ResolutionCause) -> Self {
        Self::Resolution {
            function: function.to_string(),
            cause,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Resolution {
                cause: ResolutionCause::Timeout(_),
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    struct Echo;

    #[async_trait]
    impl Function for Echo {
        async fn resolve(
            &self,
            _ctx: &EvaluationContext,
            args: &[String],
        ) -> Result<String, FunctionError> {
            Ok(args.join("|"))
        }
    }

    struct Slow;

    #[async_trait]
    impl Function for Slow {
        async fn resolve(
            &self,
            _ctx: &EvaluationContext,
            _args: &[String],
        ) -> Result<String, FunctionError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("late".to_string())
        }
    }

    fn registry() -> FunctionRegistry {
        FunctionRegistry::builder()
            .register("echo", Arc::new(Echo))
            .register("slow", Arc::new(Slow))
            .build()
    }

    #[tokio::test]
    async fn test_resolve_registered() {
        let ctx = EvaluationContext::new("c1");
        let out = registry()
            .resolve("echo", &ctx, &["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(out, "a|b");
    }

    #[tokio::test]
    async fn test_unknown_function() {
        let ctx = EvaluationContext::new("c1");
        let err = registry().resolve("missing", &ctx, &[]).await.unwrap_err();
        assert_eq!(err, FunctionError::UnknownFunction("missing".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_resolution_error() {
        let ctx = EvaluationContext::new("c1").with_timeout(Duration::from_millis(50));
        let err = registry().resolve("slow", &ctx, &[]).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(matches!(err, FunctionError::Resolution { ref function, .. } if function == "slow"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_default_timeout() {
        let registry = registry().with_default_timeout(Duration::from_millis(10));
        let ctx = EvaluationContext::new("c1");
        let err = registry.resolve("slow", &ctx, &[]).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_cancelled_before_call() {
        let token = CancellationToken::new();
        token.cancel();
        let ctx = EvaluationContext::new("c1").with_cancellation(token);

        let err = registry().resolve("echo", &ctx, &[]).await.unwrap_err();
        assert_eq!(
            err,
            FunctionError::resolution("echo", ResolutionCause::Cancelled)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_during_call() {
        let token = CancellationToken::new();
        let ctx = EvaluationContext::new("c1").with_cancellation(token.clone());
        let registry = registry();

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            token.cancel();
        });
        let err = registry.resolve("slow", &ctx, &[]).await.unwrap_err();
        canceller.await.unwrap();

        assert_eq!(
            err,
            FunctionError::resolution("slow", ResolutionCause::Cancelled)
        );
    }

    #[test]
    fn test_select_aliases() {
        let selected = registry().select([("nn", "echo")]).unwrap();
        assert!(selected.contains("nn"));
        assert!(!selected.contains("echo"));
        assert_eq!(selected.len(), 1);

        let err = registry().select([("x", "nope")]).unwrap_err();
        assert_eq!(err, FunctionError::UnknownFunction("nope".to_string()));
    }

    #[test]
    fn test_expect_args() {
        assert!(expect_args("f", &["a".to_string()], 1).is_ok());
        let err = expect_args("f", &[], 1).unwrap_err();
        assert_eq!(err.to_string(), "Function 'f' failed: expected 1 argument(s), got 0");
    }
}
