//! Rewrite engine: shared descriptor snapshot, reload and per-exchange scoping.

use crate::config::{DescriptorConfig, Direction};
use crate::context::EvaluationContext;
use crate::function::FunctionRegistry;
use crate::rule::{Descriptor, RuleError};
use crate::transformer::{self, RewriteError, UrlOutcome};
use arc_swap::ArcSwap;
use std::borrow::Cow;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Rewrite engine shared by all in-flight requests.
///
/// The compiled [`Descriptor`] sits behind an [`ArcSwap`]: requests load a
/// snapshot without locking, and [`RewriteEngine::reload`] swaps in a new one
/// only after it compiled successfully.
pub struct RewriteEngine {
    descriptor: ArcSwap<Descriptor>,
    /// Functions descriptors may bind
    catalog: FunctionRegistry,
    /// Metrics: URLs rewritten.
    urls_rewritten: AtomicU64,
    /// Metrics: bodies rewritten.
    bodies_rewritten: AtomicU64,
    /// Metrics: URLs and bodies passed through unchanged.
    passed_through: AtomicU64,
    /// Metrics: failed rewrites.
    rewrite_errors: AtomicU64,
    /// Metrics: successful reloads.
    reloads: AtomicU64,
}

impl RewriteEngine {
    /// Create an engine from a descriptor and the catalog of functions it may bind.
    pub fn new(config: &DescriptorConfig, catalog: FunctionRegistry) -> Result<Self, RuleError> {
        let descriptor = Descriptor::compile(config, &catalog)?;

        info!(
            version = descriptor.version(),
            rules = descriptor.rules().len(),
            functions = descriptor.functions().len(),
            "Rewrite engine initialized"
        );

        Ok(Self {
            descriptor: ArcSwap::from_pointee(descriptor),
            catalog,
            urls_rewritten: AtomicU64::new(0),
            bodies_rewritten: AtomicU64::new(0),
            passed_through: AtomicU64::new(0),
            rewrite_errors: AtomicU64::new(0),
            reloads: AtomicU64::new(0),
        })
    }

    /// Create from a YAML descriptor.
    pub fn from_yaml(yaml: &str, catalog: FunctionRegistry) -> Result<Self, EngineError> {
        let config: DescriptorConfig = serde_yaml::from_str(yaml)?;
        Self::new(&config, catalog).map_err(EngineError::from)
    }

    /// Create from a JSON descriptor.
    pub fn from_json(json: &str, catalog: FunctionRegistry) -> Result<Self, EngineError> {
        let config: DescriptorConfig = serde_json::from_str(json)?;
        Self::new(&config, catalog).map_err(EngineError::from)
    }

    /// Current descriptor snapshot.
    pub fn snapshot(&self) -> Arc<Descriptor> {
        self.descriptor.load_full()
    }

    /// Compile `config` and make it current.
    ///
    /// On failure the previous descriptor stays in place. Requests already
    /// holding a snapshot finish with it.
    pub fn reload(&self, config: &DescriptorConfig) -> Result<(), RuleError> {
        let descriptor = match Descriptor::compile(config, &self.catalog) {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "Descriptor reload failed, keeping current rules");
                return Err(e);
            }
        };

        info!(
            version = descriptor.version(),
            rules = descriptor.rules().len(),
            "Descriptor reloaded"
        );
        self.descriptor.store(Arc::new(descriptor));
        self.reloads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Reload from a YAML descriptor.
    pub fn reload_yaml(&self, yaml: &str) -> Result<(), EngineError> {
        let config: DescriptorConfig = serde_yaml::from_str(yaml)?;
        self.reload(&config).map_err(EngineError::from)
    }

    /// Reload from a JSON descriptor.
    pub fn reload_json(&self, json: &str) -> Result<(), EngineError> {
        let config: DescriptorConfig = serde_json::from_str(json)?;
        self.reload(&config).map_err(EngineError::from)
    }

    /// Start a request/response exchange.
    ///
    /// The exchange pins the current descriptor, so a concurrent reload never
    /// splits one exchange across two rule sets.
    pub fn exchange(&self, ctx: EvaluationContext) -> Exchange<'_> {
        Exchange {
            engine: self,
            descriptor: self.snapshot(),
            ctx,
        }
    }

    /// Rewrite a single URL against the current descriptor.
    pub async fn rewrite_url(
        &self,
        url: &str,
        direction: Direction,
        ctx: &EvaluationContext,
    ) -> Result<UrlOutcome, RewriteError> {
        let descriptor = self.snapshot();
        let result = transformer::rewrite_url(&descriptor, url, direction, ctx).await;
        self.record_url(&result, ctx);
        result
    }

    /// Rewrite a single body against the current descriptor.
    pub async fn rewrite_body<'b>(
        &self,
        body: &'b [u8],
        content_type: &str,
        direction: Direction,
        ctx: &EvaluationContext,
    ) -> Result<Cow<'b, [u8]>, RewriteError> {
        let descriptor = self.snapshot();
        let result =
            transformer::rewrite_body(&descriptor, body, content_type, direction, ctx).await;
        self.record_body(&result, ctx);
        result
    }

    /// Counter snapshot.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            urls_rewritten: self.urls_rewritten.load(Ordering::Relaxed),
            bodies_rewritten: self.bodies_rewritten.load(Ordering::Relaxed),
            passed_through: self.passed_through.load(Ordering::Relaxed),
            rewrite_errors: self.rewrite_errors.load(Ordering::Relaxed),
            reloads: self.reloads.load(Ordering::Relaxed),
        }
    }

    fn record_url(&self, result: &Result<UrlOutcome, RewriteError>, ctx: &EvaluationContext) {
        match result {
            Ok(UrlOutcome::Rewritten { url, rule, .. }) => {
                self.urls_rewritten.fetch_add(1, Ordering::Relaxed);
                info!(
                    correlation_id = ctx.correlation_id(),
                    rule = %rule,
                    url = %url,
                    "URL rewritten"
                );
            }
            Ok(UrlOutcome::PassThrough { .. }) => {
                self.passed_through.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => self.record_error(e, ctx),
        }
    }

    fn record_body(&self, result: &Result<Cow<'_, [u8]>, RewriteError>, ctx: &EvaluationContext) {
        match result {
            Ok(Cow::Owned(body)) => {
                self.bodies_rewritten.fetch_add(1, Ordering::Relaxed);
                info!(
                    correlation_id = ctx.correlation_id(),
                    size = body.len(),
                    "Body rewritten"
                );
            }
            Ok(Cow::Borrowed(_)) => {
                self.passed_through.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => self.record_error(e, ctx),
        }
    }

    fn record_error(&self, error: &RewriteError, ctx: &EvaluationContext) {
        self.rewrite_errors.fetch_add(1, Ordering::Relaxed);
        warn!(
            correlation_id = ctx.correlation_id(),
            error = %error,
            "Rewrite failed"
        );
    }
}

/// One request/response exchange.
///
/// Holds the descriptor snapshot taken when the exchange started and the
/// request's context. Parameters bound by the inbound URL rewrite stay visible
/// to the request body and to the whole response.
pub struct Exchange<'e> {
    engine: &'e RewriteEngine,
    descriptor: Arc<Descriptor>,
    ctx: EvaluationContext,
}

impl Exchange<'_> {
    pub fn context(&self) -> &EvaluationContext {
        &self.ctx
    }

    pub fn descriptor(&self) -> &Arc<Descriptor> {
        &self.descriptor
    }

    /// Rewrite the request URL and bind its captured parameters.
    pub async fn rewrite_request_url(&mut self, url: &str) -> Result<UrlOutcome, RewriteError> {
        let result =
            transformer::rewrite_url(&self.descriptor, url, Direction::Inbound, &self.ctx).await;
        self.engine.record_url(&result, &self.ctx);

        if let Ok(UrlOutcome::Rewritten { parameters, .. }) = &result {
            self.ctx = self.ctx.clone().bind_parameters(parameters.clone());
        }
        result
    }

    pub async fn rewrite_request_body<'b>(
        &self,
        body: &'b [u8],
        content_type: &str,
    ) -> Result<Cow<'b, [u8]>, RewriteError> {
        self.body(body, content_type, Direction::Inbound).await
    }

    /// Rewrite a URL the backend returned, e.g. a `Location` header.
    pub async fn rewrite_response_url(&self, url: &str) -> Result<UrlOutcome, RewriteError> {
        let result =
            transformer::rewrite_url(&self.descriptor, url, Direction::Outbound, &self.ctx).await;
        self.engine.record_url(&result, &self.ctx);
        result
    }

    pub async fn rewrite_response_body<'b>(
        &self,
        body: &'b [u8],
        content_type: &str,
    ) -> Result<Cow<'b, [u8]>, RewriteError> {
        self.body(body, content_type, Direction::Outbound).await
    }

    async fn body<'b>(
        &self,
        body: &'b [u8],
        content_type: &str,
        direction: Direction,
    ) -> Result<Cow<'b, [u8]>, RewriteError> {
        let result =
            transformer::rewrite_body(&self.descriptor, body, content_type, direction, &self.ctx)
                .await;
        self.engine.record_body(&result, &self.ctx);
        result
    }
}

/// Engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub urls_rewritten: u64,
    pub bodies_rewritten: u64,
    pub passed_through: u64,
    pub rewrite_errors: u64,
    pub reloads: u64,
}

/// Errors loading a descriptor.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Rule error: {0}")]
    Rule(#[from] RuleError),
}

/// Load a descriptor file; `.json` files are JSON, anything else YAML.
pub fn load_descriptor(path: &Path) -> Result<DescriptorConfig, EngineError> {
    let content = std::fs::read_to_string(path).map_err(|source| EngineError::Io {
        path: path.display().to_string(),
        source,
    })?;
    if path.extension().is_some_and(|e| e == "json") {
        Ok(serde_json::from_str(&content)?)
    } else {
        Ok(serde_yaml::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::{ServiceDirectory, StaticServiceDirectory};

    fn catalog() -> FunctionRegistry {
        let directory: Arc<dyn ServiceDirectory> = Arc::new(
            StaticServiceDirectory::new()
                .with_service("test-cluster", "NAMENODE", "test-nn-scheme://test-nn-host:411"),
        );
        FunctionRegistry::standard(directory)
    }

    const CONFIG: &str = r#"
rules:
  - name: "v1"
    scope: url
    pattern: "/api/{rest=**}"
    template: "/v1/{rest}"
"#;

    #[tokio::test]
    async fn test_reload_swaps_rules() {
        let engine = RewriteEngine::from_yaml(CONFIG, catalog()).unwrap();
        let ctx = EvaluationContext::new("test-cluster");

        let before = engine.rewrite_url("/api/x", Direction::Inbound, &ctx).await.unwrap();
        assert_eq!(before.url(), "/v1/x");

        engine
            .reload_yaml(&CONFIG.replace("/v1/", "/v2/"))
            .unwrap();
        let after = engine.rewrite_url("/api/x", Direction::Inbound, &ctx).await.unwrap();
        assert_eq!(after.url(), "/v2/x");
        assert_eq!(engine.stats().reloads, 1);
        assert_eq!(engine.stats().urls_rewritten, 2);
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_descriptor() {
        let engine = RewriteEngine::from_yaml(CONFIG, catalog()).unwrap();
        let bad = CONFIG.replace("/v1/{rest}", "/v1/{rest");
        assert!(engine.reload_yaml(&bad).is_err());

        let ctx = EvaluationContext::new("test-cluster");
        let outcome = engine.rewrite_url("/api/x", Direction::Inbound, &ctx).await.unwrap();
        assert_eq!(outcome.url(), "/v1/x");
        assert_eq!(engine.stats().reloads, 0);
    }

    #[tokio::test]
    async fn test_exchange_pins_snapshot() {
        let engine = RewriteEngine::from_yaml(CONFIG, catalog()).unwrap();
        let mut exchange = engine.exchange(EvaluationContext::new("test-cluster"));

        engine
            .reload_yaml(&CONFIG.replace("/v1/", "/v2/"))
            .unwrap();

        let outcome = exchange.rewrite_request_url("/api/x").await.unwrap();
        assert_eq!(outcome.url(), "/v1/x");
        assert_eq!(exchange.context().parameter("rest"), Some("x"));
    }

    #[test]
    fn test_errors_surface_from_loading() {
        assert!(matches!(
            RewriteEngine::from_yaml("rules: [", catalog()),
            Err(EngineError::Yaml(_))
        ));
        assert!(matches!(
            RewriteEngine::from_json(r#"{"rules": [{"name": "x", "scope": "url", "template": "/"}]}"#, catalog()),
            Err(EngineError::Rule(RuleError::MissingField { .. }))
        ));
        assert!(matches!(
            load_descriptor(Path::new("/nonexistent/descriptor.yaml")),
            Err(EngineError::Io { .. })
        ));
    }
}
