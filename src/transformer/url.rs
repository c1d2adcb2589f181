//! URL rewriting.

use super::RewriteError;
use crate::config::{Direction, Scope};
use crate::context::EvaluationContext;
use crate::matcher::RequestUrl;
use crate::rule::Descriptor;
use std::collections::HashMap;
use tracing::{debug, trace};

/// Result of rewriting one URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlOutcome {
    /// A rule matched and its template produced `url`
    Rewritten {
        url: String,
        rule: String,
        /// Parameters the pattern bound
        parameters: HashMap<String, String>,
    },
    /// No rule matched; `url` is the input unchanged
    PassThrough { url: String },
}

impl UrlOutcome {
    pub fn url(&self) -> &str {
        match self {
            UrlOutcome::Rewritten { url, .. } | UrlOutcome::PassThrough { url } => url,
        }
    }

    pub fn into_url(self) -> String {
        match self {
            UrlOutcome::Rewritten { url, .. } | UrlOutcome::PassThrough { url } => url,
        }
    }

    pub fn is_rewritten(&self) -> bool {
        matches!(self, UrlOutcome::Rewritten { .. })
    }

    /// Name of the matching rule.
    pub fn rule(&self) -> Option<&str> {
        match self {
            UrlOutcome::Rewritten { rule, .. } => Some(rule),
            UrlOutcome::PassThrough { .. } => None,
        }
    }
}

/// Rewrite `url` with the first URL rule of `direction` whose pattern matches.
///
/// The pattern's bindings are added to a copy of `ctx` for the template. When
/// the rule preserves the query and the output carries none, the incoming
/// query minus the keys the pattern consumed is appended.
pub async fn rewrite_url(
    descriptor: &Descriptor,
    url: &str,
    direction: Direction,
    ctx: &EvaluationContext,
) -> Result<UrlOutcome, RewriteError> {
    let request = RequestUrl::parse(url);

    let matched = descriptor
        .rules_for(direction, Scope::Url)
        .find_map(|rule| rule.match_url(&request).map(|m| (rule, m)));

    let Some((rule, url_match)) = matched else {
        trace!(
            correlation_id = ctx.correlation_id(),
            %direction,
            url,
            "No matching URL rule"
        );
        return Ok(UrlOutcome::PassThrough {
            url: url.to_string(),
        });
    };

    debug!(
        correlation_id = ctx.correlation_id(),
        rule = %rule.name,
        %direction,
        "Matched URL rule"
    );

    let rule_ctx = ctx.clone().bind_parameters(url_match.parameters.clone());
    let mut rewritten = rule
        .template
        .evaluate(&rule_ctx, descriptor.functions())
        .await
        .map_err(|source| RewriteError::Evaluation {
            rule: rule.name.clone(),
            source,
        })?;

    if rule.preserve_query() && !rewritten.contains('?') {
        if let Some(query) = request.query_without(&url_match.consumed_query) {
            rewritten.push('?');
            rewritten.push_str(&query);
        }
    }

    Ok(UrlOutcome::Rewritten {
        url: rewritten,
        rule: rule.name.clone(),
        parameters: url_match.parameters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DescriptorConfig;
    use crate::function::{FunctionError, FunctionRegistry, ServiceDirectory, StaticServiceDirectory};
    use crate::template::EvalError;
    use std::sync::Arc;

    fn make_descriptor(yaml: &str) -> Descriptor {
        let config: DescriptorConfig = serde_yaml::from_str(yaml).unwrap();
        let directory: Arc<dyn ServiceDirectory> = Arc::new(
            StaticServiceDirectory::new()
                .with_service("test-cluster", "WEBHDFS", "http://test-nn-host:50070/webhdfs"),
        );
        Descriptor::compile(&config, &FunctionRegistry::standard(directory)).unwrap()
    }

    fn make_context() -> EvaluationContext {
        EvaluationContext::new("test-cluster").with_correlation_id("req-1")
    }

    const RULES: &str = r#"
rules:
  - name: "webhdfs-inbound"
    scope: url
    pattern: "/gateway/sandbox/webhdfs/v1/{path=**}?op={op}"
    template: "{$serviceUrl(WEBHDFS)}/v1/{path}?op={op}"
  - name: "webhdfs-root"
    scope: url
    pattern: "/gateway/sandbox/webhdfs/{rest=**}"
    template: "{$serviceUrl(WEBHDFS)}/{rest}"
  - name: "static"
    scope: url
    pattern: "/static/{file}"
    template: "/assets/{file}"
    preserve_query: false
  - name: "location"
    direction: outbound
    scope: url
    pattern: "http://test-nn-host:50070/webhdfs/v1/{path=**}"
    template: "/gateway/sandbox/webhdfs/v1/{path}"
"#;

    #[tokio::test]
    async fn test_first_matching_rule_wins() {
        let descriptor = make_descriptor(RULES);
        let outcome = rewrite_url(
            &descriptor,
            "/gateway/sandbox/webhdfs/v1/tmp/a.txt?op=OPEN&user.name=bob",
            Direction::Inbound,
            &make_context(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.rule(), Some("webhdfs-inbound"));
        assert_eq!(
            outcome.url(),
            "http://test-nn-host:50070/webhdfs/v1/tmp/a.txt?op=OPEN"
        );
        let UrlOutcome::Rewritten { parameters, .. } = outcome else {
            panic!("expected rewrite");
        };
        assert_eq!(parameters["path"], "tmp/a.txt");
        assert_eq!(parameters["op"], "OPEN");
    }

    #[tokio::test]
    async fn test_query_is_preserved() {
        let descriptor = make_descriptor(RULES);
        let outcome = rewrite_url(
            &descriptor,
            "/gateway/sandbox/webhdfs/status?verbose=true",
            Direction::Inbound,
            &make_context(),
        )
        .await
        .unwrap();
        assert_eq!(outcome.rule(), Some("webhdfs-root"));
        assert_eq!(
            outcome.url(),
            "http://test-nn-host:50070/webhdfs/status?verbose=true"
        );
    }

    #[tokio::test]
    async fn test_query_dropped_when_not_preserved() {
        let descriptor = make_descriptor(RULES);
        let outcome = rewrite_url(
            &descriptor,
            "/static/logo.png?v=3",
            Direction::Inbound,
            &make_context(),
        )
        .await
        .unwrap();
        assert_eq!(outcome.url(), "/assets/logo.png");
    }

    #[tokio::test]
    async fn test_no_match_passes_through() {
        let descriptor = make_descriptor(RULES);
        let url = "/other/path?x=1";
        let outcome = rewrite_url(&descriptor, url, Direction::Inbound, &make_context())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            UrlOutcome::PassThrough {
                url: url.to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_outbound_location_rewrite() {
        let descriptor = make_descriptor(RULES);
        let outcome = rewrite_url(
            &descriptor,
            "http://test-nn-host:50070/webhdfs/v1/tmp/a.txt?op=OPEN",
            Direction::Outbound,
            &make_context(),
        )
        .await
        .unwrap();
        assert_eq!(
            outcome.url(),
            "/gateway/sandbox/webhdfs/v1/tmp/a.txt?op=OPEN"
        );

        // Inbound rules never see outbound URLs.
        let inbound = rewrite_url(
            &descriptor,
            "http://test-nn-host:50070/webhdfs/v1/tmp/a.txt",
            Direction::Inbound,
            &make_context(),
        )
        .await
        .unwrap();
        assert!(!inbound.is_rewritten());
    }

    #[tokio::test]
    async fn test_service_miss_fails_rewrite() {
        let descriptor = make_descriptor(RULES);
        let ctx = EvaluationContext::new("other-cluster");
        let err = rewrite_url(
            &descriptor,
            "/gateway/sandbox/webhdfs/v1/tmp?op=OPEN",
            Direction::Inbound,
            &ctx,
        )
        .await
        .unwrap_err();

        match err {
            RewriteError::Evaluation { rule, source } => {
                assert_eq!(rule, "webhdfs-inbound");
                assert!(matches!(
                    source,
                    EvalError::Function(FunctionError::ServiceNotFound { ref cluster, ref service })
                        if cluster == "other-cluster" && service == "WEBHDFS"
                ));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_caller_context_is_not_modified() {
        let descriptor = make_descriptor(RULES);
        let ctx = make_context();
        rewrite_url(&descriptor, "/static/a.css", Direction::Inbound, &ctx)
            .await
            .unwrap();
        assert!(ctx.parameter("file").is_none());
    }
}
