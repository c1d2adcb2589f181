//! URL and structured-body rewriting.
//!
//! Both entry points take a compiled [`Descriptor`] snapshot and borrow the
//! request's [`EvaluationContext`]; neither mutates shared state.

mod json;
mod url;
mod xml;

pub use url::{rewrite_url, UrlOutcome};

use crate::config::{Direction, Scope};
use crate::context::EvaluationContext;
use crate::function::FunctionRegistry;
use crate::matcher::NodePath;
use crate::rule::{CompiledRule, Descriptor};
use crate::template::EvalError;
use std::borrow::Cow;
use std::fmt;
use tracing::{debug, trace};

/// Body formats the rewriter understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Json,
    Xml,
}

impl ContentKind {
    /// Classify a `Content-Type` value; parameters such as `charset` are ignored.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        let (_, subtype) = essence.split_once('/')?;

        if subtype == "json" || subtype.ends_with("+json") {
            Some(ContentKind::Json)
        } else if subtype == "xml" || subtype.ends_with("+xml") {
            Some(ContentKind::Xml)
        } else {
            None
        }
    }

    pub fn scope(self) -> Scope {
        match self {
            ContentKind::Json => Scope::Json,
            ContentKind::Xml => Scope::Xml,
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ContentKind::Json => "JSON",
            ContentKind::Xml => "XML",
        })
    }
}

/// Rewrite a request or response body.
///
/// Bodies of other content types, bodies no rule applies to, and bodies in
/// which nothing changed are returned borrowed and byte-identical. Any
/// evaluation failure aborts the whole body.
pub async fn rewrite_body<'b>(
    descriptor: &Descriptor,
    body: &'b [u8],
    content_type: &str,
    direction: Direction,
    ctx: &EvaluationContext,
) -> Result<Cow<'b, [u8]>, RewriteError> {
    let Some(kind) = ContentKind::from_content_type(content_type) else {
        trace!(
            correlation_id = ctx.correlation_id(),
            content_type,
            "Content type not rewritable"
        );
        return Ok(Cow::Borrowed(body));
    };

    let rules: Vec<&CompiledRule> = descriptor.rules_for(direction, kind.scope()).collect();
    if rules.is_empty() || body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Cow::Borrowed(body));
    }

    let limit = descriptor.settings().max_body_size;
    if body.len() > limit {
        return Err(RewriteError::BodyTooLarge {
            size: body.len(),
            limit,
        });
    }

    let text = std::str::from_utf8(body).map_err(|e| parse_error(kind, e))?;
    let rewriter = NodeRewriter {
        rules,
        functions: descriptor.functions(),
        ctx,
    };

    let rewritten = match kind {
        ContentKind::Json => json::rewrite(text, &rewriter).await?,
        ContentKind::Xml => xml::rewrite(text, &rewriter).await?,
    };

    Ok(match rewritten {
        Some(output) => Cow::Owned(output.into_bytes()),
        None => Cow::Borrowed(body),
    })
}

/// Applies the first matching body rule to one scalar node.
pub(crate) struct NodeRewriter<'a> {
    rules: Vec<&'a CompiledRule>,
    functions: &'a FunctionRegistry,
    ctx: &'a EvaluationContext,
}

impl NodeRewriter<'_> {
    /// Replacement for the scalar at `path`, or `None` when no rule matches
    /// or the output equals the current value.
    pub(crate) async fn rewrite(
        &self,
        path: &NodePath,
        value: &str,
    ) -> Result<Option<String>, RewriteError> {
        for rule in &self.rules {
            let Some(bound) = rule.match_node(path, value) else {
                continue;
            };

            let result = if bound.is_empty() {
                rule.template.evaluate(self.ctx, self.functions).await
            } else {
                let node_ctx = self.ctx.clone().bind_parameters(bound);
                rule.template.evaluate(&node_ctx, self.functions).await
            };
            let output = result.map_err(|source| RewriteError::Evaluation {
                rule: rule.name.clone(),
                source,
            })?;

            debug!(
                correlation_id = self.ctx.correlation_id(),
                rule = %rule.name,
                "Matched body node"
            );
            return Ok((output != value).then_some(output));
        }
        Ok(None)
    }
}

fn parse_error(kind: ContentKind, err: impl fmt::Display) -> RewriteError {
    RewriteError::ContentParse {
        kind,
        reason: err.to_string(),
    }
}

/// Errors raised while rewriting a URL or body.
#[derive(Debug, thiserror::Error)]
pub enum RewriteError {
    #[error("Rule '{rule}' failed: {source}")]
    Evaluation {
        rule: String,
        #[source]
        source: EvalError,
    },

    #[error("Malformed {kind} body: {reason}")]
    ContentParse { kind: ContentKind, reason: String },

    #[error("Body of {size} bytes exceeds the {limit} byte limit")]
    BodyTooLarge { size: usize, limit: usize },
}
