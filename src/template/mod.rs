//! Rewrite templates: parsed representation and evaluation.
//!
//! A template is an ordered list of segments. Literals are copied verbatim,
//! parameter references are substituted from the evaluation context, and
//! function calls are resolved through the [`FunctionRegistry`].
//!
//! ```text
//! {$serviceUrl(NAMENODE)}/webhdfs/v1/{path}
//! ```

mod parser;

pub use parser::parse;

use crate::context::EvaluationContext;
use crate::function::{FunctionError, FunctionRegistry};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

/// One piece of a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Literal text
    Literal(String),
    /// Reference to a bound parameter
    Param(String),
    /// Function call with ordered arguments
    Call { name: String, args: Vec<Segment> },
}

/// Parsed rewrite template.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Template {
    segments: Vec<Segment>,
}

type EvalFuture<'a> = Pin<Box<dyn Future<Output = Result<String, EvalError>> + Send + 'a>>;

impl Template {
    pub fn from_segments(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// True when the template contains no function calls.
    pub fn is_static(&self) -> bool {
        !self
            .segments
            .iter()
            .any(|s| matches!(s, Segment::Call { .. }))
    }

    /// Names of all functions called, nested calls included.
    pub fn function_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        collect_function_names(&self.segments, &mut names);
        names
    }

    /// Evaluate against a context.
    ///
    /// Segments are evaluated left to right; call arguments depth-first. The
    /// registry is only consulted for `Call` segments.
    pub async fn evaluate(
        &self,
        ctx: &EvaluationContext,
        functions: &FunctionRegistry,
    ) -> Result<String, EvalError> {
        let mut output = String::new();
        for segment in &self.segments {
            output.push_str(&evaluate_segment(segment, ctx, functions).await?);
        }
        Ok(output)
    }
}

fn collect_function_names<'a>(segments: &'a [Segment], names: &mut Vec<&'a str>) {
    for segment in segments {
        if let Segment::Call { name, args } = segment {
            names.push(name);
            collect_function_names(args, names);
        }
    }
}

async fn evaluate_segment(
    segment: &Segment,
    ctx: &EvaluationContext,
    functions: &FunctionRegistry,
) -> Result<String, EvalError> {
    match segment {
        Segment::Literal(text) => Ok(text.clone()),
        Segment::Param(name) => ctx
            .parameter(name)
            .map(str::to_string)
            .ok_or_else(|| EvalError::UnboundParameter(name.clone())),
        Segment::Call { name, args } => evaluate_call(name, args, ctx, functions).await,
    }
}

fn evaluate_call<'a>(
    name: &'a str,
    args: &'a [Segment],
    ctx: &'a EvaluationContext,
    functions: &'a FunctionRegistry,
) -> EvalFuture<'a> {
    Box::pin(async move {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(evaluate_segment(arg, ctx, functions).await?);
        }
        Ok(functions.resolve(name, ctx, &values).await?)
    })
}

impl FromStr for Template {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s)
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => {
                    for c in text.chars() {
                        if matches!(c, '\\' | '{' | '}') {
                            f.write_str("\\")?;
                        }
                        write!(f, "{}", c)?;
                    }
                }
                Segment::Param(name) => write!(f, "{{{}}}", name)?,
                Segment::Call { .. } => {
                    f.write_str("{$")?;
                    write_call(f, segment)?;
                    f.write_str("}")?;
                }
            }
        }
        Ok(())
    }
}

fn write_call(f: &mut fmt::Formatter<'_>, segment: &Segment) -> fmt::Result {
    let Segment::Call { name, args } = segment else {
        return Ok(());
    };
    f.write_str(name)?;
    if args.is_empty() {
        return Ok(());
    }
    f.write_str("(")?;
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            f.write_str(",")?;
        }
        match arg {
            Segment::Literal(text) => write_literal_arg(f, text)?,
            Segment::Param(name) => write!(f, "{{{}}}", name)?,
            Segment::Call { .. } => {
                f.write_str("$")?;
                write_call(f, arg)?;
            }
        }
    }
    f.write_str(")")
}

fn write_literal_arg(f: &mut fmt::Formatter<'_>, text: &str) -> fmt::Result {
    let bare = !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':' | '/'));
    if bare {
        return f.write_str(text);
    }
    f.write_str("'")?;
    for c in text.chars() {
        if matches!(c, '\\' | '\'') {
            f.write_str("\\")?;
        }
        write!(f, "{}", c)?;
    }
    f.write_str("'")
}

/// Template syntax error, raised while loading a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("Malformed template '{template}' at offset {position}: {reason}")]
    Malformed {
        template: String,
        position: usize,
        reason: String,
    },
}

/// Errors raised while evaluating a template.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("Unbound parameter '{0}'")]
    UnboundParameter(String),

    #[error(transparent)]
    Function(#[from] FunctionError),
}
