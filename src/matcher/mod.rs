//! URL pattern and body selector matching.

mod path;
mod selector;

pub use path::{RequestUrl, UrlMatch, UrlPattern};
pub use selector::{NodePath, PathElement, Selector};

/// Errors that can occur during matcher compilation.
#[derive(Debug, thiserror::Error)]
pub enum MatcherError {
    #[error("Invalid URL pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("Invalid regex pattern: {0}")]
    InvalidRegex(#[from] regex::Error),

    #[error("Invalid glob pattern: {0}")]
    InvalidGlob(#[from] glob::PatternError),
}
