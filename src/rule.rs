//! Compiled descriptor snapshot.
//!
//! A [`Descriptor`] is the immutable, validated form of a
//! [`DescriptorConfig`]: rule patterns, selectors and templates are parsed once
//! and the visible function namespace is fixed.

use crate::config::{Direction, DescriptorConfig, Rule, Scope, Settings};
use crate::function::{FunctionError, FunctionRegistry};
use crate::matcher::{MatcherError, NodePath, RequestUrl, Selector, UrlMatch, UrlPattern};
use crate::template::{Template, TemplateError};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, warn};

/// Compiled rewrite rule.
#[derive(Debug)]
pub struct CompiledRule {
    /// Rule name
    pub name: String,
    /// Request or response side
    pub direction: Direction,
    /// Content the rule rewrites
    pub scope: Scope,
    /// Compiled match condition
    pub target: RuleTarget,
    /// Rewrite template
    pub template: Template,
}

/// Where a rule matches.
#[derive(Debug)]
pub enum RuleTarget {
    Url {
        pattern: UrlPattern,
        preserve_query: bool,
    },
    Body {
        selector: Selector,
        /// Anchored regex the current scalar must match
        value: Option<Regex>,
    },
}

impl CompiledRule {
    /// Compile a rule from configuration.
    pub fn new(rule: &Rule) -> Result<Self, RuleError> {
        let template = rule.template.parse::<Template>().map_err(|source| RuleError::Template {
            rule: rule.name.clone(),
            source,
        })?;

        let matcher_error = |source: MatcherError| RuleError::Matcher {
            rule: rule.name.clone(),
            source,
        };

        let target = match rule.scope {
            Scope::Url => {
                let pattern = rule.pattern.as_deref().ok_or_else(|| RuleError::MissingField {
                    rule: rule.name.clone(),
                    scope: rule.scope,
                    field: "pattern",
                })?;
                RuleTarget::Url {
                    pattern: UrlPattern::compile(pattern).map_err(matcher_error)?,
                    preserve_query: rule.preserve_query,
                }
            }
            Scope::Xml | Scope::Json => {
                let selector = rule.selector.as_deref().ok_or_else(|| RuleError::MissingField {
                    rule: rule.name.clone(),
                    scope: rule.scope,
                    field: "selector",
                })?;
                let selector = match rule.scope {
                    Scope::Xml => Selector::xml(selector),
                    _ => Selector::json(selector),
                }
                .map_err(matcher_error)?;

                let value = rule
                    .value
                    .as_deref()
                    .map(|v| Regex::new(&format!("^(?:{})$", v)))
                    .transpose()
                    .map_err(|e| matcher_error(MatcherError::from(e)))?;

                RuleTarget::Body { selector, value }
            }
        };

        Ok(Self {
            name: rule.name.clone(),
            direction: rule.direction,
            scope: rule.scope,
            target,
            template,
        })
    }

    /// Match a URL rule against a request URL.
    pub fn match_url(&self, url: &RequestUrl) -> Option<UrlMatch> {
        match &self.target {
            RuleTarget::Url { pattern, .. } => pattern.matches(url),
            RuleTarget::Body { .. } => None,
        }
    }

    /// Match a body rule against a scalar node.
    ///
    /// Returns the named groups of the `value` regex, empty when the rule has
    /// none.
    pub fn match_node(&self, path: &NodePath, value: &str) -> Option<HashMap<String, String>> {
        let RuleTarget::Body {
            selector,
            value: value_regex,
        } = &self.target
        else {
            return None;
        };

        if !selector.matches(path) {
            return None;
        }

        let Some(regex) = value_regex else {
            return Some(HashMap::new());
        };

        let captures = regex.captures(value)?;
        Some(
            regex
                .capture_names()
                .flatten()
                .filter_map(|name| {
                    captures
                        .name(name)
                        .map(|m| (name.to_string(), m.as_str().to_string()))
                })
                .collect(),
        )
    }

    pub fn preserve_query(&self) -> bool {
        matches!(
            self.target,
            RuleTarget::Url {
                preserve_query: true,
                ..
            }
        )
    }
}

/// Immutable, compiled descriptor.
#[derive(Debug)]
pub struct Descriptor {
    version: String,
    settings: Settings,
    rules: Vec<CompiledRule>,
    functions: FunctionRegistry,
}

impl Descriptor {
    /// Compile a descriptor, binding its function names against `catalog`.
    ///
    /// Disabled rules are dropped. When the descriptor lists no `functions`,
    /// the whole catalog is visible. Resolver calls fall back to
    /// `settings.timeout_ms` when a request sets no timeout.
    pub fn compile(config: &DescriptorConfig, catalog: &FunctionRegistry) -> Result<Self, RuleError> {
        let functions = match &config.functions {
            Some(bindings) => catalog.select(bindings.iter().map(|b| (b.name(), b.target())))?,
            None => catalog.clone(),
        }
        .with_default_timeout(Duration::from_millis(config.settings.timeout_ms));

        let mut seen = HashSet::new();
        let mut rules = Vec::new();
        for rule in &config.rules {
            if !seen.insert(rule.name.as_str()) {
                return Err(RuleError::DuplicateRule(rule.name.clone()));
            }
            if !rule.enabled {
                debug!(rule = %rule.name, "Skipping disabled rule");
                continue;
            }

            let compiled = CompiledRule::new(rule)?;
            for name in compiled.template.function_names() {
                if !functions.contains(name) {
                    warn!(
                        rule = %compiled.name,
                        function = name,
                        "Template calls a function the descriptor does not bind"
                    );
                }
            }
            rules.push(compiled);
        }

        Ok(Self {
            version: config.version.clone(),
            settings: config.settings.clone(),
            rules,
            functions,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// All enabled rules, in descriptor order.
    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    /// Rules for one direction and scope, in descriptor order.
    pub fn rules_for(
        &self,
        direction: Direction,
        scope: Scope,
    ) -> impl Iterator<Item = &CompiledRule> + '_ {
        self.rules
            .iter()
            .filter(move |r| r.direction == direction && r.scope == scope)
    }

    /// Functions visible to this descriptor's templates.
    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }
}

/// Descriptor compilation errors.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("Rule '{rule}': {source}")]
    Template {
        rule: String,
        #[source]
        source: TemplateError,
    },

    #[error("Rule '{rule}': {source}")]
    Matcher {
        rule: String,
        #[source]
        source: MatcherError,
    },

    #[error("Rule '{rule}': {scope} rules require '{field}'")]
    MissingField {
        rule: String,
        scope: Scope,
        field: &'static str,
    },

    #[error("Duplicate rule name '{0}'")]
    DuplicateRule(String),

    #[error("Function binding failed: {0}")]
    Binding(#[from] FunctionError),
}
