//! Node selectors for structured bodies.
//!
//! XML selectors are element-name chains (`/configuration/property/value`),
//! optionally ending in an attribute (`/**/link/@href`). JSON selectors are
//! `$`-rooted key chains (`$.cluster.nodes[*].url`, `$..url`). In both, `*`
//! matches one name, `**` (or `..` in JSON) any depth, and names containing
//! glob characters are matched as globs. Array indices in a node's path are
//! wildcards unless the selector addresses them explicitly.

use super::MatcherError;
use glob::Pattern as GlobPattern;
use std::fmt;

/// One step of a node's location in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathElement {
    /// XML element or JSON object key
    Name(String),
    /// JSON array index
    Index(usize),
    /// XML attribute
    Attribute(String),
}

/// Location of a scalar node, from the document root.
pub type NodePath = [PathElement];

#[derive(Debug, Clone)]
enum NameTest {
    Exact(String),
    Glob(GlobPattern),
    Any,
}

impl NameTest {
    fn compile(name: &str) -> Result<Self, MatcherError> {
        if name == "*" {
            Ok(NameTest::Any)
        } else if name.contains(['*', '?', '[']) {
            Ok(NameTest::Glob(GlobPattern::new(name)?))
        } else {
            Ok(NameTest::Exact(name.to_string()))
        }
    }

    fn matches(&self, name: &str) -> bool {
        match self {
            NameTest::Exact(expected) => expected == name,
            NameTest::Glob(pattern) => pattern.matches(name),
            NameTest::Any => true,
        }
    }
}

#[derive(Debug, Clone)]
enum Step {
    Name(NameTest),
    Attribute(NameTest),
    Index(usize),
    AnyIndex,
    AnyDepth,
}

/// Compiled body selector.
#[derive(Debug, Clone)]
pub struct Selector {
    source: String,
    steps: Vec<Step>,
}

impl Selector {
    /// Compile an XML selector.
    pub fn xml(selector: &str) -> Result<Self, MatcherError> {
        let invalid = |reason: &str| MatcherError::InvalidSelector {
            selector: selector.to_string(),
            reason: reason.to_string(),
        };

        let mut steps = Vec::new();
        let body = match selector.strip_prefix("//") {
            Some(rest) => {
                steps.push(Step::AnyDepth);
                rest
            }
            None => selector.strip_prefix('/').unwrap_or(selector),
        };

        if body.is_empty() {
            return Err(invalid("selector is empty"));
        }

        let parts: Vec<&str> = body.split('/').collect();
        for (i, part) in parts.iter().enumerate() {
            let is_last = i == parts.len() - 1;
            let step = match *part {
                "" => return Err(invalid("empty path segment")),
                "**" => Step::AnyDepth,
                attr if attr.starts_with('@') => {
                    if !is_last {
                        return Err(invalid("attribute must be the last step"));
                    }
                    if attr.len() == 1 {
                        return Err(invalid("attribute name is empty"));
                    }
                    Step::Attribute(NameTest::compile(&attr[1..])?)
                }
                name => Step::Name(NameTest::compile(name)?),
            };
            steps.push(step);
        }

        Ok(Self {
            source: selector.to_string(),
            steps,
        })
    }

    /// Compile a JSON selector.
    pub fn json(selector: &str) -> Result<Self, MatcherError> {
        let invalid = |reason: String| MatcherError::InvalidSelector {
            selector: selector.to_string(),
            reason,
        };

        let rest = selector
            .strip_prefix('$')
            .ok_or_else(|| invalid("must start with '$'".to_string()))?;

        let chars: Vec<char> = rest.chars().collect();
        let mut steps = Vec::new();
        let mut i = 0;

        while i < chars.len() {
            match chars[i] {
                '.' => {
                    i += 1;
                    if chars.get(i) == Some(&'.') {
                        steps.push(Step::AnyDepth);
                        i += 1;
                    }
                    let mut key = String::new();
                    while i < chars.len() && chars[i] != '.' && chars[i] != '[' {
                        key.push(chars[i]);
                        i += 1;
                    }
                    if key.is_empty() {
                        if matches!(steps.last(), Some(Step::AnyDepth)) && chars.get(i) == Some(&'[') {
                            continue;
                        }
                        return Err(invalid(format!("empty key at offset {}", i)));
                    }
                    steps.push(Step::Name(NameTest::compile(&key)?));
                }
                '[' => {
                    i += 1;
                    let mut inner = String::new();
                    while i < chars.len() && chars[i] != ']' {
                        inner.push(chars[i]);
                        i += 1;
                    }
                    if i == chars.len() {
                        return Err(invalid("unclosed '['".to_string()));
                    }
                    i += 1;

                    let inner = inner.trim();
                    let step = if inner == "*" {
                        Step::AnyIndex
                    } else if let Some(quoted) = inner
                        .strip_prefix('\'')
                        .and_then(|s| s.strip_suffix('\''))
                    {
                        Step::Name(NameTest::Exact(quoted.to_string()))
                    } else {
                        let idx = inner
                            .parse::<usize>()
                            .map_err(|_| invalid(format!("invalid index '{}'", inner)))?;
                        Step::Index(idx)
                    };
                    steps.push(step);
                }
                c => return Err(invalid(format!("unexpected '{}' at offset {}", c, i))),
            }
        }

        if steps.is_empty() {
            return Err(invalid("selector selects the document root".to_string()));
        }

        Ok(Self {
            source: selector.to_string(),
            steps,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the node at `path` is selected.
    pub fn matches(&self, path: &NodePath) -> bool {
        match_steps(&self.steps, path)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn match_steps(steps: &[Step], path: &[PathElement]) -> bool {
    let (step, element) = match (steps.first(), path.first()) {
        (None, None) => return true,
        // Trailing indices are implicit wildcards: `$.tags` selects each tag.
        (None, Some(_)) => return path.iter().all(|e| matches!(e, PathElement::Index(_))),
        (Some(Step::AnyDepth), _) => {
            return match_steps(&steps[1..], path)
                || (path
                    .first()
                    .is_some_and(|e| !matches!(e, PathElement::Attribute(_)))
                    && match_steps(steps, &path[1..]));
        }
        (Some(_), None) => return false,
        (Some(step), Some(element)) => (step, element),
    };

    match (step, element) {
        (Step::Index(expected), PathElement::Index(actual)) => {
            expected == actual && match_steps(&steps[1..], &path[1..])
        }
        (Step::AnyIndex, PathElement::Index(_)) => match_steps(&steps[1..], &path[1..]),
        (_, PathElement::Index(_)) => match_steps(steps, &path[1..]),
        (Step::Name(test), PathElement::Name(name)) => {
            test.matches(name) && match_steps(&steps[1..], &path[1..])
        }
        (Step::Attribute(test), PathElement::Attribute(name)) => {
            test.matches(name) && match_steps(&steps[1..], &path[1..])
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> PathElement {
        PathElement::Name(s.to_string())
    }

    fn attr(s: &str) -> PathElement {
        PathElement::Attribute(s.to_string())
    }

    fn idx(i: usize) -> PathElement {
        PathElement::Index(i)
    }

    #[test]
    fn test_xml_element_chain() {
        let s = Selector::xml("/configuration/property/value").unwrap();
        assert!(s.matches(&[name("configuration"), name("property"), name("value")]));
        assert!(!s.matches(&[name("configuration"), name("property"), name("name")]));
        assert!(!s.matches(&[name("configuration"), name("property")]));
        assert!(!s.matches(&[
            name("configuration"),
            name("property"),
            name("value"),
            name("x")
        ]));
    }

    #[test]
    fn test_xml_wildcards_and_globs() {
        let any = Selector::xml("/root/*/url").unwrap();
        assert!(any.matches(&[name("root"), name("nn"), name("url")]));

        let deep = Selector::xml("//url").unwrap();
        assert!(deep.matches(&[name("url")]));
        assert!(deep.matches(&[name("a"), name("b"), name("url")]));

        let glob = Selector::xml("/root/prop*").unwrap();
        assert!(glob.matches(&[name("root"), name("property")]));
        assert!(!glob.matches(&[name("root"), name("value")]));
    }

    #[test]
    fn test_xml_attribute() {
        let s = Selector::xml("/**/link/@href").unwrap();
        assert!(s.matches(&[name("doc"), name("link"), attr("href")]));
        assert!(!s.matches(&[name("doc"), name("link")]));
        assert!(!s.matches(&[name("doc"), name("link"), attr("rel")]));

        let elements = Selector::xml("/doc/**").unwrap();
        assert!(elements.matches(&[name("doc"), name("link")]));
        assert!(!elements.matches(&[name("doc"), name("link"), attr("href")]));
    }

    #[test]
    fn test_xml_invalid() {
        assert!(Selector::xml("").is_err());
        assert!(Selector::xml("/a//b").is_err());
        assert!(Selector::xml("/a/@x/b").is_err());
        assert!(Selector::xml("/a/@").is_err());
    }

    #[test]
    fn test_json_key_chain() {
        let s = Selector::json("$.oozie.nameNode").unwrap();
        assert!(s.matches(&[name("oozie"), name("nameNode")]));
        assert!(!s.matches(&[name("oozie"), name("jobTracker")]));
    }

    #[test]
    fn test_json_indices_are_wildcards() {
        let s = Selector::json("$.nodes.url").unwrap();
        assert!(s.matches(&[name("nodes"), idx(0), name("url")]));
        assert!(s.matches(&[name("nodes"), idx(7), name("url")]));

        let tags = Selector::json("$.tags").unwrap();
        assert!(tags.matches(&[name("tags"), idx(1)]));
        assert!(tags.matches(&[name("tags")]));
    }

    #[test]
    fn test_json_explicit_index() {
        let s = Selector::json("$.nodes[1].url").unwrap();
        assert!(s.matches(&[name("nodes"), idx(1), name("url")]));
        assert!(!s.matches(&[name("nodes"), idx(0), name("url")]));

        let any = Selector::json("$.nodes[*].url").unwrap();
        assert!(any.matches(&[name("nodes"), idx(3), name("url")]));
        assert!(!any.matches(&[name("nodes"), name("url")]));
    }

    #[test]
    fn test_json_descendant_and_quoted() {
        let s = Selector::json("$..url").unwrap();
        assert!(s.matches(&[name("url")]));
        assert!(s.matches(&[name("a"), idx(0), name("b"), name("url")]));

        let quoted = Selector::json("$['name-node']").unwrap();
        assert!(quoted.matches(&[name("name-node")]));

        let star = Selector::json("$.*.url").unwrap();
        assert!(star.matches(&[name("nn"), name("url")]));
    }

    #[test]
    fn test_json_invalid() {
        assert!(Selector::json("nodes.url").is_err());
        assert!(Selector::json("$").is_err());
        assert!(Selector::json("$.a[").is_err());
        assert!(Selector::json("$.a[x]").is_err());
        assert!(Selector::json("$.a..").is_err());
    }
}
