//! URL path-template matching.
//!
//! Pattern syntax:
//!
//! - `/`-separated path segments: a literal, `{name}` (binds one segment),
//!   `*` (any one segment), `**` (zero or more segments) or `{name=**}`
//!   (binds zero or more segments joined by `/`);
//! - an optional `?` query part of `&`-separated `key={name}`, `key=value`
//!   or `key` items, all of which must be present;
//! - an optional `scheme://authority` prefix, compared case-insensitively.

use super::MatcherError;
use std::collections::HashMap;

/// Incoming URL split into the parts matching works on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestUrl {
    /// `scheme://authority`, if the URL is absolute
    pub origin: Option<String>,
    /// Path, without query or fragment
    pub path: String,
    /// Raw query string, without the leading `?`
    pub query: Option<String>,
}

impl RequestUrl {
    /// Decompose a URL or a path-and-query string.
    pub fn parse(url: &str) -> Self {
        let url = url.split_once('#').map_or(url, |(before, _)| before);

        let (origin, rest) = match split_origin(url) {
            Some((origin, rest)) => (Some(origin.to_string()), rest),
            None => (None, url),
        };

        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (rest.to_string(), None),
        };

        Self {
            origin,
            path,
            query,
        }
    }

    fn segments(&self) -> Vec<&str> {
        split_path(&self.path)
    }

    /// Decoded query parameters in order of appearance.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.query
            .as_deref()
            .map(parse_query)
            .unwrap_or_default()
    }

    /// Raw query items whose decoded key is not in `consumed`, rejoined.
    pub fn query_without(&self, consumed: &[String]) -> Option<String> {
        let kept: Vec<&str> = self
            .query
            .as_deref()?
            .split('&')
            .filter(|part| !part.is_empty())
            .filter(|part| {
                let key = part.split_once('=').map_or(*part, |(k, _)| k);
                !consumed.contains(&decode(key))
            })
            .collect();
        if kept.is_empty() {
            None
        } else {
            Some(kept.join("&"))
        }
    }
}

/// Split `scheme://authority` off the front of `url`.
fn split_origin(url: &str) -> Option<(&str, &str)> {
    let scheme_end = url.find("://")?;
    let scheme = &url[..scheme_end];
    let valid_scheme = !scheme.is_empty()
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    if !valid_scheme {
        return None;
    }

    let authority_start = scheme_end + 3;
    let authority_end = url[authority_start..]
        .find(['/', '?'])
        .map_or(url.len(), |i| authority_start + i);
    Some((&url[..authority_end], &url[authority_end..]))
}

fn split_path(path: &str) -> Vec<&str> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    if trimmed.is_empty() {
        Vec::new()
    } else {
        trimmed.split('/').collect()
    }
}

fn decode(s: &str) -> String {
    let plus_decoded = s.replace('+', " ");
    urlencoding::decode(&plus_decoded)
        .map(|c| c.into_owned())
        .unwrap_or(plus_decoded)
}

fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((k, v)) => (decode(k), decode(v)),
            None => (decode(part), String::new()),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathToken {
    Literal(String),
    Capture(String),
    Wildcard,
    AnyDepth,
    CaptureRest(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum QueryToken {
    Capture { key: String, name: String },
    Equals { key: String, value: String },
    Present { key: String },
}

impl QueryToken {
    fn key(&self) -> &str {
        match self {
            QueryToken::Capture { key, .. }
            | QueryToken::Equals { key, .. }
            | QueryToken::Present { key } => key,
        }
    }
}

/// Result of a successful URL match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlMatch {
    /// Bound parameters
    pub parameters: HashMap<String, String>,
    /// Query keys the pattern consumed
    pub consumed_query: Vec<String>,
}

/// Compiled URL path template.
#[derive(Debug, Clone)]
pub struct UrlPattern {
    source: String,
    origin: Option<String>,
    path: Vec<PathToken>,
    query: Vec<QueryToken>,
}

impl UrlPattern {
    /// Compile a pattern.
    pub fn compile(pattern: &str) -> Result<Self, MatcherError> {
        let invalid = |reason: String| MatcherError::InvalidPattern {
            pattern: pattern.to_string(),
            reason,
        };

        let (location, query) = match pattern.split_once('?') {
            Some((location, query)) => (location, Some(query)),
            None => (pattern, None),
        };

        let (origin, path) = match split_origin(location) {
            Some((origin, path)) => (Some(origin.to_ascii_lowercase()), path),
            None => (None, location),
        };

        let path = split_path(path)
            .into_iter()
            .map(|segment| compile_path_token(segment).map_err(&invalid))
            .collect::<Result<Vec<_>, _>>()?;

        let query = query
            .map(|q| {
                q.split('&')
                    .filter(|item| !item.is_empty() && *item != "{**}" && *item != "**")
                    .map(|item| compile_query_token(item).map_err(&invalid))
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            source: pattern.to_string(),
            origin,
            path,
            query,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Names this pattern binds.
    pub fn parameter_names(&self) -> Vec<&str> {
        let path = self.path.iter().filter_map(|t| match t {
            PathToken::Capture(n) | PathToken::CaptureRest(n) => Some(n.as_str()),
            _ => None,
        });
        let query = self.query.iter().filter_map(|t| match t {
            QueryToken::Capture { name, .. } => Some(name.as_str()),
            _ => None,
        });
        path.chain(query).collect()
    }

    /// Match a URL; the whole path must match.
    pub fn matches(&self, url: &RequestUrl) -> Option<UrlMatch> {
        if let Some(ref origin) = self.origin {
            let actual = url.origin.as_deref()?;
            if !actual.eq_ignore_ascii_case(origin) {
                return None;
            }
        }

        let mut captures = Vec::new();
        if !match_segments(&self.path, &url.segments(), &mut captures) {
            return None;
        }

        let mut result = UrlMatch {
            parameters: captures.into_iter().collect(),
            consumed_query: Vec::new(),
        };

        if !self.query.is_empty() {
            let pairs = url.query_pairs();
            for token in &self.query {
                let value = pairs
                    .iter()
                    .find(|(k, _)| k == token.key())
                    .map(|(_, v)| v)?;
                match token {
                    QueryToken::Capture { name, .. } => {
                        result.parameters.insert(name.clone(), value.clone());
                    }
                    QueryToken::Equals { value: expected, .. } if value != expected => {
                        return None;
                    }
                    _ => {}
                }
                result.consumed_query.push(token.key().to_string());
            }
        }

        Some(result)
    }
}

fn capture_name(segment: &str) -> Option<&str> {
    segment.strip_prefix('{')?.strip_suffix('}')
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

fn compile_path_token(segment: &str) -> Result<PathToken, String> {
    match segment {
        "*" => return Ok(PathToken::Wildcard),
        "**" => return Ok(PathToken::AnyDepth),
        _ => {}
    }

    if let Some(inner) = capture_name(segment) {
        let (name, kind) = match inner.split_once('=') {
            Some((name, kind)) => (name, Some(kind)),
            None => (inner, None),
        };
        if !valid_name(name) {
            return Err(format!("invalid capture name '{}'", name));
        }
        return match kind {
            None | Some("*") => Ok(PathToken::Capture(name.to_string())),
            Some("**") => Ok(PathToken::CaptureRest(name.to_string())),
            Some(other) => Err(format!("unsupported capture form '{}={}'", name, other)),
        };
    }

    if segment.contains(['{', '}']) {
        return Err(format!("unbalanced braces in segment '{}'", segment));
    }
    Ok(PathToken::Literal(segment.to_string()))
}

fn compile_query_token(item: &str) -> Result<QueryToken, String> {
    match item.split_once('=') {
        Some((key, value)) => {
            if key.is_empty() {
                return Err(format!("empty query key in '{}'", item));
            }
            match capture_name(value) {
                Some(name) if valid_name(name) => Ok(QueryToken::Capture {
                    key: key.to_string(),
                    name: name.to_string(),
                }),
                Some(name) => Err(format!("invalid capture name '{}'", name)),
                None if value.contains(['{', '}']) => {
                    Err(format!("unbalanced braces in query item '{}'", item))
                }
                None => Ok(QueryToken::Equals {
                    key: key.to_string(),
                    value: value.to_string(),
                }),
            }
        }
        None => Ok(QueryToken::Present {
            key: item.to_string(),
        }),
    }
}

/// Backtracking match of path tokens against segments; multi-segment tokens
/// try the longest span first.
fn match_segments(
    tokens: &[PathToken],
    segments: &[&str],
    captures: &mut Vec<(String, String)>,
) -> bool {
    let Some((token, rest)) = tokens.split_first() else {
        return segments.is_empty();
    };

    match token {
        PathToken::Literal(literal) => {
            segments.first() == Some(&literal.as_str())
                && match_segments(rest, &segments[1..], captures)
        }
        PathToken::Wildcard => !segments.is_empty() && match_segments(rest, &segments[1..], captures),
        PathToken::Capture(name) => {
            let Some(first) = segments.first() else {
                return false;
            };
            captures.push((name.clone(), first.to_string()));
            if match_segments(rest, &segments[1..], captures) {
                return true;
            }
            captures.pop();
            false
        }
        PathToken::AnyDepth | PathToken::CaptureRest(_) => {
            for take in (0..=segments.len()).rev() {
                let mark = captures.len();
                if let PathToken::CaptureRest(name) = token {
                    captures.push((name.clone(), segments[..take].join("/")));
                }
                if match_segments(rest, &segments[take..], captures) {
                    return true;
                }
                captures.truncate(mark);
            }
            false
        }
    }
}
