//! JSON body rewriting.

use super::{parse_error, ContentKind, NodeRewriter, RewriteError};
use crate::matcher::PathElement;
use serde_json::Value as JsonValue;

/// Rewrite the scalars of a JSON document in document order.
///
/// Returns `None` when no scalar changed. Object key order is kept; the
/// output is pretty-printed when the input spanned several lines.
pub(super) async fn rewrite(
    text: &str,
    rewriter: &NodeRewriter<'_>,
) -> Result<Option<String>, RewriteError> {
    let mut document: JsonValue =
        serde_json::from_str(text).map_err(|e| parse_error(ContentKind::Json, e))?;

    let mut scalars = Vec::new();
    collect_scalars(&document, &mut Vec::new(), &mut scalars);

    let mut changed = false;
    for (path, value) in scalars {
        let Some(replacement) = rewriter.rewrite(&path, &value).await? else {
            continue;
        };
        if let Some(slot) = document.pointer_mut(&to_pointer(&path)) {
            *slot = JsonValue::String(replacement);
            changed = true;
        }
    }

    if !changed {
        return Ok(None);
    }

    let multiline = text.trim().contains('\n');
    let mut output = if multiline {
        serde_json::to_string_pretty(&document)
    } else {
        serde_json::to_string(&document)
    }
    .map_err(|e| parse_error(ContentKind::Json, e))?;

    if text.ends_with('\n') {
        output.push('\n');
    }
    Ok(Some(output))
}

/// Collect `(path, text)` for every scalar, depth-first.
fn collect_scalars(
    value: &JsonValue,
    path: &mut Vec<PathElement>,
    out: &mut Vec<(Vec<PathElement>, String)>,
) {
    match value {
        JsonValue::Object(map) => {
            for (key, child) in map {
                path.push(PathElement::Name(key.clone()));
                collect_scalars(child, path, out);
                path.pop();
            }
        }
        JsonValue::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                path.push(PathElement::Index(i));
                collect_scalars(child, path, out);
                path.pop();
            }
        }
        JsonValue::String(s) => out.push((path.clone(), s.clone())),
        JsonValue::Number(n) => out.push((path.clone(), n.to_string())),
        JsonValue::Bool(b) => out.push((path.clone(), b.to_string())),
        JsonValue::Null => out.push((path.clone(), "null".to_string())),
    }
}

/// RFC 6901 pointer for a node path.
fn to_pointer(path: &[PathElement]) -> String {
    let mut pointer = String::new();
    for element in path {
        pointer.push('/');
        match element {
            PathElement::Name(key) | PathElement::Attribute(key) => {
                pointer.push_str(&key.replace('~', "~0").replace('/', "~1"));
            }
            PathElement::Index(i) => pointer.push_str(&i.to_string()),
        }
    }
    pointer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Direction, DescriptorConfig, Scope};
    use crate::context::EvaluationContext;
    use crate::function::{FunctionRegistry, ServiceDirectory, StaticServiceDirectory};
    use crate::rule::Descriptor;
    use crate::template::EvalError;
    use std::sync::Arc;

    fn make_descriptor(yaml: &str) -> Descriptor {
        let config: DescriptorConfig = serde_yaml::from_str(yaml).unwrap();
        let directory: Arc<dyn ServiceDirectory> = Arc::new(
            StaticServiceDirectory::new()
                .with_service("test-cluster", "NAMENODE", "test-nn-scheme://test-nn-host:411")
                .with_service("test-cluster", "JOBTRACKER", "test-jt-scheme://test-jt-host:511"),
        );
        Descriptor::compile(&config, &FunctionRegistry::standard(directory)).unwrap()
    }

    async fn run(descriptor: &Descriptor, text: &str) -> Result<Option<String>, RewriteError> {
        let ctx = EvaluationContext::new("test-cluster").bind_parameters([("user", "bob")]);
        let rewriter = NodeRewriter {
            rules: descriptor
                .rules_for(Direction::Inbound, Scope::Json)
                .collect(),
            functions: descriptor.functions(),
            ctx: &ctx,
        };
        rewrite(text, &rewriter).await
    }

    const RULES: &str = r#"
rules:
  - name: "nn"
    scope: json
    selector: "$.nameNode"
    template: "{$serviceUrl(NAMENODE)}"
  - name: "jt"
    scope: json
    selector: "$..jobTracker"
    template: "{$serviceAddr(JOBTRACKER)}"
  - name: "marker"
    scope: json
    selector: "$.hosts"
    value: "\\$(?P<service>[A-Z]+)"
    template: "{$serviceHost({service})}"
"#;

    #[tokio::test]
    async fn test_rewrites_selected_scalars() {
        let descriptor = make_descriptor(RULES);
        let input = r#"{"nameNode":"x","app":{"jobTracker":"y","name":"wordcount"},"port":8020}"#;
        let output = run(&descriptor, input).await.unwrap().unwrap();
        assert_eq!(
            output,
            r#"{"nameNode":"test-nn-scheme://test-nn-host:411","app":{"jobTracker":"test-jt-host:511","name":"wordcount"},"port":8020}"#
        );
    }

    #[tokio::test]
    async fn test_value_marker_binds_parameters() {
        let descriptor = make_descriptor(RULES);
        let input = r#"{"hosts":["$NAMENODE","$JOBTRACKER","literal"]}"#;
        let output = run(&descriptor, input).await.unwrap().unwrap();
        assert_eq!(output, r#"{"hosts":["test-nn-host","test-jt-host","literal"]}"#);

        // Already rewritten values no longer carry the marker.
        assert_eq!(run(&descriptor, &output).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_non_string_scalars_become_strings() {
        let descriptor = make_descriptor(
            r#"
rules:
  - name: "user"
    scope: json
    selector: "$.owner"
    template: "{user}"
"#,
        );
        let output = run(&descriptor, r#"{"owner":null}"#).await.unwrap().unwrap();
        assert_eq!(output, r#"{"owner":"bob"}"#);
    }

    #[tokio::test]
    async fn test_structural_nodes_untouched() {
        let descriptor = make_descriptor(RULES);
        let input = r#"{"nameNode":{"host":"a"}}"#;
        assert_eq!(run(&descriptor, input).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_pretty_output_for_multiline_input() {
        let descriptor = make_descriptor(RULES);
        let input = "{\n  \"nameNode\": \"x\",\n  \"other\": 1\n}\n";
        let output = run(&descriptor, input).await.unwrap().unwrap();
        assert_eq!(
            output,
            "{\n  \"nameNode\": \"test-nn-scheme://test-nn-host:411\",\n  \"other\": 1\n}\n"
        );
    }

    #[tokio::test]
    async fn test_untouched_numbers_keep_their_text() {
        let descriptor = make_descriptor(RULES);
        let input = r#"{"nameNode":"x","big":12345678901234567890123,"f":1.10}"#;
        let output = run(&descriptor, input).await.unwrap().unwrap();
        assert_eq!(
            output,
            r#"{"nameNode":"test-nn-scheme://test-nn-host:411","big":12345678901234567890123,"f":1.10}"#
        );
    }

    #[tokio::test]
    async fn test_unbound_parameter_aborts() {
        let descriptor = make_descriptor(
            r#"
rules:
  - name: "missing"
    scope: json
    selector: "$.a"
    template: "{nope}"
"#,
        );
        let err = run(&descriptor, r#"{"a":"x"}"#).await.unwrap_err();
        assert!(matches!(
            err,
            RewriteError::Evaluation { source: EvalError::UnboundParameter(ref n), .. } if n == "nope"
        ));
    }

    #[tokio::test]
    async fn test_malformed_json() {
        let descriptor = make_descriptor(RULES);
        let err = run(&descriptor, r#"{"nameNode": "#).await.unwrap_err();
        assert!(matches!(err, RewriteError::ContentParse { .. }));
    }

    #[test]
    fn test_pointer_escaping() {
        let path = [
            PathElement::Name("a/b".to_string()),
            PathElement::Index(2),
            PathElement::Name("c~d".to_string()),
        ];
        assert_eq!(to_pointer(&path), "/a~1b/2/c~0d");
    }
}
