//! Message template rendering using `{{placeholder}}` syntax.

use crate::types::Attributes;
use serde_json::Value;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Substitute every `{{key}}` in `content` with the textual value of
/// `attributes[key]`. Placeholders without a matching attribute are left
/// verbatim. Substituted values are never rescanned.
pub fn render_template(content: &str, attributes: &Attributes) -> String {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(open) = rest.find(OPEN) {
        out.push_str(&rest[..open]);
        let token = &rest[open..];
        let resolved = token[OPEN.len()..]
            .find(CLOSE)
            .map(|close| &token[OPEN.len()..OPEN.len() + close])
            .and_then(|key| attributes.get(key).map(|value| (key, value)));

        match resolved {
            Some((key, value)) => {
                out.push_str(&value_text(value));
                rest = &token[OPEN.len() + key.len() + CLOSE.len()..];
            }
            None => {
                // Not a known placeholder here; emit one brace and rescan so
                // `{{{name}}}` still resolves the inner token.
                out.push('{');
                rest = &token[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Distinct placeholder names referenced by `content`, in first-use order.
pub fn placeholders(content: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let mut rest = content;
    while let Some(open) = rest.find(OPEN) {
        let after = &rest[open + OPEN.len()..];
        let Some(close) = after.find(CLOSE) else {
            break;
        };
        let name = &after[..close];
        if !name.is_empty() && !name.contains('{') && !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
        rest = &after[close + CLOSE.len()..];
    }
    names
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: Value) -> Attributes {
        serde_json::from_value(value).expect("attributes object")
    }

    #[test]
    fn test_render_basic() {
        let ctx = attrs(json!({"name": "Ann"}));
        assert_eq!(render_template("Hello {{name}}", &ctx), "Hello Ann");
    }

    #[test]
    fn test_unknown_placeholder_left_intact() {
        assert_eq!(render_template("Hi {{x}}", &Attributes::new()), "Hi {{x}}");
    }

    #[test]
    fn test_every_occurrence_replaced() {
        let ctx = attrs(json!({"name": "Ann"}));
        assert_eq!(
            render_template("{{name}}, {{name}}!", &ctx),
            "Ann, Ann!"
        );
    }

    #[test]
    fn test_scalar_values_coerced_to_text() {
        let ctx = attrs(json!({"points": 120, "vip": true, "ratio": 1.5, "nick": null}));
        assert_eq!(
            render_template("{{points}}/{{vip}}/{{ratio}}/[{{nick}}]", &ctx),
            "120/true/1.5/[]"
        );
    }

    #[test]
    fn test_render_is_idempotent_without_nested_tokens() {
        let ctx = attrs(json!({"name": "Ann", "city": "Oslo"}));
        let content = "Hi {{name}} from {{city}}, see {{missing}}";
        let once = render_template(content, &ctx);
        assert_eq!(render_template(&once, &ctx), once);
    }

    #[test]
    fn test_substituted_values_not_rescanned() {
        let ctx = attrs(json!({"a": "{{b}}", "b": "x"}));
        assert_eq!(render_template("{{a}}", &ctx), "{{b}}");
    }

    #[test]
    fn test_extra_braces_and_unterminated() {
        let ctx = attrs(json!({"name": "Ann"}));
        assert_eq!(render_template("{{{name}}}", &ctx), "{Ann}");
        assert_eq!(render_template("Hi {{name", &ctx), "Hi {{name");
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(
            placeholders("Hi {{name}}, {{code}} and {{name}} again {{"),
            vec!["name".to_string(), "code".to_string()]
        );
    }
}
