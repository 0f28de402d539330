//! `{{ path.to.value }}` placeholder scanning and resolution.
//!
//! Placeholders are the only expression form allowed in action arguments. A
//! path is a dotted list of keys (array elements by numeric index) looked up
//! through a [`PlaceholderScope`]. A string that is exactly one placeholder
//! resolves to the referenced JSON value with its type intact; placeholders
//! embedded in longer text are stringified.

use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from resolving placeholders against a scope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    /// `{{}}` with nothing between the braces.
    #[error("empty placeholder in '{0}'")]
    Empty(String),

    /// The path does not exist in the scope.
    #[error("unresolved placeholder '{{{{{0}}}}}'")]
    Unresolved(String),
}

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// Something placeholder paths can be looked up in.
pub trait PlaceholderScope {
    /// Resolve a dotted path (already split) to a value.
    fn lookup(&self, path: &[&str]) -> Option<Value>;
}

/// Walk `path` down from `value`. Objects are indexed by key, arrays by
/// numeric index.
pub fn descend<'v>(value: &'v Value, path: &[&str]) -> Option<&'v Value> {
    path.iter().try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(*segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

// ---------------------------------------------------------------------------
// Scanning
// ---------------------------------------------------------------------------

/// One `{{ ... }}` occurrence inside a string.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Token<'s> {
    /// Byte range of the whole token including braces.
    start: usize,
    end: usize,
    /// Trimmed text between the braces.
    path: &'s str,
}

fn tokens(template: &str) -> Vec<Token<'_>> {
    let mut out = Vec::new();
    let mut cursor = 0;
    while let Some(open) = template[cursor..].find("{{") {
        let start = cursor + open;
        let Some(close) = template[start + 2..].find("}}") else {
            break;
        };
        let end = start + 2 + close + 2;
        out.push(Token {
            start,
            end,
            path: template[start + 2..end - 2].trim(),
        });
        cursor = end;
    }
    out
}

/// Placeholder paths in a string, in order of appearance.
pub fn placeholders(template: &str) -> Vec<&str> {
    tokens(template).into_iter().map(|t| t.path).collect()
}

/// Placeholder paths anywhere inside an argument map, nested objects and
/// arrays included. Keys are visited in map order.
pub fn collect_placeholders(args: &Map<String, Value>) -> Vec<String> {
    fn walk(value: &Value, out: &mut Vec<String>) {
        match value {
            Value::String(s) => out.extend(placeholders(s).into_iter().map(String::from)),
            Value::Array(items) => items.iter().for_each(|v| walk(v, out)),
            Value::Object(map) => map.values().for_each(|v| walk(v, out)),
            _ => {}
        }
    }

    let mut out = Vec::new();
    for value in args.values() {
        walk(value, &mut out);
    }
    out
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

fn lookup(path: &str, template: &str, scope: &dyn PlaceholderScope) -> Result<Value, TemplateError> {
    if path.is_empty() {
        return Err(TemplateError::Empty(template.to_string()));
    }
    let segments: Vec<&str> = path.split('.').map(str::trim).collect();
    scope
        .lookup(&segments)
        .ok_or_else(|| TemplateError::Unresolved(path.to_string()))
}

/// Resolve every placeholder in one string.
pub fn resolve_str(template: &str, scope: &dyn PlaceholderScope) -> Result<Value, TemplateError> {
    let found = tokens(template);
    if found.is_empty() {
        return Ok(Value::String(template.to_string()));
    }

    // A lone placeholder keeps the referenced value's type.
    if let [only] = found.as_slice() {
        if only.start == 0 && only.end == template.len() {
            return lookup(only.path, template, scope);
        }
    }

    let mut out = String::with_capacity(template.len());
    let mut cursor = 0;
    for token in &found {
        out.push_str(&template[cursor..token.start]);
        let value = lookup(token.path, template, scope)?;
        out.push_str(&value_to_string(&value));
        cursor = token.end;
    }
    out.push_str(&template[cursor..]);
    Ok(Value::String(out))
}

/// Resolve placeholders in every string nested inside `value`.
pub fn resolve_value(value: &Value, scope: &dyn PlaceholderScope) -> Result<Value, TemplateError> {
    match value {
        Value::String(s) => resolve_str(s, scope),
        Value::Array(items) => items
            .iter()
            .map(|v| resolve_value(v, scope))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => resolve_args(map, scope).map(Value::Object),
        other => Ok(other.clone()),
    }
}

/// Resolve an action's argument map.
pub fn resolve_args(
    args: &Map<String, Value>,
    scope: &dyn PlaceholderScope,
) -> Result<Map<String, Value>, TemplateError> {
    args.iter()
        .map(|(k, v)| Ok((k.clone(), resolve_value(v, scope)?)))
        .collect()
}

/// Convert a JSON value to text for embedding inside a longer string.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        // Objects and arrays embed as compact JSON
        _ => value.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Scope backed by a single JSON object.
    struct JsonScope(Value);

    impl PlaceholderScope for JsonScope {
        fn lookup(&self, path: &[&str]) -> Option<Value> {
            descend(&self.0, path).cloned()
        }
    }

    fn scope() -> JsonScope {
        JsonScope(json!({
            "check-inventory": { "ok": true, "count": 3 },
            "order": { "id": "A-1", "items": [{ "sku": "x" }, { "sku": "y" }] },
            "empty": null,
        }))
    }

    #[test]
    fn lone_placeholder_keeps_type() {
        let s = scope();
        assert_eq!(resolve_str("{{check-inventory.ok}}", &s).unwrap(), json!(true));
        assert_eq!(resolve_str("{{ check-inventory.count }}", &s).unwrap(), json!(3));
        assert_eq!(
            resolve_str("{{order.items}}", &s).unwrap(),
            json!([{ "sku": "x" }, { "sku": "y" }])
        );
        assert_eq!(resolve_str("{{empty}}", &s).unwrap(), Value::Null);
    }

    #[test]
    fn embedded_placeholders_are_stringified() {
        let s = scope();
        assert_eq!(
            resolve_str("order {{order.id}} has {{check-inventory.count}} items", &s).unwrap(),
            json!("order A-1 has 3 items")
        );
        assert_eq!(
            resolve_str("{{order.items.1.sku}}{{order.items.0.sku}}", &s).unwrap(),
            json!("yx")
        );
    }

    #[test]
    fn text_without_placeholders_is_unchanged() {
        let s = scope();
        assert_eq!(resolve_str("plain", &s).unwrap(), json!("plain"));
        assert_eq!(resolve_str("open {{ only", &s).unwrap(), json!("open {{ only"));
    }

    #[test]
    fn missing_path_is_an_error() {
        let s = scope();
        assert_eq!(
            resolve_str("{{order.total}}", &s),
            Err(TemplateError::Unresolved("order.total".to_string()))
        );
        assert_eq!(
            resolve_str("id={{ nope }}", &s),
            Err(TemplateError::Unresolved("nope".to_string()))
        );
        assert!(matches!(resolve_str("{{ }}", &s), Err(TemplateError::Empty(_))));
    }

    #[test]
    fn resolves_nested_arguments() {
        let s = scope();
        let args = json!({
            "id": "{{order.id}}",
            "meta": { "skus": ["{{order.items.0.sku}}", 7] },
            "flag": false,
        });
        let Value::Object(args) = args else { unreachable!() };
        let resolved = resolve_args(&args, &s).unwrap();
        assert_eq!(
            Value::Object(resolved),
            json!({ "id": "A-1", "meta": { "skus": ["x", 7] }, "flag": false })
        );
    }

    #[test]
    fn collects_placeholders_in_order() {
        let args = json!({
            "a": "{{trigger.id}} and {{ context.user }}",
            "b": ["{{steps.x.y}}"],
        });
        let Value::Object(args) = args else { unreachable!() };
        assert_eq!(
            collect_placeholders(&args),
            vec!["trigger.id", "context.user", "steps.x.y"]
        );
    }

    #[test]
    fn error_message_shows_braces() {
        let err = TemplateError::Unresolved("a.b".to_string());
        assert_eq!(err.to_string(), "unresolved placeholder '{{a.b}}'");
    }
}
