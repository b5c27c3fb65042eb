//! Reference substitution for batch arguments.
//!
//! Later operations reference earlier results with `{{name.path}}`
//! placeholders, where `name` is a prior operation and `path` is a
//! dot-separated walk through its result (object keys, or numeric indices
//! into arrays). Substitution is best-effort: an unresolved placeholder is
//! left as literal text, never an error.
//!
//! A string that consists of exactly one placeholder takes the referenced
//! value with its type intact; a placeholder embedded in a longer string is
//! interpolated as text.

use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::OnceLock;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_-]+)\.([A-Za-z0-9_.-]+)\s*\}\}")
            .expect("placeholder pattern is valid")
    })
}

/// Substitute every placeholder in `value`, recursively through objects and
/// arrays, against `context` (operation name → stored result).
pub fn substitute(value: &Value, context: &HashMap<String, Value>) -> Value {
    match value {
        Value::String(s) => substitute_string(s, context),
        Value::Object(map) => Value::Object(
            map.iter().map(|(k, v)| (k.clone(), substitute(v, context))).collect::<Map<_, _>>(),
        ),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| substitute(v, context)).collect())
        }
        other => other.clone(),
    }
}

fn substitute_string(s: &str, context: &HashMap<String, Value>) -> Value {
    let re = placeholder_re();

    // A whole-string placeholder keeps the referenced value's type.
    if let Some(caps) = re.captures(s) {
        if &caps[0] == s {
            return match resolve(context, &caps[1], &caps[2]) {
                Some(found) => found.clone(),
                None => Value::String(s.to_string()),
            };
        }
    }

    let replaced = re.replace_all(s, |caps: &regex::Captures| {
        match resolve(context, &caps[1], &caps[2]) {
            Some(found) => value_to_text(found),
            None => caps[0].to_string(),
        }
    });
    Value::String(replaced.into_owned())
}

fn resolve<'a>(
    context: &'a HashMap<String, Value>,
    name: &str,
    path: &str,
) -> Option<&'a Value> {
    let mut current = context.get(name)?;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
