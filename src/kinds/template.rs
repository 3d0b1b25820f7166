//! Minimal `{{ path.to.value }}` templating over a [`Context`].

use regex::{Captures, Regex};
use serde_json::Value as JsonValue;
use std::sync::OnceLock;

use super::Context;

fn placeholder() -> Option<&'static Regex> {
    static PLACEHOLDER: OnceLock<Option<Regex>> = OnceLock::new();
    PLACEHOLDER
        .get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z0-9_]+(?:\.[A-Za-z0-9_]+)*)\s*\}\}").ok())
        .as_ref()
}

/// Looks up a dotted path; numeric segments index into arrays.
pub fn lookup<'a>(context: &'a Context, path: &str) -> Option<&'a JsonValue> {
    let mut segments = path.split('.');
    let mut current = context.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            JsonValue::Object(map) => map.get(segment)?,
            JsonValue::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Renders `template`, replacing unresolved placeholders with an empty string.
pub fn render(template: &str, context: &Context) -> String {
    let Some(placeholder) = placeholder() else {
        return template.to_string();
    };
    placeholder
        .replace_all(template, |caps: &Captures<'_>| {
            match lookup(context, &caps[1]) {
                None | Some(JsonValue::Null) => String::new(),
                Some(JsonValue::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            }
        })
        .into_owned()
}
