//! Built-in event kinds.

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use super::{Context, EventKind, KindError};

pub const GENERIC: &str = "generic";
pub const CONTEXT_MATCH: &str = "context_match";

/// Fires unconditionally.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericEvent;

#[async_trait]
impl EventKind for GenericEvent {
    fn kind(&self) -> &'static str {
        GENERIC
    }
}

/// Fires only when every configured key equals the firing context value.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextMatchEvent {
    expected: Context,
}

impl ContextMatchEvent {
    pub fn new(expected: Context) -> Self {
        Self { expected }
    }

    /// Parses a JSON object of expected key/value pairs.
    pub fn from_params(params: &JsonValue) -> Result<Self, KindError> {
        match params {
            JsonValue::Object(map) => Ok(Self::new(map.clone())),
            JsonValue::Null => Ok(Self::new(Context::new())),
            _ => Err(KindError::invalid(CONTEXT_MATCH, "params must be an object")),
        }
    }
}

#[async_trait]
impl EventKind for ContextMatchEvent {
    fn kind(&self) -> &'static str {
        CONTEXT_MATCH
    }

    fn should_be_fired(&self, context: &Context) -> bool {
        self.expected
            .iter()
            .all(|(key, value)| context.get(key) == Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(value: JsonValue) -> Context {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn generic_always_fires() {
        assert!(GenericEvent.should_be_fired(&Context::new()));
    }

    #[test]
    fn context_match_requires_every_key() {
        let event = ContextMatchEvent::from_params(&json!({"app": "mobile"})).unwrap();
        assert!(event.should_be_fired(&ctx(json!({"app": "mobile", "extra": 1}))));
        assert!(!event.should_be_fired(&ctx(json!({"app": "web"}))));
        assert!(!event.should_be_fired(&Context::new()));
    }

    #[test]
    fn context_match_rejects_non_object_params() {
        assert!(ContextMatchEvent::from_params(&json!([1, 2])).is_err());
        assert!(
            ContextMatchEvent::from_params(&JsonValue::Null)
                .unwrap()
                .should_be_fired(&Context::new())
        );
    }
}
