//! Kind registry
//!
//! Maps stable variant tags stored in `kind` columns to factories that build
//! trait objects from the row's JSON params. Registration is explicit
//! construction-time wiring; there is no global instance.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use super::{
    ActionCountCondition, ActionFrequencyCondition, ActionKind, ConditionKind, ContextMatchEvent,
    EventKind, GenericEvent, KindError, KindFamily, SendMessageAction, actions, conditions,
    events,
};

pub type ConditionFactory =
    Arc<dyn Fn(&JsonValue) -> Result<Arc<dyn ConditionKind>, KindError> + Send + Sync>;
pub type ActionFactory =
    Arc<dyn Fn(&JsonValue) -> Result<Arc<dyn ActionKind>, KindError> + Send + Sync>;
pub type EventFactory =
    Arc<dyn Fn(&JsonValue) -> Result<Arc<dyn EventKind>, KindError> + Send + Sync>;

/// Registry of condition, action and event variants
#[derive(Clone, Default)]
pub struct KindRegistry {
    conditions: HashMap<String, ConditionFactory>,
    actions: HashMap<String, ActionFactory>,
    events: HashMap<String, EventFactory>,
}

impl KindRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with `action_count`, `action_frequency`,
    /// `send_message`, `generic` and `context_match`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_condition(conditions::ACTION_COUNT, |params| {
            Ok(Arc::new(ActionCountCondition::from_params(params)?))
        });
        registry.register_condition(conditions::ACTION_FREQUENCY, |params| {
            Ok(Arc::new(ActionFrequencyCondition::from_params(params)?))
        });
        registry.register_action(actions::SEND_MESSAGE, |params| {
            Ok(Arc::new(SendMessageAction::from_params(params)?))
        });
        registry.register_event(events::GENERIC, |_| Ok(Arc::new(GenericEvent)));
        registry.register_event(events::CONTEXT_MATCH, |params| {
            Ok(Arc::new(ContextMatchEvent::from_params(params)?))
        });
        registry
    }

    /// Register (or replace) a condition variant
    pub fn register_condition<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&JsonValue) -> Result<Arc<dyn ConditionKind>, KindError> + Send + Sync + 'static,
    {
        self.conditions.insert(kind.to_string(), Arc::new(factory));
    }

    /// Register (or replace) an action variant
    pub fn register_action<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&JsonValue) -> Result<Arc<dyn ActionKind>, KindError> + Send + Sync + 'static,
    {
        self.actions.insert(kind.to_string(), Arc::new(factory));
    }

    /// Register (or replace) an event variant
    pub fn register_event<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&JsonValue) -> Result<Arc<dyn EventKind>, KindError> + Send + Sync + 'static,
    {
        self.events.insert(kind.to_string(), Arc::new(factory));
    }

    pub fn condition(
        &self,
        kind: &str,
        params: &JsonValue,
    ) -> Result<Arc<dyn ConditionKind>, KindError> {
        let factory = self
            .conditions
            .get(kind)
            .ok_or_else(|| unknown(KindFamily::Condition, kind))?;
        factory(params)
    }

    pub fn action(&self, kind: &str, params: &JsonValue) -> Result<Arc<dyn ActionKind>, KindError> {
        let factory = self
            .actions
            .get(kind)
            .ok_or_else(|| unknown(KindFamily::Action, kind))?;
        factory(params)
    }

    pub fn event(&self, kind: &str, params: &JsonValue) -> Result<Arc<dyn EventKind>, KindError> {
        let factory = self
            .events
            .get(kind)
            .ok_or_else(|| unknown(KindFamily::Event, kind))?;
        factory(params)
    }

    /// Registered tags for a family, sorted alphabetically.
    pub fn kinds(&self, family: KindFamily) -> Vec<&str> {
        let mut kinds: Vec<&str> = match family {
            KindFamily::Condition => self.conditions.keys().map(String::as_str).collect(),
            KindFamily::Action => self.actions.keys().map(String::as_str).collect(),
            KindFamily::Event => self.events.keys().map(String::as_str).collect(),
        };
        kinds.sort_unstable();
        kinds
    }
}

fn unknown(family: KindFamily, kind: &str) -> KindError {
    KindError::UnknownKind {
        family,
        kind: kind.to_string(),
    }
}
