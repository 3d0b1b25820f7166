//! # Audit log
//!
//! Fire-and-forget record of every stage a firing goes through, correlated by
//! a `run_id`. The engine only talks to the [`AuditSink`] trait; a sink that
//! fails or is absent never changes what the engine does.

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use serde_json::Value as JsonValue;
use std::fmt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{trigger, trigger_log};

pub mod registry;

pub use registry::{ResolvedEntity, resolve_entity};

/// Kind of entity a log row points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityType {
    Event,
    Trigger,
    Condition,
    Action,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Event => "event",
            EntityType::Trigger => "trigger",
            EntityType::Condition => "condition",
            EntityType::Action => "action",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline stage recorded by a log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fire,
    ShouldBeFired,
    TriggerFilter,
    ConditionFilter,
    SignalSent,
    TaskCreated,
    HandleStart,
    ConditionCheck,
    ActionPerform,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fire => "fire",
            Stage::ShouldBeFired => "should_be_fired",
            Stage::TriggerFilter => "trigger_filter",
            Stage::ConditionFilter => "condition_filter",
            Stage::SignalSent => "signal_sent",
            Stage::TaskCreated => "task_created",
            Stage::HandleStart => "handle_start",
            Stage::ConditionCheck => "condition_check",
            Stage::ActionPerform => "action_perform",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit record before it is written.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub entity_type: EntityType,
    pub entity_id: i32,
    pub entity_kind: String,
    pub entity_name: String,
    pub stage: Stage,
    pub trigger_id: Option<i32>,
    pub user_id: Option<i32>,
    pub result: Option<bool>,
    pub details: Option<JsonValue>,
    pub run_id: Option<Uuid>,
}

impl AuditEntry {
    pub fn new(
        entity_type: EntityType,
        entity_id: i32,
        entity_kind: impl Into<String>,
        stage: Stage,
    ) -> Self {
        Self {
            entity_type,
            entity_id,
            entity_kind: entity_kind.into(),
            entity_name: String::new(),
            stage,
            trigger_id: None,
            user_id: None,
            result: None,
            details: None,
            run_id: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.entity_name = name.into();
        self
    }

    pub fn trigger(mut self, trigger_id: i32) -> Self {
        self.trigger_id = Some(trigger_id);
        self
    }

    pub fn user(mut self, user_id: i32) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn result(mut self, result: bool) -> Self {
        self.result = Some(result);
        self
    }

    pub fn details(mut self, details: JsonValue) -> Self {
        self.details = Some(details);
        self
    }

    pub fn run(mut self, run_id: Option<Uuid>) -> Self {
        self.run_id = run_id;
        self
    }
}

/// Destination for audit entries.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Callers skip expensive bookkeeping (such as counting filtered users)
    /// when this returns false.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Records `entry` and returns its run id, or `None` when nothing was
    /// written (for example because the trigger no longer exists).
    async fn log(&self, entry: AuditEntry) -> Option<Uuid>;
}

/// Sink that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAudit;

#[async_trait]
impl AuditSink for NoopAudit {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn log(&self, _entry: AuditEntry) -> Option<Uuid> {
        None
    }
}

/// Sink writing to the `trigger_logs` table.
#[derive(Clone)]
pub struct DbAuditLog {
    db: DatabaseConnection,
}

impl DbAuditLog {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AuditSink for DbAuditLog {
    async fn log(&self, entry: AuditEntry) -> Option<Uuid> {
        let trigger_id = entry.trigger_id?;

        match trigger::Entity::find_by_id(trigger_id).one(&self.db).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                debug!(trigger_id, stage = %entry.stage, "Audit skipped, trigger is gone");
                return None;
            }
            Err(err) => {
                warn!(trigger_id, error = %err, "Audit trigger lookup failed");
                return None;
            }
        }

        let run_id = entry.run_id.unwrap_or_else(Uuid::new_v4);
        let row = trigger_log::ActiveModel {
            run_id: Set(run_id),
            timestamp: Set(Utc::now().fixed_offset()),
            entity_type: Set(entry.entity_type.as_str().to_string()),
            entity_id: Set(entry.entity_id),
            entity_kind: Set(entry.entity_kind),
            entity_name: Set(entry.entity_name),
            trigger_id: Set(trigger_id),
            user_id: Set(entry.user_id),
            stage: Set(entry.stage.as_str().to_string()),
            result: Set(entry.result),
            details: Set(entry.details),
            ..Default::default()
        };

        match row.insert(&self.db).await {
            Ok(_) => Some(run_id),
            Err(err) => {
                warn!(trigger_id, %run_id, error = %err, "Failed to write audit log");
                None
            }
        }
    }
}
