//! # Trigger Repository
//!
//! Creates triggers and attaches conditions, actions and events. Child params
//! are validated against the [`KindRegistry`] before they are stored, so a
//! stored row always resolves at evaluation time unless the registry changes.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel,
    PaginatorTrait, QueryFilter, Set,
};
use serde_json::Value as JsonValue;

use crate::error::TriggerError;
use crate::kinds::KindRegistry;
use crate::models::{trigger, trigger_action, trigger_condition, trigger_event};

/// Request data for creating a trigger
#[derive(Debug, Clone)]
pub struct NewTrigger {
    pub name: String,
    pub is_enabled: bool,
}

impl NewTrigger {
    pub fn enabled(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_enabled: true,
        }
    }

    pub fn disabled(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_enabled: false,
        }
    }
}

/// Repository for trigger definitions
pub struct TriggerRepository<'a> {
    db: &'a DatabaseConnection,
    registry: &'a KindRegistry,
}

impl<'a> TriggerRepository<'a> {
    pub fn new(db: &'a DatabaseConnection, registry: &'a KindRegistry) -> Self {
        Self { db, registry }
    }

    pub async fn create(&self, request: NewTrigger) -> Result<trigger::Model, TriggerError> {
        let now = Utc::now().fixed_offset();
        let trigger = trigger::ActiveModel {
            name: Set(request.name),
            is_enabled: Set(request.is_enabled),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        Ok(trigger.insert(self.db).await?)
    }

    pub async fn find(&self, trigger_id: i32) -> Result<Option<trigger::Model>, TriggerError> {
        Ok(trigger::Entity::find_by_id(trigger_id).one(self.db).await?)
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<trigger::Model>, TriggerError> {
        Ok(trigger::Entity::find()
            .filter(trigger::Column::Name.eq(name))
            .one(self.db)
            .await?)
    }

    pub async fn set_enabled(
        &self,
        trigger_id: i32,
        is_enabled: bool,
    ) -> Result<trigger::Model, TriggerError> {
        let trigger = self
            .find(trigger_id)
            .await?
            .ok_or_else(|| TriggerError::not_found("trigger", trigger_id))?;

        let mut active = trigger.into_active_model();
        active.is_enabled = Set(is_enabled);
        active.updated_at = Set(Utc::now().fixed_offset());
        Ok(active.update(self.db).await?)
    }

    /// Appends a condition after the existing ones.
    pub async fn add_condition(
        &self,
        trigger_id: i32,
        kind: &str,
        params: JsonValue,
    ) -> Result<trigger_condition::Model, TriggerError> {
        self.registry.condition(kind, &params)?;
        self.require(trigger_id).await?;

        let position = trigger_condition::Entity::find()
            .filter(trigger_condition::Column::TriggerId.eq(trigger_id))
            .count(self.db)
            .await?;

        let condition = trigger_condition::ActiveModel {
            trigger_id: Set(trigger_id),
            kind: Set(kind.to_string()),
            params: Set(params),
            position: Set(i32::try_from(position).unwrap_or(i32::MAX)),
            created_at: Set(Utc::now().fixed_offset()),
            ..Default::default()
        };
        Ok(condition.insert(self.db).await?)
    }

    /// Appends an action after the existing ones.
    pub async fn add_action(
        &self,
        trigger_id: i32,
        kind: &str,
        params: JsonValue,
    ) -> Result<trigger_action::Model, TriggerError> {
        self.registry.action(kind, &params)?;
        self.require(trigger_id).await?;

        let position = trigger_action::Entity::find()
            .filter(trigger_action::Column::TriggerId.eq(trigger_id))
            .count(self.db)
            .await?;

        let action = trigger_action::ActiveModel {
            trigger_id: Set(trigger_id),
            kind: Set(kind.to_string()),
            params: Set(params),
            position: Set(i32::try_from(position).unwrap_or(i32::MAX)),
            created_at: Set(Utc::now().fixed_offset()),
            ..Default::default()
        };
        Ok(action.insert(self.db).await?)
    }

    pub async fn add_event(
        &self,
        trigger_id: i32,
        kind: &str,
        params: JsonValue,
        delay_seconds: u32,
    ) -> Result<trigger_event::Model, TriggerError> {
        self.registry.event(kind, &params)?;
        self.require(trigger_id).await?;

        let event = trigger_event::ActiveModel {
            trigger_id: Set(trigger_id),
            kind: Set(kind.to_string()),
            params: Set(params),
            delay_seconds: Set(i64::from(delay_seconds)),
            created_at: Set(Utc::now().fixed_offset()),
            ..Default::default()
        };
        Ok(event.insert(self.db).await?)
    }

    /// Deletes the trigger; children, activities and logs cascade.
    pub async fn delete(&self, trigger_id: i32) -> Result<(), TriggerError> {
        let result = trigger::Entity::delete_by_id(trigger_id)
            .exec(self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(TriggerError::not_found("trigger", trigger_id));
        }
        Ok(())
    }

    async fn require(&self, trigger_id: i32) -> Result<(), TriggerError> {
        self.find(trigger_id)
            .await?
            .map(|_| ())
            .ok_or_else(|| TriggerError::not_found("trigger", trigger_id))
    }
}
