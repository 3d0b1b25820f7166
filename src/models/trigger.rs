//! Trigger entity model
//!
//! A named bundle of conditions, actions and events. Children live in their
//! own tables keyed by `trigger_id`; see [`super::trigger_condition`],
//! [`super::trigger_action`] and [`super::trigger_event`].

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

/// Trigger definition row
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "triggers")]
pub struct Model {
    /// Unique identifier for the trigger (primary key)
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Unique human-readable name
    #[sea_orm(unique)]
    pub name: String,

    /// Administrative switch; a disabled trigger never runs actions
    pub is_enabled: bool,

    /// Timestamp when the trigger was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the trigger was last updated
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::trigger_condition::Entity")]
    Condition,
    #[sea_orm(has_many = "super::trigger_action::Entity")]
    Action,
    #[sea_orm(has_many = "super::trigger_event::Entity")]
    Event,
    #[sea_orm(has_many = "super::trigger_activity::Entity")]
    Activity,
}

impl Related<super::trigger_condition::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Condition.def()
    }
}

impl Related<super::trigger_action::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Action.def()
    }
}

impl Related<super::trigger_event::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Event.def()
    }
}

impl Related<super::trigger_activity::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Activity.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
