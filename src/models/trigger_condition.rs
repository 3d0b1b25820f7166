//! Condition entity model
//!
//! Conditions are stored as a variant tag (`kind`) plus JSON parameters and
//! resolved to a [`crate::kinds::ConditionKind`] through the kind registry.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "trigger_conditions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Owning trigger
    pub trigger_id: i32,

    /// Registered variant tag, e.g. `action_count`
    pub kind: String,

    /// Variant parameters, e.g. `{"limit": 3}`
    #[sea_orm(column_type = "JsonBinary")]
    pub params: JsonValue,

    /// Attachment order within the trigger
    pub position: i32,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::trigger::Entity",
        from = "Column::TriggerId",
        to = "super::trigger::Column::Id",
        on_delete = "Cascade"
    )]
    Trigger,
}

impl Related<super::trigger::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Trigger.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
