//! Event entity model
//!
//! An event belongs to exactly one trigger and is the entry point for
//! [`crate::dispatch::Dispatcher::fire`].

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "trigger_events")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Owning trigger
    pub trigger_id: i32,

    /// Registered variant tag, e.g. `generic`
    pub kind: String,

    #[sea_orm(column_type = "JsonBinary")]
    pub params: JsonValue,

    /// Postponement applied to queued and durable handling (0 = immediate)
    pub delay_seconds: i64,

    pub created_at: DateTimeWithTimeZone,
}

impl Model {
    /// Handling delay; negative values are treated as zero.
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_seconds.max(0) as u64)
    }
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
