//! TriggerLog entity model
//!
//! Append-only audit rows. `run_id` correlates every stage of one
//! event-to-action chain.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "trigger_logs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Correlation id shared by all stages of one firing
    pub run_id: Uuid,

    pub timestamp: DateTimeWithTimeZone,

    /// `event`, `trigger`, `condition` or `action`
    pub entity_type: String,

    pub entity_id: i32,

    /// Variant tag of the logged entity (e.g. `send_message`)
    pub entity_kind: String,

    pub entity_name: String,

    pub trigger_id: i32,

    pub user_id: Option<i32>,

    /// Pipeline stage, see [`crate::audit::Stage`]
    pub stage: String,

    pub result: Option<bool>,

    #[sea_orm(column_type = "JsonBinary")]
    pub details: Option<JsonValue>,
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
