//! WorkflowRun entity model
//!
//! One row per durable trigger run, keyed by the deterministic workflow id
//! `trigger-{trigger_id}-{user_id}-{event_id}`.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "workflow_runs")]
pub struct Model {
    /// Deterministic workflow id (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub workflow_id: String,

    /// Workflow name, e.g. `trigger_workflow`
    pub workflow_type: String,

    pub trigger_id: i32,

    pub user_id: i32,

    pub event_id: i32,

    /// Audit correlation id from the originating `fire`
    pub run_id: Uuid,

    /// Firing context passed to the workflow
    #[sea_orm(column_type = "JsonBinary")]
    pub context: JsonValue,

    /// `pending`, `running`, `completed` or `failed`
    pub status: String,

    /// Number of executions started for this run
    pub attempts: i32,

    /// Earliest time a worker may pick the run up
    pub scheduled_at: DateTimeWithTimeZone,

    pub started_at: Option<DateTimeWithTimeZone>,

    pub finished_at: Option<DateTimeWithTimeZone>,

    /// Serialized workflow outcome once completed
    #[sea_orm(column_type = "JsonBinary")]
    pub outcome: Option<JsonValue>,

    /// Terminal error message once failed
    pub error: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::workflow_step::Entity")]
    Step,
}

impl Related<super::workflow_step::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Step.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
