//! WorkflowStep entity model: one checkpoint per step of a durable run.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "workflow_steps")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub workflow_id: String,

    /// Step name, e.g. `fetch_definition` or `perform_action:12`
    pub step_key: String,

    /// `completed` or `failed`
    pub status: String,

    pub attempts: i32,

    /// Serialized step result, replayed instead of re-running the step
    #[sea_orm(column_type = "JsonBinary")]
    pub output: Option<JsonValue>,

    pub error: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::workflow_run::Entity",
        from = "Column::WorkflowId",
        to = "super::workflow_run::Column::WorkflowId",
        on_delete = "Cascade"
    )]
    WorkflowRun,
}

impl Related<super::workflow_run::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::WorkflowRun.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
