//! Activity entity model
//!
//! The per-(trigger, user) ledger row. Only [`crate::ledger::ActivityLedger`]
//! mutates it, and only by incrementing.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "trigger_activities")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub trigger_id: i32,

    pub user_id: i32,

    /// Timestamp of the most recent counted action batch
    pub last_action_datetime: Option<DateTimeWithTimeZone>,

    /// Number of counted action batches, starts at 0
    pub action_count: i32,
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
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    User,
}

impl Related<super::trigger::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Trigger.def()
    }
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
