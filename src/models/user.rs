//! User entity model
//!
//! Candidate set for every trigger evaluation. The engine only reads users;
//! it narrows `Select<Entity>` queries contributed by conditions.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Unique login name, exposed to templates as `user.username`
    #[sea_orm(unique)]
    pub username: String,

    pub email: Option<String>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::trigger_activity::Entity")]
    TriggerActivity,
    #[sea_orm(has_many = "super::message::Entity")]
    Message,
}

impl Related<super::trigger_activity::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TriggerActivity.def()
    }
}

impl Related<super::message::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Message.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
