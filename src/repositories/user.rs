use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Select, Set,
};

use crate::error::TriggerError;
use crate::models::user;

/// Repository for users
pub struct UserRepository<'a> {
    db: &'a DatabaseConnection,
}

impl<'a> UserRepository<'a> {
    pub fn new(db: &'a DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn create(
        &self,
        username: &str,
        email: Option<&str>,
    ) -> Result<user::Model, TriggerError> {
        let user = user::ActiveModel {
            username: Set(username.to_string()),
            email: Set(email.map(str::to_string)),
            created_at: Set(Utc::now().fixed_offset()),
            ..Default::default()
        };
        Ok(user.insert(self.db).await?)
    }

    pub async fn find(&self, user_id: i32) -> Result<Option<user::Model>, TriggerError> {
        Ok(user::Entity::find_by_id(user_id).one(self.db).await?)
    }

    pub async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<user::Model>, TriggerError> {
        Ok(user::Entity::find()
            .filter(user::Column::Username.eq(username))
            .one(self.db)
            .await?)
    }

    /// Every user, as a candidate set for `fire`.
    pub fn all(&self) -> Select<user::Entity> {
        user::Entity::find()
    }

    /// The given users, as a candidate set for `fire`.
    pub fn with_ids(&self, ids: impl IntoIterator<Item = i32>) -> Select<user::Entity> {
        user::Entity::find().filter(user::Column::Id.is_in(ids))
    }
}
