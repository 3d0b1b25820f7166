use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};

use crate::error::TriggerError;
use crate::models::trigger_activity;

/// Read access to the activity ledger
pub struct ActivityRepository<'a> {
    db: &'a DatabaseConnection,
}

impl<'a> ActivityRepository<'a> {
    pub fn new(db: &'a DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find(
        &self,
        trigger_id: i32,
        user_id: i32,
    ) -> Result<Option<trigger_activity::Model>, TriggerError> {
        Ok(trigger_activity::Entity::find()
            .filter(trigger_activity::Column::TriggerId.eq(trigger_id))
            .filter(trigger_activity::Column::UserId.eq(user_id))
            .one(self.db)
            .await?)
    }

    /// `action_count` for the pair, 0 when no row exists.
    pub async fn action_count(&self, trigger_id: i32, user_id: i32) -> Result<i32, TriggerError> {
        Ok(self
            .find(trigger_id, user_id)
            .await?
            .map_or(0, |activity| activity.action_count))
    }

    pub async fn list_for_trigger(
        &self,
        trigger_id: i32,
    ) -> Result<Vec<trigger_activity::Model>, TriggerError> {
        Ok(trigger_activity::Entity::find()
            .filter(trigger_activity::Column::TriggerId.eq(trigger_id))
            .order_by_asc(trigger_activity::Column::UserId)
            .all(self.db)
            .await?)
    }
}
