use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect};
use uuid::Uuid;

use crate::audit::{ResolvedEntity, resolve_entity};
use crate::error::TriggerError;
use crate::models::trigger_log;

/// Read access to the audit log
pub struct TriggerLogRepository<'a> {
    db: &'a DatabaseConnection,
}

impl<'a> TriggerLogRepository<'a> {
    pub fn new(db: &'a DatabaseConnection) -> Self {
        Self { db }
    }

    /// Every row of one firing, oldest first.
    pub async fn list_by_run(
        &self,
        run_id: Uuid,
    ) -> Result<Vec<trigger_log::Model>, TriggerError> {
        Ok(trigger_log::Entity::find()
            .filter(trigger_log::Column::RunId.eq(run_id))
            .order_by_asc(trigger_log::Column::Id)
            .all(self.db)
            .await?)
    }

    /// Most recent rows for a trigger, newest first.
    pub async fn recent_for_trigger(
        &self,
        trigger_id: i32,
        limit: u64,
    ) -> Result<Vec<trigger_log::Model>, TriggerError> {
        Ok(trigger_log::Entity::find()
            .filter(trigger_log::Column::TriggerId.eq(trigger_id))
            .order_by_desc(trigger_log::Column::Timestamp)
            .order_by_desc(trigger_log::Column::Id)
            .limit(limit)
            .all(self.db)
            .await?)
    }

    /// Entity a row points at, `None` once it has been deleted.
    pub async fn entity(&self, log: &trigger_log::Model) -> Option<ResolvedEntity> {
        resolve_entity(self.db, log).await
    }
}
