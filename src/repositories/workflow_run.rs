use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect};

use crate::durable::RunStatus;
use crate::error::TriggerError;
use crate::models::{workflow_run, workflow_step};

/// Inspection of durable runs and their step checkpoints
pub struct WorkflowRunRepository<'a> {
    db: &'a DatabaseConnection,
}

impl<'a> WorkflowRunRepository<'a> {
    pub fn new(db: &'a DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn get(
        &self,
        workflow_id: &str,
    ) -> Result<Option<workflow_run::Model>, TriggerError> {
        Ok(workflow_run::Entity::find_by_id(workflow_id.to_string())
            .one(self.db)
            .await?)
    }

    pub async fn steps(
        &self,
        workflow_id: &str,
    ) -> Result<Vec<workflow_step::Model>, TriggerError> {
        Ok(workflow_step::Entity::find()
            .filter(workflow_step::Column::WorkflowId.eq(workflow_id))
            .order_by_asc(workflow_step::Column::Id)
            .all(self.db)
            .await?)
    }

    pub async fn list_by_status(
        &self,
        status: RunStatus,
        limit: u64,
    ) -> Result<Vec<workflow_run::Model>, TriggerError> {
        Ok(workflow_run::Entity::find()
            .filter(workflow_run::Column::Status.eq(status.as_str()))
            .order_by_asc(workflow_run::Column::CreatedAt)
            .limit(limit)
            .all(self.db)
            .await?)
    }

    /// Permanently failed runs, the operational signal for a human.
    pub async fn list_failed(&self, limit: u64) -> Result<Vec<workflow_run::Model>, TriggerError> {
        self.list_by_status(RunStatus::Failed, limit).await
    }
}
