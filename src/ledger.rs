//! Activity ledger
//!
//! Serializes work for one (trigger, user) pair behind an exclusive lock on
//! its `trigger_activities` row and counts the runs that complete.
//!
//! The row is fetched or created outside the transaction, then re-read with
//! `SELECT ... FOR UPDATE` inside a fresh one. The scope callback receives
//! that transaction; every database write it makes commits or rolls back
//! together with the counter update.

use std::future::Future;
use std::pin::Pin;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, DbErr, EntityTrait,
    QueryFilter, QuerySelect, Set, TransactionTrait,
};
use tracing::{debug, warn};

use crate::error::{TriggerError, is_unique_violation};
use crate::models::trigger_activity::{self, ActiveModel, Column, Entity};

/// How a locked scope ended without a fault.
#[derive(Debug)]
pub enum ScopeError {
    /// Commit without counting this run.
    Cancel,
    /// The locked row no longer satisfies this condition. Commits without
    /// counting, like `Cancel`.
    Refused { condition_id: i32 },
    /// Roll back everything and propagate.
    Failed(TriggerError),
}

impl From<DbErr> for ScopeError {
    fn from(err: DbErr) -> Self {
        ScopeError::Failed(TriggerError::Database(err))
    }
}

impl From<TriggerError> for ScopeError {
    fn from(err: TriggerError) -> Self {
        ScopeError::Failed(err)
    }
}

/// Result of a locked scope that did not fail.
#[derive(Debug)]
pub enum LockOutcome<T> {
    /// The scope returned normally; `activity` shows the incremented row.
    Completed {
        value: T,
        activity: trigger_activity::Model,
    },
    /// The scope signalled [`ScopeError::Cancel`]; the row is unchanged.
    Cancelled { activity: trigger_activity::Model },
    /// The scope signalled [`ScopeError::Refused`]; the row is unchanged.
    Refused {
        activity: trigger_activity::Model,
        condition_id: i32,
    },
}

impl<T> LockOutcome<T> {
    pub fn activity(&self) -> &trigger_activity::Model {
        match self {
            LockOutcome::Completed { activity, .. }
            | LockOutcome::Cancelled { activity }
            | LockOutcome::Refused { activity, .. } => activity,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, LockOutcome::Cancelled { .. })
    }
}

pub type ScopeFuture<'c, T> = Pin<Box<dyn Future<Output = Result<T, ScopeError>> + Send + 'c>>;

/// Transactional per-(trigger, user) counter.
#[derive(Clone)]
pub struct ActivityLedger {
    db: DatabaseConnection,
}

impl ActivityLedger {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Runs `scope` while holding the exclusive lock on the activity row.
    ///
    /// The callback must do all its database work through the transaction it
    /// is given. On normal completion `action_count` is incremented and
    /// `last_action_datetime` set to now.
    pub async fn lock<T, F>(
        &self,
        trigger_id: i32,
        user_id: i32,
        scope: F,
    ) -> Result<LockOutcome<T>, TriggerError>
    where
        T: Send,
        F: for<'c> FnOnce(&'c DatabaseTransaction, trigger_activity::Model) -> ScopeFuture<'c, T>
            + Send,
    {
        let row = self.get_or_create(trigger_id, user_id).await?;

        let txn = self.db.begin().await?;
        let locked = Entity::find_by_id(row.id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| TriggerError::not_found("trigger_activity", row.id))?;

        debug!(trigger_id, user_id, activity_id = locked.id, "Activity lock acquired");

        let result = scope(&txn, locked.clone()).await;
        match result {
            Ok(value) => {
                let count = locked.action_count + 1;
                let mut active: ActiveModel = locked.into();
                active.action_count = Set(count);
                active.last_action_datetime = Set(Some(Utc::now().fixed_offset()));
                let activity = active.update(&txn).await?;
                txn.commit().await?;
                Ok(LockOutcome::Completed { value, activity })
            }
            Err(ScopeError::Cancel) => {
                txn.commit().await?;
                debug!(trigger_id, user_id, "Activity scope cancelled, count unchanged");
                Ok(LockOutcome::Cancelled { activity: locked })
            }
            Err(ScopeError::Refused { condition_id }) => {
                txn.commit().await?;
                debug!(
                    trigger_id,
                    user_id, condition_id, "Locked row refused, count unchanged"
                );
                Ok(LockOutcome::Refused {
                    activity: locked,
                    condition_id,
                })
            }
            Err(ScopeError::Failed(err)) => {
                if let Err(rollback_err) = txn.rollback().await {
                    warn!(trigger_id, user_id, error = %rollback_err, "Activity rollback failed");
                }
                Err(err)
            }
        }
    }

    /// Fetches the row, creating it when missing. A concurrent creator
    /// winning the unique index is resolved by re-reading.
    pub async fn get_or_create(
        &self,
        trigger_id: i32,
        user_id: i32,
    ) -> Result<trigger_activity::Model, DbErr> {
        if let Some(existing) = self.find(trigger_id, user_id).await? {
            return Ok(existing);
        }

        let fresh = ActiveModel {
            trigger_id: Set(trigger_id),
            user_id: Set(user_id),
            last_action_datetime: Set(None),
            action_count: Set(0),
            ..Default::default()
        };

        match fresh.insert(&self.db).await {
            Ok(created) => Ok(created),
            Err(err) if is_unique_violation(&err) => {
                self.find(trigger_id, user_id).await?.ok_or(err)
            }
            Err(err) => Err(err),
        }
    }

    pub async fn find(
        &self,
        trigger_id: i32,
        user_id: i32,
    ) -> Result<Option<trigger_activity::Model>, DbErr> {
        Entity::find()
            .filter(Column::TriggerId.eq(trigger_id))
            .filter(Column::UserId.eq(user_id))
            .one(&self.db)
            .await
    }
}
