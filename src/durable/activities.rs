//! Step bodies of the trigger workflow.
//!
//! Each activity reloads what it needs by id, so it can run on any worker
//! after a restart. Outputs are plain serializable values because they are
//! checkpointed.

use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::audit::{AuditEntry, EntityType, Stage};
use crate::engine::TriggerEngine;
use crate::error::TriggerError;
use crate::kinds::{ActionError, Context, with_user};
use crate::ledger::{LockOutcome, ScopeError};
use crate::models::{
    trigger, trigger_action, trigger_condition, trigger_event, user, workflow_step,
};

use super::executor::STEP_COMPLETED;
use super::{DurableError, LEDGER_STEP};

/// Serialized condition or action row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub id: i32,
    pub kind: String,
    pub params: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerDefinition {
    pub trigger_id: i32,
    pub name: String,
    pub is_enabled: bool,
    pub conditions: Vec<Descriptor>,
    pub actions: Vec<Descriptor>,
}

impl TriggerDefinition {
    /// Same rule as the in-process engine: enabled with at least one action.
    pub fn is_active(&self) -> bool {
        self.is_enabled && !self.actions.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformOutcome {
    Performed,
    Cancelled,
}

/// Result of the ledger step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoggedActivity {
    Counted { action_count: i32 },
    /// The locked row no longer satisfied this condition; nothing counted.
    Refused { condition_id: i32 },
}

/// Activities backing one trigger workflow step each.
#[derive(Clone)]
pub struct TriggerActivities {
    engine: Arc<TriggerEngine>,
}

impl TriggerActivities {
    pub fn new(engine: Arc<TriggerEngine>) -> Self {
        Self { engine }
    }

    /// Returns `None` when the trigger no longer exists.
    pub async fn fetch_definition(
        &self,
        trigger_id: i32,
    ) -> Result<Option<TriggerDefinition>, TriggerError> {
        let db = self.engine.db();
        let Some(model) = trigger::Entity::find_by_id(trigger_id).one(db).await? else {
            return Ok(None);
        };

        let conditions = trigger_condition::Entity::find()
            .filter(trigger_condition::Column::TriggerId.eq(trigger_id))
            .order_by_asc(trigger_condition::Column::Position)
            .order_by_asc(trigger_condition::Column::Id)
            .all(db)
            .await?
            .into_iter()
            .map(|row| Descriptor {
                id: row.id,
                kind: row.kind,
                params: row.params,
            })
            .collect();

        let actions = trigger_action::Entity::find()
            .filter(trigger_action::Column::TriggerId.eq(trigger_id))
            .order_by_asc(trigger_action::Column::Position)
            .order_by_asc(trigger_action::Column::Id)
            .all(db)
            .await?
            .into_iter()
            .map(|row| Descriptor {
                id: row.id,
                kind: row.kind,
                params: row.params,
            })
            .collect();

        Ok(Some(TriggerDefinition {
            trigger_id,
            name: model.name,
            is_enabled: model.is_enabled,
            conditions,
            actions,
        }))
    }

    /// Exact check of one condition. A deleted condition or user counts as
    /// not satisfied.
    pub async fn evaluate_condition(
        &self,
        trigger_id: i32,
        condition_id: i32,
        user_id: i32,
        run_id: Uuid,
    ) -> Result<bool, TriggerError> {
        let db = self.engine.db();
        let Some(row) = trigger_condition::Entity::find_by_id(condition_id)
            .one(db)
            .await?
        else {
            debug!(condition_id, "Condition deleted, treating as unsatisfied");
            return Ok(false);
        };
        let Some(user) = user::Entity::find_by_id(user_id).one(db).await? else {
            debug!(user_id, "User deleted, treating condition as unsatisfied");
            return Ok(false);
        };

        let kind = self.engine.registry().condition(&row.kind, &row.params)?;
        let satisfied = kind.is_satisfied(db, trigger_id, &user).await?;

        self.engine
            .audit()
            .log(
                AuditEntry::new(EntityType::Condition, row.id, row.kind, Stage::ConditionCheck)
                    .trigger(trigger_id)
                    .user(user_id)
                    .result(satisfied)
                    .run(Some(run_id)),
            )
            .await;

        Ok(satisfied)
    }

    /// Performs one action in its own transaction.
    ///
    /// Must tolerate being re-run: a crash after commit but before the step
    /// checkpoint replays it.
    pub async fn perform_action(
        &self,
        action_id: i32,
        user_id: i32,
        event_id: i32,
        context: Context,
        run_id: Uuid,
    ) -> Result<PerformOutcome, TriggerError> {
        let db = self.engine.db();
        let row = trigger_action::Entity::find_by_id(action_id)
            .one(db)
            .await?
            .ok_or_else(|| TriggerError::not_found("trigger_action", action_id))?;
        let user = user::Entity::find_by_id(user_id)
            .one(db)
            .await?
            .ok_or_else(|| TriggerError::not_found("user", user_id))?;
        let kind = self.engine.registry().action(&row.kind, &row.params)?;

        let user_context = match trigger_event::Entity::find_by_id(event_id).one(db).await? {
            Some(event) => {
                let event_kind = self.engine.registry().event(&event.kind, &event.params)?;
                event_kind.get_user_context(db, &user, &context).await?
            }
            None => with_user(&context, &user),
        };

        let txn = db.begin().await?;
        let performed = kind.perform(&txn, &user, &user_context).await;

        let entry = AuditEntry::new(
            EntityType::Action,
            row.id,
            row.kind.clone(),
            Stage::ActionPerform,
        )
        .trigger(row.trigger_id)
        .user(user_id)
        .run(Some(run_id));

        match performed {
            Ok(()) => {
                txn.commit().await?;
                self.engine.audit().log(entry.result(true)).await;
                Ok(PerformOutcome::Performed)
            }
            Err(ActionError::Cancelled) => {
                txn.commit().await?;
                self.engine
                    .audit()
                    .log(entry.details(json!({ "cancelled": true })))
                    .await;
                Ok(PerformOutcome::Cancelled)
            }
            Err(source) => {
                if let Err(rollback_err) = txn.rollback().await {
                    warn!(action_id, error = %rollback_err, "Action rollback failed");
                }
                self.engine
                    .audit()
                    .log(
                        entry
                            .result(false)
                            .details(json!({ "error": source.to_string() })),
                    )
                    .await;
                Err(TriggerError::Action { action_id, source })
            }
        }
    }

    /// Advances the activity ledger for run `workflow_id`.
    ///
    /// Conditions are re-checked against the locked row. The step checkpoint
    /// is written in the ledger transaction, so an attempt whose commit landed
    /// after its timeout is not counted twice by the retry.
    pub async fn log_activity(
        &self,
        workflow_id: &str,
        trigger_id: i32,
        user_id: i32,
        run_id: Uuid,
    ) -> Result<LoggedActivity, TriggerError> {
        let db = self.engine.db();
        if let Some(recorded) = recorded_ledger_step(db, workflow_id).await? {
            debug!(workflow_id, "Ledger already advanced by an earlier attempt");
            return Ok(recorded);
        }

        let trigger = self.engine.load(trigger_id).await?;
        let scoped_trigger = trigger.clone();
        let scoped_workflow = workflow_id.to_string();

        let outcome = self
            .engine
            .ledger()
            .lock(trigger_id, user_id, move |txn, activity| {
                Box::pin(async move {
                    if let Some(condition_id) =
                        scoped_trigger.refusal(&activity, Utc::now().fixed_offset())
                    {
                        return Err(ScopeError::Refused { condition_id });
                    }
                    let counted = LoggedActivity::Counted {
                        action_count: activity.action_count + 1,
                    };
                    record_ledger_step(txn, &scoped_workflow, &counted).await?;
                    Ok(counted)
                })
            })
            .await?;

        match outcome {
            LockOutcome::Completed { value, .. } => Ok(value),
            LockOutcome::Refused { condition_id, .. } => {
                let kind = trigger
                    .conditions
                    .iter()
                    .find(|c| c.model.id == condition_id)
                    .map_or("condition", |c| c.kind.kind());
                self.engine
                    .audit()
                    .log(
                        AuditEntry::new(
                            EntityType::Condition,
                            condition_id,
                            kind,
                            Stage::ConditionCheck,
                        )
                        .trigger(trigger_id)
                        .user(user_id)
                        .result(false)
                        .details(json!({ "locked": true }))
                        .run(Some(run_id)),
                    )
                    .await;
                debug!(condition_id, "Ledger refused, run not counted");
                Ok(LoggedActivity::Refused { condition_id })
            }
            // Not produced by the scope above.
            LockOutcome::Cancelled { activity } => Ok(LoggedActivity::Counted {
                action_count: activity.action_count,
            }),
        }
    }
}

async fn recorded_ledger_step<C: ConnectionTrait>(
    db: &C,
    workflow_id: &str,
) -> Result<Option<LoggedActivity>, TriggerError> {
    let checkpoint = workflow_step::Entity::find()
        .filter(workflow_step::Column::WorkflowId.eq(workflow_id))
        .filter(workflow_step::Column::StepKey.eq(LEDGER_STEP))
        .filter(workflow_step::Column::Status.eq(STEP_COMPLETED))
        .one(db)
        .await?;

    match checkpoint.and_then(|row| row.output) {
        Some(output) => Ok(Some(
            serde_json::from_value(output).map_err(DurableError::from)?,
        )),
        None => Ok(None),
    }
}

async fn record_ledger_step<C: ConnectionTrait>(
    txn: &C,
    workflow_id: &str,
    logged: &LoggedActivity,
) -> Result<(), TriggerError> {
    let output = serde_json::to_value(logged).map_err(DurableError::from)?;
    let now = Utc::now().fixed_offset();
    workflow_step::ActiveModel {
        workflow_id: Set(workflow_id.to_string()),
        step_key: Set(LEDGER_STEP.to_string()),
        status: Set(STEP_COMPLETED.to_string()),
        attempts: Set(1),
        output: Set(Some(output)),
        error: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(txn)
    .await?;
    Ok(())
}
