//! Trigger orchestration
//!
//! [`TriggerEngine`] loads a trigger with its resolved conditions and actions
//! and runs the per-user state machine: narrow candidates with every
//! condition's query filter, re-check each condition exactly, then perform
//! all actions inside the activity ledger lock.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, FixedOffset, Utc};

use metrics::{counter, histogram};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Select,
};
use serde_json::json;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditSink, EntityType, Stage};
use crate::error::TriggerError;
use crate::kinds::{
    ActionError, ActionKind, ConditionKind, Context, KindRegistry, first_refusal,
};
use crate::ledger::{ActivityLedger, LockOutcome, ScopeError};
use crate::models::{trigger, trigger_action, trigger_activity, trigger_condition, user};

/// A condition row with its resolved behaviour.
#[derive(Clone)]
pub struct LoadedCondition {
    pub model: trigger_condition::Model,
    pub kind: Arc<dyn ConditionKind>,
}

/// An action row with its resolved behaviour.
#[derive(Clone)]
pub struct LoadedAction {
    pub model: trigger_action::Model,
    pub kind: Arc<dyn ActionKind>,
}

/// Trigger definition snapshot used for one evaluation.
#[derive(Clone)]
pub struct LoadedTrigger {
    pub model: trigger::Model,
    pub conditions: Vec<LoadedCondition>,
    pub actions: Vec<LoadedAction>,
}

impl LoadedTrigger {
    pub fn id(&self) -> i32 {
        self.model.id
    }

    /// Enabled and has at least one action.
    pub fn is_active(&self) -> bool {
        self.model.is_enabled && !self.actions.is_empty()
    }

    /// First condition the locked `activity` row no longer satisfies.
    pub fn refusal(
        &self,
        activity: &trigger_activity::Model,
        now: DateTime<FixedOffset>,
    ) -> Option<i32> {
        first_refusal(
            self.conditions
                .iter()
                .map(|condition| (condition.model.id, condition.kind.as_ref())),
            activity,
            now,
        )
    }
}

/// Terminal state of one `on_event` call that did not raise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// Trigger disabled or without actions; nothing was touched.
    Inactive,
    /// The exact check of this condition failed; nothing was touched.
    ConditionsFailed { condition_id: i32 },
    /// Every action ran and the ledger advanced.
    Performed {
        activity: trigger_activity::Model,
        actions: Vec<i32>,
    },
    /// An action cancelled the run; the ledger row is unchanged.
    Cancelled { activity: trigger_activity::Model },
}

/// Orchestrates conditions, ledger and actions for a trigger.
#[derive(Clone)]
pub struct TriggerEngine {
    db: DatabaseConnection,
    registry: Arc<KindRegistry>,
    audit: Arc<dyn AuditSink>,
    ledger: ActivityLedger,
}

impl TriggerEngine {
    pub fn new(
        db: DatabaseConnection,
        registry: Arc<KindRegistry>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let ledger = ActivityLedger::new(db.clone());
        Self {
            db,
            registry,
            audit,
            ledger,
        }
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    pub fn registry(&self) -> &Arc<KindRegistry> {
        &self.registry
    }

    pub fn audit(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }

    pub fn ledger(&self) -> &ActivityLedger {
        &self.ledger
    }

    /// Loads a trigger and resolves its children in attachment order.
    pub async fn load(&self, trigger_id: i32) -> Result<LoadedTrigger, TriggerError> {
        let model = trigger::Entity::find_by_id(trigger_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| TriggerError::not_found("trigger", trigger_id))?;

        let conditions = trigger_condition::Entity::find()
            .filter(trigger_condition::Column::TriggerId.eq(trigger_id))
            .order_by_asc(trigger_condition::Column::Position)
            .order_by_asc(trigger_condition::Column::Id)
            .all(&self.db)
            .await?
            .into_iter()
            .map(|model| -> Result<LoadedCondition, TriggerError> {
                let kind = self.registry.condition(&model.kind, &model.params)?;
                Ok(LoadedCondition { model, kind })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let actions = trigger_action::Entity::find()
            .filter(trigger_action::Column::TriggerId.eq(trigger_id))
            .order_by_asc(trigger_action::Column::Position)
            .order_by_asc(trigger_action::Column::Id)
            .all(&self.db)
            .await?
            .into_iter()
            .map(|model| -> Result<LoadedAction, TriggerError> {
                let kind = self.registry.action(&model.kind, &model.params)?;
                Ok(LoadedAction { model, kind })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(LoadedTrigger {
            model,
            conditions,
            actions,
        })
    }

    /// Narrows `users` to those the trigger may act on.
    ///
    /// Inactive triggers yield an empty query. When auditing is enabled the
    /// cardinality before and after every condition is recorded.
    pub async fn filter_user_query(
        &self,
        trigger: &LoadedTrigger,
        users: Select<user::Entity>,
        run_id: Option<Uuid>,
    ) -> Result<Select<user::Entity>, TriggerError> {
        let auditing = self.audit.is_enabled();

        if !trigger.is_active() {
            debug!(trigger_id = trigger.id(), "Trigger inactive, filtering to empty set");
            if auditing {
                self.audit
                    .log(
                        trigger_entry(trigger, Stage::TriggerFilter)
                            .result(false)
                            .details(json!({
                                "is_enabled": trigger.model.is_enabled,
                                "action_count": trigger.actions.len(),
                            }))
                            .run(run_id),
                    )
                    .await;
            }
            return Ok(empty(users));
        }

        let mut narrowed = users;
        for condition in &trigger.conditions {
            let before = if auditing {
                Some(narrowed.clone().count(&self.db).await?)
            } else {
                None
            };

            narrowed = condition.kind.filter_users(trigger.id(), narrowed);

            if let Some(before) = before {
                let after = narrowed.clone().count(&self.db).await?;
                self.audit
                    .log(
                        condition_entry(trigger, condition, Stage::ConditionFilter)
                            .result(after > 0)
                            .details(json!({ "before": before, "after": after }))
                            .run(run_id),
                    )
                    .await;
            }
        }

        Ok(narrowed)
    }

    /// Exact per-user evaluation followed by the locked action batch.
    ///
    /// Conditions are checked again against the locked activity row, so
    /// concurrent events for one user never exceed a count or frequency
    /// limit; a refusal there is reported as `ConditionsFailed`. Action
    /// errors are not caught: the ledger rolls back and the error is
    /// returned as [`TriggerError::Action`].
    #[instrument(skip_all, fields(trigger_id = trigger.id(), user_id = user.id))]
    pub async fn on_event(
        &self,
        trigger: &LoadedTrigger,
        user: &user::Model,
        context: &Context,
        run_id: Option<Uuid>,
    ) -> Result<EventOutcome, TriggerError> {
        if !trigger.is_active() {
            debug!("Trigger inactive, skipping");
            return Ok(EventOutcome::Inactive);
        }

        for condition in &trigger.conditions {
            let satisfied = condition
                .kind
                .is_satisfied(&self.db, trigger.id(), user)
                .await?;

            self.audit
                .log(
                    condition_entry(trigger, condition, Stage::ConditionCheck)
                        .user(user.id)
                        .result(satisfied)
                        .run(run_id),
                )
                .await;

            if !satisfied {
                counter!("triggers_conditions_failed_total").increment(1);
                info!(condition_id = condition.model.id, "Condition not satisfied");
                return Ok(EventOutcome::ConditionsFailed {
                    condition_id: condition.model.id,
                });
            }
        }

        let batch: Vec<(i32, Arc<dyn ActionKind>)> = trigger
            .actions
            .iter()
            .map(|action| (action.model.id, Arc::clone(&action.kind)))
            .collect();
        let scoped_trigger = trigger.clone();
        let scoped_user = user.clone();
        let scoped_context = context.clone();
        let started = Instant::now();

        let locked = self
            .ledger
            .lock(trigger.id(), user.id, move |txn, activity| {
                Box::pin(async move {
                    if let Some(condition_id) =
                        scoped_trigger.refusal(&activity, Utc::now().fixed_offset())
                    {
                        return Err(ScopeError::Refused { condition_id });
                    }
                    let mut performed = Vec::with_capacity(batch.len());
                    for (action_id, kind) in &batch {
                        match kind.perform(txn, &scoped_user, &scoped_context).await {
                            Ok(()) => performed.push(*action_id),
                            Err(ActionError::Cancelled) => return Err(ScopeError::Cancel),
                            Err(source) => {
                                return Err(ScopeError::Failed(TriggerError::Action {
                                    action_id: *action_id,
                                    source,
                                }));
                            }
                        }
                    }
                    Ok(performed)
                })
            })
            .await;

        histogram!("triggers_action_batch_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        match locked {
            Ok(LockOutcome::Completed {
                value: performed,
                activity,
            }) => {
                counter!("triggers_actions_performed_total").increment(performed.len() as u64);
                for action in &trigger.actions {
                    self.audit
                        .log(
                            action_entry(trigger, action)
                                .user(user.id)
                                .result(true)
                                .run(run_id),
                        )
                        .await;
                }
                info!(
                    action_count = activity.action_count,
                    actions = performed.len(),
                    "Actions performed"
                );
                Ok(EventOutcome::Performed {
                    activity,
                    actions: performed,
                })
            }
            Ok(LockOutcome::Refused { condition_id, .. }) => {
                if let Some(condition) = trigger
                    .conditions
                    .iter()
                    .find(|c| c.model.id == condition_id)
                {
                    self.audit
                        .log(
                            condition_entry(trigger, condition, Stage::ConditionCheck)
                                .user(user.id)
                                .result(false)
                                .details(json!({ "locked": true }))
                                .run(run_id),
                        )
                        .await;
                }
                counter!("triggers_conditions_failed_total").increment(1);
                info!(condition_id, "Condition no longer satisfied under the lock");
                Ok(EventOutcome::ConditionsFailed { condition_id })
            }
            Ok(LockOutcome::Cancelled { activity }) => {
                for action in &trigger.actions {
                    self.audit
                        .log(
                            action_entry(trigger, action)
                                .user(user.id)
                                .details(json!({ "cancelled": true }))
                                .run(run_id),
                        )
                        .await;
                }
                info!("Action batch cancelled, ledger unchanged");
                Ok(EventOutcome::Cancelled { activity })
            }
            Err(err) => {
                if let TriggerError::Action { action_id, source } = &err
                    && let Some(action) = trigger.actions.iter().find(|a| a.model.id == *action_id)
                {
                    self.audit
                        .log(
                            action_entry(trigger, action)
                                .user(user.id)
                                .result(false)
                                .details(json!({ "error": source.to_string() }))
                                .run(run_id),
                        )
                        .await;
                }
                warn!(error = %err, "Action batch failed, ledger rolled back");
                Err(err)
            }
        }
    }
}

fn empty(users: Select<user::Entity>) -> Select<user::Entity> {
    users.filter(user::Column::Id.is_in(Vec::<i32>::new()))
}

fn trigger_entry(trigger: &LoadedTrigger, stage: Stage) -> AuditEntry {
    AuditEntry::new(EntityType::Trigger, trigger.id(), "trigger", stage)
        .name(trigger.model.name.clone())
        .trigger(trigger.id())
}

fn condition_entry(
    trigger: &LoadedTrigger,
    condition: &LoadedCondition,
    stage: Stage,
) -> AuditEntry {
    AuditEntry::new(
        EntityType::Condition,
        condition.model.id,
        condition.kind.kind(),
        stage,
    )
    .trigger(trigger.id())
}

fn action_entry(trigger: &LoadedTrigger, action: &LoadedAction) -> AuditEntry {
    AuditEntry::new(
        EntityType::Action,
        action.model.id,
        action.kind.kind(),
        Stage::ActionPerform,
    )
    .trigger(trigger.id())
}
