//! Database-backed workflow executor
//!
//! Runs live in `workflow_runs`, step checkpoints in `workflow_steps`.
//! Starting a run only inserts a pending row; [`DatabaseExecutor::claim_due`]
//! and [`DatabaseExecutor::execute`] move it through `running` into a
//! terminal status.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use metrics::counter;
use sea_orm::sea_query::{Expr, LockBehavior, LockType};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument, warn};

use super::{
    DurableError, RunStatus, StartOutcome, StepOptions, TriggerActivities, WORKFLOW_TYPE,
    WorkflowArgs, WorkflowExecutor, run_trigger_workflow,
};
use crate::config::DurableConfig;
use crate::error::is_unique_violation;
use crate::models::{workflow_run, workflow_step};

pub(super) const STEP_COMPLETED: &str = "completed";
const STEP_FAILED: &str = "failed";

/// Checkpointing step runner for one workflow run.
#[derive(Clone)]
pub struct WorkflowContext {
    db: DatabaseConnection,
    workflow_id: String,
}

impl WorkflowContext {
    pub fn new(db: DatabaseConnection, workflow_id: impl Into<String>) -> Self {
        Self {
            db,
            workflow_id: workflow_id.into(),
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// Runs `body` as step `step_key`.
    ///
    /// A completed checkpoint is returned without calling `body`. Otherwise
    /// each attempt is bounded by `options.timeout`, attempts are spaced by
    /// the fixed retry interval, and the first success is checkpointed.
    pub async fn step<T, E, F, Fut>(
        &self,
        step_key: &str,
        options: &StepOptions,
        mut body: F,
    ) -> Result<T, DurableError>
    where
        T: Serialize + DeserializeOwned,
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(checkpoint) = self.checkpoint(step_key).await?
            && checkpoint.status == STEP_COMPLETED
        {
            debug!(workflow_id = %self.workflow_id, step_key, "Replaying step checkpoint");
            let output = checkpoint.output.unwrap_or(JsonValue::Null);
            return Ok(serde_json::from_value(output)?);
        }

        let max_attempts = options.retry.max_attempts;
        let mut last_error = String::new();
        let mut timed_out = false;

        for attempt in 1..=max_attempts {
            match timeout(options.timeout, body()).await {
                Ok(Ok(value)) => {
                    let output = serde_json::to_value(&value)?;
                    self.save(step_key, STEP_COMPLETED, attempt, Some(output), None)
                        .await?;
                    return Ok(value);
                }
                Ok(Err(err)) => {
                    last_error = err.to_string();
                    timed_out = false;
                }
                Err(_) => {
                    last_error = format!("timed out after {}s", options.timeout.as_secs());
                    timed_out = true;
                }
            }

            warn!(
                workflow_id = %self.workflow_id,
                step_key,
                attempt,
                max_attempts,
                error = %last_error,
                "Workflow step attempt failed"
            );

            if attempt < max_attempts && !options.retry.interval.is_zero() {
                sleep(options.retry.interval).await;
            }
        }

        self.save(
            step_key,
            STEP_FAILED,
            max_attempts,
            None,
            Some(last_error.clone()),
        )
        .await?;

        if timed_out {
            Err(DurableError::StepTimeout {
                step: step_key.to_string(),
                timeout_seconds: options.timeout.as_secs(),
            })
        } else {
            Err(DurableError::StepExhausted {
                step: step_key.to_string(),
                attempts: max_attempts,
                last_error,
            })
        }
    }

    async fn checkpoint(
        &self,
        step_key: &str,
    ) -> Result<Option<workflow_step::Model>, DurableError> {
        Ok(workflow_step::Entity::find()
            .filter(workflow_step::Column::WorkflowId.eq(self.workflow_id.as_str()))
            .filter(workflow_step::Column::StepKey.eq(step_key))
            .one(&self.db)
            .await?)
    }

    async fn save(
        &self,
        step_key: &str,
        status: &str,
        attempts: u32,
        output: Option<JsonValue>,
        error: Option<String>,
    ) -> Result<(), DurableError> {
        let now = Utc::now().fixed_offset();
        let attempts = i32::try_from(attempts).unwrap_or(i32::MAX);

        match self.checkpoint(step_key).await? {
            Some(existing) => {
                let mut active: workflow_step::ActiveModel = existing.into();
                active.status = Set(status.to_string());
                active.attempts = Set(attempts);
                active.output = Set(output);
                active.error = Set(error);
                active.updated_at = Set(now);
                active.update(&self.db).await?;
            }
            None => {
                workflow_step::ActiveModel {
                    workflow_id: Set(self.workflow_id.clone()),
                    step_key: Set(step_key.to_string()),
                    status: Set(status.to_string()),
                    attempts: Set(attempts),
                    output: Set(output),
                    error: Set(error),
                    created_at: Set(now),
                    updated_at: Set(now),
                    ..Default::default()
                }
                .insert(&self.db)
                .await?;
            }
        }
        Ok(())
    }
}

/// Executor storing runs and checkpoints in the application database.
#[derive(Clone)]
pub struct DatabaseExecutor {
    db: DatabaseConnection,
    activities: Arc<TriggerActivities>,
    config: DurableConfig,
}

impl DatabaseExecutor {
    pub fn new(
        db: DatabaseConnection,
        activities: Arc<TriggerActivities>,
        config: DurableConfig,
    ) -> Self {
        Self {
            db,
            activities,
            config,
        }
    }

    pub fn config(&self) -> &DurableConfig {
        &self.config
    }

    /// Claims up to `limit` pending runs whose scheduled time has passed and
    /// marks them running.
    pub async fn claim_due(&self, limit: u64) -> Result<Vec<workflow_run::Model>, DurableError> {
        let now = Utc::now().fixed_offset();
        let txn = self.db.begin().await?;

        let due: Vec<String> = workflow_run::Entity::find()
            .select_only()
            .column(workflow_run::Column::WorkflowId)
            .filter(workflow_run::Column::Status.eq(RunStatus::Pending.as_str()))
            .filter(workflow_run::Column::ScheduledAt.lte(now))
            .order_by_asc(workflow_run::Column::ScheduledAt)
            .limit(limit)
            .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
            .into_tuple()
            .all(&txn)
            .await?;

        if due.is_empty() {
            txn.commit().await?;
            return Ok(Vec::new());
        }

        workflow_run::Entity::update_many()
            .col_expr(
                workflow_run::Column::Status,
                Expr::value(RunStatus::Running.as_str()),
            )
            .col_expr(workflow_run::Column::StartedAt, Expr::value(now))
            .col_expr(workflow_run::Column::UpdatedAt, Expr::value(now))
            .col_expr(
                workflow_run::Column::Attempts,
                Expr::col(workflow_run::Column::Attempts).add(1),
            )
            .filter(workflow_run::Column::WorkflowId.is_in(due.clone()))
            .filter(workflow_run::Column::Status.eq(RunStatus::Pending.as_str()))
            .exec(&txn)
            .await?;

        let claimed = workflow_run::Entity::find()
            .filter(workflow_run::Column::WorkflowId.is_in(due))
            .filter(workflow_run::Column::Status.eq(RunStatus::Running.as_str()))
            .all(&txn)
            .await?;

        txn.commit().await?;
        debug!(claimed = claimed.len(), "Claimed due workflow runs");
        Ok(claimed)
    }

    /// Returns runs left `running` by a stopped worker to `pending`.
    pub async fn resume_interrupted(&self) -> Result<u64, DurableError> {
        let result = workflow_run::Entity::update_many()
            .col_expr(
                workflow_run::Column::Status,
                Expr::value(RunStatus::Pending.as_str()),
            )
            .col_expr(
                workflow_run::Column::UpdatedAt,
                Expr::value(Utc::now().fixed_offset()),
            )
            .filter(workflow_run::Column::Status.eq(RunStatus::Running.as_str()))
            .exec(&self.db)
            .await?;

        if result.rows_affected > 0 {
            info!(
                resumed = result.rows_affected,
                "Interrupted workflow runs returned to pending"
            );
        }
        Ok(result.rows_affected)
    }

    /// Executes one run to a terminal status, regardless of its schedule.
    ///
    /// Terminal runs are left untouched and their status returned.
    #[instrument(skip(self))]
    pub async fn execute(&self, workflow_id: &str) -> Result<RunStatus, DurableError> {
        let run = self.load(workflow_id).await?;
        let status = RunStatus::parse(&run.status).unwrap_or(RunStatus::Pending);
        if status.is_terminal() {
            debug!(%status, "Workflow run already terminal");
            return Ok(status);
        }

        let run = if status == RunStatus::Pending {
            let now = Utc::now().fixed_offset();
            let attempts = run.attempts + 1;
            let mut active: workflow_run::ActiveModel = run.into();
            active.status = Set(RunStatus::Running.as_str().to_string());
            active.attempts = Set(attempts);
            active.started_at = Set(Some(now));
            active.updated_at = Set(now);
            active.update(&self.db).await?
        } else {
            run
        };

        self.run_claimed(run).await
    }

    /// Executes a run already marked `running` by [`Self::claim_due`].
    pub async fn run_claimed(&self, run: workflow_run::Model) -> Result<RunStatus, DurableError> {
        let args = WorkflowArgs {
            trigger_id: run.trigger_id,
            user_id: run.user_id,
            event_id: run.event_id,
            run_id: run.run_id,
            context: match &run.context {
                JsonValue::Object(map) => map.clone(),
                _ => Default::default(),
            },
            delay_seconds: 0,
        };
        let ctx = WorkflowContext::new(self.db.clone(), run.workflow_id.clone());

        let result =
            run_trigger_workflow(&ctx, Arc::clone(&self.activities), &args, &self.config).await;

        let now = Utc::now().fixed_offset();
        let mut active: workflow_run::ActiveModel = run.into();
        active.finished_at = Set(Some(now));
        active.updated_at = Set(now);

        let status = match result {
            Ok(outcome) => {
                active.status = Set(RunStatus::Completed.as_str().to_string());
                active.outcome = Set(Some(serde_json::to_value(&outcome)?));
                active.error = Set(None);
                info!(workflow_id = %ctx.workflow_id(), ?outcome, "Workflow run completed");
                RunStatus::Completed
            }
            Err(err) => {
                active.status = Set(RunStatus::Failed.as_str().to_string());
                active.error = Set(Some(err.to_string()));
                warn!(workflow_id = %ctx.workflow_id(), error = %err, "Workflow run failed");
                RunStatus::Failed
            }
        };
        active.update(&self.db).await?;

        counter!("triggers_workflow_runs_total", "status" => status.as_str()).increment(1);
        Ok(status)
    }

    async fn load(&self, workflow_id: &str) -> Result<workflow_run::Model, DurableError> {
        workflow_run::Entity::find_by_id(workflow_id.to_string())
            .one(&self.db)
            .await?
            .ok_or_else(|| DurableError::NotFound {
                workflow_id: workflow_id.to_string(),
            })
    }
}

#[async_trait]
impl WorkflowExecutor for DatabaseExecutor {
    async fn start(
        &self,
        workflow_id: &str,
        args: WorkflowArgs,
    ) -> Result<StartOutcome, DurableError> {
        if workflow_run::Entity::find_by_id(workflow_id.to_string())
            .one(&self.db)
            .await?
            .is_some()
        {
            debug!(workflow_id, "Workflow run already exists");
            return Ok(StartOutcome::AlreadyExists);
        }

        let now = Utc::now();
        let delay = i64::try_from(args.delay_seconds)
            .ok()
            .and_then(ChronoDuration::try_seconds)
            .unwrap_or_else(ChronoDuration::zero);
        let scheduled_at = (now + delay).fixed_offset();
        let now = now.fixed_offset();

        let row = workflow_run::ActiveModel {
            workflow_id: Set(workflow_id.to_string()),
            workflow_type: Set(WORKFLOW_TYPE.to_string()),
            trigger_id: Set(args.trigger_id),
            user_id: Set(args.user_id),
            event_id: Set(args.event_id),
            run_id: Set(args.run_id),
            context: Set(JsonValue::Object(args.context)),
            status: Set(RunStatus::Pending.as_str().to_string()),
            attempts: Set(0),
            scheduled_at: Set(scheduled_at),
            started_at: Set(None),
            finished_at: Set(None),
            outcome: Set(None),
            error: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        match row.insert(&self.db).await {
            Ok(_) => {
                info!(workflow_id, %scheduled_at, "Workflow run started");
                Ok(StartOutcome::Started)
            }
            Err(err) if is_unique_violation(&err) => {
                debug!(workflow_id, "Concurrent start absorbed by existing run");
                Ok(StartOutcome::AlreadyExists)
            }
            Err(err) => Err(err.into()),
        }
    }
}
