//! The trigger workflow: fetch, evaluate, perform, log.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{info, instrument};
use uuid::Uuid;

use super::{
    DurableError, LEDGER_STEP, LoggedActivity, PerformOutcome, StepOptions, TriggerActivities,
    TriggerDefinition, WorkflowArgs, WorkflowContext,
};
use crate::config::DurableConfig;
use crate::kinds::Context;

/// Terminal result of a run that did not fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WorkflowOutcome {
    /// Trigger missing, disabled or without actions.
    Disabled,
    ConditionFailed {
        condition_id: i32,
    },
    /// At least one action cancelled; the ledger was not advanced.
    Cancelled {
        action_ids: Vec<i32>,
    },
    Completed {
        actions_performed: usize,
        action_count: i32,
    },
}

/// Runs the four-step pipeline for `args` under `ctx`.
///
/// Perform steps are all awaited before any error is surfaced; the ledger
/// step only runs when every action performed.
#[instrument(skip_all, fields(
    workflow_id = %ctx.workflow_id(),
    trigger_id = args.trigger_id,
    user_id = args.user_id
))]
pub async fn run_trigger_workflow(
    ctx: &WorkflowContext,
    activities: Arc<TriggerActivities>,
    args: &WorkflowArgs,
    config: &DurableConfig,
) -> Result<WorkflowOutcome, DurableError> {
    let trigger_id = args.trigger_id;
    let user_id = args.user_id;
    let run_id = args.run_id;

    let definition = {
        let activities = Arc::clone(&activities);
        ctx.step(
            "fetch_definition",
            &StepOptions::fetch_definition(config),
            move || {
                let activities = Arc::clone(&activities);
                async move { activities.fetch_definition(trigger_id).await }
            },
        )
        .await?
    };

    let Some(definition) = definition.filter(TriggerDefinition::is_active) else {
        info!("Trigger missing or inactive, stopping run");
        return Ok(WorkflowOutcome::Disabled);
    };

    let condition_options = StepOptions::evaluate_condition(config);
    for condition in &definition.conditions {
        let condition_id = condition.id;
        let activities = Arc::clone(&activities);
        let satisfied: bool = ctx
            .step(
                &format!("evaluate_condition:{condition_id}"),
                &condition_options,
                move || {
                    let activities = Arc::clone(&activities);
                    async move {
                        activities
                            .evaluate_condition(trigger_id, condition_id, user_id, run_id)
                            .await
                    }
                },
            )
            .await?;

        if !satisfied {
            info!(condition_id, "Condition not satisfied, stopping run");
            return Ok(WorkflowOutcome::ConditionFailed { condition_id });
        }
    }

    let results = if config.parallel_actions {
        perform_parallel(ctx, &activities, &definition, args, config).await?
    } else {
        perform_sequential(ctx, &activities, &definition, args, config).await
    };

    let mut performed = 0usize;
    let mut cancelled = Vec::new();
    let mut first_error = None;
    for (action_id, result) in results {
        match result {
            Ok(PerformOutcome::Performed) => performed += 1,
            Ok(PerformOutcome::Cancelled) => cancelled.push(action_id),
            Err(err) => {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
    }

    if let Some(err) = first_error {
        return Err(err);
    }
    if !cancelled.is_empty() {
        info!(?cancelled, "Actions cancelled, ledger not advanced");
        return Ok(WorkflowOutcome::Cancelled {
            action_ids: cancelled,
        });
    }

    let logged: LoggedActivity = {
        let activities = Arc::clone(&activities);
        let workflow_id = ctx.workflow_id().to_string();
        ctx.step(
            LEDGER_STEP,
            &StepOptions::log_activity(config),
            move || {
                let activities = Arc::clone(&activities);
                let workflow_id = workflow_id.clone();
                async move {
                    activities
                        .log_activity(&workflow_id, trigger_id, user_id, run_id)
                        .await
                }
            },
        )
        .await?
    };

    match logged {
        LoggedActivity::Counted { action_count } => Ok(WorkflowOutcome::Completed {
            actions_performed: performed,
            action_count,
        }),
        LoggedActivity::Refused { condition_id } => {
            info!(condition_id, "Condition no longer satisfied at the ledger");
            Ok(WorkflowOutcome::ConditionFailed { condition_id })
        }
    }
}

type PerformResult = (i32, Result<PerformOutcome, DurableError>);

async fn perform_parallel(
    ctx: &WorkflowContext,
    activities: &Arc<TriggerActivities>,
    definition: &TriggerDefinition,
    args: &WorkflowArgs,
    config: &DurableConfig,
) -> Result<Vec<PerformResult>, DurableError> {
    let options = StepOptions::perform_action(config);
    let mut tasks = JoinSet::new();

    for (index, action) in definition.actions.iter().enumerate() {
        let ctx = ctx.clone();
        let activities = Arc::clone(activities);
        let context = args.context.clone();
        let (action_id, user_id, event_id, run_id) =
            (action.id, args.user_id, args.event_id, args.run_id);

        tasks.spawn(async move {
            let result = perform_step(
                &ctx, activities, action_id, user_id, event_id, context, run_id, &options,
            )
            .await;
            (index, action_id, result)
        });
    }

    let mut collected = Vec::with_capacity(definition.actions.len());
    let mut join_failure = None;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(entry) => collected.push(entry),
            Err(join_err) => {
                join_failure.get_or_insert(join_err.to_string());
            }
        }
    }

    if let Some(last_error) = join_failure {
        return Err(DurableError::StepExhausted {
            step: "perform_action".to_string(),
            attempts: 1,
            last_error,
        });
    }

    collected.sort_by_key(|(index, _, _)| *index);
    Ok(collected
        .into_iter()
        .map(|(_, action_id, result)| (action_id, result))
        .collect())
}

async fn perform_sequential(
    ctx: &WorkflowContext,
    activities: &Arc<TriggerActivities>,
    definition: &TriggerDefinition,
    args: &WorkflowArgs,
    config: &DurableConfig,
) -> Vec<PerformResult> {
    let options = StepOptions::perform_action(config);
    let mut results = Vec::with_capacity(definition.actions.len());

    for action in &definition.actions {
        let result = perform_step(
            ctx,
            Arc::clone(activities),
            action.id,
            args.user_id,
            args.event_id,
            args.context.clone(),
            args.run_id,
            &options,
        )
        .await;
        let failed = result.is_err();
        results.push((action.id, result));
        if failed {
            break;
        }
    }
    results
}

#[allow(clippy::too_many_arguments)]
async fn perform_step(
    ctx: &WorkflowContext,
    activities: Arc<TriggerActivities>,
    action_id: i32,
    user_id: i32,
    event_id: i32,
    context: Context,
    run_id: Uuid,
    options: &StepOptions,
) -> Result<PerformOutcome, DurableError> {
    ctx.step(&format!("perform_action:{action_id}"), options, move || {
        let activities = Arc::clone(&activities);
        let context = context.clone();
        async move {
            activities
                .perform_action(action_id, user_id, event_id, context, run_id)
                .await
        }
    })
    .await
}
