mod test_utils;

use std::sync::Arc;

use chrono::Utc;
use sea_orm::{ActiveModelTrait, EntityTrait, IntoActiveModel, Set};
use serde_json::json;

use test_utils::{CANCEL, COUNTING, TestContext};
use triggers::config::DurableConfig;
use triggers::durable::{
    DatabaseExecutor, DurableWorker, LoggedActivity, RunStatus, StartOutcome, TriggerActivities,
    WorkflowArgs, WorkflowExecutor, WorkflowOutcome, workflow_id,
};
use triggers::kinds::Context;
use triggers::models::{trigger, trigger_event, user, workflow_run};
use triggers::repositories::{ActivityRepository, WorkflowRunRepository};

fn fast_config() -> DurableConfig {
    DurableConfig {
        activity_retry_interval_seconds: 0,
        max_activity_retries: 2,
        ..Default::default()
    }
}

fn executor(ctx: &TestContext, config: DurableConfig) -> DatabaseExecutor {
    let activities = Arc::new(TriggerActivities::new(Arc::clone(&ctx.engine)));
    DatabaseExecutor::new(ctx.db.clone(), activities, config)
}

fn args(
    trigger: &trigger::Model,
    user: &user::Model,
    event: &trigger_event::Model,
    delay_seconds: u64,
) -> WorkflowArgs {
    WorkflowArgs {
        trigger_id: trigger.id,
        user_id: user.id,
        event_id: event.id,
        run_id: uuid::Uuid::new_v4(),
        context: Context::new(),
        delay_seconds,
    }
}

/// Starts a run for (trigger, user, event) and returns its workflow id.
async fn start(
    executor: &DatabaseExecutor,
    trigger: &trigger::Model,
    user: &user::Model,
    event: &trigger_event::Model,
) -> String {
    let id = workflow_id(trigger.id, user.id, event.id);
    let outcome = executor
        .start(&id, args(trigger, user, event, 0))
        .await
        .unwrap();
    assert_eq!(outcome, StartOutcome::Started);
    id
}

async fn outcome_of(ctx: &TestContext, id: &str) -> WorkflowOutcome {
    let run = WorkflowRunRepository::new(&ctx.db)
        .get(id)
        .await
        .unwrap()
        .expect("run exists");
    serde_json::from_value(run.outcome.expect("completed run stores its outcome")).unwrap()
}

async fn step_keys(ctx: &TestContext, id: &str) -> Vec<String> {
    WorkflowRunRepository::new(&ctx.db)
        .steps(id)
        .await
        .unwrap()
        .into_iter()
        .map(|step| step.step_key)
        .collect()
}

#[tokio::test]
async fn duplicate_start_is_absorbed() {
    let ctx = TestContext::new().await.unwrap();
    let user = ctx.user("ada").await.unwrap();
    let (trigger, event) = ctx.welcome_trigger("welcome", 1).await.unwrap();
    let executor = executor(&ctx, fast_config());

    let id = start(&executor, &trigger, &user, &event).await;
    let again = executor
        .start(&id, args(&trigger, &user, &event, 0))
        .await
        .unwrap();
    assert_eq!(again, StartOutcome::AlreadyExists);

    let run = WorkflowRunRepository::new(&ctx.db)
        .get(&id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run.status, RunStatus::Pending.as_str());
    assert_eq!(run.attempts, 0);
}

#[tokio::test]
async fn happy_path_checkpoints_every_step() {
    let ctx = TestContext::new().await.unwrap();
    let user = ctx.user("ada").await.unwrap();
    let (trigger, event) = ctx.welcome_trigger("welcome", 1).await.unwrap();
    let executor = executor(&ctx, fast_config());
    let id = start(&executor, &trigger, &user, &event).await;

    assert_eq!(executor.execute(&id).await.unwrap(), RunStatus::Completed);

    assert_eq!(
        outcome_of(&ctx, &id).await,
        WorkflowOutcome::Completed {
            actions_performed: 1,
            action_count: 1
        }
    );
    let keys = step_keys(&ctx, &id).await;
    assert_eq!(keys.len(), 4);
    assert_eq!(keys[0], "fetch_definition");
    assert!(keys[1].starts_with("evaluate_condition:"));
    assert!(keys[2].starts_with("perform_action:"));
    assert_eq!(keys[3], "log_activity");

    let messages = ctx.messages_for(user.id).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].text, "Hello ada");

    // Terminal runs are not executed again.
    assert_eq!(executor.execute(&id).await.unwrap(), RunStatus::Completed);
    assert_eq!(ctx.message_count().await.unwrap(), 1);
}

#[tokio::test]
async fn unsatisfied_condition_stops_the_run() {
    let ctx = TestContext::new().await.unwrap();
    let user = ctx.user("ada").await.unwrap();
    let (trigger, event) = ctx.welcome_trigger("welcome", 1).await.unwrap();
    let loaded = ctx.engine.load(trigger.id).await.unwrap();
    ctx.engine
        .on_event(&loaded, &user, &Context::new(), None)
        .await
        .unwrap();

    let executor = executor(&ctx, fast_config());
    let id = start(&executor, &trigger, &user, &event).await;
    assert_eq!(executor.execute(&id).await.unwrap(), RunStatus::Completed);

    assert_eq!(
        outcome_of(&ctx, &id).await,
        WorkflowOutcome::ConditionFailed {
            condition_id: loaded.conditions[0].model.id
        }
    );
    assert_eq!(step_keys(&ctx, &id).await.len(), 2);
    assert_eq!(ctx.message_count().await.unwrap(), 1);
}

#[tokio::test]
async fn disabled_trigger_only_fetches_the_definition() {
    let ctx = TestContext::new().await.unwrap();
    let user = ctx.user("ada").await.unwrap();
    let (trigger, event) = ctx.welcome_trigger("welcome", 1).await.unwrap();
    ctx.triggers().set_enabled(trigger.id, false).await.unwrap();

    let executor = executor(&ctx, fast_config());
    let id = start(&executor, &trigger, &user, &event).await;
    assert_eq!(executor.execute(&id).await.unwrap(), RunStatus::Completed);

    assert_eq!(outcome_of(&ctx, &id).await, WorkflowOutcome::Disabled);
    assert_eq!(step_keys(&ctx, &id).await, vec!["fetch_definition".to_string()]);
}

#[tokio::test]
async fn exhausted_action_fails_the_run_without_touching_the_ledger() {
    let ctx = TestContext::with_flaky_actions(5).await.unwrap();
    let user = ctx.user("ada").await.unwrap();
    let (trigger, event) = ctx
        .trigger("flaky", &[], &[(COUNTING, json!({}))])
        .await
        .unwrap();
    let executor = executor(&ctx, fast_config());
    let id = start(&executor, &trigger, &user, &event).await;

    assert_eq!(executor.execute(&id).await.unwrap(), RunStatus::Failed);
    assert_eq!(ctx.calls(), 2);

    let run = WorkflowRunRepository::new(&ctx.db)
        .get(&id)
        .await
        .unwrap()
        .unwrap();
    assert!(run.error.unwrap().contains("perform_action"));
    assert!(!step_keys(&ctx, &id).await.contains(&"log_activity".to_string()));
    assert!(
        ActivityRepository::new(&ctx.db)
            .find(trigger.id, user.id)
            .await
            .unwrap()
            .is_none()
    );

    let failed = WorkflowRunRepository::new(&ctx.db)
        .list_failed(10)
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].workflow_id, id);
}

#[tokio::test]
async fn transient_action_failure_is_retried() {
    let ctx = TestContext::with_flaky_actions(1).await.unwrap();
    let user = ctx.user("ada").await.unwrap();
    let (trigger, event) = ctx
        .trigger("flaky", &[], &[(COUNTING, json!({}))])
        .await
        .unwrap();
    let executor = executor(&ctx, fast_config());
    let id = start(&executor, &trigger, &user, &event).await;

    assert_eq!(executor.execute(&id).await.unwrap(), RunStatus::Completed);
    assert_eq!(ctx.calls(), 2);
    assert_eq!(
        ActivityRepository::new(&ctx.db)
            .action_count(trigger.id, user.id)
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn replay_skips_completed_steps() {
    let ctx = TestContext::new().await.unwrap();
    let user = ctx.user("ada").await.unwrap();
    let (trigger, event) = ctx
        .trigger("counted", &[], &[(COUNTING, json!({}))])
        .await
        .unwrap();
    let executor = executor(&ctx, fast_config());
    let id = start(&executor, &trigger, &user, &event).await;
    assert_eq!(executor.execute(&id).await.unwrap(), RunStatus::Completed);
    assert_eq!(ctx.calls(), 1);

    // Simulate a worker that crashed after the last checkpoint.
    let run = WorkflowRunRepository::new(&ctx.db)
        .get(&id)
        .await
        .unwrap()
        .unwrap();
    let mut active = run.into_active_model();
    active.status = Set(RunStatus::Running.as_str().to_string());
    active.finished_at = Set(None);
    active.updated_at = Set(Utc::now().fixed_offset());
    active.update(&ctx.db).await.unwrap();

    assert_eq!(executor.resume_interrupted().await.unwrap(), 1);
    assert_eq!(executor.execute(&id).await.unwrap(), RunStatus::Completed);

    assert_eq!(ctx.calls(), 1);
    assert_eq!(
        ActivityRepository::new(&ctx.db)
            .action_count(trigger.id, user.id)
            .await
            .unwrap(),
        1
    );
    let run = WorkflowRunRepository::new(&ctx.db)
        .get(&id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run.attempts, 2);
}

#[tokio::test]
async fn cancelled_action_skips_the_ledger_step() {
    let ctx = TestContext::new().await.unwrap();
    let user = ctx.user("ada").await.unwrap();
    let (trigger, event) = ctx
        .trigger(
            "cancellable",
            &[],
            &[("send_message", json!({ "text": "hi" })), (CANCEL, json!({}))],
        )
        .await
        .unwrap();
    let loaded = ctx.engine.load(trigger.id).await.unwrap();
    let cancel_id = loaded.actions[1].model.id;

    let executor = executor(&ctx, fast_config());
    let id = start(&executor, &trigger, &user, &event).await;
    assert_eq!(executor.execute(&id).await.unwrap(), RunStatus::Completed);

    assert_eq!(
        outcome_of(&ctx, &id).await,
        WorkflowOutcome::Cancelled {
            action_ids: vec![cancel_id]
        }
    );
    assert!(!step_keys(&ctx, &id).await.contains(&"log_activity".to_string()));
    assert_eq!(
        ActivityRepository::new(&ctx.db)
            .action_count(trigger.id, user.id)
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn sequential_mode_stops_at_the_first_failure() {
    let ctx = TestContext::with_flaky_actions(5).await.unwrap();
    let user = ctx.user("ada").await.unwrap();
    let (trigger, event) = ctx
        .trigger(
            "ordered",
            &[],
            &[(COUNTING, json!({})), ("send_message", json!({ "text": "never" }))],
        )
        .await
        .unwrap();
    let config = DurableConfig {
        parallel_actions: false,
        ..fast_config()
    };
    let executor = executor(&ctx, config);
    let id = start(&executor, &trigger, &user, &event).await;

    assert_eq!(executor.execute(&id).await.unwrap(), RunStatus::Failed);
    assert_eq!(ctx.message_count().await.unwrap(), 0);
    let keys = step_keys(&ctx, &id).await;
    assert_eq!(
        keys.iter()
            .filter(|key| key.starts_with("perform_action:"))
            .count(),
        1
    );
}

#[tokio::test]
async fn claim_due_respects_the_schedule() {
    let ctx = TestContext::new().await.unwrap();
    let ada = ctx.user("ada").await.unwrap();
    let grace = ctx.user("grace").await.unwrap();
    let (trigger, event) = ctx.welcome_trigger("welcome", 1).await.unwrap();
    let executor = executor(&ctx, fast_config());

    let due = start(&executor, &trigger, &ada, &event).await;
    let later = workflow_id(trigger.id, grace.id, event.id);
    executor
        .start(&later, args(&trigger, &grace, &event, 3600))
        .await
        .unwrap();

    let claimed = executor.claim_due(10).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].workflow_id, due);
    assert_eq!(claimed[0].status, RunStatus::Running.as_str());
    assert_eq!(claimed[0].attempts, 1);

    assert!(executor.claim_due(10).await.unwrap().is_empty());

    let pending = workflow_run::Entity::find_by_id(later.clone())
        .one(&ctx.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pending.status, RunStatus::Pending.as_str());
}

#[tokio::test]
async fn worker_tick_executes_due_runs() {
    let ctx = TestContext::new().await.unwrap();
    let ada = ctx.user("ada").await.unwrap();
    let grace = ctx.user("grace").await.unwrap();
    let (trigger, event) = ctx.welcome_trigger("welcome", 1).await.unwrap();
    let executor = Arc::new(executor(&ctx, fast_config()));

    let first = start(&executor, &trigger, &ada, &event).await;
    let second = start(&executor, &trigger, &grace, &event).await;

    let worker = DurableWorker::new(Arc::clone(&executor));
    assert_eq!(worker.tick(10).await.unwrap(), 2);
    assert_eq!(worker.tick(10).await.unwrap(), 0);

    for id in [first, second] {
        let run = WorkflowRunRepository::new(&ctx.db)
            .get(&id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(run.status, RunStatus::Completed.as_str());
    }
    assert_eq!(ctx.message_count().await.unwrap(), 2);
}

#[tokio::test]
async fn execute_unknown_run_is_not_found() {
    let ctx = TestContext::new().await.unwrap();
    let executor = executor(&ctx, fast_config());
    assert!(executor.execute("trigger-1-2-3").await.is_err());
}

#[tokio::test]
async fn concurrent_runs_for_distinct_events_count_once() {
    let ctx = TestContext::new().await.unwrap();
    let user = ctx.user("ada").await.unwrap();
    let (trigger, first_event) = ctx.welcome_trigger("welcome", 1).await.unwrap();
    let second_event = ctx
        .triggers()
        .add_event(trigger.id, "generic", json!({}), 0)
        .await
        .unwrap();
    let condition_id = ctx.engine.load(trigger.id).await.unwrap().conditions[0]
        .model
        .id;
    let executor = executor(&ctx, fast_config());
    let first = start(&executor, &trigger, &user, &first_event).await;
    let second = start(&executor, &trigger, &user, &second_event).await;

    let (a, b) = tokio::join!(executor.execute(&first), executor.execute(&second));
    assert_eq!(a.unwrap(), RunStatus::Completed);
    assert_eq!(b.unwrap(), RunStatus::Completed);

    let outcomes = [outcome_of(&ctx, &first).await, outcome_of(&ctx, &second).await];
    let completed = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, WorkflowOutcome::Completed { .. }))
        .count();
    assert_eq!(completed, 1);
    assert!(outcomes.contains(&WorkflowOutcome::ConditionFailed { condition_id }));
    assert_eq!(
        ActivityRepository::new(&ctx.db)
            .action_count(trigger.id, user.id)
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn ledger_step_refuses_a_user_at_the_limit() {
    let ctx = TestContext::new().await.unwrap();
    let user = ctx.user("ada").await.unwrap();
    let (trigger, event) = ctx.welcome_trigger("welcome", 1).await.unwrap();
    let condition_id = ctx.engine.load(trigger.id).await.unwrap().conditions[0]
        .model
        .id;
    let executor = executor(&ctx, fast_config());
    let id = start(&executor, &trigger, &user, &event).await;
    ctx.engine
        .ledger()
        .lock(trigger.id, user.id, |_txn, _activity| Box::pin(async { Ok(()) }))
        .await
        .unwrap();

    let activities = TriggerActivities::new(Arc::clone(&ctx.engine));
    let logged = activities
        .log_activity(&id, trigger.id, user.id, uuid::Uuid::new_v4())
        .await
        .unwrap();

    assert_eq!(logged, LoggedActivity::Refused { condition_id });
    assert_eq!(
        ActivityRepository::new(&ctx.db)
            .action_count(trigger.id, user.id)
            .await
            .unwrap(),
        1
    );
    assert!(step_keys(&ctx, &id).await.is_empty());
}

#[tokio::test]
async fn ledger_step_retry_after_a_landed_commit_counts_once() {
    let ctx = TestContext::new().await.unwrap();
    let user = ctx.user("ada").await.unwrap();
    let (trigger, event) = ctx.welcome_trigger("welcome", 5).await.unwrap();
    let executor = executor(&ctx, fast_config());
    let id = start(&executor, &trigger, &user, &event).await;
    let activities = TriggerActivities::new(Arc::clone(&ctx.engine));
    let run_id = uuid::Uuid::new_v4();

    let first = activities
        .log_activity(&id, trigger.id, user.id, run_id)
        .await
        .unwrap();
    // Same run, second attempt: the checkpoint committed with the counter.
    let retried = activities
        .log_activity(&id, trigger.id, user.id, run_id)
        .await
        .unwrap();

    assert_eq!(first, LoggedActivity::Counted { action_count: 1 });
    assert_eq!(retried, first);
    assert_eq!(
        ActivityRepository::new(&ctx.db)
            .action_count(trigger.id, user.id)
            .await
            .unwrap(),
        1
    );
    assert_eq!(step_keys(&ctx, &id).await, vec!["log_activity".to_string()]);
}
