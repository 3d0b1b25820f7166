use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::{EventHandler, FiredEvent, FiredListener, HandleOutcome};
use crate::audit::{AuditEntry, AuditSink, EntityType, Stage};
use crate::durable::{StartOutcome, WorkflowArgs, WorkflowExecutor, workflow_id};
use crate::error::TriggerError;

/// Handles each notification on the caller's task. Action errors reach the
/// code that called `fire`.
///
/// The event delay is waited once per `fire` call, before its first user.
#[derive(Clone)]
pub struct InlineListener {
    handler: Arc<EventHandler>,
    delayed_run: Arc<Mutex<Option<Uuid>>>,
}

impl InlineListener {
    pub fn new(handler: Arc<EventHandler>) -> Self {
        Self {
            handler,
            delayed_run: Arc::new(Mutex::new(None)),
        }
    }
}

#[async_trait]
impl FiredListener for InlineListener {
    async fn on_fired(&self, fired: FiredEvent) -> Result<(), TriggerError> {
        let delay = fired.delay();
        if !delay.is_zero() {
            let first_of_run = {
                let mut delayed = self.delayed_run.lock().await;
                delayed.replace(fired.run_id) != Some(fired.run_id)
            };
            if first_of_run {
                tokio::time::sleep(delay).await;
            }
        }
        match self.handler.handle(&fired).await? {
            HandleOutcome::Dropped => debug!(user_id = fired.user_id, "Inline event dropped"),
            HandleOutcome::Handled(outcome) => {
                debug!(user_id = fired.user_id, ?outcome, "Inline event handled")
            }
        }
        Ok(())
    }
}

/// Starts one durable workflow per notification under the deterministic
/// workflow id, so duplicate deliveries collapse into one run.
#[derive(Clone)]
pub struct DurableListener {
    executor: Arc<dyn WorkflowExecutor>,
    audit: Arc<dyn AuditSink>,
}

impl DurableListener {
    pub fn new(executor: Arc<dyn WorkflowExecutor>, audit: Arc<dyn AuditSink>) -> Self {
        Self { executor, audit }
    }
}

#[async_trait]
impl FiredListener for DurableListener {
    async fn on_fired(&self, fired: FiredEvent) -> Result<(), TriggerError> {
        let id = workflow_id(fired.trigger_id, fired.user_id, fired.event_id);
        let args = WorkflowArgs::from(&fired);
        let outcome = self.executor.start(&id, args).await?;

        let started = matches!(outcome, StartOutcome::Started);
        info!(workflow_id = %id, started, "Durable workflow requested");

        self.audit
            .log(
                AuditEntry::new(EntityType::Event, fired.event_id, "workflow", Stage::TaskCreated)
                    .trigger(fired.trigger_id)
                    .user(fired.user_id)
                    .result(started)
                    .details(json!({ "workflow_id": id }))
                    .run(Some(fired.run_id)),
            )
            .await;
        Ok(())
    }
}
