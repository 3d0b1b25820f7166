//! # Durable execution
//!
//! Crash-resilient re-expression of the trigger pipeline. A run is keyed by
//! the deterministic id `trigger-{trigger_id}-{user_id}-{event_id}` and made
//! of four checkpointed steps: fetch the definition, evaluate each condition,
//! perform each action, then advance the activity ledger. Completed steps
//! are replayed from their checkpoint instead of re-running.

use std::fmt;

use async_trait::async_trait;
use sea_orm::DbErr;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::dispatch::FiredEvent;
use crate::kinds::Context;

pub mod activities;
pub mod executor;
pub mod retry;
pub mod worker;
pub mod workflow;

pub use activities::{
    Descriptor, LoggedActivity, PerformOutcome, TriggerActivities, TriggerDefinition,
};
pub use executor::{DatabaseExecutor, WorkflowContext};
pub use retry::{RetryPolicy, StepOptions};
pub use worker::DurableWorker;
pub use workflow::{WorkflowOutcome, run_trigger_workflow};

/// Step key of the ledger step; its checkpoint is written by the step itself.
pub const LEDGER_STEP: &str = "log_activity";

/// Workflow type stored on every trigger run.
pub const WORKFLOW_TYPE: &str = "trigger_workflow";

/// Deduplication key for one logical occurrence.
pub fn workflow_id(trigger_id: i32, user_id: i32, event_id: i32) -> String {
    format!("trigger-{trigger_id}-{user_id}-{event_id}")
}

#[derive(Error, Debug)]
pub enum DurableError {
    #[error("step {step} failed after {attempts} attempts: {last_error}")]
    StepExhausted {
        step: String,
        attempts: u32,
        last_error: String,
    },

    #[error("step {step} timed out after {timeout_seconds}s on its final attempt")]
    StepTimeout { step: String, timeout_seconds: u64 },

    #[error("checkpoint serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("workflow store error: {0}")]
    Database(#[from] DbErr),

    #[error("workflow run {workflow_id} not found")]
    NotFound { workflow_id: String },
}

/// Lifecycle of a `workflow_runs` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(RunStatus::Pending),
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arguments a trigger run is started with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowArgs {
    pub trigger_id: i32,
    pub user_id: i32,
    pub event_id: i32,
    pub run_id: Uuid,
    pub context: Context,
    pub delay_seconds: u64,
}

impl From<&FiredEvent> for WorkflowArgs {
    fn from(fired: &FiredEvent) -> Self {
        Self {
            trigger_id: fired.trigger_id,
            user_id: fired.user_id,
            event_id: fired.event_id,
            run_id: fired.run_id,
            context: fired.context.clone(),
            delay_seconds: fired.delay_seconds,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A run with this id already exists in any status; nothing was created.
    AlreadyExists,
}

/// Starts durable runs. Starting an id that already exists must not create a
/// second logical execution.
#[async_trait]
pub trait WorkflowExecutor: Send + Sync {
    async fn start(&self, workflow_id: &str, args: WorkflowArgs)
    -> Result<StartOutcome, DurableError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_id_is_deterministic() {
        assert_eq!(workflow_id(7, 3, 42), "trigger-7-3-42");
        assert_eq!(workflow_id(7, 3, 42), workflow_id(7, 3, 42));
        assert_ne!(workflow_id(7, 3, 42), workflow_id(7, 42, 3));
    }

    #[test]
    fn run_status_round_trips_through_its_tag() {
        for status in [
            RunStatus::Pending,
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Failed,
        ] {
            assert_eq!(RunStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RunStatus::parse("paused"), None);
        assert!(RunStatus::Failed.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }
}
