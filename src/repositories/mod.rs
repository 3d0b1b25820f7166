//! # Repository Layer
//!
//! Thin SeaORM wrappers used by configuration tooling, the CLI and tests to
//! create trigger definitions and inspect ledger, audit and workflow state.

pub mod activity;
pub mod trigger;
pub mod trigger_log;
pub mod user;
pub mod workflow_run;

pub use activity::ActivityRepository;
pub use trigger::{NewTrigger, TriggerRepository};
pub use trigger_log::TriggerLogRepository;
pub use user::UserRepository;
pub use workflow_run::WorkflowRunRepository;
