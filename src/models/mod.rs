//! # Data Models
//!
//! SeaORM entities for triggers, their children, the activity ledger, the
//! audit log and durable workflow bookkeeping.

pub mod message;
pub mod trigger;
pub mod trigger_action;
pub mod trigger_activity;
pub mod trigger_condition;
pub mod trigger_event;
pub mod trigger_log;
pub mod user;
pub mod workflow_run;
pub mod workflow_step;

pub use message::Entity as Message;
pub use trigger::Entity as Trigger;
pub use trigger_action::Entity as TriggerAction;
pub use trigger_activity::Entity as TriggerActivity;
pub use trigger_condition::Entity as TriggerCondition;
pub use trigger_event::Entity as TriggerEvent;
pub use trigger_log::Entity as TriggerLog;
pub use user::Entity as User;
pub use workflow_run::Entity as WorkflowRun;
pub use workflow_step::Entity as WorkflowStep;
