//! # Trigger kinds
//!
//! Conditions, actions and events are stored as a variant tag plus JSON
//! parameters. This module defines the capability traits each variant
//! implements and the [`KindRegistry`] that turns stored rows into trait
//! objects.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use sea_orm::{DatabaseConnection, DatabaseTransaction, DbErr, Select};
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use thiserror::Error;

use crate::models::{trigger_activity, user};

pub mod actions;
pub mod conditions;
pub mod events;
pub mod registry;
pub mod template;

pub use actions::SendMessageAction;
pub use conditions::{ActionCountCondition, ActionFrequencyCondition};
pub use events::{ContextMatchEvent, GenericEvent};
pub use registry::KindRegistry;

/// Keyword context carried from `fire` through handling into actions.
pub type Context = Map<String, JsonValue>;

/// Which polymorphic family a tag belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindFamily {
    Condition,
    Action,
    Event,
}

impl fmt::Display for KindFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KindFamily::Condition => "condition",
            KindFamily::Action => "action",
            KindFamily::Event => "event",
        };
        f.write_str(name)
    }
}

/// Errors raised while resolving a stored variant.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KindError {
    #[error("unknown {family} kind '{kind}'")]
    UnknownKind { family: KindFamily, kind: String },
    #[error("invalid params for {kind}: {message}")]
    InvalidParams { kind: String, message: String },
}

impl KindError {
    pub fn invalid(kind: &str, message: impl Into<String>) -> Self {
        Self::InvalidParams {
            kind: kind.to_string(),
            message: message.into(),
        }
    }
}

/// Error returned by [`ActionKind::perform`].
#[derive(Debug, Error)]
pub enum ActionError {
    /// Conditions held, but this run must not be counted. The ledger commits
    /// without advancing the activity row.
    #[error("action cancelled")]
    Cancelled,
    #[error("database error: {0}")]
    Database(#[from] DbErr),
    #[error("{message}")]
    Failed { message: String },
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl ActionError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

/// Per-trigger gate, usable both as a bulk query filter and an exact check.
///
/// `filter_users` may keep users that `is_satisfied` later rejects, but must
/// never drop a user that `is_satisfied` would accept.
#[async_trait]
pub trait ConditionKind: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Narrows the candidate query. Never adds users.
    fn filter_users(&self, trigger_id: i32, users: Select<user::Entity>) -> Select<user::Entity>;

    /// Exact check against the current stored state. No side effects.
    async fn is_satisfied(
        &self,
        db: &DatabaseConnection,
        trigger_id: i32,
        user: &user::Model,
    ) -> Result<bool, DbErr>;

    /// Re-check against the activity row while its lock is held. Kinds that
    /// do not read the ledger always admit.
    fn admits(&self, _activity: &trigger_activity::Model, _now: DateTime<FixedOffset>) -> bool {
        true
    }
}

/// Id of the first condition the locked `activity` no longer satisfies.
pub fn first_refusal<'a, I>(
    conditions: I,
    activity: &trigger_activity::Model,
    now: DateTime<FixedOffset>,
) -> Option<i32>
where
    I: IntoIterator<Item = (i32, &'a dyn ConditionKind)>,
{
    conditions
        .into_iter()
        .find(|(_, kind)| !kind.admits(activity, now))
        .map(|(id, _)| id)
}

/// Side effect performed when every condition passes.
#[async_trait]
pub trait ActionKind: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Runs inside the ledger transaction. Database writes made through `txn`
    /// roll back with the ledger if any action in the batch fails.
    async fn perform(
        &self,
        txn: &DatabaseTransaction,
        user: &user::Model,
        context: &Context,
    ) -> Result<(), ActionError>;
}

/// Occurrence type that starts evaluation.
#[async_trait]
pub trait EventKind: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Cheap context-only decision taken before any user filtering.
    fn should_be_fired(&self, _context: &Context) -> bool {
        true
    }

    /// Per-user context enrichment. The default adds a `user` object.
    async fn get_user_context(
        &self,
        _db: &DatabaseConnection,
        user: &user::Model,
        context: &Context,
    ) -> Result<Context, DbErr> {
        Ok(with_user(context, user))
    }
}

/// Copies `context` and inserts the `user` object templates refer to.
pub fn with_user(context: &Context, user: &user::Model) -> Context {
    let mut enriched = context.clone();
    enriched.insert(
        "user".to_string(),
        serde_json::json!({
            "id": user.id,
            "username": user.username,
            "email": user.email,
        }),
    );
    enriched
}
