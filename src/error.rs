//! # Error Handling
//!
//! Crate-wide error taxonomy for the trigger engine. Gate failures, inactive
//! triggers and ledger cancellations are ordinary outcomes and never appear
//! here; only faults do.

use thiserror::Error;

use crate::config::ConfigError;
use crate::durable::DurableError;
use crate::kinds::{ActionError, KindError};

/// Errors surfaced by the engine, dispatcher and repositories.
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error(transparent)]
    Kind(#[from] KindError),

    /// An action raised inside the ledger scope; the ledger was rolled back.
    #[error("action {action_id} failed: {source}")]
    Action {
        action_id: i32,
        #[source]
        source: ActionError,
    },

    #[error(transparent)]
    Durable(#[from] DurableError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("dispatch queue is closed")]
    QueueClosed,
}

impl TriggerError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Returns the action error when this is an action failure.
    pub fn as_action_error(&self) -> Option<&ActionError> {
        match self {
            Self::Action { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Returns true when the database rejected a write because of a unique constraint.
pub fn is_unique_violation(error: &sea_orm::DbErr) -> bool {
    use sea_orm::RuntimeErr;

    const PG_UNIQUE: &str = "23505";
    const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

    let runtime_err = match error {
        sea_orm::DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | sea_orm::DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    let Some(db_error) = runtime_err.as_database_error() else {
        return false;
    };

    if db_error.is_unique_violation() {
        return true;
    }

    if let Some(code) = db_error.code() {
        let code_str = code.as_ref();
        return code_str == PG_UNIQUE || SQLITE_DUPLICATE_CODES.contains(&code_str);
    }

    false
}
