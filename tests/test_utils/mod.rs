//! Test utilities for database testing.
//!
//! In-memory SQLite with every migration applied, plus builders for users,
//! triggers and a few action kinds that fail or cancel on demand.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use migration::{Migrator, MigratorTrait};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, Database, DatabaseConnection,
    DatabaseTransaction, EntityTrait, PaginatorTrait, QueryFilter, Set,
};
use serde_json::{Value as JsonValue, json};

use triggers::audit::{AuditSink, DbAuditLog, NoopAudit};
use triggers::engine::TriggerEngine;
use triggers::kinds::{ActionError, ActionKind, Context, KindRegistry};
use triggers::models::{message, trigger, trigger_event, user};
use triggers::repositories::{NewTrigger, TriggerRepository, UserRepository};

pub const FAIL_AFTER_WRITE: &str = "fail_after_write";
pub const CANCEL: &str = "cancel";
pub const COUNTING: &str = "counting";

/// Sets up an in-memory SQLite database with all migrations applied.
///
/// The pool holds a single connection so every query sees the same memory
/// database.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let db = Database::connect(options).await?;

    Migrator::up(&db, None).await?;

    Ok(db)
}

/// Stores a message, then fails.
pub struct FailAfterWriteAction;

#[async_trait]
impl ActionKind for FailAfterWriteAction {
    fn kind(&self) -> &'static str {
        FAIL_AFTER_WRITE
    }

    async fn perform(
        &self,
        txn: &DatabaseTransaction,
        user: &user::Model,
        _context: &Context,
    ) -> Result<(), ActionError> {
        message::ActiveModel {
            user_id: Set(user.id),
            text: Set("partial".to_string()),
            created_at: Set(Utc::now().fixed_offset()),
            ..Default::default()
        }
        .insert(txn)
        .await?;
        Err(ActionError::failed("downstream rejected the message"))
    }
}

/// Always signals the ledger cancel.
pub struct CancelAction;

#[async_trait]
impl ActionKind for CancelAction {
    fn kind(&self) -> &'static str {
        CANCEL
    }

    async fn perform(
        &self,
        _txn: &DatabaseTransaction,
        _user: &user::Model,
        _context: &Context,
    ) -> Result<(), ActionError> {
        Err(ActionError::Cancelled)
    }
}

/// Counts invocations and fails the first `failures` of them.
pub struct CountingAction {
    pub calls: Arc<AtomicUsize>,
    pub failures: usize,
}

#[async_trait]
impl ActionKind for CountingAction {
    fn kind(&self) -> &'static str {
        COUNTING
    }

    async fn perform(
        &self,
        _txn: &DatabaseTransaction,
        _user: &user::Model,
        _context: &Context,
    ) -> Result<(), ActionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(ActionError::failed(format!("transient failure {}", call + 1)));
        }
        Ok(())
    }
}

/// Built-in kinds plus the test actions above. `counting` fails its first
/// `failures` calls and records every call in `calls`.
pub fn test_registry(calls: Arc<AtomicUsize>, failures: usize) -> KindRegistry {
    let mut registry = KindRegistry::with_builtins();
    registry.register_action(FAIL_AFTER_WRITE, |_| Ok(Arc::new(FailAfterWriteAction)));
    registry.register_action(CANCEL, |_| Ok(Arc::new(CancelAction)));
    registry.register_action(COUNTING, move |_| {
        Ok(Arc::new(CountingAction {
            calls: Arc::clone(&calls),
            failures,
        }))
    });
    registry
}

/// Database, registry and engine wired together.
pub struct TestContext {
    pub db: DatabaseConnection,
    pub registry: Arc<KindRegistry>,
    pub engine: Arc<TriggerEngine>,
    pub calls: Arc<AtomicUsize>,
}

impl TestContext {
    pub async fn new() -> Result<Self> {
        Self::build(true, 0).await
    }

    pub async fn without_audit() -> Result<Self> {
        Self::build(false, 0).await
    }

    /// `counting` actions fail their first `failures` calls.
    pub async fn with_flaky_actions(failures: usize) -> Result<Self> {
        Self::build(true, failures).await
    }

    async fn build(audit_enabled: bool, failures: usize) -> Result<Self> {
        let db = setup_test_db().await?;
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(test_registry(Arc::clone(&calls), failures));
        let audit: Arc<dyn AuditSink> = if audit_enabled {
            Arc::new(DbAuditLog::new(db.clone()))
        } else {
            Arc::new(NoopAudit)
        };
        let engine = Arc::new(TriggerEngine::new(db.clone(), Arc::clone(&registry), audit));
        Ok(Self {
            db,
            registry,
            engine,
            calls,
        })
    }

    pub fn triggers(&self) -> TriggerRepository<'_> {
        TriggerRepository::new(&self.db, &self.registry)
    }

    pub async fn user(&self, username: &str) -> Result<user::Model> {
        Ok(UserRepository::new(&self.db)
            .create(username, Some(&format!("{username}@example.com")))
            .await?)
    }

    /// Enabled trigger with a `generic` event and the given actions and
    /// conditions, attached in order.
    pub async fn trigger(
        &self,
        name: &str,
        conditions: &[(&str, JsonValue)],
        actions: &[(&str, JsonValue)],
    ) -> Result<(trigger::Model, trigger_event::Model)> {
        let repo = self.triggers();
        let trigger = repo.create(NewTrigger::enabled(name)).await?;
        for (kind, params) in conditions {
            repo.add_condition(trigger.id, kind, params.clone()).await?;
        }
        for (kind, params) in actions {
            repo.add_action(trigger.id, kind, params.clone()).await?;
        }
        let event = repo.add_event(trigger.id, "generic", json!({}), 0).await?;
        Ok((trigger, event))
    }

    /// Trigger sending one templated message, limited to `limit` runs per user.
    pub async fn welcome_trigger(
        &self,
        name: &str,
        limit: i32,
    ) -> Result<(trigger::Model, trigger_event::Model)> {
        self.trigger(
            name,
            &[("action_count", json!({ "limit": limit }))],
            &[("send_message", json!({ "text": "Hello {{ user.username }}" }))],
        )
        .await
    }

    pub async fn messages_for(&self, user_id: i32) -> Result<Vec<message::Model>> {
        Ok(message::Entity::find()
            .filter(message::Column::UserId.eq(user_id))
            .all(&self.db)
            .await?)
    }

    pub async fn message_count(&self) -> Result<u64> {
        Ok(message::Entity::find().count(&self.db).await?)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}
