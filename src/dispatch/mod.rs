//! # Event dispatch
//!
//! [`Dispatcher::fire`] decides whether an event fires, narrows the candidate
//! users through the owning trigger and emits one [`FiredEvent`] per
//! surviving user to every registered [`FiredListener`]. Listeners decide how
//! the per-user continuation ([`EventHandler::handle`]) runs: inline, through
//! the in-process queue, or as a durable workflow.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Select,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::audit::{AuditEntry, EntityType, Stage};
use crate::config::{AppConfig, ConfigError, ExecutionStrategy};
use crate::durable::WorkflowExecutor;
use crate::engine::TriggerEngine;
use crate::error::TriggerError;
use crate::kinds::Context;
use crate::models::{trigger_event, user};

pub mod handler;
pub mod listeners;
pub mod queue;

pub use handler::{EventHandler, HandleOutcome};
pub use listeners::{DurableListener, InlineListener};
pub use queue::{QueueStats, QueueWorker, QueuedListener, queue};

/// Per-user notification emitted by `fire`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiredEvent {
    pub event_id: i32,
    pub trigger_id: i32,
    pub user_id: i32,
    pub context: Context,
    /// Audit correlation id shared by every user of one `fire` call
    pub run_id: Uuid,
    pub delay_seconds: u64,
}

impl FiredEvent {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_seconds)
    }
}

/// Receives fired notifications. Delivery is at-least-once; handlers rely on
/// the activity ledger for idempotence.
#[async_trait]
pub trait FiredListener: Send + Sync {
    async fn on_fired(&self, fired: FiredEvent) -> Result<(), TriggerError>;
}

/// Summary of one `fire` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FireReport {
    pub run_id: Uuid,
    /// False when `should_be_fired` rejected the context
    pub fired: bool,
    pub dispatched: u64,
}

/// Entry point for domain code reporting that an event occurred.
#[derive(Clone)]
pub struct Dispatcher {
    engine: Arc<TriggerEngine>,
    listeners: Vec<Arc<dyn FiredListener>>,
    batch_size: u64,
}

impl Dispatcher {
    pub fn new(engine: Arc<TriggerEngine>, batch_size: u64) -> Self {
        Self {
            engine,
            listeners: Vec::new(),
            batch_size: batch_size.max(1),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn FiredListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Wires the listener matching `strategy`. The queued strategy also
    /// returns the worker that must be run to drain the queue.
    pub fn from_strategy(
        strategy: ExecutionStrategy,
        engine: Arc<TriggerEngine>,
        config: &AppConfig,
        executor: Option<Arc<dyn WorkflowExecutor>>,
    ) -> Result<(Self, Option<QueueWorker>), TriggerError> {
        let dispatcher = Self::new(Arc::clone(&engine), config.dispatch_batch_size);
        let handler = Arc::new(EventHandler::new(Arc::clone(&engine)));

        match strategy {
            ExecutionStrategy::Inline => Ok((
                dispatcher.with_listener(Arc::new(InlineListener::new(handler))),
                None,
            )),
            ExecutionStrategy::Queued => {
                let (listener, worker) =
                    queue(config.queue_capacity, handler, Arc::clone(engine.audit()));
                Ok((dispatcher.with_listener(Arc::new(listener)), Some(worker)))
            }
            ExecutionStrategy::Durable => {
                let executor = executor.ok_or_else(|| {
                    TriggerError::Config(ConfigError::InvalidValue {
                        field: "EXECUTION_STRATEGY",
                        message: "durable strategy requires a workflow executor".to_string(),
                    })
                })?;
                let listener = DurableListener::new(executor, Arc::clone(engine.audit()));
                Ok((dispatcher.with_listener(Arc::new(listener)), None))
            }
        }
    }

    fn db(&self) -> &DatabaseConnection {
        self.engine.db()
    }

    /// Fires `event_id` for every candidate that survives the trigger filter.
    ///
    /// Surviving ids are read in keyset pages of `batch_size`, so no
    /// connection is held while listeners run.
    #[instrument(skip(self, candidates, context), fields(run_id))]
    pub async fn fire(
        &self,
        event_id: i32,
        candidates: Select<user::Entity>,
        context: Context,
    ) -> Result<FireReport, TriggerError> {
        let event = trigger_event::Entity::find_by_id(event_id)
            .one(self.db())
            .await?
            .ok_or_else(|| TriggerError::not_found("trigger_event", event_id))?;
        let kind = self.engine.registry().event(&event.kind, &event.params)?;
        let audit = self.engine.audit();

        let run_id = Uuid::new_v4();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));

        audit
            .log(
                event_entry(&event, Stage::Fire)
                    .details(json!({ "context": context }))
                    .run(Some(run_id)),
            )
            .await;

        let should_fire = kind.should_be_fired(&context);
        audit
            .log(
                event_entry(&event, Stage::ShouldBeFired)
                    .result(should_fire)
                    .run(Some(run_id)),
            )
            .await;

        if !should_fire {
            debug!(event_id, "Event rejected by should_be_fired");
            return Ok(FireReport {
                run_id,
                fired: false,
                dispatched: 0,
            });
        }

        let trigger = self.engine.load(event.trigger_id).await?;
        let filtered = self
            .engine
            .filter_user_query(&trigger, candidates, Some(run_id))
            .await?;

        let mut dispatched = 0u64;
        let mut last_id: Option<i32> = None;

        loop {
            let mut page = filtered.clone();
            if let Some(last) = last_id {
                page = page.filter(user::Column::Id.gt(last));
            }
            let ids: Vec<i32> = page
                .select_only()
                .column(user::Column::Id)
                .order_by_asc(user::Column::Id)
                .limit(self.batch_size)
                .into_tuple()
                .all(self.db())
                .await?;

            let Some(&page_last) = ids.last() else {
                break;
            };
            let page_len = ids.len() as u64;
            last_id = Some(page_last);

            for user_id in ids {
                let fired = FiredEvent {
                    event_id: event.id,
                    trigger_id: event.trigger_id,
                    user_id,
                    context: context.clone(),
                    run_id,
                    delay_seconds: event.delay().as_secs(),
                };
                for listener in &self.listeners {
                    listener.on_fired(fired.clone()).await?;
                }
                audit
                    .log(
                        event_entry(&event, Stage::SignalSent)
                            .user(user_id)
                            .run(Some(run_id)),
                    )
                    .await;
                dispatched += 1;
            }

            if page_len < self.batch_size {
                break;
            }
        }

        counter!("triggers_events_dispatched_total").increment(dispatched);
        info!(
            event_id,
            trigger_id = event.trigger_id,
            dispatched,
            "Event fired"
        );

        Ok(FireReport {
            run_id,
            fired: true,
            dispatched,
        })
    }

    /// `fire` for a single known user.
    pub async fn fire_single(
        &self,
        event_id: i32,
        user_id: i32,
        context: Context,
    ) -> Result<FireReport, TriggerError> {
        let candidates = user::Entity::find().filter(user::Column::Id.eq(user_id));
        self.fire(event_id, candidates, context).await
    }
}

/// Fires through a dispatcher built by [`Dispatcher::from_strategy`] and
/// drains the queue when the strategy returned a worker.
///
/// The worker is running before the first event is enqueued, so a fire
/// wider than the queue capacity does not block on a full channel.
pub async fn fire_and_drain(
    dispatcher: Dispatcher,
    worker: Option<QueueWorker>,
    event_id: i32,
    candidates: Select<user::Entity>,
    context: Context,
) -> Result<(FireReport, Option<QueueStats>), TriggerError> {
    let draining = worker.map(|worker| worker.spawn(CancellationToken::new()));

    let fired = dispatcher.fire(event_id, candidates, context).await;
    // Dropping the last sender closes the queue; the worker then finishes
    // what was enqueued and stops.
    drop(dispatcher);

    let stats = match draining {
        Some(handle) => match handle.await {
            Ok(stats) => Some(stats),
            Err(join_err) => {
                warn!(error = %join_err, "Queue worker task failed");
                None
            }
        },
        None => None,
    };

    Ok((fired?, stats))
}

pub(crate) fn event_entry(event: &trigger_event::Model, stage: Stage) -> AuditEntry {
    AuditEntry::new(EntityType::Event, event.id, event.kind.clone(), stage)
        .trigger(event.trigger_id)
}
