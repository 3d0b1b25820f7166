//! In-process task queue.
//!
//! [`QueuedListener`] pushes notifications onto a bounded channel and
//! [`QueueWorker`] drains it, handling every item on its own task after the
//! event's delay has elapsed.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{EventHandler, FiredEvent, FiredListener, HandleOutcome};
use crate::audit::{AuditEntry, AuditSink, EntityType, Stage};
use crate::error::TriggerError;

/// Creates a connected listener/worker pair.
pub fn queue(
    capacity: usize,
    handler: Arc<EventHandler>,
    audit: Arc<dyn AuditSink>,
) -> (QueuedListener, QueueWorker) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (
        QueuedListener { sender, audit },
        QueueWorker { handler, receiver },
    )
}

#[derive(Clone)]
pub struct QueuedListener {
    sender: mpsc::Sender<FiredEvent>,
    audit: Arc<dyn AuditSink>,
}

#[async_trait]
impl FiredListener for QueuedListener {
    async fn on_fired(&self, fired: FiredEvent) -> Result<(), TriggerError> {
        let entry = AuditEntry::new(EntityType::Event, fired.event_id, "queue", Stage::TaskCreated)
            .trigger(fired.trigger_id)
            .user(fired.user_id)
            .details(json!({ "delay_seconds": fired.delay_seconds }))
            .run(Some(fired.run_id));

        self.sender
            .send(fired)
            .await
            .map_err(|_| TriggerError::QueueClosed)?;
        self.audit.log(entry).await;
        Ok(())
    }
}

/// Counters reported when a worker stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub handled: u64,
    pub dropped: u64,
    pub failed: u64,
}

impl QueueStats {
    fn record(&mut self, joined: Result<Result<HandleOutcome, TriggerError>, JoinError>) {
        match joined {
            Ok(Ok(HandleOutcome::Handled(_))) => self.handled += 1,
            Ok(Ok(HandleOutcome::Dropped)) => self.dropped += 1,
            Ok(Err(err)) => {
                self.failed += 1;
                error!(error = %err, "Queued event failed");
            }
            Err(join_err) if join_err.is_cancelled() => {}
            Err(join_err) => {
                self.failed += 1;
                error!(error = %join_err, "Queued event task panicked");
            }
        }
    }
}

pub struct QueueWorker {
    handler: Arc<EventHandler>,
    receiver: mpsc::Receiver<FiredEvent>,
}

impl QueueWorker {
    /// Runs the worker on its own task.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<QueueStats> {
        tokio::spawn(self.run(shutdown))
    }

    /// Runs until `shutdown` is cancelled or every sender is dropped.
    ///
    /// On shutdown, tasks still waiting or running are aborted. When the
    /// channel closes, in-flight tasks are awaited.
    pub async fn run(mut self, shutdown: CancellationToken) -> QueueStats {
        let mut tasks: JoinSet<Result<HandleOutcome, TriggerError>> = JoinSet::new();
        let mut stats = QueueStats::default();

        info!("Queue worker started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    warn!(in_flight = tasks.len(), "Queue worker shutting down, aborting tasks");
                    tasks.abort_all();
                    break;
                }
                next = self.receiver.recv() => match next {
                    Some(fired) => {
                        let handler = Arc::clone(&self.handler);
                        tasks.spawn(async move {
                            let delay = fired.delay();
                            if !delay.is_zero() {
                                debug!(user_id = fired.user_id, ?delay, "Delaying queued event");
                                tokio::time::sleep(delay).await;
                            }
                            handler.handle(&fired).await
                        });
                    }
                    None => {
                        debug!("Queue closed, draining in-flight tasks");
                        break;
                    }
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => stats.record(joined),
            }
        }

        while let Some(joined) = tasks.join_next().await {
            stats.record(joined);
        }

        info!(
            handled = stats.handled,
            dropped = stats.dropped,
            failed = stats.failed,
            "Queue worker stopped"
        );
        stats
    }
}
