use std::sync::Arc;
use std::time::Duration;

use metrics::histogram;
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use super::{DatabaseExecutor, DurableError, RunStatus};

/// Background loop claiming due runs and executing them concurrently.
pub struct DurableWorker {
    executor: Arc<DatabaseExecutor>,
}

impl DurableWorker {
    pub fn new(executor: Arc<DatabaseExecutor>) -> Self {
        Self { executor }
    }

    /// Runs until `shutdown` fires. Runs interrupted by a previous process are
    /// returned to pending first.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), DurableError> {
        let config = self.executor.config();
        let tick = Duration::from_millis(config.worker_tick_ms);
        let claim_batch = config.worker_claim_batch;

        self.executor.resume_interrupted().await?;
        info!(?tick, claim_batch, "Durable worker started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Durable worker shutdown requested");
                    break;
                }
                _ = sleep(tick) => {
                    let started = Instant::now();
                    match self.tick(claim_batch).await {
                        Ok(0) => {}
                        Ok(count) => debug!(count, "Durable worker tick executed runs"),
                        Err(err) => error!(error = %err, "Durable worker tick failed"),
                    }
                    histogram!("triggers_durable_tick_duration_seconds")
                        .record(started.elapsed().as_secs_f64());
                }
            }
        }

        info!("Durable worker stopped");
        Ok(())
    }

    /// Claims one batch and waits for every claimed run to finish.
    pub async fn tick(&self, claim_batch: u64) -> Result<usize, DurableError> {
        let claimed = self.executor.claim_due(claim_batch).await?;
        let count = claimed.len();
        let mut tasks = JoinSet::new();

        for run in claimed {
            let executor = Arc::clone(&self.executor);
            tasks.spawn(async move {
                let workflow_id = run.workflow_id.clone();
                (workflow_id, executor.run_claimed(run).await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((workflow_id, Ok(RunStatus::Failed))) => {
                    error!(%workflow_id, "Workflow run permanently failed");
                }
                Ok((_, Ok(_))) => {}
                Ok((workflow_id, Err(err))) => {
                    error!(%workflow_id, error = %err, "Workflow run could not be recorded");
                }
                Err(join_err) => error!(error = %join_err, "Workflow run task panicked"),
            }
        }

        Ok(count)
    }
}
