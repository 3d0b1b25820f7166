//! # Triggers CLI
//!
//! `migrate` applies the schema, `worker` drains durable runs until Ctrl-C and
//! `fire` reports an event through the configured execution strategy.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use migration::{Migrator, MigratorTrait};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tracing::info;

use triggers::audit::{AuditSink, DbAuditLog, NoopAudit};
use triggers::config::{AppConfig, ConfigLoader, ExecutionStrategy};
use triggers::db::{health_check, init_pool};
use triggers::dispatch::{Dispatcher, fire_and_drain};
use triggers::durable::{DatabaseExecutor, DurableWorker, TriggerActivities, WorkflowExecutor};
use triggers::engine::TriggerEngine;
use triggers::kinds::{Context as FireContext, KindRegistry};
use triggers::repositories::UserRepository;
use triggers::telemetry::init_tracing;

#[derive(Parser)]
#[command(name = "triggers")]
#[command(about = "Trigger rule engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,

    /// Run the durable workflow worker until Ctrl-C
    Worker,

    /// Fire an event for every user, or for one user
    Fire {
        event_id: i32,
        #[arg(long)]
        user: Option<i32>,
        /// Firing context as a JSON object
        #[arg(long, default_value = "{}")]
        context: String,
        /// Override the configured execution strategy
        #[arg(long)]
        strategy: Option<ExecutionStrategy>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load()
        .context("failed to load configuration")?;
    init_tracing(&config).context("failed to initialise tracing")?;
    if let Ok(redacted) = config.redacted_json() {
        info!(profile = %config.profile, config = %redacted, "Configuration loaded");
    }

    let db = init_pool(&config)
        .await
        .context("failed to connect to database")?;

    match cli.command {
        Commands::Migrate => {
            Migrator::up(&db, None)
                .await
                .context("failed to apply migrations")?;
            info!("Migrations applied");
        }
        Commands::Worker => run_worker(db, &config).await?,
        Commands::Fire {
            event_id,
            user,
            context,
            strategy,
        } => {
            let context: FireContext =
                serde_json::from_str(&context).context("context must be a JSON object")?;
            let strategy = strategy.unwrap_or(config.execution_strategy);
            fire(db, &config, strategy, event_id, user, context).await?;
        }
    }

    Ok(())
}

fn build_engine(db: &DatabaseConnection, config: &AppConfig) -> Arc<TriggerEngine> {
    let audit: Arc<dyn AuditSink> = if config.audit_enabled {
        Arc::new(DbAuditLog::new(db.clone()))
    } else {
        Arc::new(NoopAudit)
    };
    Arc::new(TriggerEngine::new(
        db.clone(),
        Arc::new(KindRegistry::with_builtins()),
        audit,
    ))
}

fn build_executor(
    db: &DatabaseConnection,
    engine: &Arc<TriggerEngine>,
    config: &AppConfig,
) -> Arc<DatabaseExecutor> {
    let activities = Arc::new(TriggerActivities::new(Arc::clone(engine)));
    Arc::new(DatabaseExecutor::new(
        db.clone(),
        activities,
        config.durable.clone(),
    ))
}

async fn run_worker(db: DatabaseConnection, config: &AppConfig) -> Result<()> {
    health_check(&db).await?;
    let engine = build_engine(&db, config);
    let executor = build_executor(&db, &engine, config);

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, stopping worker");
        }
        signal_token.cancel();
    });

    DurableWorker::new(executor)
        .run(shutdown)
        .await
        .context("durable worker failed")?;
    Ok(())
}

async fn fire(
    db: DatabaseConnection,
    config: &AppConfig,
    strategy: ExecutionStrategy,
    event_id: i32,
    user: Option<i32>,
    context: FireContext,
) -> Result<()> {
    let engine = build_engine(&db, config);
    let executor: Arc<dyn WorkflowExecutor> = build_executor(&db, &engine, config);
    let (dispatcher, queue_worker) =
        Dispatcher::from_strategy(strategy, engine, config, Some(executor))
            .context("failed to wire dispatcher")?;

    let users = UserRepository::new(&db);
    let candidates = match user {
        Some(user_id) => users.with_ids([user_id]),
        None => users.all(),
    };
    let (report, stats) = fire_and_drain(dispatcher, queue_worker, event_id, candidates, context)
        .await
        .context("fire failed")?;

    info!(
        %strategy,
        run_id = %report.run_id,
        fired = report.fired,
        dispatched = report.dispatched,
        "Event fired"
    );
    if let Some(stats) = stats {
        info!(
            handled = stats.handled,
            dropped = stats.dropped,
            failed = stats.failed,
            "Queued events drained"
        );
    }

    Ok(())
}
