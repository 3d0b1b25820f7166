//! Migration to create the durable workflow tables.
//!
//! `workflow_runs` is keyed by the deterministic workflow id so a duplicate
//! start collides on the primary key. `workflow_steps` holds one checkpoint
//! per completed step, letting a resumed run skip work it already finished.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(WorkflowRuns::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WorkflowRuns::WorkflowId)
                            .text()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(WorkflowRuns::WorkflowType).text().not_null())
                    .col(ColumnDef::new(WorkflowRuns::TriggerId).integer().not_null())
                    .col(ColumnDef::new(WorkflowRuns::UserId).integer().not_null())
                    .col(ColumnDef::new(WorkflowRuns::EventId).integer().not_null())
                    .col(ColumnDef::new(WorkflowRuns::RunId).uuid().not_null())
                    .col(ColumnDef::new(WorkflowRuns::Context).json_binary().not_null())
                    .col(
                        ColumnDef::new(WorkflowRuns::Status)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(WorkflowRuns::Attempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(WorkflowRuns::ScheduledAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(WorkflowRuns::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(WorkflowRuns::FinishedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(WorkflowRuns::Outcome).json_binary().null())
                    .col(ColumnDef::new(WorkflowRuns::Error).text().null())
                    .col(
                        ColumnDef::new(WorkflowRuns::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(WorkflowRuns::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_workflow_runs_status_scheduled")
                    .table(WorkflowRuns::Table)
                    .col(WorkflowRuns::Status)
                    .col(WorkflowRuns::ScheduledAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(WorkflowSteps::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WorkflowSteps::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(WorkflowSteps::WorkflowId).text().not_null())
                    .col(ColumnDef::new(WorkflowSteps::StepKey).text().not_null())
                    .col(ColumnDef::new(WorkflowSteps::Status).text().not_null())
                    .col(
                        ColumnDef::new(WorkflowSteps::Attempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(WorkflowSteps::Output).json_binary().null())
                    .col(ColumnDef::new(WorkflowSteps::Error).text().null())
                    .col(
                        ColumnDef::new(WorkflowSteps::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(WorkflowSteps::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_workflow_steps_workflow_id")
                            .from(WorkflowSteps::Table, WorkflowSteps::WorkflowId)
                            .to(WorkflowRuns::Table, WorkflowRuns::WorkflowId)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_workflow_steps_workflow_step")
                    .table(WorkflowSteps::Table)
                    .col(WorkflowSteps::WorkflowId)
                    .col(WorkflowSteps::StepKey)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(WorkflowSteps::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(WorkflowRuns::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum WorkflowRuns {
    Table,
    WorkflowId,
    WorkflowType,
    TriggerId,
    UserId,
    EventId,
    RunId,
    Context,
    Status,
    Attempts,
    ScheduledAt,
    StartedAt,
    FinishedAt,
    Outcome,
    Error,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum WorkflowSteps {
    Table,
    Id,
    WorkflowId,
    StepKey,
    Status,
    Attempts,
    Output,
    Error,
    CreatedAt,
    UpdatedAt,
}
