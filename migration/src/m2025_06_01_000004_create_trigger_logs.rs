//! Migration to create the trigger_logs audit table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(TriggerLogs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TriggerLogs::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(TriggerLogs::RunId).uuid().not_null())
                    .col(
                        ColumnDef::new(TriggerLogs::Timestamp)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(TriggerLogs::EntityType).string_len(20).not_null())
                    .col(ColumnDef::new(TriggerLogs::EntityId).integer().not_null())
                    .col(ColumnDef::new(TriggerLogs::EntityKind).text().not_null())
                    .col(
                        ColumnDef::new(TriggerLogs::EntityName)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(TriggerLogs::TriggerId).integer().not_null())
                    .col(ColumnDef::new(TriggerLogs::UserId).integer().null())
                    .col(ColumnDef::new(TriggerLogs::Stage).string_len(30).not_null())
                    .col(ColumnDef::new(TriggerLogs::Result).boolean().null())
                    .col(ColumnDef::new(TriggerLogs::Details).json_binary().null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_trigger_logs_trigger_id")
                            .from(TriggerLogs::Table, TriggerLogs::TriggerId)
                            .to(Triggers::Table, Triggers::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_trigger_logs_user_id")
                            .from(TriggerLogs::Table, TriggerLogs::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_trigger_logs_run_id")
                    .table(TriggerLogs::Table)
                    .col(TriggerLogs::RunId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_trigger_logs_trigger_timestamp")
                    .table(TriggerLogs::Table)
                    .col(TriggerLogs::TriggerId)
                    .col(TriggerLogs::Timestamp)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(TriggerLogs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum TriggerLogs {
    Table,
    Id,
    RunId,
    Timestamp,
    EntityType,
    EntityId,
    EntityKind,
    EntityName,
    TriggerId,
    UserId,
    Stage,
    Result,
    Details,
}

#[derive(DeriveIden)]
enum Triggers {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
}
