//! Migration to create the trigger_activities ledger table.
//!
//! Exactly one row exists per (trigger, user) pair; the unique index is what
//! makes the ledger's get-or-create safe under concurrent first firings.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(TriggerActivities::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TriggerActivities::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(TriggerActivities::TriggerId).integer().not_null())
                    .col(ColumnDef::new(TriggerActivities::UserId).integer().not_null())
                    .col(
                        ColumnDef::new(TriggerActivities::LastActionDatetime)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(TriggerActivities::ActionCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_trigger_activities_trigger_id")
                            .from(TriggerActivities::Table, TriggerActivities::TriggerId)
                            .to(Triggers::Table, Triggers::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_trigger_activities_user_id")
                            .from(TriggerActivities::Table, TriggerActivities::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_trigger_activities_trigger_user")
                    .table(TriggerActivities::Table)
                    .col(TriggerActivities::TriggerId)
                    .col(TriggerActivities::UserId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_trigger_activities_trigger_user")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(TriggerActivities::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum TriggerActivities {
    Table,
    Id,
    TriggerId,
    UserId,
    LastActionDatetime,
    ActionCount,
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
