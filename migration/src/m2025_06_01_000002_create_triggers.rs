//! Migration to create the triggers table and its child definition tables.
//!
//! Conditions, actions and events share one layout: a `kind` tag naming the
//! registered variant plus a JSON `params` column holding variant data.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Triggers::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Triggers::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Triggers::Name)
                            .string_len(64)
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(Triggers::IsEnabled)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Triggers::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Triggers::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(TriggerConditions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TriggerConditions::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(TriggerConditions::TriggerId).integer().not_null())
                    .col(ColumnDef::new(TriggerConditions::Kind).text().not_null())
                    .col(ColumnDef::new(TriggerConditions::Params).json_binary().not_null())
                    .col(
                        ColumnDef::new(TriggerConditions::Position)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(TriggerConditions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_trigger_conditions_trigger_id")
                            .from(TriggerConditions::Table, TriggerConditions::TriggerId)
                            .to(Triggers::Table, Triggers::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_trigger_conditions_trigger_position")
                    .table(TriggerConditions::Table)
                    .col(TriggerConditions::TriggerId)
                    .col(TriggerConditions::Position)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(TriggerActions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TriggerActions::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(TriggerActions::TriggerId).integer().not_null())
                    .col(ColumnDef::new(TriggerActions::Kind).text().not_null())
                    .col(ColumnDef::new(TriggerActions::Params).json_binary().not_null())
                    .col(
                        ColumnDef::new(TriggerActions::Position)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(TriggerActions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_trigger_actions_trigger_id")
                            .from(TriggerActions::Table, TriggerActions::TriggerId)
                            .to(Triggers::Table, Triggers::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_trigger_actions_trigger_position")
                    .table(TriggerActions::Table)
                    .col(TriggerActions::TriggerId)
                    .col(TriggerActions::Position)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(TriggerEvents::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TriggerEvents::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(TriggerEvents::TriggerId).integer().not_null())
                    .col(ColumnDef::new(TriggerEvents::Kind).text().not_null())
                    .col(ColumnDef::new(TriggerEvents::Params).json_binary().not_null())
                    .col(
                        ColumnDef::new(TriggerEvents::DelaySeconds)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(TriggerEvents::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_trigger_events_trigger_id")
                            .from(TriggerEvents::Table, TriggerEvents::TriggerId)
                            .to(Triggers::Table, Triggers::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_trigger_events_kind")
                    .table(TriggerEvents::Table)
                    .col(TriggerEvents::Kind)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(TriggerEvents::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(TriggerActions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(TriggerConditions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Triggers::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Triggers {
    Table,
    Id,
    Name,
    IsEnabled,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum TriggerConditions {
    Table,
    Id,
    TriggerId,
    Kind,
    Params,
    Position,
    CreatedAt,
}

#[derive(DeriveIden)]
enum TriggerActions {
    Table,
    Id,
    TriggerId,
    Kind,
    Params,
    Position,
    CreatedAt,
}

#[derive(DeriveIden)]
enum TriggerEvents {
    Table,
    Id,
    TriggerId,
    Kind,
    Params,
    DelaySeconds,
    CreatedAt,
}
