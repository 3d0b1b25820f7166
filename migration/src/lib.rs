//! Database migrations for the trigger engine.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2025_06_01_000001_create_users;
mod m2025_06_01_000002_create_triggers;
mod m2025_06_01_000003_create_trigger_activities;
mod m2025_06_01_000004_create_trigger_logs;
mod m2025_06_01_000005_create_messages;
mod m2025_06_02_000001_create_workflow_runs;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_06_01_000001_create_users::Migration),
            Box::new(m2025_06_01_000002_create_triggers::Migration),
            Box::new(m2025_06_01_000003_create_trigger_activities::Migration),
            Box::new(m2025_06_01_000004_create_trigger_logs::Migration),
            Box::new(m2025_06_01_000005_create_messages::Migration),
            Box::new(m2025_06_02_000001_create_workflow_runs::Migration),
        ]
    }
}
