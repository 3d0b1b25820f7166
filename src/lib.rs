//! # Triggers
//!
//! Rule engine that runs per-user actions when domain events fire and every
//! attached condition holds. A per-(trigger, user) activity ledger enforces
//! limits and serializes concurrent runs. Work runs inline, through an
//! in-process queue, or as checkpointed durable workflows.

pub mod audit;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod durable;
pub mod engine;
pub mod error;
pub mod kinds;
pub mod ledger;
pub mod models;
pub mod repositories;
pub mod telemetry;
pub use migration;
