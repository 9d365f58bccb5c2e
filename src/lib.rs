// ============================================================================
// Presence Aggregator Library
// ============================================================================

pub mod aggregator;
pub mod app;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod repository;
pub mod state;
pub mod status;
pub mod sweeper;
pub mod upsert;

pub use aggregator::{Aggregator, AggregatorSettings, BatchReport, OnlineSet, OverrunPolicy};
pub use app::build_router;
pub use error::{AppError, AppResult};
pub use models::{StatusRecord, UpsertOutcome, UserEntity};
pub use repository::{InMemoryUserRepository, PgUserRepository, UserRepository};
pub use status::{HttpStatusSource, StatusSource};
pub use sweeper::{SweepSettings, SweeperWorker, spawn_sweeper, sweep_once};
pub use upsert::UpsertEngine;
