//! Pixlie Engine
//!
//! LLM-driven analysis engine over a materialized Hacker News dataset. It
//! includes:
//! - HTTP API (axum) for objectives, streaming, tools and workspaces
//! - Per-objective analysis loops run by a multi-objective coordinator
//! - Workspace persistence (SQLite `workspace.db`) and JSON config
//! - Data models and utilities
//!
//! Tools live in `pixlie-tools`, providers and the fallback chain in
//! `pixlie-llm`, and the conversation ledger in `pixlie-core`.

pub mod api;
pub mod engine;
pub mod models;
pub mod services;
pub mod storage;
pub mod utils;

pub use api::{create_router, AppState};
pub use engine::build_coordinator;
pub use models::settings::{ConfigOverrides, EngineConfig};
pub use services::coordinator::{Coordinator, CoordinatorDeps};
pub use utils::error::{AppError, AppResult};
