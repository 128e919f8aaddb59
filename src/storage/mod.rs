//! On-disk state: the per-workspace SQLite ledger and `engine.json`.

pub mod config;
pub mod database;

pub use config::*;
pub use database::*;
