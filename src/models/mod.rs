//! Data Models
//!
//! Objectives, workspaces and engine settings.

pub mod objective;
pub mod settings;

pub use objective::*;
pub use settings::*;
