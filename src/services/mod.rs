//! Services
//!
//! Engine logic behind the HTTP API:
//! - `analysis` - per-objective planning loop
//! - `coordinator` - objective lifecycle across workspaces
//! - `persistence` - workspace save/load and autosave
//! - `streaming` - subscriptions and SSE framing

pub mod analysis;
pub mod coordinator;
pub mod persistence;
pub mod streaming;

pub use analysis::{AnalysisLoop, LoopExit, SharedObjective};
pub use coordinator::{Coordinator, CoordinatorDeps};
pub use persistence::{AutosaveHandle, SqliteWorkspaceStore, WorkspaceStore};
pub use streaming::{StreamEvent, Subscription};
