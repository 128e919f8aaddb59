//! Analysis
//!
//! The per-objective planning loop and the state it shares:
//! - `state` - `SharedObjective` (objective + ledger + live event sender)
//! - `context_window` - bounded planner view of the ledger
//! - `runner` - `AnalysisLoop` state machine

pub mod context_window;
pub mod runner;
pub mod state;

pub use context_window::{ContextWindow, PlanningContext};
pub use runner::{AnalysisLoop, LoopControl, LoopExit, LoopServices};
pub use state::{LedgerState, SharedObjective};
