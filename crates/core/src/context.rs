//! Tool Call Context
//!
//! What a handler knows about the call it is serving: the objective and
//! workspace it runs for, the ledger step it will be recorded under, and the
//! limits the sandbox settled on. Handlers get no handle to the ledger or the
//! loop.

use serde::Serialize;

/// Limits in force for one call, after tool overrides are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CallLimits {
    pub timeout_ms: u64,
    pub max_result_bytes: usize,
    pub max_rows: usize,
}

#[derive(Debug, Clone)]
pub struct ToolContext {
    objective_id: String,
    workspace: String,
    step_id: u32,
    call_id: String,
    limits: Option<CallLimits>,
}

impl ToolContext {
    pub fn new(
        objective_id: impl Into<String>,
        workspace: impl Into<String>,
        step_id: u32,
        call_id: impl Into<String>,
    ) -> Self {
        Self {
            objective_id: objective_id.into(),
            workspace: workspace.into(),
            step_id,
            call_id: call_id.into(),
            limits: None,
        }
    }

    /// A call outside any objective, as made by tests and API introspection.
    pub fn adhoc(call_id: impl Into<String>) -> Self {
        Self::new("adhoc", "adhoc", 0, call_id)
    }

    pub fn with_limits(mut self, limits: CallLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    pub fn objective_id(&self) -> &str {
        &self.objective_id
    }

    pub fn workspace(&self) -> &str {
        &self.workspace
    }

    pub fn step_id(&self) -> u32 {
        self.step_id
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    /// `None` until the sandbox has attached them.
    pub fn limits(&self) -> Option<CallLimits> {
        self.limits
    }

    /// Row cap for tabular tools, or `fallback` outside the sandbox.
    pub fn max_rows_or(&self, fallback: usize) -> usize {
        self.limits.map_or(fallback, |limits| limits.max_rows)
    }
}
