//! Tool Sandbox
//!
//! Wraps the frozen tool registry with the guarantees every tool call gets:
//!
//! - parameters validated against the tool's schema before the handler runs
//! - a hard timeout (per-tool constraint, else the sandbox default)
//! - handlers run on their own task, so a panic becomes a recorded error
//! - oversized results truncated to the byte cap
//! - per-tool metrics

mod executor;
mod metrics;

pub use executor::{SandboxConfig, ToolSandbox};
pub use metrics::{MetricsRegistry, ToolMetrics};
