use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use pixlie_core::{CallLimits, ToolContext, ToolDescriptor, ToolExecution, ToolRegistry};

use super::metrics::{MetricsRegistry, ToolMetrics};
use crate::error::{ToolError, ToolResultOf};
use crate::truncation::truncate_result;
use crate::validation::validate_params;

/// Sandbox defaults, used when a tool declares no override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default = "default_max_result_bytes")]
    pub max_result_bytes: usize,
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_result_bytes() -> usize {
    64 * 1024
}

fn default_max_rows() -> usize {
    500
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            max_result_bytes: default_max_result_bytes(),
            max_rows: default_max_rows(),
        }
    }
}

impl SandboxConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.default_timeout_ms == 0 {
            return Err("sandbox.default_timeout_ms must be greater than zero".to_string());
        }
        if self.max_result_bytes < 256 {
            return Err("sandbox.max_result_bytes must be at least 256".to_string());
        }
        if self.max_rows == 0 {
            return Err("sandbox.max_rows must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// Executes registered tools under validation, timeout and size limits.
pub struct ToolSandbox {
    registry: Arc<ToolRegistry>,
    config: SandboxConfig,
    metrics: MetricsRegistry,
}

impl ToolSandbox {
    pub fn new(registry: Arc<ToolRegistry>, config: SandboxConfig) -> Self {
        Self {
            registry,
            config,
            metrics: MetricsRegistry::new(),
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.registry.descriptors()
    }

    pub fn descriptor(&self, name: &str) -> Option<ToolDescriptor> {
        self.registry.get(name).map(|tool| tool.descriptor())
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    /// Metrics for a registered tool; zeroed when it has not run yet.
    pub fn tool_metrics(&self, name: &str) -> Option<ToolMetrics> {
        if !self.registry.contains(name) {
            return None;
        }
        Some(self.metrics.get(name).unwrap_or_else(|| ToolMetrics {
            tool_name: name.to_string(),
            ..Default::default()
        }))
    }

    /// Run a tool and record the outcome. Never fails: every error becomes
    /// the `error` side of the returned record.
    pub async fn execute(&self, name: &str, params: Value, ctx: ToolContext) -> ToolExecution {
        let started = Instant::now();
        let result = self.run(name, params.clone(), ctx.clone()).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok((value, truncated)) => {
                self.metrics.record_success(name, elapsed_ms, truncated);
                debug!(
                    tool = name,
                    objective_id = ctx.objective_id(),
                    step_id = ctx.step_id(),
                    elapsed_ms,
                    truncated,
                    "tool call succeeded"
                );
                ToolExecution::success(name, params, value, elapsed_ms)
            }
            Err(err) => {
                self.metrics.record_failure(name, elapsed_ms, &err);
                warn!(
                    tool = name,
                    objective_id = ctx.objective_id(),
                    step_id = ctx.step_id(),
                    elapsed_ms,
                    error = %err,
                    "tool call failed"
                );
                ToolExecution::failure(name, params, err.to_string(), elapsed_ms)
            }
        }
    }

    /// Validate, run and truncate. Returns the value and whether it was cut.
    pub async fn run(
        &self,
        name: &str,
        params: Value,
        ctx: ToolContext,
    ) -> ToolResultOf<(Value, bool)> {
        let tool = self
            .registry
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        validate_params(&tool.input_schema(), &params)?;

        let limits = self.limits_for(&tool.descriptor());
        let ctx = ctx.with_limits(limits);

        let handle = tokio::spawn(async move { tool.execute(&ctx, params).await });
        // Aborts the handler on timeout and also when this future is dropped
        // mid-call, which releases whatever it holds (SQLite interrupt guards
        // included).
        let _abort = AbortOnDrop(handle.abort_handle());

        let value = match tokio::time::timeout(Duration::from_millis(limits.timeout_ms), handle).await
        {
            Err(_) => return Err(ToolError::Timeout(limits.timeout_ms)),
            Ok(Err(join_err)) if join_err.is_panic() => {
                return Err(ToolError::Panicked(panic_message(join_err.into_panic())));
            }
            Ok(Err(join_err)) => {
                return Err(ToolError::execution(format!("tool task aborted: {}", join_err)));
            }
            Ok(Ok(result)) => result?,
        };

        Ok(truncate_result(value, limits.max_result_bytes))
    }

    fn limits_for(&self, descriptor: &ToolDescriptor) -> CallLimits {
        let constraints = &descriptor.constraints;
        CallLimits {
            timeout_ms: constraints
                .max_execution_time_ms
                .unwrap_or(self.config.default_timeout_ms)
                .max(1),
            max_result_bytes: constraints
                .max_result_bytes
                .unwrap_or(self.config.max_result_bytes),
            max_rows: constraints.max_rows.unwrap_or(self.config.max_rows).max(1),
        }
    }
}

struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
