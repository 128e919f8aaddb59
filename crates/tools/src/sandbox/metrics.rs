//! Per-tool execution metrics.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::ToolError;

/// Counters for one tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolMetrics {
    pub tool_name: String,
    pub calls: u64,
    pub failures: u64,
    pub validation_failures: u64,
    pub timeouts: u64,
    pub truncations: u64,
    pub total_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ToolMetrics {
    fn new(tool_name: &str) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            ..Default::default()
        }
    }

    pub fn average_time_ms(&self) -> u64 {
        if self.calls == 0 {
            0
        } else {
            self.total_time_ms / self.calls
        }
    }
}

/// Concurrent metrics table keyed by tool name.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    tools: DashMap<String, ToolMetrics>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_success(&self, tool: &str, elapsed_ms: u64, truncated: bool) {
        let mut entry = self
            .tools
            .entry(tool.to_string())
            .or_insert_with(|| ToolMetrics::new(tool));
        entry.calls += 1;
        entry.total_time_ms += elapsed_ms;
        if truncated {
            entry.truncations += 1;
        }
    }

    pub(crate) fn record_failure(&self, tool: &str, elapsed_ms: u64, error: &ToolError) {
        let mut entry = self
            .tools
            .entry(tool.to_string())
            .or_insert_with(|| ToolMetrics::new(tool));
        entry.calls += 1;
        entry.failures += 1;
        entry.total_time_ms += elapsed_ms;
        match error {
            ToolError::Validation(_) | ToolError::NotFound(_) => entry.validation_failures += 1,
            ToolError::Timeout(_) => entry.timeouts += 1,
            _ => {}
        }
        entry.last_error = Some(error.to_string());
    }

    /// Metrics for one tool, if it was ever called.
    pub fn get(&self, tool: &str) -> Option<ToolMetrics> {
        self.tools.get(tool).map(|m| m.clone())
    }

    /// All metrics, sorted by tool name.
    pub fn all(&self) -> Vec<ToolMetrics> {
        let mut all: Vec<ToolMetrics> = self.tools.iter().map(|m| m.value().clone()).collect();
        all.sort_by(|a, b| a.tool_name.cmp(&b.tool_name));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = MetricsRegistry::new();
        metrics.record_success("query_sql", 10, false);
        metrics.record_success("query_sql", 30, true);
        metrics.record_failure("query_sql", 5, &ToolError::Timeout(5));
        metrics.record_failure("query_sql", 0, &ToolError::validation("bad"));

        let m = metrics.get("query_sql").unwrap();
        assert_eq!(m.calls, 4);
        assert_eq!(m.failures, 2);
        assert_eq!(m.timeouts, 1);
        assert_eq!(m.validation_failures, 1);
        assert_eq!(m.truncations, 1);
        assert_eq!(m.total_time_ms, 45);
        assert_eq!(m.average_time_ms(), 11);
        assert_eq!(m.last_error.as_deref(), Some("Validation error: bad"));
        assert!(metrics.get("search_items").is_none());
    }
}
