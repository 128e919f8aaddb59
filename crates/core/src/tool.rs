//! Tools
//!
//! A tool is two halves: `ToolSpec` says what it is (name, input schema,
//! limits) and `ToolHandler` runs it. Anything implementing both is an
//! `AnalysisTool` and can go into the `ToolRegistry`.
//!
//! The registry is filled once at startup and then frozen behind an `Arc`.
//! `register` takes `&mut self`, so nothing holding the `Arc` can add tools.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::context::ToolContext;
use crate::error::{CoreError, CoreResult};

// ============================================================================
// Descriptors
// ============================================================================

/// Limits a tool declares for itself. `None` means the sandbox default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolConstraints {
    #[serde(default = "read_only_by_default")]
    pub read_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_execution_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_result_bytes: Option<usize>,
    /// Only meaningful for tools returning rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rows: Option<usize>,
}

fn read_only_by_default() -> bool {
    true
}

impl Default for ToolConstraints {
    fn default() -> Self {
        Self {
            read_only: read_only_by_default(),
            max_execution_time_ms: None,
            max_result_bytes: None,
            max_rows: None,
        }
    }
}

/// What the API lists and what the planner is shown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub constraints: ToolConstraints,
}

// ============================================================================
// Traits
// ============================================================================

pub trait ToolSpec: Send + Sync {
    /// Registry key, also the name the planner calls the tool by.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema the sandbox validates parameters against before the
    /// handler runs, e.g.
    ///
    /// ```json
    /// {"type": "object", "properties": {"query": {"type": "string"}}, "required": ["query"]}
    /// ```
    fn input_schema(&self) -> Value;

    fn constraints(&self) -> ToolConstraints {
        ToolConstraints::default()
    }

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
            constraints: self.constraints(),
        }
    }
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run with parameters that already passed `input_schema` validation.
    /// Errors are reported back to the planner, not raised to the loop.
    async fn execute(&self, ctx: &ToolContext, args: Value) -> CoreResult<Value>;
}

pub trait AnalysisTool: ToolSpec + ToolHandler {}

impl<T: ToolSpec + ToolHandler> AnalysisTool for T {}

// ============================================================================
// Registry
// ============================================================================

/// Tools by name, iterated in the order they were registered.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn AnalysisTool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails if the name is taken.
    pub fn register(&mut self, tool: Arc<dyn AnalysisTool>) -> CoreResult<()> {
        let name = tool.name().to_string();
        if self.index.contains_key(&name) {
            return Err(CoreError::validation(format!("tool {} is registered twice", name)));
        }
        self.index.insert(name, self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    pub fn freeze(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AnalysisTool>> {
        self.index.get(name).map(|&i| Arc::clone(&self.tools[i]))
    }

    pub fn lookup(&self, name: &str) -> CoreResult<Arc<dyn AnalysisTool>> {
        self.get(name)
            .ok_or_else(|| CoreError::not_found(format!("no tool named {}", name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|tool| tool.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|tool| tool.descriptor()).collect()
    }

    /// `{tool name: input schema}` for the schema endpoint.
    pub fn schemas(&self) -> Map<String, Value> {
        self.tools
            .iter()
            .map(|tool| (tool.name().to_string(), tool.input_schema()))
            .collect()
    }
}
