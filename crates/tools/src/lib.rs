//! Pixlie Tools
//!
//! Everything between a planner's `InvokeTool` decision and the recorded
//! `ToolExecution`:
//!
//! - `sandbox` - `ToolSandbox`: validation, timeout, panic capture, truncation, metrics
//! - `validation` - JSON Schema subset checks for tool arguments
//! - `truncation` - result size capping
//! - `data_source` - read-only, interruptible SQLite pool over the dataset
//! - `sql_guard` - lexical checks for planner-written SQL
//! - `impls` - `query_sql`, `search_items`, `search_entities`, `explore_relations`
//!
//! The tool traits and the registry live in `pixlie-core`.

pub mod data_source;
pub mod error;
pub mod impls;
pub mod sandbox;
pub mod sql_guard;
pub mod truncation;
pub mod validation;

pub use data_source::{DataSource, DATASET_SCHEMA};
pub use error::{ToolError, ToolResultOf};
pub use impls::{
    register_dataset_tools, schema_of, ExploreRelationsTool, QuerySqlTool, SearchEntitiesTool,
    SearchItemsTool,
};
pub use sandbox::{MetricsRegistry, SandboxConfig, ToolMetrics, ToolSandbox};
pub use validation::validate_params;
