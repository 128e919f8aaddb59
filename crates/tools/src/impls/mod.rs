//! Dataset Tool Implementations
//!
//! Read-only tools over the materialized dataset. Each tool's input type
//! derives `JsonSchema`; the descriptor schema is generated from it.

mod explore_relations;
mod query_sql;
mod search_entities;
mod search_items;

pub use explore_relations::{ExploreRelationsParams, ExploreRelationsTool};
pub use query_sql::{QuerySqlParams, QuerySqlTool};
pub use search_entities::{SearchEntitiesParams, SearchEntitiesTool};
pub use search_items::{ItemType, SearchItemsParams, SearchItemsTool};

use std::sync::Arc;

use pixlie_core::{CoreError, CoreResult, ToolRegistry};
use rusqlite::types::{Value as SqlValue, ValueRef};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::data_source::DataSource;

/// Register every dataset tool against one data source.
pub fn register_dataset_tools(registry: &mut ToolRegistry, source: DataSource) -> CoreResult<()> {
    registry.register(Arc::new(QuerySqlTool::new(source.clone())))?;
    registry.register(Arc::new(SearchItemsTool::new(source.clone())))?;
    registry.register(Arc::new(SearchEntitiesTool::new(source.clone())))?;
    registry.register(Arc::new(ExploreRelationsTool::new(source)))?;
    Ok(())
}

/// JSON Schema for a parameter type, without the `$schema` marker.
pub fn schema_of<T: JsonSchema>() -> Value {
    let mut schema = schemars::schema_for!(T).to_value();
    if let Some(object) = schema.as_object_mut() {
        object.remove("$schema");
    }
    schema
}

pub(crate) fn parse_params<T: DeserializeOwned>(args: Value) -> CoreResult<T> {
    serde_json::from_value(args).map_err(|e| CoreError::validation(e.to_string()))
}

/// Convert a JSON scalar into a bindable SQLite value.
pub(crate) fn json_to_sql(value: &Value) -> CoreResult<SqlValue> {
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().ok_or_else(|| {
                CoreError::validation(format!("number {} cannot be bound", n))
            })?),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => {
            return Err(CoreError::validation(
                "query parameters must be strings, numbers, booleans or null",
            ))
        }
    })
}

/// Convert a SQLite column value into JSON.
pub(crate) fn sql_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => json!(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => json!({ "blob_bytes": bytes.len() }),
    }
}

/// `%term%` with LIKE wildcards in `term` escaped by `\`.
pub(crate) fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

/// WHERE-clause builder that keeps clauses and bound values in step.
#[derive(Default)]
pub(crate) struct Filters {
    clauses: Vec<String>,
    values: Vec<SqlValue>,
}

impl Filters {
    pub(crate) fn push(&mut self, clause: impl Into<String>, values: Vec<SqlValue>) {
        self.clauses.push(clause.into());
        self.values.extend(values);
    }

    pub(crate) fn where_clause(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.clauses.join(" AND "))
        }
    }

    pub(crate) fn values(&self) -> &[SqlValue] {
        &self.values
    }
}
