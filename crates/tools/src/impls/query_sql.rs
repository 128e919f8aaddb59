//! `query_sql` Tool
//!
//! Runs one planner-written, parameterized SELECT against the dataset and
//! returns a page of rows.

use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use pixlie_core::{CoreError, CoreResult, ToolContext, ToolHandler, ToolSpec};

use super::{json_to_sql, parse_params, schema_of, sql_to_json};
use crate::data_source::DataSource;
use crate::error::{ToolError, ToolResultOf};
use crate::sql_guard::inspect_sql;

/// Row cap when no sandbox limit is attached to the context.
const FALLBACK_MAX_ROWS: usize = 500;

/// Parameters for `query_sql`
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct QuerySqlParams {
    /// A single SELECT (or WITH ... SELECT) statement. Every value must be
    /// bound through a `?` placeholder; string and numeric literals are rejected.
    #[schemars(length(min = 1))]
    pub query: String,
    /// Values for the `?` placeholders, in order.
    #[serde(default)]
    pub params: Vec<Value>,
    /// Maximum number of rows to return. Capped by the sandbox row limit.
    #[serde(default)]
    #[schemars(range(min = 1))]
    pub limit: Option<u32>,
    /// Number of rows to skip, for pagination.
    #[serde(default)]
    pub offset: Option<u32>,
}

/// Parameterized read-only SQL over `hn_items`, `entities` and `entity_relations`.
pub struct QuerySqlTool {
    source: DataSource,
}

impl QuerySqlTool {
    pub fn new(source: DataSource) -> Self {
        Self { source }
    }
}

impl ToolSpec for QuerySqlTool {
    fn name(&self) -> &str {
        "query_sql"
    }

    fn description(&self) -> &str {
        "Run one read-only SQL SELECT against the Hacker News dataset (tables: hn_items, entities, entity_relations). Bind every value with ? placeholders and pass them in `params`; literals are rejected. Results are paginated with `limit` and `offset`."
    }

    fn input_schema(&self) -> Value {
        schema_of::<QuerySqlParams>()
    }
}

#[async_trait]
impl ToolHandler for QuerySqlTool {
    async fn execute(&self, ctx: &ToolContext, args: Value) -> CoreResult<Value> {
        let params: QuerySqlParams = parse_params(args)?;

        let guarded = inspect_sql(&params.query)?;
        if guarded.placeholders != params.params.len() {
            return Err(CoreError::validation(format!(
                "query has {} placeholder(s) but {} parameter(s) were given",
                guarded.placeholders,
                params.params.len()
            )));
        }
        let body = guarded.body.to_string();

        let bound = params
            .params
            .iter()
            .map(json_to_sql)
            .collect::<CoreResult<Vec<_>>>()?;

        let max_rows = ctx.max_rows_or(FALLBACK_MAX_ROWS);
        let limit = params
            .limit
            .map(|l| l as usize)
            .unwrap_or(max_rows)
            .clamp(1, max_rows);
        let offset = params.offset.unwrap_or(0) as usize;

        let page = self
            .source
            .with_connection(move |conn| run_page(conn, &body, bound, limit, offset))
            .await?;
        Ok(page)
    }
}

/// Execute the statement and fetch one page, probing one extra row to learn
/// whether more remain.
fn run_page(
    conn: &Connection,
    body: &str,
    mut bound: Vec<SqlValue>,
    limit: usize,
    offset: usize,
) -> ToolResultOf<Value> {
    {
        let stmt = conn.prepare(body)?;
        if !stmt.readonly() {
            return Err(ToolError::validation("statement would modify the database"));
        }
    }

    // Newlines keep a trailing line comment from swallowing the wrapper.
    let paged = format!("SELECT * FROM (\n{}\n) LIMIT ? OFFSET ?", body);
    let mut stmt = conn.prepare(&paged)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    bound.push(SqlValue::Integer((limit + 1) as i64));
    bound.push(SqlValue::Integer(offset as i64));

    let mut rows = stmt.query(params_from_iter(bound.iter()))?;
    let mut out: Vec<Value> = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            values.push(sql_to_json(row.get_ref(i)?));
        }
        out.push(Value::Array(values));
    }

    let truncated = out.len() > limit;
    out.truncate(limit);
    let row_count = out.len();
    Ok(json!({
        "columns": columns,
        "rows": out,
        "row_count": row_count,
        "offset": offset,
        "truncated": truncated,
        "next_offset": if truncated { Some(offset + row_count) } else { None },
    }))
}
