//! `search_entities` Tool

use async_trait::async_trait;
use rusqlite::params_from_iter;
use rusqlite::types::Value as SqlValue;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use pixlie_core::{CoreResult, ToolContext, ToolHandler, ToolSpec};

use super::{like_pattern, parse_params, schema_of, sql_to_json, Filters};
use crate::data_source::DataSource;

fn default_limit() -> u32 {
    20
}

/// Parameters for `search_entities`
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SearchEntitiesParams {
    /// Entity name or part of one (case-insensitive)
    #[serde(default)]
    pub query: Option<String>,
    /// Entity type such as person, company or technology
    #[serde(default)]
    pub entity_type: Option<String>,
    /// Only entities mentioned at least this many times
    #[serde(default)]
    #[schemars(range(min = 1))]
    pub min_mentions: Option<u32>,
    /// Maximum number of entities to return
    #[serde(default = "default_limit")]
    #[schemars(range(min = 1, max = 100))]
    pub limit: u32,
}

/// Entity lookup with mention statistics.
pub struct SearchEntitiesTool {
    source: DataSource,
}

impl SearchEntitiesTool {
    pub fn new(source: DataSource) -> Self {
        Self { source }
    }
}

impl ToolSpec for SearchEntitiesTool {
    fn name(&self) -> &str {
        "search_entities"
    }

    fn description(&self) -> &str {
        "Find extracted entities (people, companies, technologies, ...) by name and type. Each result carries its mention count, the number of distinct items mentioning it, and the first and last mention time."
    }

    fn input_schema(&self) -> Value {
        schema_of::<SearchEntitiesParams>()
    }
}

#[async_trait]
impl ToolHandler for SearchEntitiesTool {
    async fn execute(&self, _ctx: &ToolContext, args: Value) -> CoreResult<Value> {
        let params: SearchEntitiesParams = parse_params(args)?;

        let mut filters = Filters::default();
        if let Some(query) = params.query.as_deref().filter(|q| !q.trim().is_empty()) {
            filters.push(
                "e.entity_value LIKE ? ESCAPE '\\'",
                vec![SqlValue::Text(like_pattern(query.trim()))],
            );
        }
        if let Some(entity_type) = &params.entity_type {
            filters.push(
                "e.entity_type = ? COLLATE NOCASE",
                vec![SqlValue::Text(entity_type.clone())],
            );
        }
        let min_mentions = i64::from(params.min_mentions.unwrap_or(1));
        let limit = i64::from(params.limit.clamp(1, 100));

        let entities = self
            .source
            .with_connection(move |conn| {
                let sql = format!(
                    "SELECT e.entity_value, e.entity_type, COUNT(*) AS mentions, \
                            COUNT(DISTINCT e.item_id) AS items, MIN(i.time), MAX(i.time), \
                            AVG(e.confidence) \
                     FROM entities e LEFT JOIN hn_items i ON i.id = e.item_id \
                     {} \
                     GROUP BY e.entity_value, e.entity_type \
                     HAVING COUNT(*) >= ? \
                     ORDER BY mentions DESC, e.entity_value ASC \
                     LIMIT ?",
                    filters.where_clause()
                );
                let mut values = filters.values().to_vec();
                values.push(SqlValue::Integer(min_mentions));
                values.push(SqlValue::Integer(limit));

                let mut stmt = conn.prepare(&sql)?;
                let mut rows = stmt.query(params_from_iter(values.iter()))?;
                let mut entities = Vec::new();
                while let Some(row) = rows.next()? {
                    entities.push(json!({
                        "name": sql_to_json(row.get_ref(0)?),
                        "entity_type": sql_to_json(row.get_ref(1)?),
                        "mentions": sql_to_json(row.get_ref(2)?),
                        "item_count": sql_to_json(row.get_ref(3)?),
                        "first_mentioned": sql_to_json(row.get_ref(4)?),
                        "last_mentioned": sql_to_json(row.get_ref(5)?),
                        "avg_confidence": sql_to_json(row.get_ref(6)?),
                    }));
                }
                Ok(entities)
            })
            .await?;

        Ok(json!({
            "entities": entities,
            "count": entities.len(),
        }))
    }
}
