//! `explore_relations` Tool

use async_trait::async_trait;
use rusqlite::params_from_iter;
use rusqlite::types::Value as SqlValue;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use pixlie_core::{CoreResult, ToolContext, ToolHandler, ToolSpec};

use super::{parse_params, schema_of, sql_to_json, Filters};
use crate::data_source::DataSource;

fn default_limit() -> u32 {
    25
}

/// Parameters for `explore_relations`
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ExploreRelationsParams {
    /// Exact entity name (case-insensitive) whose relations to list
    #[schemars(length(min = 1))]
    pub entity_name: String,
    /// Only relations of this type, e.g. founded, acquired, works_at
    #[serde(default)]
    pub relation_type: Option<String>,
    /// Minimum relation confidence between 0 and 1
    #[serde(default)]
    #[schemars(range(min = 0.0, max = 1.0))]
    pub min_confidence: Option<f64>,
    /// Maximum number of relations to return
    #[serde(default = "default_limit")]
    #[schemars(range(min = 1, max = 200))]
    pub limit: u32,
}

/// Relations in which a named entity is subject or object.
pub struct ExploreRelationsTool {
    source: DataSource,
}

impl ExploreRelationsTool {
    pub fn new(source: DataSource) -> Self {
        Self { source }
    }
}

impl ToolSpec for ExploreRelationsTool {
    fn name(&self) -> &str {
        "explore_relations"
    }

    fn description(&self) -> &str {
        "List relations between extracted entities in which the named entity is the subject or the object, optionally filtered by relation type and confidence."
    }

    fn input_schema(&self) -> Value {
        schema_of::<ExploreRelationsParams>()
    }
}

#[async_trait]
impl ToolHandler for ExploreRelationsTool {
    async fn execute(&self, _ctx: &ToolContext, args: Value) -> CoreResult<Value> {
        let params: ExploreRelationsParams = parse_params(args)?;
        let name = params.entity_name.trim().to_string();

        let mut filters = Filters::default();
        filters.push(
            "(s.entity_value = ? COLLATE NOCASE OR o.entity_value = ? COLLATE NOCASE)",
            vec![SqlValue::Text(name.clone()), SqlValue::Text(name.clone())],
        );
        if let Some(relation_type) = &params.relation_type {
            filters.push(
                "r.relation_type = ? COLLATE NOCASE",
                vec![SqlValue::Text(relation_type.clone())],
            );
        }
        if let Some(min_confidence) = params.min_confidence {
            filters.push("r.confidence >= ?", vec![SqlValue::Real(min_confidence)]);
        }
        let limit = i64::from(params.limit.clamp(1, 200));
        let focus = name.clone();

        let relations = self
            .source
            .with_connection(move |conn| {
                let sql = format!(
                    "SELECT r.relation_type, s.entity_value, s.entity_type, \
                            o.entity_value, o.entity_type, r.confidence, r.item_id \
                     FROM entity_relations r \
                     JOIN entities s ON s.id = r.subject_entity_id \
                     JOIN entities o ON o.id = r.object_entity_id \
                     {} \
                     ORDER BY r.confidence DESC, r.id ASC \
                     LIMIT ?",
                    filters.where_clause()
                );
                let mut values = filters.values().to_vec();
                values.push(SqlValue::Integer(limit));

                let mut stmt = conn.prepare(&sql)?;
                let mut rows = stmt.query(params_from_iter(values.iter()))?;
                let mut relations = Vec::new();
                while let Some(row) = rows.next()? {
                    let subject: String = row.get(1)?;
                    let direction = if subject.eq_ignore_ascii_case(&focus) {
                        "outgoing"
                    } else {
                        "incoming"
                    };
                    relations.push(json!({
                        "relation_type": sql_to_json(row.get_ref(0)?),
                        "subject": {
                            "name": subject,
                            "entity_type": sql_to_json(row.get_ref(2)?),
                        },
                        "object": {
                            "name": sql_to_json(row.get_ref(3)?),
                            "entity_type": sql_to_json(row.get_ref(4)?),
                        },
                        "confidence": sql_to_json(row.get_ref(5)?),
                        "item_id": sql_to_json(row.get_ref(6)?),
                        "direction": direction,
                    }));
                }
                Ok(relations)
            })
            .await?;

        Ok(json!({
            "entity": name,
            "relations": relations,
            "count": relations.len(),
        }))
    }
}
