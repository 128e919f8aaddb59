//! `search_items` Tool

use async_trait::async_trait;
use rusqlite::params_from_iter;
use rusqlite::types::Value as SqlValue;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use pixlie_core::{CoreResult, ToolContext, ToolHandler, ToolSpec};

use super::{like_pattern, parse_params, schema_of, sql_to_json, Filters};
use crate::data_source::DataSource;

/// Hacker News item kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Story,
    Comment,
    Job,
    Poll,
    Pollopt,
}

impl ItemType {
    fn as_str(&self) -> &'static str {
        match self {
            ItemType::Story => "story",
            ItemType::Comment => "comment",
            ItemType::Job => "job",
            ItemType::Poll => "poll",
            ItemType::Pollopt => "pollopt",
        }
    }
}

fn default_limit() -> u32 {
    20
}

/// Parameters for `search_items`
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SearchItemsParams {
    /// Keywords to find in item titles and text (case-insensitive substring)
    #[serde(default)]
    pub query: Option<String>,
    /// Only items by this author
    #[serde(default)]
    pub author: Option<String>,
    /// Only items of this kind
    #[serde(default)]
    pub item_type: Option<ItemType>,
    /// Minimum score
    #[serde(default)]
    pub min_score: Option<i64>,
    /// Maximum number of items to return
    #[serde(default = "default_limit")]
    #[schemars(range(min = 1, max = 100))]
    pub limit: u32,
}

/// Keyword/author/type/score search over `hn_items`.
pub struct SearchItemsTool {
    source: DataSource,
}

impl SearchItemsTool {
    pub fn new(source: DataSource) -> Self {
        Self { source }
    }
}

impl ToolSpec for SearchItemsTool {
    fn name(&self) -> &str {
        "search_items"
    }

    fn description(&self) -> &str {
        "Search Hacker News items by keyword, author, item type and minimum score. Returns the best-scoring matches and the total number of matches."
    }

    fn input_schema(&self) -> Value {
        schema_of::<SearchItemsParams>()
    }
}

#[async_trait]
impl ToolHandler for SearchItemsTool {
    async fn execute(&self, _ctx: &ToolContext, args: Value) -> CoreResult<Value> {
        let params: SearchItemsParams = parse_params(args)?;

        let mut filters = Filters::default();
        filters.push("deleted = 0 AND dead = 0", vec![]);
        if let Some(query) = params.query.as_deref().filter(|q| !q.trim().is_empty()) {
            let pattern = SqlValue::Text(like_pattern(query.trim()));
            filters.push(
                "(title LIKE ? ESCAPE '\\' OR text LIKE ? ESCAPE '\\')",
                vec![pattern.clone(), pattern],
            );
        }
        if let Some(author) = &params.author {
            filters.push("by = ?", vec![SqlValue::Text(author.clone())]);
        }
        if let Some(item_type) = params.item_type {
            filters.push("item_type = ?", vec![SqlValue::Text(item_type.as_str().into())]);
        }
        if let Some(min_score) = params.min_score {
            filters.push("score >= ?", vec![SqlValue::Integer(min_score)]);
        }
        let limit = i64::from(params.limit.clamp(1, 100));

        let filters_applied = json!({
            "query": params.query,
            "author": params.author,
            "item_type": params.item_type,
            "min_score": params.min_score,
            "limit": limit,
        });

        let (items, total) = self
            .source
            .with_connection(move |conn| {
                let where_clause = filters.where_clause();
                let total: i64 = conn.query_row(
                    &format!("SELECT COUNT(*) FROM hn_items {}", where_clause),
                    params_from_iter(filters.values().iter()),
                    |row| row.get(0),
                )?;

                let sql = format!(
                    "SELECT id, item_type, by, title, url, score, time, descendants, text \
                     FROM hn_items {} ORDER BY score DESC, id DESC LIMIT ?",
                    where_clause
                );
                let mut stmt = conn.prepare(&sql)?;
                let mut values = filters.values().to_vec();
                values.push(SqlValue::Integer(limit));
                let mut rows = stmt.query(params_from_iter(values.iter()))?;

                let mut items = Vec::new();
                while let Some(row) = rows.next()? {
                    items.push(json!({
                        "id": sql_to_json(row.get_ref(0)?),
                        "item_type": sql_to_json(row.get_ref(1)?),
                        "by": sql_to_json(row.get_ref(2)?),
                        "title": sql_to_json(row.get_ref(3)?),
                        "url": sql_to_json(row.get_ref(4)?),
                        "score": sql_to_json(row.get_ref(5)?),
                        "time": sql_to_json(row.get_ref(6)?),
                        "descendants": sql_to_json(row.get_ref(7)?),
                        "text": sql_to_json(row.get_ref(8)?),
                    }));
                }
                Ok((items, total))
            })
            .await?;

        Ok(json!({
            "items": items,
            "total_count": total,
            "filters_applied": filters_applied,
        }))
    }
}
