//! SQLite Database
//!
//! Per-workspace `workspace.db` using rusqlite with r2d2 connection pooling.
//! Holds the objective → conversation → step → tool execution graph.
//!
//! Writes replace a workspace's whole graph inside one transaction; reads
//! rebuild ledger types through their serde representation so the
//! one-of-result-or-error rule of `ToolExecution` is re-checked on load.

use std::path::Path;

use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use pixlie_core::{Conversation, ConversationStep, ToolExecution};

use crate::models::objective::{Objective, ObjectiveRecord, ObjectiveStatus, Workspace};
use crate::utils::error::{AppError, AppResult};
use crate::utils::paths::ensure_dir;

/// Bumped when the table layout changes
pub const SCHEMA_VERSION: i64 = 1;

pub type DbPool = Pool<SqliteConnectionManager>;

/// The ledger store of one workspace (`<workspace>/workspace.db`).
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Single-connection in-memory store; every pooled connection to
    /// `:memory:` would otherwise see its own empty database.
    pub fn new_in_memory() -> AppResult<Self> {
        let manager = SqliteConnectionManager::memory().with_init(configure_connection);
        Self::with_manager(manager, 1)
    }

    pub fn open(db_path: &Path) -> AppResult<Self> {
        if let Some(parent) = db_path.parent() {
            ensure_dir(parent)?;
        }
        let manager = SqliteConnectionManager::file(db_path).with_init(configure_connection);
        Self::with_manager(manager, 4)
    }

    fn with_manager(manager: SqliteConnectionManager, max_size: u32) -> AppResult<Self> {
        let pool = Pool::builder()
            .max_size(max_size)
            .build(manager)
            .map_err(|e| AppError::database(format!("cannot open workspace store: {}", e)))?;
        let db = Self { pool };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> AppResult<()> {
        let conn = self.get_connection()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS workspace_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS objectives (
                id TEXT PRIMARY KEY,
                workspace TEXT NOT NULL,
                text TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                position INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                objective_id TEXT NOT NULL UNIQUE
                    REFERENCES objectives(id) ON DELETE CASCADE,
                user_query TEXT NOT NULL,
                status TEXT NOT NULL,
                terminal_reason TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS conversation_steps (
                conversation_id TEXT NOT NULL
                    REFERENCES conversations(id) ON DELETE CASCADE,
                step_id INTEGER NOT NULL,
                step_type TEXT NOT NULL,
                llm_request TEXT,
                llm_response TEXT,
                llm_usage TEXT,
                results TEXT,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                completed_at TEXT,
                PRIMARY KEY (conversation_id, step_id)
            );

            CREATE TABLE IF NOT EXISTS tool_executions (
                conversation_id TEXT NOT NULL,
                step_id INTEGER NOT NULL,
                position INTEGER NOT NULL,
                tool_name TEXT NOT NULL,
                parameters TEXT NOT NULL,
                result TEXT,
                error TEXT,
                execution_time_ms INTEGER NOT NULL,
                PRIMARY KEY (conversation_id, step_id, position),
                FOREIGN KEY (conversation_id, step_id)
                    REFERENCES conversation_steps(conversation_id, step_id) ON DELETE CASCADE,
                CHECK ((result IS NULL) <> (error IS NULL))
            );

            CREATE INDEX IF NOT EXISTS idx_objectives_position ON objectives(position);",
        )?;

        conn.execute(
            "INSERT OR IGNORE INTO workspace_meta (key, value) VALUES ('schema_version', ?1)",
            params![SCHEMA_VERSION.to_string()],
        )?;

        Ok(())
    }

    pub fn get_connection(&self) -> AppResult<r2d2::PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// `SELECT 1` round trip.
    pub fn is_healthy(&self) -> bool {
        self.get_connection()
            .map(|conn| conn.query_row("SELECT 1", [], |_| Ok(())).is_ok())
            .unwrap_or(false)
    }

    // ========================================================================
    // Workspace graph
    // ========================================================================

    /// Replace the stored graph with `workspace` in a single transaction.
    pub fn save_workspace(&self, workspace: &Workspace) -> AppResult<()> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction()?;

        set_meta(&tx, "name", &workspace.name)?;
        set_meta(&tx, "created_at", &workspace.created_at.to_rfc3339())?;

        let keep: Vec<String> = workspace
            .objectives
            .iter()
            .map(|r| r.objective.id.to_string())
            .collect();
        let stored: Vec<String> = {
            let mut stmt = tx.prepare("SELECT id FROM objectives")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids
        };
        for id in stored.iter().filter(|id| !keep.contains(id)) {
            tx.execute("DELETE FROM objectives WHERE id = ?1", params![id])?;
        }

        for (position, record) in workspace.objectives.iter().enumerate() {
            write_record(&tx, record, position as i64)?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Load the stored graph. Objectives come back in creation order with
    /// steps ordered by `step_id`; statuses are returned as stored.
    pub fn load_workspace(&self, name: &str, path: &Path) -> AppResult<Workspace> {
        let conn = self.get_connection()?;

        let created_at = match get_meta(&conn, "created_at")? {
            Some(text) => parse_time(&text)?,
            None => Utc::now(),
        };
        let mut workspace = Workspace {
            name: name.to_string(),
            path: path.to_path_buf(),
            created_at,
            objectives: Vec::new(),
        };

        let objectives = {
            let mut stmt = conn.prepare(
                "SELECT id, workspace, text, status, created_at FROM objectives ORDER BY position",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        for (id, ws, text, status, created_at) in objectives {
            let objective = Objective {
                id: parse_uuid(&id)?,
                workspace: ws,
                text,
                created_at: parse_time(&created_at)?,
                status: status.parse::<ObjectiveStatus>().map_err(AppError::database)?,
                unsaved: false,
            };
            let conversation = read_conversation(&conn, objective.id)?;
            workspace.objectives.push(ObjectiveRecord {
                objective,
                conversation,
            });
        }

        Ok(workspace)
    }

    /// Delete one objective; its conversation, steps and tool executions cascade.
    pub fn delete_objective(&self, id: Uuid) -> AppResult<bool> {
        let conn = self.get_connection()?;
        let removed = conn.execute(
            "DELETE FROM objectives WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(removed > 0)
    }

    /// Number of stored steps for an objective
    pub fn count_steps(&self, objective_id: Uuid) -> AppResult<u32> {
        let conn = self.get_connection()?;
        let count: u32 = conn.query_row(
            "SELECT COUNT(*) FROM conversation_steps s
             JOIN conversations c ON c.id = s.conversation_id
             WHERE c.objective_id = ?1",
            params![objective_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.pool.state();
        f.debug_struct("Database")
            .field("connections", &state.connections)
            .field("idle", &state.idle_connections)
            .finish()
    }
}

// ============================================================================
// Row mapping
// ============================================================================

/// Per-connection setup: foreign keys are off by default in SQLite.
fn configure_connection(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")
}

fn set_meta(tx: &Transaction<'_>, key: &str, value: &str) -> AppResult<()> {
    tx.execute(
        "INSERT INTO workspace_meta (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = ?2",
        params![key, value],
    )?;
    Ok(())
}

fn get_meta(conn: &Connection, key: &str) -> AppResult<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT value FROM workspace_meta WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?)
}

fn write_record(tx: &Transaction<'_>, record: &ObjectiveRecord, position: i64) -> AppResult<()> {
    let objective = &record.objective;
    let conversation = &record.conversation;
    let objective_id = objective.id.to_string();
    let conversation_id = conversation.id().to_string();

    tx.execute(
        "INSERT INTO objectives (id, workspace, text, status, created_at, position)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
            workspace = ?2, text = ?3, status = ?4, created_at = ?5, position = ?6",
        params![
            objective_id,
            objective.workspace,
            objective.text,
            objective.status.as_str(),
            objective.created_at.to_rfc3339(),
            position
        ],
    )?;

    let terminal_reason = conversation
        .terminal_reason()
        .map(|r| r.as_str().to_string());
    tx.execute(
        "INSERT INTO conversations
            (id, objective_id, user_query, status, terminal_reason, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(id) DO UPDATE SET
            user_query = ?3, status = ?4, terminal_reason = ?5, updated_at = ?7",
        params![
            conversation_id,
            objective_id,
            conversation.user_query(),
            enum_text(&conversation.status())?,
            terminal_reason,
            conversation.created_at().to_rfc3339(),
            conversation.updated_at().to_rfc3339()
        ],
    )?;

    tx.execute(
        "DELETE FROM conversation_steps WHERE conversation_id = ?1",
        params![conversation_id],
    )?;
    for step in conversation.steps() {
        write_step(tx, &conversation_id, step)?;
    }
    Ok(())
}

fn write_step(tx: &Transaction<'_>, conversation_id: &str, step: &ConversationStep) -> AppResult<()> {
    let usage = step
        .llm_usage
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let results = step.results().map(serde_json::to_string).transpose()?;

    tx.execute(
        "INSERT INTO conversation_steps
            (conversation_id, step_id, step_type, llm_request, llm_response, llm_usage,
             results, status, created_at, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            conversation_id,
            step.step_id(),
            step.step_type().as_str(),
            step.llm_request,
            step.llm_response,
            usage,
            results,
            step.status().as_str(),
            step.created_at().to_rfc3339(),
            step.completed_at().map(|t| t.to_rfc3339())
        ],
    )?;

    for (position, exec) in step.tool_calls().iter().enumerate() {
        write_tool_execution(tx, conversation_id, step.step_id(), position as i64, exec)?;
    }
    Ok(())
}

fn write_tool_execution(
    tx: &Transaction<'_>,
    conversation_id: &str,
    step_id: u32,
    position: i64,
    exec: &ToolExecution,
) -> AppResult<()> {
    tx.execute(
        "INSERT INTO tool_executions
            (conversation_id, step_id, position, tool_name, parameters, result, error,
             execution_time_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            conversation_id,
            step_id,
            position,
            exec.tool_name(),
            serde_json::to_string(exec.parameters())?,
            exec.result().map(serde_json::to_string).transpose()?,
            exec.error(),
            exec.execution_time_ms() as i64
        ],
    )?;
    Ok(())
}

fn read_conversation(conn: &Connection, objective_id: Uuid) -> AppResult<Conversation> {
    let (id, user_query, status, terminal_reason, created_at, updated_at) = conn
        .query_row(
            "SELECT id, user_query, status, terminal_reason, created_at, updated_at
             FROM conversations WHERE objective_id = ?1",
            params![objective_id.to_string()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            },
        )
        .optional()?
        .ok_or_else(|| {
            AppError::database(format!("objective {} has no conversation", objective_id))
        })?;

    let steps = read_steps(conn, &id)?;
    let conversation = Conversation::restore(
        parse_uuid(&id)?,
        objective_id,
        user_query,
        parse_enum(&status)?,
        terminal_reason.as_deref().map(parse_enum).transpose()?,
        steps,
        parse_time(&created_at)?,
        parse_time(&updated_at)?,
    )?;
    Ok(conversation)
}

fn read_steps(conn: &Connection, conversation_id: &str) -> AppResult<Vec<ConversationStep>> {
    let mut tool_calls: Vec<(u32, Value)> = {
        let mut stmt = conn.prepare(
            "SELECT step_id, tool_name, parameters, result, error, execution_time_ms
             FROM tool_executions WHERE conversation_id = ?1
             ORDER BY step_id, position",
        )?;
        let rows = stmt
            .query_map(params![conversation_id], |row| {
                Ok((
                    row.get::<_, u32>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut calls = Vec::with_capacity(rows.len());
        for (step_id, tool_name, parameters, result, error, time_ms) in rows {
            let mut record = Map::new();
            record.insert("tool_name".into(), Value::String(tool_name));
            record.insert("parameters".into(), serde_json::from_str(&parameters)?);
            if let Some(result) = result {
                record.insert("result".into(), serde_json::from_str(&result)?);
            }
            if let Some(error) = error {
                record.insert("error".into(), Value::String(error));
            }
            record.insert("execution_time_ms".into(), json!(time_ms));
            calls.push((step_id, Value::Object(record)));
        }
        calls
    };
    tool_calls.reverse();

    let mut stmt = conn.prepare(
        "SELECT step_id, step_type, llm_request, llm_response, llm_usage, results, status,
                created_at, completed_at
         FROM conversation_steps WHERE conversation_id = ?1
         ORDER BY step_id",
    )?;
    let rows = stmt
        .query_map(params![conversation_id], |row| {
            Ok((
                row.get::<_, u32>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, Option<String>>(8)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut steps = Vec::with_capacity(rows.len());
    for (step_id, step_type, request, response, usage, results, status, created, completed) in rows
    {
        let mut calls = Vec::new();
        while tool_calls.last().map(|(id, _)| *id == step_id).unwrap_or(false) {
            if let Some((_, call)) = tool_calls.pop() {
                calls.push(call);
            }
        }

        let mut step = Map::new();
        step.insert("step_id".into(), json!(step_id));
        step.insert("step_type".into(), Value::String(step_type));
        if let Some(request) = request {
            step.insert("llm_request".into(), Value::String(request));
        }
        if let Some(response) = response {
            step.insert("llm_response".into(), Value::String(response));
        }
        if let Some(usage) = usage {
            step.insert("llm_usage".into(), serde_json::from_str(&usage)?);
        }
        step.insert("tool_calls".into(), Value::Array(calls));
        if let Some(results) = results {
            step.insert("results".into(), serde_json::from_str(&results)?);
        }
        step.insert("status".into(), Value::String(status));
        step.insert("created_at".into(), Value::String(created));
        if let Some(completed) = completed {
            step.insert("completed_at".into(), Value::String(completed));
        }

        let step: ConversationStep = serde_json::from_value(Value::Object(step))
            .map_err(|e| AppError::database(format!("step {} is corrupt: {}", step_id, e)))?;
        steps.push(step);
    }

    if !tool_calls.is_empty() {
        return Err(AppError::database(format!(
            "conversation {} has tool executions without a step",
            conversation_id
        )));
    }
    Ok(steps)
}

fn enum_text<T: Serialize>(value: &T) -> AppResult<String> {
    match serde_json::to_value(value)? {
        Value::String(text) => Ok(text),
        other => Err(AppError::internal(format!(
            "expected a string enum, got {}",
            other
        ))),
    }
}

fn parse_enum<T: DeserializeOwned>(text: &str) -> AppResult<T> {
    serde_json::from_value(Value::String(text.to_string()))
        .map_err(|e| AppError::database(format!("unexpected value '{}': {}", text, e)))
}

fn parse_uuid(text: &str) -> AppResult<Uuid> {
    Uuid::parse_str(text).map_err(|e| AppError::database(format!("invalid id '{}': {}", text, e)))
}

fn parse_time(text: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| AppError::database(format!("invalid timestamp '{}': {}", text, e)))
}
