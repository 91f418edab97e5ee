use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rusqlite::{params, Connection as SqliteConnection, OptionalExtension, Row};
use tracing::{debug, warn};

use cadence_core::error::{CadenceError, Result};
use cadence_core::traits::{ExecutionStore, JobStore, WorkflowSource};
use cadence_core::types::*;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS workflows (
        id TEXT PRIMARY KEY,
        owner_id TEXT NOT NULL,
        name TEXT NOT NULL,
        active INTEGER NOT NULL DEFAULT 1
    );

    CREATE TABLE IF NOT EXISTS agents (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        workflow_id TEXT NOT NULL REFERENCES workflows(id),
        name TEXT NOT NULL,
        role TEXT NOT NULL DEFAULT '',
        model TEXT NOT NULL,
        instructions TEXT NOT NULL DEFAULT '',
        capabilities TEXT NOT NULL DEFAULT '[]',
        output_schema TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_agents_workflow ON agents(workflow_id, seq);

    CREATE TABLE IF NOT EXISTS connections (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        workflow_id TEXT NOT NULL REFERENCES workflows(id),
        from_agent_id TEXT,
        to_agent_id TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_connections_workflow ON connections(workflow_id, seq);

    CREATE TABLE IF NOT EXISTS executions (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        workflow_id TEXT NOT NULL,
        owner_id TEXT NOT NULL,
        status TEXT NOT NULL,
        started_at TEXT,
        completed_at TEXT,
        result TEXT,
        input TEXT NOT NULL,
        error_message TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_executions_workflow ON executions(workflow_id, seq);

    CREATE TABLE IF NOT EXISTS jobs (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        job_id TEXT NOT NULL UNIQUE,
        workflow_id TEXT NOT NULL,
        owner_id TEXT NOT NULL,
        input TEXT NOT NULL,
        schedule TEXT NOT NULL,
        next_fire_time TEXT,
        paused INTEGER NOT NULL DEFAULT 0
    );";

fn db_err(e: rusqlite::Error) -> CadenceError {
    CadenceError::Database(e.to_string())
}

fn parse_ts(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// SQLite-backed workflow definitions, execution records and (optionally) jobs.
pub struct SqliteStore {
    conn: Mutex<SqliteConnection>,
}

impl SqliteStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        // Create parent directories
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CadenceError::Database(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = SqliteConnection::open(path).map_err(db_err)?;

        // Enable WAL mode for better concurrent performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        debug!(path = %path.display(), "SQLite store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = SqliteConnection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, SqliteConnection>> {
        self.conn
            .lock()
            .map_err(|e| CadenceError::Database(e.to_string()))
    }

    /// Write a workflow definition (used by seeding and the editor import path).
    /// Rows are inserted in the graph's order, which becomes insertion order.
    pub fn insert_graph(&self, graph: &WorkflowGraph) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err)?;

        let wf = &graph.workflow;
        tx.execute(
            "INSERT INTO workflows (id, owner_id, name, active) VALUES (?1, ?2, ?3, ?4)",
            params![wf.id, wf.owner_id, wf.name, wf.active],
        )
        .map_err(db_err)?;

        for agent in &graph.agents {
            let capabilities = serde_json::to_string(&agent.capabilities)?;
            let output_schema = agent
                .output_schema
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            tx.execute(
                "INSERT INTO agents (id, workflow_id, name, role, model, instructions, capabilities, output_schema)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    agent.id,
                    wf.id,
                    agent.name,
                    agent.role,
                    agent.model,
                    agent.instructions,
                    capabilities,
                    output_schema
                ],
            )
            .map_err(db_err)?;
        }

        for conn_row in &graph.connections {
            tx.execute(
                "INSERT INTO connections (id, workflow_id, from_agent_id, to_agent_id)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    conn_row.id,
                    wf.id,
                    conn_row.from_agent_id,
                    conn_row.to_agent_id
                ],
            )
            .map_err(db_err)?;
        }

        tx.commit().map_err(db_err)?;
        debug!(workflow_id = %wf.id, agents = graph.agents.len(), "Workflow graph stored");
        Ok(())
    }
}

fn load_workflow(conn: &SqliteConnection, workflow_id: &str) -> Result<Workflow> {
    conn.query_row(
        "SELECT id, owner_id, name, active FROM workflows WHERE id = ?1",
        params![workflow_id],
        |row| {
            Ok(Workflow {
                id: row.get(0)?,
                owner_id: row.get(1)?,
                name: row.get(2)?,
                active: row.get(3)?,
            })
        },
    )
    .optional()
    .map_err(db_err)?
    .ok_or_else(|| CadenceError::not_found("workflow", workflow_id))
}

impl WorkflowSource for SqliteStore {
    fn workflow(&self, workflow_id: &str) -> BoxFuture<'_, Result<Workflow>> {
        let workflow_id = workflow_id.to_string();
        Box::pin(async move {
            let conn = self.lock()?;
            load_workflow(&conn, &workflow_id)
        })
    }

    fn graph(&self, workflow_id: &str) -> BoxFuture<'_, Result<WorkflowGraph>> {
        let workflow_id = workflow_id.to_string();
        Box::pin(async move {
            let conn = self.lock()?;
            let workflow = load_workflow(&conn, &workflow_id)?;

            let mut stmt = conn
                .prepare(
                    "SELECT id, workflow_id, name, role, model, instructions, capabilities, output_schema
                     FROM agents WHERE workflow_id = ?1 ORDER BY seq ASC",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![workflow_id], |row| {
                    let capabilities: String = row.get(6)?;
                    let output_schema: Option<String> = row.get(7)?;
                    Ok((
                        Agent {
                            id: row.get(0)?,
                            workflow_id: row.get(1)?,
                            name: row.get(2)?,
                            role: row.get(3)?,
                            model: row.get(4)?,
                            instructions: row.get(5)?,
                            capabilities: vec![],
                            output_schema: None,
                        },
                        capabilities,
                        output_schema,
                    ))
                })
                .map_err(db_err)?;

            let mut agents = Vec::new();
            for row in rows {
                let (mut agent, capabilities, output_schema) = row.map_err(db_err)?;
                agent.capabilities = serde_json::from_str(&capabilities).map_err(|e| {
                    warn!(agent_id = %agent.id, error = %e, "Corrupt agent capabilities");
                    CadenceError::Json(e)
                })?;
                agent.output_schema = output_schema
                    .map(|s| serde_json::from_str(&s))
                    .transpose()
                    .map_err(|e| {
                        warn!(agent_id = %agent.id, error = %e, "Corrupt agent output schema");
                        CadenceError::Json(e)
                    })?;
                agents.push(agent);
            }

            let mut stmt = conn
                .prepare(
                    "SELECT id, workflow_id, from_agent_id, to_agent_id
                     FROM connections WHERE workflow_id = ?1 ORDER BY seq ASC",
                )
                .map_err(db_err)?;
            let connections = stmt
                .query_map(params![workflow_id], |row| {
                    Ok(Connection {
                        id: row.get(0)?,
                        workflow_id: row.get(1)?,
                        from_agent_id: row.get(2)?,
                        to_agent_id: row.get(3)?,
                    })
                })
                .map_err(db_err)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db_err)?;

            Ok(WorkflowGraph {
                workflow,
                agents,
                connections,
            })
        })
    }
}

fn execution_from_row(row: &Row<'_>) -> rusqlite::Result<Execution> {
    let status: String = row.get(3)?;
    Ok(Execution {
        id: ExecutionId(row.get(0)?),
        workflow_id: row.get(1)?,
        owner_id: row.get(2)?,
        status: ExecutionStatus::parse(&status).unwrap_or(ExecutionStatus::Failed),
        started_at: parse_ts(row.get(4)?),
        completed_at: parse_ts(row.get(5)?),
        result: row.get(6)?,
        input: row.get(7)?,
        error_message: row.get(8)?,
    })
}

const EXECUTION_COLUMNS: &str =
    "id, workflow_id, owner_id, status, started_at, completed_at, result, input, error_message";

impl ExecutionStore for SqliteStore {
    fn save(&self, execution: &Execution) -> BoxFuture<'_, Result<()>> {
        let exec = execution.clone();
        Box::pin(async move {
            let conn = self.lock()?;
            conn.execute(
                "INSERT INTO executions (id, workflow_id, owner_id, status, started_at, completed_at, result, input, error_message)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(id) DO UPDATE SET
                    status = excluded.status,
                    started_at = excluded.started_at,
                    completed_at = excluded.completed_at,
                    result = excluded.result,
                    error_message = excluded.error_message",
                params![
                    exec.id.0,
                    exec.workflow_id,
                    exec.owner_id,
                    exec.status.as_str(),
                    exec.started_at.map(|t| t.to_rfc3339()),
                    exec.completed_at.map(|t| t.to_rfc3339()),
                    exec.result,
                    exec.input,
                    exec.error_message
                ],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    fn get(&self, id: &ExecutionId) -> BoxFuture<'_, Result<Option<Execution>>> {
        let id = id.0.clone();
        Box::pin(async move {
            let conn = self.lock()?;
            conn.query_row(
                &format!("SELECT {} FROM executions WHERE id = ?1", EXECUTION_COLUMNS),
                params![id],
                execution_from_row,
            )
            .optional()
            .map_err(db_err)
        })
    }

    fn list_for_workflow(
        &self,
        workflow_id: &str,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<Execution>>> {
        let workflow_id = workflow_id.to_string();
        Box::pin(async move {
            let conn = self.lock()?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM executions WHERE workflow_id = ?1 ORDER BY seq DESC LIMIT ?2",
                    EXECUTION_COLUMNS
                ))
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![workflow_id, limit as i64], execution_from_row)
                .map_err(db_err)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db_err)?;
            Ok(rows)
        })
    }
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<(Job, String)> {
    let schedule: String = row.get(4)?;
    Ok((
        Job {
            job_id: row.get(0)?,
            workflow_id: row.get(1)?,
            owner_id: row.get(2)?,
            input: row.get(3)?,
            // Filled in by the caller once the JSON column is decoded.
            schedule: ScheduleSpec::Interval {
                hours: 0,
                minutes: 0,
                seconds: 0,
            },
            next_fire_time: parse_ts(row.get(5)?),
            paused: row.get(6)?,
        },
        schedule,
    ))
}

fn decode_job((mut job, schedule): (Job, String)) -> Result<Job> {
    job.schedule = serde_json::from_str(&schedule)?;
    Ok(job)
}

const JOB_COLUMNS: &str = "job_id, workflow_id, owner_id, input, schedule, next_fire_time, paused";

fn select_job(conn: &SqliteConnection, job_id: &str) -> Result<Option<Job>> {
    conn.query_row(
        &format!("SELECT {} FROM jobs WHERE job_id = ?1", JOB_COLUMNS),
        params![job_id],
        job_from_row,
    )
    .optional()
    .map_err(db_err)?
    .map(decode_job)
    .transpose()
}

impl JobStore for SqliteStore {
    fn upsert(&self, job: Job) -> Result<Option<Job>> {
        let conn = self.lock()?;
        let previous = select_job(&conn, &job.job_id)?;
        let schedule = serde_json::to_string(&job.schedule)?;
        conn.execute(
            "INSERT INTO jobs (job_id, workflow_id, owner_id, input, schedule, next_fire_time, paused)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(job_id) DO UPDATE SET
                workflow_id = excluded.workflow_id,
                owner_id = excluded.owner_id,
                input = excluded.input,
                schedule = excluded.schedule,
                next_fire_time = excluded.next_fire_time,
                paused = excluded.paused",
            params![
                job.job_id,
                job.workflow_id,
                job.owner_id,
                job.input,
                schedule,
                job.next_fire_time.map(|t| t.to_rfc3339()),
                job.paused
            ],
        )
        .map_err(db_err)?;
        Ok(previous)
    }

    fn get(&self, job_id: &str) -> Result<Option<Job>> {
        let conn = self.lock()?;
        select_job(&conn, job_id)
    }

    fn remove(&self, job_id: &str) -> Result<Option<Job>> {
        let conn = self.lock()?;
        let previous = select_job(&conn, job_id)?;
        if previous.is_some() {
            conn.execute("DELETE FROM jobs WHERE job_id = ?1", params![job_id])
                .map_err(db_err)?;
        }
        Ok(previous)
    }

    fn list(&self) -> Result<Vec<Job>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!("SELECT {} FROM jobs ORDER BY seq ASC", JOB_COLUMNS))
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], job_from_row)
            .map_err(db_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)?;
        rows.into_iter().map(decode_job).collect()
    }
}
