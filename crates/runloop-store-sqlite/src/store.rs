// runloop-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Run Store
// Description: Durable RunRepository and RunEventJournal backed by SQLite WAL.
// Purpose: Persist run rows and journal events with the CAS and dedup rules.
// Dependencies: runloop-core, rusqlite, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! This module implements the durable store. Run status transitions execute
//! as single conditional UPDATE statements, journal appends honor the
//! `(run_id, channel, idempotency_key)` unique index (insert-or-get with a
//! dedup flag) and terminal-type uniqueness, and listings paginate on the
//! autoincrement event id. Loads fail closed on malformed rows.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use rusqlite::Connection;
use rusqlite::ErrorCode;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::params;
use runloop_core::AgentId;
use runloop_core::AppendEvent;
use runloop_core::EventChannel;
use runloop_core::ProjectId;
use runloop_core::Run;
use runloop_core::RunEvent;
use runloop_core::RunId;
use runloop_core::RunStatus;
use runloop_core::Timestamp;
use runloop_core::WorkflowId;
use runloop_core::interfaces::EventPage;
use runloop_core::interfaces::RunEventJournal;
use runloop_core::interfaces::RunRepository;
use runloop_core::interfaces::StoreError;
use runloop_core::is_terminal_event_type;
use serde::Deserialize;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` sync mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` run store.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Store corruption or malformed row.
    #[error("sqlite store corruption: {0}")]
    Corrupt(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid store data.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) => Self::Store(message),
            SqliteStoreError::Corrupt(message) | SqliteStoreError::VersionMismatch(message) => {
                Self::Corrupt(message)
            }
            SqliteStoreError::Invalid(message) => Self::Invalid(message),
        }
    }
}

impl From<rusqlite::Error> for SqliteStoreError {
    fn from(error: rusqlite::Error) -> Self {
        Self::Db(error.to_string())
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed run repository and event journal with WAL support.
#[derive(Clone)]
pub struct SqliteRunStore {
    /// Shared `SQLite` connection guarded by a mutex.
    connection: Arc<Mutex<Connection>>,
}

impl SqliteRunStore {
    /// Opens an `SQLite`-backed run store.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// initialized.
    pub fn new(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        ensure_parent_dir(&config.path)?;
        let connection = open_connection(config)?;
        initialize_schema(&connection)?;
        Ok(Self { connection: Arc::new(Mutex::new(connection)) })
    }

    /// Opens an in-memory store (tests).
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when initialization fails.
    pub fn in_memory() -> Result<Self, SqliteStoreError> {
        let connection = Connection::open_in_memory()?;
        connection.pragma_update(None, "foreign_keys", "on")?;
        initialize_schema(&connection)?;
        Ok(Self { connection: Arc::new(Mutex::new(connection)) })
    }

    /// Locks the connection, mapping poisoning onto a store error.
    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.connection
            .lock()
            .map_err(|_| StoreError::Store("sqlite connection lock poisoned".to_string()))
    }
}

// ============================================================================
// SECTION: Connection Setup
// ============================================================================

/// Creates the parent directory for the database file when missing.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|error| SqliteStoreError::Io(error.to_string()))?;
        }
    }
    Ok(())
}

/// Opens the database connection and applies pragmas.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let connection = Connection::open(&config.path)?;
    connection.busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))?;
    connection.pragma_update(None, "journal_mode", "wal")?;
    connection.pragma_update(None, "synchronous", config.sync_mode.pragma_value())?;
    connection.pragma_update(None, "foreign_keys", "on")?;
    Ok(connection)
}

/// Creates tables and verifies the schema version.
fn initialize_schema(connection: &Connection) -> Result<(), SqliteStoreError> {
    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS store_meta (
             key TEXT PRIMARY KEY,
             value TEXT NOT NULL
         );
         CREATE TABLE IF NOT EXISTS runs (
             id TEXT PRIMARY KEY,
             project_id TEXT NOT NULL,
             workflow_id TEXT NOT NULL,
             agent_id TEXT,
             status TEXT NOT NULL,
             created_at INTEGER NOT NULL,
             started_at INTEGER,
             finished_at INTEGER,
             error TEXT
         );
         CREATE INDEX IF NOT EXISTS idx_runs_workflow_created
             ON runs (workflow_id, created_at DESC);
         CREATE INDEX IF NOT EXISTS idx_runs_project_created
             ON runs (project_id, created_at DESC);
         CREATE TABLE IF NOT EXISTS run_events (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             run_id TEXT NOT NULL REFERENCES runs (id) ON DELETE CASCADE,
             channel TEXT NOT NULL,
             type TEXT NOT NULL,
             payload TEXT NOT NULL,
             idempotency_key TEXT,
             created_at INTEGER NOT NULL
         );
         CREATE UNIQUE INDEX IF NOT EXISTS idx_run_events_idempotency
             ON run_events (run_id, channel, idempotency_key)
             WHERE idempotency_key IS NOT NULL;
         CREATE INDEX IF NOT EXISTS idx_run_events_type
             ON run_events (run_id, channel, type);",
    )?;

    let existing: Option<String> = connection
        .query_row("SELECT value FROM store_meta WHERE key = 'schema_version'", [], |row| {
            row.get(0)
        })
        .optional()?;
    match existing {
        None => {
            connection.execute(
                "INSERT INTO store_meta (key, value) VALUES ('schema_version', ?1)",
                params![SCHEMA_VERSION.to_string()],
            )?;
        }
        Some(value) if value == SCHEMA_VERSION.to_string() => {}
        Some(value) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "expected schema {SCHEMA_VERSION}, found {value}"
            )));
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Row Mapping
// ============================================================================

/// Maps a `runs` row into the domain entity.
fn run_from_row(row: &Row<'_>) -> Result<Run, rusqlite::Error> {
    let status_raw: String = row.get("status")?;
    let status = RunStatus::parse(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unknown run status: {status_raw}").into(),
        )
    })?;
    Ok(Run {
        run_id: RunId::new(row.get::<_, String>("id")?),
        project_id: ProjectId::new(row.get::<_, String>("project_id")?),
        workflow_id: WorkflowId::new(row.get::<_, String>("workflow_id")?),
        agent_id: row.get::<_, Option<String>>("agent_id")?.map(AgentId::new),
        status,
        created_at: Timestamp::from_unix_millis(row.get("created_at")?),
        started_at: row.get::<_, Option<i64>>("started_at")?.map(Timestamp::from_unix_millis),
        finished_at: row.get::<_, Option<i64>>("finished_at")?.map(Timestamp::from_unix_millis),
        error: row.get("error")?,
    })
}

/// Maps a `run_events` row into the domain entity.
fn event_from_row(row: &Row<'_>) -> Result<(RunEvent, String), rusqlite::Error> {
    let channel_raw: String = row.get("channel")?;
    let payload_raw: String = row.get("payload")?;
    let event = RunEvent {
        event_id: row.get("id")?,
        run_id: RunId::new(row.get::<_, String>("run_id")?),
        channel: EventChannel::parse(&channel_raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("unknown event channel: {channel_raw}").into(),
            )
        })?,
        event_type: row.get("type")?,
        payload: Map::new(),
        created_at: Timestamp::from_unix_millis(row.get("created_at")?),
        idempotency_key: row.get("idempotency_key")?,
        deduped: false,
    };
    Ok((event, payload_raw))
}

/// Parses a payload column into an object map, failing closed.
fn parse_payload(payload_raw: &str) -> Result<Map<String, Value>, StoreError> {
    match serde_json::from_str::<Value>(payload_raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(StoreError::Corrupt("event payload is not a json object".to_string())),
        Err(error) => Err(StoreError::Corrupt(format!("event payload parse failed: {error}"))),
    }
}

/// Columns selected for event rows.
const EVENT_COLUMNS: &str = "id, run_id, channel, type, payload, idempotency_key, created_at";

// ============================================================================
// SECTION: RunRepository
// ============================================================================

impl RunRepository for SqliteRunStore {
    fn save(&self, run: &Run) -> Result<(), StoreError> {
        let connection = self.lock()?;
        connection
            .execute(
                "INSERT INTO runs
                     (id, project_id, workflow_id, agent_id, status, created_at, started_at,
                      finished_at, error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT (id) DO UPDATE SET
                     project_id = excluded.project_id,
                     workflow_id = excluded.workflow_id,
                     agent_id = excluded.agent_id,
                     status = excluded.status,
                     created_at = excluded.created_at,
                     started_at = excluded.started_at,
                     finished_at = excluded.finished_at,
                     error = excluded.error",
                params![
                    run.run_id.as_str(),
                    run.project_id.as_str(),
                    run.workflow_id.as_str(),
                    run.agent_id.as_ref().map(AgentId::as_str),
                    run.status.as_str(),
                    run.created_at.as_unix_millis(),
                    run.started_at.map(Timestamp::as_unix_millis),
                    run.finished_at.map(Timestamp::as_unix_millis),
                    run.error.as_deref(),
                ],
            )
            .map_err(|error| StoreError::from(SqliteStoreError::from(error)))?;
        Ok(())
    }

    fn get_by_id(&self, run_id: &RunId) -> Result<Run, StoreError> {
        self.find_by_id(run_id)?.ok_or_else(|| StoreError::NotFound {
            entity: "Run",
            id: run_id.as_str().to_string(),
        })
    }

    fn find_by_id(&self, run_id: &RunId) -> Result<Option<Run>, StoreError> {
        let connection = self.lock()?;
        connection
            .query_row(
                "SELECT id, project_id, workflow_id, agent_id, status, created_at, started_at,
                        finished_at, error
                 FROM runs WHERE id = ?1",
                params![run_id.as_str()],
                run_from_row,
            )
            .optional()
            .map_err(|error| StoreError::from(SqliteStoreError::from(error)))
    }

    fn exists(&self, run_id: &RunId) -> Result<bool, StoreError> {
        let connection = self.lock()?;
        let count: i64 = connection
            .query_row(
                "SELECT COUNT(*) FROM runs WHERE id = ?1",
                params![run_id.as_str()],
                |row| row.get(0),
            )
            .map_err(|error| StoreError::from(SqliteStoreError::from(error)))?;
        Ok(count > 0)
    }

    fn delete(&self, run_id: &RunId) -> Result<(), StoreError> {
        let connection = self.lock()?;
        connection
            .execute("DELETE FROM runs WHERE id = ?1", params![run_id.as_str()])
            .map_err(|error| StoreError::from(SqliteStoreError::from(error)))?;
        Ok(())
    }

    fn list_by_workflow_id(
        &self,
        workflow_id: &WorkflowId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Run>, StoreError> {
        let connection = self.lock()?;
        let mut statement = connection
            .prepare(
                "SELECT id, project_id, workflow_id, agent_id, status, created_at, started_at,
                        finished_at, error
                 FROM runs WHERE workflow_id = ?1
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?2 OFFSET ?3",
            )
            .map_err(|error| StoreError::from(SqliteStoreError::from(error)))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        let runs = statement
            .query_map(params![workflow_id.as_str(), limit, offset], run_from_row)
            .and_then(Iterator::collect::<Result<Vec<_>, _>>)
            .map_err(|error| StoreError::from(SqliteStoreError::from(error)))?;
        Ok(runs)
    }

    fn list_by_project_id(
        &self,
        project_id: &ProjectId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Run>, StoreError> {
        let connection = self.lock()?;
        let mut statement = connection
            .prepare(
                "SELECT id, project_id, workflow_id, agent_id, status, created_at, started_at,
                        finished_at, error
                 FROM runs WHERE project_id = ?1
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?2 OFFSET ?3",
            )
            .map_err(|error| StoreError::from(SqliteStoreError::from(error)))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        let runs = statement
            .query_map(params![project_id.as_str(), limit, offset], run_from_row)
            .and_then(Iterator::collect::<Result<Vec<_>, _>>)
            .map_err(|error| StoreError::from(SqliteStoreError::from(error)))?;
        Ok(runs)
    }

    fn list_by_agent_id(&self, agent_id: &AgentId) -> Result<Vec<Run>, StoreError> {
        let connection = self.lock()?;
        let mut statement = connection
            .prepare(
                "SELECT id, project_id, workflow_id, agent_id, status, created_at, started_at,
                        finished_at, error
                 FROM runs WHERE agent_id = ?1
                 ORDER BY created_at DESC, id DESC",
            )
            .map_err(|error| StoreError::from(SqliteStoreError::from(error)))?;
        let runs = statement
            .query_map(params![agent_id.as_str()], run_from_row)
            .and_then(Iterator::collect::<Result<Vec<_>, _>>)
            .map_err(|error| StoreError::from(SqliteStoreError::from(error)))?;
        Ok(runs)
    }

    fn count_by_workflow_id(&self, workflow_id: &WorkflowId) -> Result<usize, StoreError> {
        let connection = self.lock()?;
        let count: i64 = connection
            .query_row(
                "SELECT COUNT(*) FROM runs WHERE workflow_id = ?1",
                params![workflow_id.as_str()],
                |row| row.get(0),
            )
            .map_err(|error| StoreError::from(SqliteStoreError::from(error)))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn update_status_if_current(
        &self,
        run_id: &RunId,
        expected: RunStatus,
        target: RunStatus,
        finished_at: Option<Timestamp>,
    ) -> Result<bool, StoreError> {
        // The transition table is part of the CAS: a terminal `expected`
        // never matches a legal target, so terminal states are absorbing for
        // any call sequence.
        if !expected.can_transition_to(target) {
            return Ok(false);
        }
        let connection = self.lock()?;
        let now = Timestamp::now().as_unix_millis();
        let finished = if target.is_terminal() {
            Some(finished_at.map_or(now, Timestamp::as_unix_millis))
        } else {
            None
        };
        // One conditional statement is the whole CAS: the WHERE clause is the
        // compare, the row count is the verdict.
        let affected = connection
            .execute(
                "UPDATE runs SET
                     status = ?1,
                     started_at = CASE
                         WHEN ?1 = 'running' AND started_at IS NULL THEN ?2
                         ELSE started_at
                     END,
                     finished_at = COALESCE(?3, finished_at)
                 WHERE id = ?4 AND status = ?5",
                params![target.as_str(), now, finished, run_id.as_str(), expected.as_str()],
            )
            .map_err(|error| StoreError::from(SqliteStoreError::from(error)))?;
        Ok(affected == 1)
    }
}

// ============================================================================
// SECTION: RunEventJournal
// ============================================================================

impl RunEventJournal for SqliteRunStore {
    fn append(&self, event: AppendEvent) -> Result<RunEvent, StoreError> {
        let connection = self.lock()?;

        if is_terminal_event_type(&event.event_type) {
            if let Some(existing) = select_existing(
                &connection,
                "SELECT id, run_id, channel, type, payload, idempotency_key, created_at
                 FROM run_events
                 WHERE run_id = ?1 AND channel = ?2 AND type = ?3
                 ORDER BY id ASC LIMIT 1",
                params![event.run_id.as_str(), event.channel.as_str(), event.event_type],
            )? {
                return Ok(existing);
            }
        }

        let payload_json = serde_json::to_string(&Value::Object(event.payload.clone()))
            .map_err(|error| StoreError::Invalid(format!("payload serialize failed: {error}")))?;

        let inserted = connection.execute(
            "INSERT INTO run_events (run_id, channel, type, payload, idempotency_key, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                event.run_id.as_str(),
                event.channel.as_str(),
                event.event_type,
                payload_json,
                event.idempotency_key.as_deref(),
                event.created_at.as_unix_millis(),
            ],
        );

        match inserted {
            Ok(_) => {
                let event_id = connection.last_insert_rowid();
                Ok(RunEvent {
                    event_id,
                    run_id: event.run_id,
                    channel: event.channel,
                    event_type: event.event_type,
                    payload: event.payload,
                    created_at: event.created_at,
                    idempotency_key: event.idempotency_key,
                    deduped: false,
                })
            }
            Err(rusqlite::Error::SqliteFailure(failure, _))
                if failure.code == ErrorCode::ConstraintViolation
                    && event.idempotency_key.is_some() =>
            {
                // Insert-or-get: a concurrent append won the unique index.
                let key = event.idempotency_key.as_deref().unwrap_or_default();
                select_existing(
                    &connection,
                    "SELECT id, run_id, channel, type, payload, idempotency_key, created_at
                     FROM run_events
                     WHERE run_id = ?1 AND channel = ?2 AND idempotency_key = ?3
                     ORDER BY id ASC LIMIT 1",
                    params![event.run_id.as_str(), event.channel.as_str(), key],
                )?
                .ok_or_else(|| {
                    StoreError::Store("constraint hit without a matching row".to_string())
                })
            }
            Err(error) => Err(StoreError::from(SqliteStoreError::from(error))),
        }
    }

    fn list(
        &self,
        run_id: &RunId,
        channel: Option<EventChannel>,
        cursor: Option<i64>,
        limit: usize,
    ) -> Result<EventPage, StoreError> {
        let connection = self.lock()?;
        let floor = cursor.unwrap_or(0);
        let channel_filter = channel.map(|value| value.as_str().to_string());
        let fetch = i64::try_from(limit).unwrap_or(i64::MAX).saturating_add(1);

        let mut statement = connection
            .prepare(&format!(
                "SELECT {EVENT_COLUMNS} FROM run_events
                 WHERE run_id = ?1 AND (?2 IS NULL OR channel = ?2) AND id > ?3
                 ORDER BY id ASC LIMIT ?4"
            ))
            .map_err(|error| StoreError::from(SqliteStoreError::from(error)))?;
        let rows = statement
            .query_map(params![run_id.as_str(), channel_filter, floor, fetch], event_from_row)
            .and_then(Iterator::collect::<Result<Vec<_>, _>>)
            .map_err(|error| StoreError::from(SqliteStoreError::from(error)))?;

        let mut events = Vec::with_capacity(rows.len());
        for (mut event, payload_raw) in rows {
            event.payload = parse_payload(&payload_raw)?;
            events.push(event);
        }

        let has_more = events.len() > limit;
        events.truncate(limit);
        let next_cursor = if has_more { events.last().map(|event| event.event_id) } else { None };
        Ok(EventPage { events, next_cursor, has_more })
    }

    fn list_all(&self, run_id: &RunId) -> Result<Vec<RunEvent>, StoreError> {
        let connection = self.lock()?;
        let mut statement = connection
            .prepare(&format!(
                "SELECT {EVENT_COLUMNS} FROM run_events WHERE run_id = ?1 ORDER BY id ASC"
            ))
            .map_err(|error| StoreError::from(SqliteStoreError::from(error)))?;
        let rows = statement
            .query_map(params![run_id.as_str()], event_from_row)
            .and_then(Iterator::collect::<Result<Vec<_>, _>>)
            .map_err(|error| StoreError::from(SqliteStoreError::from(error)))?;

        let mut events = Vec::with_capacity(rows.len());
        for (mut event, payload_raw) in rows {
            event.payload = parse_payload(&payload_raw)?;
            events.push(event);
        }
        Ok(events)
    }

    fn list_by_type(
        &self,
        run_id: &RunId,
        channel: EventChannel,
        event_type: &str,
    ) -> Result<Vec<RunEvent>, StoreError> {
        let connection = self.lock()?;
        let mut statement = connection
            .prepare(&format!(
                "SELECT {EVENT_COLUMNS} FROM run_events
                 WHERE run_id = ?1 AND channel = ?2 AND type = ?3
                 ORDER BY id ASC"
            ))
            .map_err(|error| StoreError::from(SqliteStoreError::from(error)))?;
        let rows = statement
            .query_map(params![run_id.as_str(), channel.as_str(), event_type], event_from_row)
            .and_then(Iterator::collect::<Result<Vec<_>, _>>)
            .map_err(|error| StoreError::from(SqliteStoreError::from(error)))?;

        let mut events = Vec::with_capacity(rows.len());
        for (mut event, payload_raw) in rows {
            event.payload = parse_payload(&payload_raw)?;
            events.push(event);
        }
        Ok(events)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Runs a single-row event query and marks the result as deduped.
fn select_existing(
    connection: &Connection,
    sql: &str,
    parameters: impl rusqlite::Params,
) -> Result<Option<RunEvent>, StoreError> {
    let row = connection
        .query_row(sql, parameters, event_from_row)
        .optional()
        .map_err(|error| StoreError::from(SqliteStoreError::from(error)))?;
    match row {
        None => Ok(None),
        Some((mut event, payload_raw)) => {
            event.payload = parse_payload(&payload_raw)?;
            event.deduped = true;
            Ok(Some(event))
        }
    }
}
