// runloop-core/src/runtime/store.rs
// ============================================================================
// Module: In-Memory Stores
// Description: Mutex-guarded in-memory backends for runs, events, and tools.
// Purpose: Provide reference store implementations for tests and memory mode.
// Dependencies: crate::{core, interfaces}, serde_json
// ============================================================================

//! ## Overview
//! These stores implement the repository interfaces over plain maps guarded
//! by a mutex. They honor the same invariants as the durable store: monotone
//! event ids per journal, unique `(run_id, channel, idempotency_key)` rows,
//! terminal-type dedup, and the atomic CAS status transition.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use serde_json::Value;

use crate::core::AgentId;
use crate::core::AppendEvent;
use crate::core::EventChannel;
use crate::core::ProjectId;
use crate::core::Run;
use crate::core::RunEvent;
use crate::core::RunId;
use crate::core::RunStatus;
use crate::core::Timestamp;
use crate::core::ToolId;
use crate::core::WorkflowId;
use crate::core::WorkflowSpec;
use crate::core::is_terminal_event_type;
use crate::interfaces::EventPage;
use crate::interfaces::IdempotencyStore;
use crate::interfaces::RunEventJournal;
use crate::interfaces::RunRepository;
use crate::interfaces::StoreError;
use crate::interfaces::ToolRecord;
use crate::interfaces::ToolRepository;
use crate::interfaces::WorkflowRepository;

// ============================================================================
// SECTION: Run Store
// ============================================================================

/// Shared mutable state behind the memory run store.
#[derive(Debug, Default)]
struct RunStoreInner {
    /// Run rows keyed by run id.
    runs: BTreeMap<String, Run>,
    /// Journal rows ordered by insertion.
    events: Vec<RunEvent>,
    /// Next event id to assign.
    next_event_id: i64,
}

/// In-memory run repository and event journal.
#[derive(Debug, Clone, Default)]
pub struct MemoryRunStore {
    /// Guarded store state.
    inner: Arc<Mutex<RunStoreInner>>,
}

impl MemoryRunStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the inner state, mapping poisoning onto a store error.
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, RunStoreInner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Store("run store lock poisoned".to_string()))
    }
}

impl RunRepository for MemoryRunStore {
    fn save(&self, run: &Run) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.runs.insert(run.run_id.as_str().to_string(), run.clone());
        Ok(())
    }

    fn get_by_id(&self, run_id: &RunId) -> Result<Run, StoreError> {
        self.find_by_id(run_id)?.ok_or_else(|| StoreError::NotFound {
            entity: "Run",
            id: run_id.as_str().to_string(),
        })
    }

    fn find_by_id(&self, run_id: &RunId) -> Result<Option<Run>, StoreError> {
        let inner = self.lock()?;
        Ok(inner.runs.get(run_id.as_str()).cloned())
    }

    fn exists(&self, run_id: &RunId) -> Result<bool, StoreError> {
        let inner = self.lock()?;
        Ok(inner.runs.contains_key(run_id.as_str()))
    }

    fn delete(&self, run_id: &RunId) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.runs.remove(run_id.as_str());
        inner.events.retain(|event| event.run_id != *run_id);
        Ok(())
    }

    fn list_by_workflow_id(
        &self,
        workflow_id: &WorkflowId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Run>, StoreError> {
        let inner = self.lock()?;
        let mut runs: Vec<Run> =
            inner.runs.values().filter(|run| run.workflow_id == *workflow_id).cloned().collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(runs.into_iter().skip(offset).take(limit).collect())
    }

    fn list_by_project_id(
        &self,
        project_id: &ProjectId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Run>, StoreError> {
        let inner = self.lock()?;
        let mut runs: Vec<Run> =
            inner.runs.values().filter(|run| run.project_id == *project_id).cloned().collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(runs.into_iter().skip(offset).take(limit).collect())
    }

    fn list_by_agent_id(&self, agent_id: &AgentId) -> Result<Vec<Run>, StoreError> {
        let inner = self.lock()?;
        let mut runs: Vec<Run> = inner
            .runs
            .values()
            .filter(|run| run.agent_id.as_ref() == Some(agent_id))
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(runs)
    }

    fn count_by_workflow_id(&self, workflow_id: &WorkflowId) -> Result<usize, StoreError> {
        let inner = self.lock()?;
        Ok(inner.runs.values().filter(|run| run.workflow_id == *workflow_id).count())
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
        let mut inner = self.lock()?;
        let Some(run) = inner.runs.get_mut(run_id.as_str()) else {
            return Ok(false);
        };
        if run.status != expected {
            return Ok(false);
        }
        run.status = target;
        if target == RunStatus::Running && run.started_at.is_none() {
            run.started_at = Some(Timestamp::now());
        }
        if target.is_terminal() {
            run.finished_at = finished_at.or_else(|| Some(Timestamp::now()));
        }
        Ok(true)
    }
}

impl RunEventJournal for MemoryRunStore {
    fn append(&self, event: AppendEvent) -> Result<RunEvent, StoreError> {
        let mut inner = self.lock()?;

        if let Some(key) = event.idempotency_key.as_deref() {
            let existing = inner.events.iter().find(|row| {
                row.run_id == event.run_id
                    && row.channel == event.channel
                    && row.idempotency_key.as_deref() == Some(key)
            });
            if let Some(row) = existing {
                let mut hit = row.clone();
                hit.deduped = true;
                return Ok(hit);
            }
        }

        if is_terminal_event_type(&event.event_type) {
            let existing = inner.events.iter().find(|row| {
                row.run_id == event.run_id
                    && row.channel == event.channel
                    && row.event_type == event.event_type
            });
            if let Some(row) = existing {
                let mut hit = row.clone();
                hit.deduped = true;
                return Ok(hit);
            }
        }

        inner.next_event_id += 1;
        let row = RunEvent {
            event_id: inner.next_event_id,
            run_id: event.run_id,
            channel: event.channel,
            event_type: event.event_type,
            payload: event.payload,
            created_at: event.created_at,
            idempotency_key: event.idempotency_key,
            deduped: false,
        };
        inner.events.push(row.clone());
        Ok(row)
    }

    fn list(
        &self,
        run_id: &RunId,
        channel: Option<EventChannel>,
        cursor: Option<i64>,
        limit: usize,
    ) -> Result<EventPage, StoreError> {
        let inner = self.lock()?;
        let floor = cursor.unwrap_or(0);
        let mut events: Vec<RunEvent> = inner
            .events
            .iter()
            .filter(|row| {
                row.run_id == *run_id
                    && channel.is_none_or(|wanted| row.channel == wanted)
                    && row.event_id > floor
            })
            .cloned()
            .collect();
        events.sort_by_key(|row| row.event_id);

        let has_more = events.len() > limit;
        events.truncate(limit);
        let next_cursor = if has_more { events.last().map(|row| row.event_id) } else { None };
        Ok(EventPage { events, next_cursor, has_more })
    }

    fn list_all(&self, run_id: &RunId) -> Result<Vec<RunEvent>, StoreError> {
        let inner = self.lock()?;
        let mut events: Vec<RunEvent> =
            inner.events.iter().filter(|row| row.run_id == *run_id).cloned().collect();
        events.sort_by_key(|row| row.event_id);
        Ok(events)
    }

    fn list_by_type(
        &self,
        run_id: &RunId,
        channel: EventChannel,
        event_type: &str,
    ) -> Result<Vec<RunEvent>, StoreError> {
        let inner = self.lock()?;
        let mut events: Vec<RunEvent> = inner
            .events
            .iter()
            .filter(|row| {
                row.run_id == *run_id && row.channel == channel && row.event_type == event_type
            })
            .cloned()
            .collect();
        events.sort_by_key(|row| row.event_id);
        Ok(events)
    }
}

// ============================================================================
// SECTION: Workflow Store
// ============================================================================

/// In-memory workflow repository.
#[derive(Debug, Clone, Default)]
pub struct MemoryWorkflowStore {
    /// Workflows keyed by workflow id.
    inner: Arc<Mutex<BTreeMap<String, WorkflowSpec>>>,
}

impl MemoryWorkflowStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkflowRepository for MemoryWorkflowStore {
    fn get_by_id(&self, workflow_id: &WorkflowId) -> Result<WorkflowSpec, StoreError> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| StoreError::Store("workflow store lock poisoned".to_string()))?;
        inner.get(workflow_id.as_str()).cloned().ok_or_else(|| StoreError::NotFound {
            entity: "Workflow",
            id: workflow_id.as_str().to_string(),
        })
    }

    fn save(&self, workflow: &WorkflowSpec) -> Result<(), StoreError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| StoreError::Store("workflow store lock poisoned".to_string()))?;
        inner.insert(workflow.workflow_id.as_str().to_string(), workflow.clone());
        Ok(())
    }
}

// ============================================================================
// SECTION: Tool Store
// ============================================================================

/// In-memory tool registry.
#[derive(Debug, Clone, Default)]
pub struct MemoryToolStore {
    /// Tools keyed by tool id.
    inner: Arc<Mutex<BTreeMap<String, ToolRecord>>>,
}

impl MemoryToolStore {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces a tool record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the registry lock is poisoned.
    pub fn register(&self, tool: ToolRecord) -> Result<(), StoreError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| StoreError::Store("tool store lock poisoned".to_string()))?;
        inner.insert(tool.tool_id.as_str().to_string(), tool);
        Ok(())
    }
}

impl ToolRepository for MemoryToolStore {
    fn get(&self, tool_id: &ToolId) -> Result<Option<ToolRecord>, StoreError> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| StoreError::Store("tool store lock poisoned".to_string()))?;
        Ok(inner.get(tool_id.as_str()).cloned())
    }

    fn find_published(&self) -> Result<Vec<ToolRecord>, StoreError> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| StoreError::Store("tool store lock poisoned".to_string()))?;
        Ok(inner
            .values()
            .filter(|tool| tool.status == crate::interfaces::ToolStatus::Published)
            .cloned()
            .collect())
    }
}

// ============================================================================
// SECTION: Idempotency Store
// ============================================================================

/// In-memory idempotency result store.
#[derive(Debug, Clone, Default)]
pub struct MemoryIdempotencyStore {
    /// Results keyed by idempotency key.
    inner: Arc<Mutex<BTreeMap<String, Value>>>,
}

impl MemoryIdempotencyStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdempotencyStore for MemoryIdempotencyStore {
    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| StoreError::Store("idempotency store lock poisoned".to_string()))?;
        Ok(inner.contains_key(key))
    }

    fn get_result(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| StoreError::Store("idempotency store lock poisoned".to_string()))?;
        Ok(inner.get(key).cloned())
    }

    fn save_result(&self, key: &str, result: &Value) -> Result<(), StoreError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| StoreError::Store("idempotency store lock poisoned".to_string()))?;
        inner.insert(key.to_string(), result.clone());
        Ok(())
    }
}
