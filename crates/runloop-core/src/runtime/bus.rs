// runloop-core/src/runtime/bus.rs
// ============================================================================
// Module: Event Bus and Decision Bridge
// Description: Typed pub-sub with allow/deny middleware and the agent bridge.
// Purpose: Route validated agent decisions into the run execution entry.
// Dependencies: crate::{core, runtime::entry}, async-trait, serde_json
// ============================================================================

//! ## Overview
//! The bus delivers domain events to subscribers sequentially (fan-out, not
//! pipeline parallelism). Middleware runs before delivery: the coordinator
//! inspects proposed decisions and either promotes them to validated events
//! or blocks them with a paired rejection. The decision bridge subscribes to
//! validated decisions of actionable types and executes them through the run
//! entry; bridge failures surface as execution-result events and never create
//! journal rows on their own.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;

use crate::core::AgentDecision;
use crate::core::CriterionId;
use crate::core::RunId;
use crate::core::WorkflowId;
use crate::runtime::entry::EntryRequest;
use crate::runtime::entry::RunExecutionEntry;

// ============================================================================
// SECTION: Domain Events
// ============================================================================

/// REPLAN signal payload published by the acceptance loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdjustmentRequested {
    /// Publishing component label.
    pub source: String,
    /// Workflow to replan.
    pub workflow_id: WorkflowId,
    /// Terminal run that triggered the replan.
    pub run_id: RunId,
    /// Reflection that produced the verdict.
    pub reflection_id: String,
    /// Attempt number the next run should carry.
    pub next_attempt: u32,
    /// Unmet criterion ids.
    pub unmet_criteria: Vec<CriterionId>,
    /// Criterion ids with missing evidence.
    pub missing_evidence: Vec<CriterionId>,
    /// Repair constraints for the planner.
    pub constraints: Vec<String>,
}

/// Result of a bridged decision execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    /// Stable status label (`completed` or `failed`).
    pub status: String,
    /// Correlation identifier of the originating decision.
    pub correlation_id: String,
    /// Run identifier when one was targeted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    /// Structured result payload.
    pub result: Value,
}

/// Typed events carried by the bus.
#[derive(Debug, Clone, Serialize)]
pub enum DomainEvent {
    /// An agent proposed a decision.
    DecisionMade(AgentDecision),
    /// The coordinator validated a decision.
    DecisionValidated(AgentDecision),
    /// The coordinator rejected a decision.
    DecisionRejected {
        /// Rejected decision.
        decision: AgentDecision,
        /// Stable rejection reason.
        reason: String,
    },
    /// A bridged execution finished.
    ExecutionResult(ExecutionResult),
    /// The acceptance loop requested a replan.
    WorkflowAdjustmentRequested(AdjustmentRequested),
}

/// Event classes subscribers register interest in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Proposed decisions.
    DecisionMade,
    /// Validated decisions.
    DecisionValidated,
    /// Rejected decisions.
    DecisionRejected,
    /// Bridged execution results.
    ExecutionResult,
    /// Replan requests.
    WorkflowAdjustmentRequested,
}

impl DomainEvent {
    /// Returns the event's class.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::DecisionMade(_) => EventKind::DecisionMade,
            Self::DecisionValidated(_) => EventKind::DecisionValidated,
            Self::DecisionRejected { .. } => EventKind::DecisionRejected,
            Self::ExecutionResult(_) => EventKind::ExecutionResult,
            Self::WorkflowAdjustmentRequested(_) => EventKind::WorkflowAdjustmentRequested,
        }
    }
}

// ============================================================================
// SECTION: Subscribers and Middleware
// ============================================================================

/// Bus subscriber delivered events sequentially.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Event classes this subscriber receives.
    fn interests(&self) -> Vec<EventKind>;

    /// Handles one delivered event.
    async fn handle(&self, event: &DomainEvent);
}

/// Middleware verdict for one event.
pub enum MiddlewareOutcome {
    /// Continue propagation with this (possibly transformed) event.
    Continue(DomainEvent),
    /// Stop propagation, optionally delivering a paired follow-up.
    Block {
        /// Follow-up event delivered directly to subscribers.
        followup: Option<DomainEvent>,
    },
}

/// Bus middleware inspecting events before delivery.
#[async_trait]
pub trait EventMiddleware: Send + Sync {
    /// Processes one event.
    async fn process(&self, event: DomainEvent) -> MiddlewareOutcome;
}

// ============================================================================
// SECTION: Event Bus
// ============================================================================

/// Typed pub-sub bus with middleware support.
#[derive(Default)]
pub struct EventBus {
    /// Registered subscribers.
    subscribers: Mutex<Vec<Arc<dyn EventSubscriber>>>,
    /// Middleware chain in registration order.
    middleware: Mutex<Vec<Arc<dyn EventMiddleware>>>,
}

impl EventBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber.
    pub fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(subscriber);
        }
    }

    /// Appends a middleware to the chain.
    pub fn add_middleware(&self, middleware: Arc<dyn EventMiddleware>) {
        if let Ok(mut chain) = self.middleware.lock() {
            chain.push(middleware);
        }
    }

    /// Publishes an event through the middleware chain to subscribers.
    pub async fn publish(&self, event: DomainEvent) {
        let chain: Vec<Arc<dyn EventMiddleware>> =
            self.middleware.lock().map(|chain| chain.clone()).unwrap_or_default();

        let mut current = event;
        for middleware in chain {
            match middleware.process(current).await {
                MiddlewareOutcome::Continue(event) => current = event,
                MiddlewareOutcome::Block { followup } => {
                    if let Some(followup) = followup {
                        self.deliver(&followup).await;
                    }
                    return;
                }
            }
        }
        self.deliver(&current).await;
    }

    /// Delivers an event to interested subscribers, awaited sequentially.
    async fn deliver(&self, event: &DomainEvent) {
        let subscribers: Vec<Arc<dyn EventSubscriber>> =
            self.subscribers.lock().map(|subscribers| subscribers.clone()).unwrap_or_default();
        let kind = event.kind();
        for subscriber in subscribers {
            if subscriber.interests().contains(&kind) {
                subscriber.handle(event).await;
            }
        }
    }
}

// ============================================================================
// SECTION: Coordinator Middleware
// ============================================================================

/// Allow/deny gate over proposed decisions.
///
/// Valid decisions of permitted types are promoted to validated events;
/// everything else blocks with a paired rejection.
pub struct CoordinatorMiddleware {
    /// Decision types the coordinator refuses outright.
    denied_types: BTreeSet<String>,
}

impl CoordinatorMiddleware {
    /// Creates a coordinator denying the given decision types.
    #[must_use]
    pub const fn new(denied_types: BTreeSet<String>) -> Self {
        Self { denied_types }
    }
}

#[async_trait]
impl EventMiddleware for CoordinatorMiddleware {
    async fn process(&self, event: DomainEvent) -> MiddlewareOutcome {
        let DomainEvent::DecisionMade(decision) = event else {
            return MiddlewareOutcome::Continue(event);
        };

        if let Err(error) = decision.validate() {
            return MiddlewareOutcome::Block {
                followup: Some(DomainEvent::DecisionRejected {
                    decision,
                    reason: error.to_string(),
                }),
            };
        }
        if self.denied_types.contains(&decision.decision_type) {
            return MiddlewareOutcome::Block {
                followup: Some(DomainEvent::DecisionRejected {
                    decision,
                    reason: "decision_type_denied".to_string(),
                }),
            };
        }
        MiddlewareOutcome::Continue(DomainEvent::DecisionValidated(decision))
    }
}

// ============================================================================
// SECTION: Decision Bridge
// ============================================================================

/// Bridge executing validated decisions through the run entry.
pub struct DecisionBridge {
    /// Run execution entry.
    entry: Arc<RunExecutionEntry>,
    /// Decision types this bridge acts on.
    actionable_types: BTreeSet<String>,
    /// Bus handle for publishing results (weak: the bus owns the bridge).
    bus: Weak<EventBus>,
}

impl DecisionBridge {
    /// Creates a bridge bound to a bus.
    #[must_use]
    pub fn new(
        entry: Arc<RunExecutionEntry>,
        actionable_types: BTreeSet<String>,
        bus: &Arc<EventBus>,
    ) -> Self {
        Self { entry, actionable_types, bus: Arc::downgrade(bus) }
    }

    /// Executes one validated decision and returns the result event.
    async fn execute_decision(&self, decision: &AgentDecision) -> ExecutionResult {
        let correlation_id = decision.correlation_id.as_str().to_string();

        let Some(workflow_id) = decision.payload_str("workflow_id") else {
            return ExecutionResult {
                status: "failed".to_string(),
                correlation_id,
                run_id: None,
                result: json!({"error": "workflow_id is required"}),
            };
        };
        let Some(run_id) = decision.payload_str("run_id") else {
            return ExecutionResult {
                status: "failed".to_string(),
                correlation_id,
                run_id: None,
                result: json!({"error": "run_id is required"}),
            };
        };

        let run_id = RunId::new(run_id);
        let mut request = EntryRequest::new(WorkflowId::new(workflow_id), run_id.clone());
        request.input = decision.payload.get("input").cloned();
        request.correlation_id = Some(correlation_id.clone());
        request.original_decision_id = Some(decision.decision_id.as_str().to_string());

        match self.entry.execute_with_results(request).await {
            Ok(results) => ExecutionResult {
                status: if results.success { "completed".to_string() } else { "failed".to_string() },
                correlation_id,
                run_id: Some(run_id),
                result: json!({
                    "success": results.success,
                    "status": results.status,
                    "workflow_id": results.workflow_id.as_str(),
                    "run_id": results.run_id.as_str(),
                    "event_count": results.events.len(),
                }),
            },
            Err(error) => ExecutionResult {
                status: "failed".to_string(),
                correlation_id,
                run_id: Some(run_id),
                result: json!({"error": error.to_string()}),
            },
        }
    }
}

#[async_trait]
impl EventSubscriber for DecisionBridge {
    fn interests(&self) -> Vec<EventKind> {
        vec![EventKind::DecisionValidated]
    }

    async fn handle(&self, event: &DomainEvent) {
        let DomainEvent::DecisionValidated(decision) = event else {
            return;
        };
        if !self.actionable_types.contains(&decision.decision_type) {
            return;
        }
        let result = self.execute_decision(decision).await;
        if let Some(bus) = self.bus.upgrade() {
            bus.publish(DomainEvent::ExecutionResult(result)).await;
        }
    }
}
