// runloop-core/src/runtime/kernel.rs
// ============================================================================
// Module: DAG Execution Kernel
// Description: Node-by-node workflow execution behind the kernel contract.
// Purpose: Drive the main subgraph in topological order and emit stream events.
// Dependencies: crate::{core, interfaces}, async-trait, serde_json, tokio
// ============================================================================

//! ## Overview
//! The kernel owns actual node execution; governance (claiming, persistence,
//! confirmation, repair) lives in the run entry. `gate_execute` runs the
//! pre-execution policy and the caller's after-gate callback; rejections are
//! side-effect free. `stream_after_gate` spawns a driver task that walks the
//! main subgraph in deterministic topological order and finishes with exactly
//! one terminal event.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::core::EVENT_NODE_COMPLETE;
use crate::core::EVENT_NODE_ERROR;
use crate::core::EVENT_NODE_START;
use crate::core::EVENT_WORKFLOW_COMPLETE;
use crate::core::EVENT_WORKFLOW_ERROR;
use crate::core::ExecutionEvent;
use crate::core::WorkflowId;
use crate::core::workflow::NodeSpec;
use crate::core::workflow::NodeType;
use crate::core::workflow::WorkflowSpec;
use crate::interfaces::AfterGate;
use crate::interfaces::ExecutionKernel;
use crate::interfaces::ExecutionPolicy;
use crate::interfaces::KernelError;
use crate::interfaces::KernelRequest;
use crate::interfaces::WorkflowRepository;

// ============================================================================
// SECTION: Node Execution
// ============================================================================

/// Capacity of the kernel event channel.
const KERNEL_CHANNEL_CAPACITY: usize = 32;

/// Failure raised by a node executor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("node execution failed: {message}")]
pub struct NodeExecutionError {
    /// Stable error type label (`timeout`, `tool_not_found`, …).
    pub error_type: String,
    /// Human-readable message.
    pub message: String,
    /// True when retrying the node may succeed.
    pub retryable: bool,
}

/// Input handed to a node executor.
#[derive(Debug, Clone)]
pub struct NodeInput {
    /// Workflow being executed.
    pub workflow_id: WorkflowId,
    /// Initial run input.
    pub initial_input: Option<Value>,
    /// Outputs of upstream nodes keyed by node id.
    pub context: Map<String, Value>,
}

/// Executor for one node type.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Executes a node and returns its output value.
    ///
    /// # Errors
    ///
    /// Returns [`NodeExecutionError`] when the node fails.
    async fn execute(&self, node: &NodeSpec, input: &NodeInput)
    -> Result<Value, NodeExecutionError>;
}

/// Pass-through executor returning the run input (start/end nodes).
pub struct PassthroughExecutor;

#[async_trait]
impl NodeExecutor for PassthroughExecutor {
    async fn execute(
        &self,
        _node: &NodeSpec,
        input: &NodeInput,
    ) -> Result<Value, NodeExecutionError> {
        Ok(input.initial_input.clone().unwrap_or(Value::Null))
    }
}

/// Executor returning a fixed value (deterministic fixtures).
pub struct StaticExecutor {
    /// Value returned for every execution.
    result: Value,
}

impl StaticExecutor {
    /// Creates an executor returning the given value.
    #[must_use]
    pub const fn new(result: Value) -> Self {
        Self { result }
    }
}

#[async_trait]
impl NodeExecutor for StaticExecutor {
    async fn execute(
        &self,
        _node: &NodeSpec,
        _input: &NodeInput,
    ) -> Result<Value, NodeExecutionError> {
        Ok(self.result.clone())
    }
}

/// Local placeholder executor echoing the node configuration.
///
/// Deployments register real integrations per node type; this executor keeps
/// side-effect and model nodes runnable in local and deterministic setups.
pub struct ConfigEchoExecutor;

#[async_trait]
impl NodeExecutor for ConfigEchoExecutor {
    async fn execute(
        &self,
        node: &NodeSpec,
        _input: &NodeInput,
    ) -> Result<Value, NodeExecutionError> {
        let mut output = Map::new();
        output.insert("node_id".to_string(), Value::from(node.node_id.as_str()));
        output.insert("node_type".to_string(), Value::from(node.node_type.as_str()));
        output.insert("config".to_string(), Value::Object(node.config.clone()));
        Ok(Value::Object(output))
    }
}

/// Executor failing with a fixed error (repair-loop fixtures).
pub struct FailingExecutor {
    /// Error returned for every execution.
    error: NodeExecutionError,
}

impl FailingExecutor {
    /// Creates an executor failing with the given error shape.
    #[must_use]
    pub fn new(error_type: &str, message: &str, retryable: bool) -> Self {
        Self {
            error: NodeExecutionError {
                error_type: error_type.to_string(),
                message: message.to_string(),
                retryable,
            },
        }
    }
}

#[async_trait]
impl NodeExecutor for FailingExecutor {
    async fn execute(
        &self,
        _node: &NodeSpec,
        _input: &NodeInput,
    ) -> Result<Value, NodeExecutionError> {
        Err(self.error.clone())
    }
}

// ============================================================================
// SECTION: Executor Registry
// ============================================================================

/// Node executors keyed by node type.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    /// Registered executors.
    executors: BTreeMap<NodeType, Arc<dyn NodeExecutor>>,
}

impl ExecutorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an executor for a node type, replacing any existing one.
    pub fn register(&mut self, node_type: NodeType, executor: Arc<dyn NodeExecutor>) {
        self.executors.insert(node_type, executor);
    }

    /// Returns the executor for a node type, when registered.
    #[must_use]
    pub fn get(&self, node_type: NodeType) -> Option<Arc<dyn NodeExecutor>> {
        self.executors.get(&node_type).cloned()
    }

    /// Returns the node types with a registered executor.
    #[must_use]
    pub fn available_types(&self) -> std::collections::BTreeSet<NodeType> {
        self.executors.keys().copied().collect()
    }
}

// ============================================================================
// SECTION: DAG Kernel
// ============================================================================

/// Execution kernel walking the main subgraph in topological order.
pub struct DagExecutionKernel {
    /// Workflow repository.
    workflows: Arc<dyn WorkflowRepository>,
    /// Node executor registry.
    executors: ExecutorRegistry,
    /// Optional pre-execution policy.
    policy: Option<Arc<dyn ExecutionPolicy>>,
}

impl DagExecutionKernel {
    /// Creates a kernel over the given repository and executor registry.
    #[must_use]
    pub const fn new(
        workflows: Arc<dyn WorkflowRepository>,
        executors: ExecutorRegistry,
        policy: Option<Arc<dyn ExecutionPolicy>>,
    ) -> Self {
        Self { workflows, executors, policy }
    }

    /// Returns the executor registry.
    #[must_use]
    pub const fn executors(&self) -> &ExecutorRegistry {
        &self.executors
    }

    /// Drives one workflow to its terminal event on the channel.
    async fn drive(
        workflow: WorkflowSpec,
        executors: ExecutorRegistry,
        request: KernelRequest,
        events: mpsc::Sender<ExecutionEvent>,
    ) {
        let main = workflow.main_subgraph();
        let order: Vec<_> = workflow
            .topological_order()
            .into_iter()
            .filter(|node_id| main.contains(node_id))
            .collect();

        let mut input = NodeInput {
            workflow_id: request.workflow_id.clone(),
            initial_input: request.input.clone(),
            context: Map::new(),
        };

        for node_id in order {
            let Some(node) = workflow.node(&node_id) else {
                continue;
            };

            let start = ExecutionEvent::new(EVENT_NODE_START)
                .with("node_id", node.node_id.as_str())
                .with("node_type", node.node_type.as_str());
            if events.send(start).await.is_err() {
                return;
            }

            let Some(executor) = executors.get(node.node_type) else {
                let error = ExecutionEvent::new(EVENT_WORKFLOW_ERROR)
                    .with("error", format!("no executor for node type {}", node.node_type.as_str()))
                    .with("error_type", "executor_unavailable")
                    .with("node_id", node.node_id.as_str())
                    .with("retryable", false);
                let _ = events.send(error).await;
                return;
            };

            match executor.execute(node, &input).await {
                Ok(output) => {
                    input.context.insert(node.node_id.as_str().to_string(), output.clone());
                    let complete = ExecutionEvent::new(EVENT_NODE_COMPLETE)
                        .with("node_id", node.node_id.as_str())
                        .with("node_type", node.node_type.as_str())
                        .with("output", output);
                    if events.send(complete).await.is_err() {
                        return;
                    }
                }
                Err(error) => {
                    let node_error = ExecutionEvent::new(EVENT_NODE_ERROR)
                        .with("node_id", node.node_id.as_str())
                        .with("node_type", node.node_type.as_str())
                        .with("error", error.message.clone())
                        .with("error_type", error.error_type.clone())
                        .with("retryable", error.retryable);
                    if events.send(node_error).await.is_err() {
                        return;
                    }
                    let terminal = ExecutionEvent::new(EVENT_WORKFLOW_ERROR)
                        .with("error", error.message)
                        .with("error_type", error.error_type)
                        .with("node_id", node.node_id.as_str())
                        .with("retryable", error.retryable);
                    let _ = events.send(terminal).await;
                    return;
                }
            }
        }

        let complete = ExecutionEvent::new(EVENT_WORKFLOW_COMPLETE)
            .with("workflow_id", request.workflow_id.as_str());
        let _ = events.send(complete).await;
    }
}

#[async_trait]
impl ExecutionKernel for DagExecutionKernel {
    async fn gate_execute(
        &self,
        request: &KernelRequest,
        after_gate: AfterGate,
    ) -> Result<(), KernelError> {
        if let Some(policy) = &self.policy {
            policy.check(request).await?;
        }
        after_gate()
    }

    fn stream_after_gate(&self, request: &KernelRequest) -> mpsc::Receiver<ExecutionEvent> {
        let (sender, receiver) = mpsc::channel(KERNEL_CHANNEL_CAPACITY);
        let workflow = self.workflows.get_by_id(&request.workflow_id);
        let executors = self.executors.clone();
        let request = request.clone();

        tokio::spawn(async move {
            match workflow {
                Ok(workflow) => Self::drive(workflow, executors, request, sender).await,
                Err(error) => {
                    let terminal = ExecutionEvent::new(EVENT_WORKFLOW_ERROR)
                        .with("error", error.to_string())
                        .with("error_type", "workflow_not_found")
                        .with("retryable", false);
                    let _ = sender.send(terminal).await;
                }
            }
        });
        receiver
    }
}
