// runloop-core/src/runtime/validator.rs
// ============================================================================
// Module: Workflow Validator
// Description: Fail-closed static validation of workflow DAGs.
// Purpose: Reject unexecutable workflows before any state changes happen.
// Dependencies: crate::{core, interfaces, runtime::contracts}, serde_json, thiserror
// ============================================================================

//! ## Overview
//! The validator runs before the run claim, so rejections are side-effect
//! free. Checks cover the main subgraph only: START/END presence, START→END
//! reachability, acyclicity, executor availability, tool existence and
//! deprecation, and the per-type configuration contracts. Every rejection
//! carries a stable error code suitable for templated user messages.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::core::NodeId;
use crate::core::ToolId;
use crate::core::WorkflowSpec;
use crate::core::workflow::NodeSpec;
use crate::core::workflow::NodeType;
use crate::interfaces::StoreError;
use crate::interfaces::ToolRepository;
use crate::interfaces::ToolStatus;
use crate::runtime::contracts::NodeContract;
use crate::runtime::contracts::editor_node_contracts;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Typed rejection raised by execution validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The workflow has no START node.
    #[error("workflow has no start node")]
    MissingStart,
    /// The main subgraph has no reachable END node.
    #[error("no path from start to an end node")]
    MissingEndPath,
    /// The main subgraph contains a cycle.
    #[error("workflow main subgraph contains a cycle")]
    CycleDetected,
    /// A node type has no registered executor.
    #[error("no executor available for node {node_id} (type {node_type})")]
    ExecutorUnavailable {
        /// Offending node identifier.
        node_id: NodeId,
        /// Unimplemented node type.
        node_type: String,
    },
    /// A node configuration violated its contract.
    #[error("node {node_id} invalid: {message}")]
    NodeConfig {
        /// Offending node identifier.
        node_id: NodeId,
        /// Stable contract error code.
        code: String,
        /// Human-readable message.
        message: String,
    },
    /// The tool registry failed during validation.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ValidationError {
    /// Returns the stable error code for the rejection.
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Self::MissingStart => "workflow_missing_start",
            Self::MissingEndPath => "workflow_missing_end_path",
            Self::CycleDetected => "workflow_cycle_detected",
            Self::ExecutorUnavailable { .. } => "executor_unavailable",
            Self::NodeConfig { code, .. } => code,
            Self::Store(_) => "validation_store_error",
        }
    }
}

// ============================================================================
// SECTION: Validator
// ============================================================================

/// Fail-closed workflow validator driven by the contract tables.
pub struct WorkflowValidator {
    /// Per-type validation contracts.
    contracts: BTreeMap<NodeType, NodeContract>,
    /// Node types with a registered executor.
    executors: BTreeSet<NodeType>,
    /// Tool registry for tool-node checks.
    tools: Arc<dyn ToolRepository>,
}

impl WorkflowValidator {
    /// Creates a validator over the standard contract table.
    #[must_use]
    pub fn new(executors: BTreeSet<NodeType>, tools: Arc<dyn ToolRepository>) -> Self {
        Self { contracts: editor_node_contracts(), executors, tools }
    }

    /// Returns the contract table backing this validator.
    #[must_use]
    pub const fn contracts(&self) -> &BTreeMap<NodeType, NodeContract> {
        &self.contracts
    }

    /// Returns true when an executor is registered for the type.
    #[must_use]
    pub fn executor_available(&self, node_type: NodeType) -> bool {
        self.executors.contains(&node_type)
    }

    /// Validates a workflow for execution.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] on the first violation; no state changes
    /// are performed.
    pub fn validate_for_execution(&self, workflow: &WorkflowSpec) -> Result<(), ValidationError> {
        let start = workflow.main_start().ok_or(ValidationError::MissingStart)?;
        let main = workflow.main_subgraph();

        let reaches_end = workflow.nodes.iter().any(|node| {
            node.node_type == NodeType::End
                && main.contains(&node.node_id)
                && workflow.has_path(&start.node_id, &node.node_id)
        });
        if !reaches_end {
            return Err(ValidationError::MissingEndPath);
        }

        // A cycle node never reaches in-degree zero, so it is absent from the
        // topological order.
        let ordered: BTreeSet<NodeId> = workflow.topological_order().into_iter().collect();
        if main.iter().any(|node_id| !ordered.contains(node_id)) {
            return Err(ValidationError::CycleDetected);
        }

        for node in &workflow.nodes {
            if !main.contains(&node.node_id) {
                continue;
            }
            if !self.executor_available(node.node_type) {
                return Err(ValidationError::ExecutorUnavailable {
                    node_id: node.node_id.clone(),
                    node_type: node.node_type.as_str().to_string(),
                });
            }
            if let Some(contract) = self.contracts.get(&node.node_type) {
                self.apply_contract(node, contract)?;
            }
        }
        Ok(())
    }

    /// Applies one node contract to one node configuration.
    fn apply_contract(
        &self,
        node: &NodeSpec,
        contract: &NodeContract,
    ) -> Result<(), ValidationError> {
        for rule in &contract.required_fields {
            if !has_value(node, &rule.key) {
                return Err(config_error(node, &rule.code, &rule.message));
            }
        }

        for rule in &contract.required_any_of {
            if !rule.keys.iter().any(|key| has_value(node, key)) {
                return Err(config_error(node, &rule.code, &rule.message));
            }
        }

        for rule in &contract.enum_fields {
            if let Some(value) = str_value(node, &rule.key) {
                if !rule.allowed.iter().any(|allowed| allowed == value.trim()) {
                    return Err(config_error(node, &rule.code, &rule.message));
                }
            }
        }

        for rule in &contract.conditional_required {
            let triggered =
                str_value(node, &rule.when_key).is_some_and(|value| value.trim() == rule.when_equals);
            if !triggered {
                continue;
            }
            for field in &rule.required_fields {
                if !has_value(node, &field.key) {
                    return Err(config_error(node, &field.code, &field.message));
                }
            }
        }

        if let Some(rule) = &contract.model_provider {
            if let Some(model) = str_value(node, &rule.model_key) {
                if !model_provider_allowed(model, &rule.allowed_providers) {
                    return Err(config_error(
                        node,
                        &rule.unsupported_provider_code,
                        &rule.unsupported_provider_message,
                    ));
                }
            } else if !rule.model_optional {
                return Err(config_error(
                    node,
                    &rule.unsupported_provider_code,
                    &rule.unsupported_provider_message,
                ));
            }
        }

        if let Some(rule) = &contract.database_url {
            match str_value(node, &rule.key) {
                None => {
                    return Err(config_error(
                        node,
                        &rule.missing_code,
                        &format!("config.{} is required", rule.key),
                    ));
                }
                Some(url) if !url.trim().starts_with(&rule.supported_prefix) => {
                    return Err(config_error(
                        node,
                        &rule.unsupported_code,
                        &rule.unsupported_message,
                    ));
                }
                Some(_) => {}
            }
        }

        if let Some(rule) = &contract.tool_node {
            let tool_id = rule.tool_id_keys.iter().find_map(|key| str_value(node, key));
            let Some(tool_id) = tool_id else {
                return Err(config_error(
                    node,
                    &rule.missing_tool_id_code,
                    "tool nodes require a tool_id",
                ));
            };
            let record = self.tools.get(&ToolId::new(tool_id.trim()))?;
            match record {
                None => {
                    return Err(config_error(
                        node,
                        &rule.not_found_code,
                        &format!("tool not found: {}", tool_id.trim()),
                    ));
                }
                Some(tool) if tool.status == ToolStatus::Deprecated => {
                    return Err(config_error(
                        node,
                        &rule.deprecated_code,
                        &format!("tool is deprecated: {}", tool_id.trim()),
                    ));
                }
                Some(_) => {}
            }
        }

        Ok(())
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Builds a node configuration error.
fn config_error(node: &NodeSpec, code: &str, message: &str) -> ValidationError {
    ValidationError::NodeConfig {
        node_id: node.node_id.clone(),
        code: code.to_string(),
        message: message.to_string(),
    }
}

/// Returns true when a config key is present and non-empty.
fn has_value(node: &NodeSpec, key: &str) -> bool {
    match node.config.get(key) {
        None | Some(Value::Null) => false,
        Some(Value::String(value)) => !value.trim().is_empty(),
        Some(_) => true,
    }
}

/// Returns a string config value when present.
fn str_value<'a>(node: &'a NodeSpec, key: &str) -> Option<&'a str> {
    node.config.get(key).and_then(Value::as_str).filter(|value| !value.trim().is_empty())
}

/// Returns true when the model name belongs to an allowed provider.
///
/// Prefixed names (`provider/model`) match on the prefix; unprefixed names
/// are treated as the first allowed provider's namespace.
fn model_provider_allowed(model: &str, allowed: &[String]) -> bool {
    let trimmed = model.trim();
    trimmed.split_once('/').map_or(!allowed.is_empty(), |(provider, _)| {
        allowed.iter().any(|candidate| candidate == provider)
    })
}
