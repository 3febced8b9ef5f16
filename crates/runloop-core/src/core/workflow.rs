// runloop-core/src/core/workflow.rs
// ============================================================================
// Module: Runloop Workflow Model
// Description: DAG workflow specifications, node types, and graph helpers.
// Purpose: Provide the canonical workflow shape consumed by validation and execution.
// Dependencies: crate::core::identifiers, serde, serde_json
// ============================================================================

//! ## Overview
//! A workflow is a DAG of typed nodes. Execution and fail-closed validation
//! operate on the main subgraph: the nodes reachable from the main START node.
//! Graph helpers here are deterministic (ordering ties break on node id) so
//! validation messages and side-effect detection are stable across runs.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::core::identifiers::EdgeId;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::ProjectId;
use crate::core::identifiers::WorkflowId;

// ============================================================================
// SECTION: Node Types
// ============================================================================

/// Node type vocabulary for workflow DAGs.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Entry node of the main subgraph.
    Start,
    /// Exit node of the main subgraph.
    End,
    /// External tool invocation.
    Tool,
    /// Outbound HTTP request.
    HttpRequest,
    /// Database statement execution.
    Database,
    /// Filesystem operation.
    File,
    /// Outbound notification delivery.
    Notification,
    /// Text model invocation.
    TextModel,
    /// Branching condition evaluation.
    Condition,
}

impl NodeType {
    /// Returns the stable string form of the node type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::End => "end",
            Self::Tool => "tool",
            Self::HttpRequest => "http_request",
            Self::Database => "database",
            Self::File => "file",
            Self::Notification => "notification",
            Self::TextModel => "text_model",
            Self::Condition => "condition",
        }
    }

    /// Parses a stable string form (or a known alias) into a node type.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "start" => Some(Self::Start),
            "end" => Some(Self::End),
            "tool" => Some(Self::Tool),
            "http" | "http_request" => Some(Self::HttpRequest),
            "database" | "db" => Some(Self::Database),
            "file" => Some(Self::File),
            "notification" => Some(Self::Notification),
            "text_model" | "llm" => Some(Self::TextModel),
            "condition" => Some(Self::Condition),
            _ => None,
        }
    }

    /// Returns accepted aliases for the node type (excluding the stable form).
    #[must_use]
    pub const fn aliases(self) -> &'static [&'static str] {
        match self {
            Self::HttpRequest => &["http"],
            Self::Database => &["db"],
            Self::TextModel => &["llm"],
            _ => &[],
        }
    }

    /// Returns true when executing the node has external side effects.
    ///
    /// Side-effect nodes gate behind a confirmation before the kernel runs.
    #[must_use]
    pub const fn is_side_effect(self) -> bool {
        matches!(
            self,
            Self::Tool | Self::HttpRequest | Self::Database | Self::File | Self::Notification
        )
    }
}

// ============================================================================
// SECTION: Workflow Specification
// ============================================================================

/// One node of a workflow DAG.
///
/// # Invariants
/// - `config` keys are interpreted by the per-type validation contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Node identifier, unique within the workflow.
    pub node_id: NodeId,
    /// Node type.
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Node configuration object.
    #[serde(default)]
    pub config: Map<String, Value>,
}

/// One directed edge of a workflow DAG.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeSpec {
    /// Edge identifier, unique within the workflow.
    pub edge_id: EdgeId,
    /// Source node identifier.
    pub source_node_id: NodeId,
    /// Target node identifier.
    pub target_node_id: NodeId,
}

/// Workflow DAG specification.
///
/// # Invariants
/// - Node and edge identifiers are unique within the workflow.
/// - Fail-closed validation covers the main subgraph only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSpec {
    /// Workflow identifier.
    pub workflow_id: WorkflowId,
    /// Owning project identifier.
    pub project_id: ProjectId,
    /// Display name.
    pub name: String,
    /// Task description used as acceptance context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// DAG nodes.
    pub nodes: Vec<NodeSpec>,
    /// DAG edges.
    pub edges: Vec<EdgeSpec>,
}

impl WorkflowSpec {
    /// Returns the node with the given id, when present.
    #[must_use]
    pub fn node(&self, node_id: &NodeId) -> Option<&NodeSpec> {
        self.nodes.iter().find(|node| node.node_id == *node_id)
    }

    /// Returns a mutable reference to the node with the given id.
    #[must_use]
    pub fn node_mut(&mut self, node_id: &NodeId) -> Option<&mut NodeSpec> {
        self.nodes.iter_mut().find(|node| node.node_id == *node_id)
    }

    /// Returns the main START node: the first START in node order.
    #[must_use]
    pub fn main_start(&self) -> Option<&NodeSpec> {
        self.nodes.iter().find(|node| node.node_type == NodeType::Start)
    }

    /// Returns the node ids reachable from the main START (inclusive).
    #[must_use]
    pub fn main_subgraph(&self) -> BTreeSet<NodeId> {
        let mut reachable = BTreeSet::new();
        let Some(start) = self.main_start() else {
            return reachable;
        };
        let mut frontier = vec![start.node_id.clone()];
        while let Some(node_id) = frontier.pop() {
            if !reachable.insert(node_id.clone()) {
                continue;
            }
            for edge in &self.edges {
                if edge.source_node_id == node_id {
                    frontier.push(edge.target_node_id.clone());
                }
            }
        }
        reachable
    }

    /// Returns node ids in deterministic topological order.
    ///
    /// Nodes on cycles are omitted; callers detect cycles by comparing the
    /// result length against the node count.
    #[must_use]
    pub fn topological_order(&self) -> Vec<NodeId> {
        let mut in_degree: BTreeMap<NodeId, usize> =
            self.nodes.iter().map(|node| (node.node_id.clone(), 0)).collect();
        for edge in &self.edges {
            if let Some(degree) = in_degree.get_mut(&edge.target_node_id) {
                *degree += 1;
            }
        }

        let mut ready: BTreeSet<NodeId> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(node_id, _)| node_id.clone())
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(node_id) = ready.iter().next().cloned() {
            ready.remove(&node_id);
            order.push(node_id.clone());
            for edge in &self.edges {
                if edge.source_node_id != node_id {
                    continue;
                }
                if let Some(degree) = in_degree.get_mut(&edge.target_node_id) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        ready.insert(edge.target_node_id.clone());
                    }
                }
            }
        }
        order
    }

    /// Returns true when a directed path exists between the two nodes.
    #[must_use]
    pub fn has_path(&self, from: &NodeId, to: &NodeId) -> bool {
        let mut visited = BTreeSet::new();
        let mut frontier = vec![from.clone()];
        while let Some(node_id) = frontier.pop() {
            if node_id == *to {
                return true;
            }
            if !visited.insert(node_id.clone()) {
                continue;
            }
            for edge in &self.edges {
                if edge.source_node_id == node_id {
                    frontier.push(edge.target_node_id.clone());
                }
            }
        }
        false
    }

    /// Returns the first side-effect node id in topological order, scoped to
    /// the main subgraph.
    #[must_use]
    pub fn first_side_effect_node(&self) -> Option<NodeId> {
        let main = self.main_subgraph();
        self.topological_order().into_iter().find(|node_id| {
            main.contains(node_id)
                && self.node(node_id).is_some_and(|node| node.node_type.is_side_effect())
        })
    }
}
