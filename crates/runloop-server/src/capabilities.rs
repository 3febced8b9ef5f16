// runloop-server/src/capabilities.rs
// ============================================================================
// Module: Capability Manifest
// Description: Static node-type capability manifest for editor clients.
// Purpose: Serialize the validation contract tables behind one endpoint.
// Dependencies: runloop-core, serde
// ============================================================================

//! ## Overview
//! The manifest mirrors the exact contract tables the execution validator
//! applies, plus per-type executor availability, so editors can reject
//! configurations the gate would reject without duplicating rules.

// ============================================================================
// SECTION: Imports
// ============================================================================

use runloop_core::WorkflowValidator;
use runloop_core::runtime::CAPABILITIES_SCHEMA_VERSION;
use runloop_core::runtime::NodeContract;
use runloop_core::runtime::SQLITE_DATABASE_URL_PREFIX;
use runloop_core::runtime::SUPPORTED_MODEL_PROVIDERS;
use serde::Serialize;

// ============================================================================
// SECTION: Manifest Shapes
// ============================================================================

/// Platform-wide constraints surfaced to editors.
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityConstraints {
    /// True when only SQLite database nodes are supported.
    pub sqlite_only: bool,
    /// Supported database URL prefix.
    pub sqlite_database_url_prefix: String,
    /// Supported model providers.
    pub model_providers_supported: Vec<String>,
    /// True when the provider list is exactly `openai`.
    pub openai_only: bool,
    /// Validation scope label for draft workflows.
    pub draft_validation_scope: String,
}

/// One node type's capability entry.
#[derive(Debug, Clone, Serialize)]
pub struct NodeCapability {
    /// Stable node type name.
    #[serde(rename = "type")]
    pub node_type: String,
    /// Accepted aliases.
    pub aliases: Vec<String>,
    /// True when an executor is registered for the type.
    pub executor_available: bool,
    /// Validation contract applied at the execution gate.
    pub validation_contract: NodeContract,
    /// Free-form runtime notes.
    pub runtime_notes: Vec<String>,
}

/// Complete capability manifest.
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityManifest {
    /// Manifest schema version.
    pub schema_version: String,
    /// Platform constraints.
    pub constraints: CapabilityConstraints,
    /// Per-type capability entries.
    pub node_types: Vec<NodeCapability>,
}

// ============================================================================
// SECTION: Assembly
// ============================================================================

/// Builds the manifest from the validator's contract tables.
#[must_use]
pub fn build_manifest(validator: &WorkflowValidator) -> CapabilityManifest {
    let providers: Vec<String> =
        SUPPORTED_MODEL_PROVIDERS.iter().map(ToString::to_string).collect();
    let node_types = validator
        .contracts()
        .iter()
        .map(|(node_type, contract)| NodeCapability {
            node_type: node_type.as_str().to_string(),
            aliases: contract.aliases.clone(),
            executor_available: validator.executor_available(*node_type),
            validation_contract: contract.clone(),
            runtime_notes: contract.runtime_notes.clone(),
        })
        .collect();

    CapabilityManifest {
        schema_version: CAPABILITIES_SCHEMA_VERSION.to_string(),
        constraints: CapabilityConstraints {
            sqlite_only: true,
            sqlite_database_url_prefix: SQLITE_DATABASE_URL_PREFIX.to_string(),
            openai_only: providers == ["openai"],
            model_providers_supported: providers,
            draft_validation_scope: "main_subgraph_only".to_string(),
        },
        node_types,
    }
}
