// runloop-core/src/runtime/contracts.rs
// ============================================================================
// Module: Node Validation Contracts
// Description: Data-driven per-node-type configuration requirements.
// Purpose: Drive one generic validator and the capability manifest from tables.
// Dependencies: crate::core::workflow, serde
// ============================================================================

//! ## Overview
//! Per-node-type validation rules are represented as data rather than code:
//! required fields, required-any-of groups, enum fields, conditional-required
//! rules, model-provider allowlists, database-url constraints, and tool
//! rules. The validator applies the table with a single generic loop, and the
//! HTTP capability manifest serializes the same table, so editors and the
//! execution gate can never disagree.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::core::workflow::NodeType;

// ============================================================================
// SECTION: Requirement Kinds
// ============================================================================

/// A config key that must be present and non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRequirement {
    /// Config key.
    pub key: String,
    /// Stable error code on violation.
    pub code: String,
    /// Human-readable message template.
    pub message: String,
}

/// A group of config keys of which at least one must be present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnyOfRequirement {
    /// Candidate config keys.
    pub keys: Vec<String>,
    /// Stable error code on violation.
    pub code: String,
    /// Human-readable message template.
    pub message: String,
}

/// A config key restricted to an enumerated value set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumFieldRequirement {
    /// Config key.
    pub key: String,
    /// Allowed values after trimming.
    pub allowed: Vec<String>,
    /// Stable error code on violation.
    pub code: String,
    /// Human-readable message template.
    pub message: String,
}

/// Fields that become required when a sibling key equals a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalRequired {
    /// Key whose value triggers the rule.
    pub when_key: String,
    /// Trigger value (compared after trimming).
    pub when_equals: String,
    /// Fields required when the rule triggers.
    pub required_fields: Vec<FieldRequirement>,
}

/// Model-provider allowlist for model-backed nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelProviderContract {
    /// Config key carrying the model name.
    pub model_key: String,
    /// Accepted provider prefixes (e.g. `openai`).
    pub allowed_providers: Vec<String>,
    /// Stable error code for unsupported providers.
    pub unsupported_provider_code: String,
    /// Human-readable message template.
    pub unsupported_provider_message: String,
    /// True when the model key may be omitted.
    pub model_optional: bool,
}

/// Database connection constraints for database nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseUrlContract {
    /// Config key carrying the connection string.
    pub key: String,
    /// Supported URL prefix.
    pub supported_prefix: String,
    /// Stable error code when the key is missing.
    pub missing_code: String,
    /// Stable error code for unsupported engines.
    pub unsupported_code: String,
    /// Human-readable message template.
    pub unsupported_message: String,
}

/// Tool reference constraints for tool nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolNodeContract {
    /// Config keys that may carry the tool id (first match wins).
    pub tool_id_keys: Vec<String>,
    /// Stable error code when no tool id is present.
    pub missing_tool_id_code: String,
    /// Stable error code when the tool is not registered.
    pub not_found_code: String,
    /// Stable error code when the tool is deprecated.
    pub deprecated_code: String,
}

// ============================================================================
// SECTION: Node Contract
// ============================================================================

/// Complete validation contract for one node type.
///
/// # Invariants
/// - Empty collections impose no requirements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NodeContract {
    /// Accepted type aliases (stable form excluded).
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Unconditionally required fields.
    #[serde(default)]
    pub required_fields: Vec<FieldRequirement>,
    /// Required-any-of groups.
    #[serde(default)]
    pub required_any_of: Vec<AnyOfRequirement>,
    /// Enumerated fields.
    #[serde(default)]
    pub enum_fields: Vec<EnumFieldRequirement>,
    /// Conditionally required fields.
    #[serde(default)]
    pub conditional_required: Vec<ConditionalRequired>,
    /// Model-provider allowlist, when the node invokes a model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_provider: Option<ModelProviderContract>,
    /// Database constraints, when the node touches a database.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<DatabaseUrlContract>,
    /// Tool constraints, when the node invokes a registered tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_node: Option<ToolNodeContract>,
    /// Free-form notes surfaced in the capability manifest.
    #[serde(default)]
    pub runtime_notes: Vec<String>,
}

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Capability manifest schema version.
pub const CAPABILITIES_SCHEMA_VERSION: &str = "1.0.0";
/// Supported database URL prefix.
pub const SQLITE_DATABASE_URL_PREFIX: &str = "sqlite://";
/// Supported model providers.
pub const SUPPORTED_MODEL_PROVIDERS: &[&str] = &["openai"];

// ============================================================================
// SECTION: Contract Table
// ============================================================================

/// Builds one required-field rule.
fn required(key: &str, code: &str, message: &str) -> FieldRequirement {
    FieldRequirement { key: key.to_string(), code: code.to_string(), message: message.to_string() }
}

/// Returns the validation contract table for every node type.
///
/// Built once at startup and shared; the table is the single source of truth
/// for both fail-closed execution validation and the capability manifest.
#[must_use]
pub fn editor_node_contracts() -> BTreeMap<NodeType, NodeContract> {
    let mut table = BTreeMap::new();

    table.insert(NodeType::Start, NodeContract::default());
    table.insert(NodeType::End, NodeContract::default());

    table.insert(
        NodeType::Tool,
        NodeContract {
            tool_node: Some(ToolNodeContract {
                tool_id_keys: vec!["tool_id".to_string(), "toolId".to_string()],
                missing_tool_id_code: "tool_id_required".to_string(),
                not_found_code: "tool_not_found".to_string(),
                deprecated_code: "tool_deprecated".to_string(),
            }),
            runtime_notes: vec![
                "tool nodes gate behind a side-effect confirmation".to_string(),
            ],
            ..NodeContract::default()
        },
    );

    table.insert(
        NodeType::HttpRequest,
        NodeContract {
            aliases: vec!["http".to_string()],
            required_fields: vec![required(
                "url",
                "http_url_required",
                "http_request nodes require config.url",
            )],
            enum_fields: vec![EnumFieldRequirement {
                key: "method".to_string(),
                allowed: vec![
                    "GET".to_string(),
                    "POST".to_string(),
                    "PUT".to_string(),
                    "DELETE".to_string(),
                    "PATCH".to_string(),
                ],
                code: "http_method_invalid".to_string(),
                message: "config.method must be one of GET/POST/PUT/DELETE/PATCH".to_string(),
            }],
            conditional_required: vec![ConditionalRequired {
                when_key: "method".to_string(),
                when_equals: "POST".to_string(),
                required_fields: vec![required(
                    "body",
                    "http_body_required",
                    "POST requests require config.body",
                )],
            }],
            runtime_notes: vec![
                "http_request nodes gate behind a side-effect confirmation".to_string(),
            ],
            ..NodeContract::default()
        },
    );

    table.insert(
        NodeType::Database,
        NodeContract {
            aliases: vec!["db".to_string()],
            required_fields: vec![required(
                "statement",
                "database_statement_required",
                "database nodes require config.statement",
            )],
            database_url: Some(DatabaseUrlContract {
                key: "database_url".to_string(),
                supported_prefix: SQLITE_DATABASE_URL_PREFIX.to_string(),
                missing_code: "database_url_required".to_string(),
                unsupported_code: "database_url_unsupported".to_string(),
                unsupported_message: "only sqlite:// connection urls are supported".to_string(),
            }),
            runtime_notes: vec![
                "database nodes gate behind a side-effect confirmation".to_string(),
            ],
            ..NodeContract::default()
        },
    );

    table.insert(
        NodeType::File,
        NodeContract {
            required_fields: vec![required(
                "path",
                "file_path_required",
                "file nodes require config.path",
            )],
            enum_fields: vec![EnumFieldRequirement {
                key: "mode".to_string(),
                allowed: vec!["read".to_string(), "write".to_string(), "append".to_string()],
                code: "file_mode_invalid".to_string(),
                message: "config.mode must be one of read/write/append".to_string(),
            }],
            runtime_notes: vec!["file nodes gate behind a side-effect confirmation".to_string()],
            ..NodeContract::default()
        },
    );

    table.insert(
        NodeType::Notification,
        NodeContract {
            required_any_of: vec![AnyOfRequirement {
                keys: vec!["channel".to_string(), "webhook_url".to_string()],
                code: "notification_target_required".to_string(),
                message: "notification nodes require config.channel or config.webhook_url"
                    .to_string(),
            }],
            runtime_notes: vec![
                "notification nodes gate behind a side-effect confirmation".to_string(),
            ],
            ..NodeContract::default()
        },
    );

    table.insert(
        NodeType::TextModel,
        NodeContract {
            aliases: vec!["llm".to_string()],
            required_any_of: vec![AnyOfRequirement {
                keys: vec!["prompt".to_string(), "prompt_template".to_string()],
                code: "prompt_required".to_string(),
                message: "text_model nodes require config.prompt or config.prompt_template"
                    .to_string(),
            }],
            model_provider: Some(ModelProviderContract {
                model_key: "model".to_string(),
                allowed_providers: SUPPORTED_MODEL_PROVIDERS
                    .iter()
                    .map(ToString::to_string)
                    .collect(),
                unsupported_provider_code: "model_provider_unsupported".to_string(),
                unsupported_provider_message: "only openai models are supported".to_string(),
                model_optional: true,
            }),
            ..NodeContract::default()
        },
    );

    table.insert(
        NodeType::Condition,
        NodeContract {
            required_fields: vec![required(
                "expression",
                "condition_expression_required",
                "condition nodes require config.expression",
            )],
            ..NodeContract::default()
        },
    );

    table
}
