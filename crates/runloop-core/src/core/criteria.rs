// runloop-core/src/core/criteria.rs
// ============================================================================
// Module: Runloop Acceptance Criteria Contracts
// Description: Criterion schema, sources, verification methods, and snapshots.
// Purpose: Provide the shared criteria vocabulary for merging and evaluation.
// Dependencies: crate::core::identifiers, serde, serde_json
// ============================================================================

//! ## Overview
//! Acceptance criteria are deterministic predicates over run evidence. Each
//! criterion carries a source (user intent outranks plan, which outranks
//! inference) and a verification method; the evaluator fails closed on
//! methods it cannot verify automatically. Snapshots bundle the sorted
//! criteria with a canonical hash so reflection passes are idempotent.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;

use crate::core::identifiers::CriterionId;

// ============================================================================
// SECTION: Criterion Sources
// ============================================================================

/// Origin of an acceptance criterion.
///
/// # Invariants
/// - Merge priority is `user > plan > inferred`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriteriaSource {
    /// Explicitly supplied by the user.
    User,
    /// Derived from an agent plan.
    Plan,
    /// Inferred by the criteria manager.
    Inferred,
}

impl CriteriaSource {
    /// Returns the stable string form of the source.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Plan => "plan",
            Self::Inferred => "inferred",
        }
    }

    /// Returns the merge priority (higher wins).
    #[must_use]
    pub const fn priority(self) -> u8 {
        match self {
            Self::User => 3,
            Self::Plan => 2,
            Self::Inferred => 1,
        }
    }
}

// ============================================================================
// SECTION: Verification Methods
// ============================================================================

/// How a criterion can be verified against evidence.
///
/// # Invariants
/// - `Unknown` and `Manual` fail closed in the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMethod {
    /// Evidence comes from the run's persisted event journal.
    RunEvent,
    /// Evidence comes from a deterministic test report.
    Test,
    /// Evidence comes from an artifact reference (reserved).
    Artifact,
    /// Evidence requires explicit user confirmation.
    Manual,
    /// No verification mapping is known yet.
    Unknown,
}

impl VerificationMethod {
    /// Returns the stable string form of the method.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RunEvent => "run_event",
            Self::Test => "test",
            Self::Artifact => "artifact",
            Self::Manual => "manual",
            Self::Unknown => "unknown",
        }
    }
}

// ============================================================================
// SECTION: Criterion
// ============================================================================

/// One acceptance criterion.
///
/// # Invariants
/// - `id` derives from the normalized text, so identical statements from
///   different sources merge onto one id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criterion {
    /// Stable identifier derived from normalized text.
    pub id: CriterionId,
    /// Original criterion text (trimmed).
    pub text: String,
    /// Criterion origin.
    pub source: CriteriaSource,
    /// Verification method.
    pub verification_method: VerificationMethod,
    /// Optional structured metadata.
    #[serde(default)]
    pub meta: Map<String, Value>,
}

impl Criterion {
    /// Returns the minimal canonical form used for snapshot hashing.
    #[must_use]
    pub fn to_canonical_json(&self) -> Value {
        json!({
            "id": self.id.as_str(),
            "text": self.text,
            "source": self.source.as_str(),
            "verification_method": self.verification_method.as_str(),
            "meta": Value::Object(self.meta.clone()),
        })
    }
}

// ============================================================================
// SECTION: Conflicts
// ============================================================================

/// Detected contradiction between two criteria.
///
/// # Invariants
/// - `left_id < right_id` (stable ordering avoids duplicate pairs).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriteriaConflict {
    /// Lower-ordered criterion id.
    pub left_id: CriterionId,
    /// Higher-ordered criterion id.
    pub right_id: CriterionId,
    /// Stable conflict reason string.
    pub reason: String,
}

// ============================================================================
// SECTION: Snapshot
// ============================================================================

/// Immutable criteria bundle handed to the evaluator.
///
/// # Invariants
/// - `criteria` is sorted by source priority descending, then normalized text.
/// - `criteria_hash` is the SHA-256 of the canonical JSON of the sorted set.
/// - `user_questions` is capped at three entries, conflicts first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriteriaSnapshot {
    /// Sorted criteria.
    pub criteria: Vec<Criterion>,
    /// Canonical hash over the sorted criteria.
    pub criteria_hash: String,
    /// Detected contradictions.
    #[serde(default)]
    pub conflicts: Vec<CriteriaConflict>,
    /// Criterion ids that cannot be auto-verified.
    #[serde(default)]
    pub unverifiable_criteria_ids: Vec<CriterionId>,
    /// Clarification prompts for the user (at most three).
    #[serde(default)]
    pub user_questions: Vec<String>,
}

impl CriteriaSnapshot {
    /// Returns true when the id is listed as unverifiable.
    #[must_use]
    pub fn is_unverifiable(&self, id: &CriterionId) -> bool {
        self.unverifiable_criteria_ids.contains(id)
    }

    /// Serializes the snapshot for embedding into lifecycle payloads.
    #[must_use]
    pub fn to_audit_json(&self) -> Value {
        json!({
            "criteria_hash": self.criteria_hash,
            "criteria": self.criteria.iter().map(Criterion::to_canonical_json).collect::<Vec<_>>(),
            "conflicts": self.conflicts,
            "unverifiable_criteria_ids": self.unverifiable_criteria_ids,
        })
    }
}
