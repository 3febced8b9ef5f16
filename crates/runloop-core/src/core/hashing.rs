// runloop-core/src/core/hashing.rs
// ============================================================================
// Module: Runloop Canonical Hashing
// Description: RFC 8785 JSON canonicalization and derived-identifier hashing.
// Purpose: Provide deterministic hashes for criteria snapshots and stable ids.
// Dependencies: serde, serde_jcs, sha2
// ============================================================================

//! ## Overview
//! Runloop hashes all canonical JSON using RFC 8785 (JCS) to guarantee stable,
//! replayable digests. Derived identifiers (idempotent run ids, criterion ids,
//! reflection ids) take short lowercase-hex prefixes of SHA-256 digests so the
//! same inputs always converge to the same row.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when computing canonical hashes.
#[derive(Debug, Error)]
pub enum HashError {
    /// JSON canonicalization failed.
    #[error("failed to canonicalize json: {0}")]
    Canonicalization(String),
}

// ============================================================================
// SECTION: Hashing Helpers
// ============================================================================

/// Returns canonical JSON bytes for a serializable value using RFC 8785.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn canonical_json_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, HashError> {
    serde_jcs::to_vec(value).map_err(|err| HashError::Canonicalization(err.to_string()))
}

/// Hashes canonical JSON and returns the lowercase hex digest.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn sha256_canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<String, HashError> {
    let bytes = canonical_json_bytes(value)?;
    Ok(sha256_hex(&bytes))
}

/// Hashes raw bytes and returns the lowercase hex digest.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(&hasher.finalize())
}

// ============================================================================
// SECTION: Derived Identifiers
// ============================================================================

/// Hex prefix length for idempotent run identifiers.
const RUN_ID_HEX_LEN: usize = 16;
/// Hex prefix length for criterion identifiers.
const CRITERION_ID_HEX_LEN: usize = 12;
/// Version tag mixed into reflection identifiers.
const REFLECTION_ID_VERSION: &str = "v1";

/// Derives a stable run identifier from an idempotency key scope.
///
/// The same `(project_id, workflow_id, idempotency_key)` triple always yields
/// the same run id, so reissued create requests converge to one row.
#[must_use]
pub fn derive_idempotent_run_id(
    project_id: &str,
    workflow_id: &str,
    idempotency_key: &str,
) -> String {
    let material =
        format!("{}|{}|{}", project_id.trim(), workflow_id.trim(), idempotency_key.trim());
    let digest = sha256_hex(material.as_bytes());
    format!("run_{}", &digest[..RUN_ID_HEX_LEN])
}

/// Derives a stable criterion identifier from normalized criterion text.
#[must_use]
pub fn derive_criterion_id(normalized_text: &str) -> String {
    let digest = sha256_hex(normalized_text.as_bytes());
    format!("crit_{}", &digest[..CRITERION_ID_HEX_LEN])
}

/// Derives the reflection identifier for one acceptance pass over a run.
#[must_use]
pub fn derive_reflection_id(run_id: &str, criteria_hash: &str) -> String {
    let material = format!("{}|{}|{REFLECTION_ID_VERSION}", run_id.trim(), criteria_hash.trim());
    sha256_hex(material.as_bytes())
}

// ============================================================================
// SECTION: Hex Encoding
// ============================================================================

/// Encodes bytes as a lowercase hex string.
#[must_use]
pub fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}
