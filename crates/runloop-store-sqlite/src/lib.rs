// runloop-store-sqlite/src/lib.rs
// ============================================================================
// Module: Runloop SQLite Store Library
// Description: Durable run repository and event journal on SQLite.
// Purpose: Expose the SQLite-backed storage implementation.
// Dependencies: crate::store
// ============================================================================

//! ## Overview
//! This crate implements the run repository and event journal interfaces over
//! SQLite with WAL journaling. One store instance owns one database file and
//! enforces the same invariants as the in-memory reference: monotone event
//! ids, unique idempotency keys per journal, terminal-type dedup, and the
//! atomic CAS status transition.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::SqliteRunStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteSyncMode;
