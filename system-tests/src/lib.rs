// system-tests/src/lib.rs
// ============================================================================
// Module: Runloop System Tests
// Description: Crate root for end-to-end scenario tests.
// Purpose: Host the scenario suite under tests/ with shared helpers.
// Dependencies: none
// ============================================================================

//! ## Overview
//! This crate carries no library code; the end-to-end scenarios live under
//! `tests/` and drive a real server instance over HTTP.
