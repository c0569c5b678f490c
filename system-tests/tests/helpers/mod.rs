// system-tests/tests/helpers/mod.rs
// ============================================================================
// Module: System Test Helpers
// Description: Shared helpers for tenancy system-tests.
// Purpose: Provide the Postgres fixture and a wired tenancy harness.
// Dependencies: system-tests, tenancy-core, tenancy-store-postgres
// ============================================================================

//! ## Overview
//! Shared helpers for tenancy system-tests. Every harness uses its own
//! registry schema and template namespace so suites can share one server.

#![allow(dead_code, reason = "Shared helpers are reused across multiple test suites.")]

pub mod harness;
pub mod infra;
