// system-tests/src/lib.rs
// ============================================================================
// Module: Tenancy System Tests Library
// Description: Shared configuration for live-database system tests.
// Purpose: Provide common settings for the system-test binaries.
// Dependencies: std
// ============================================================================

//! ## Overview
//! This crate hosts shared configuration used by the tenancy system-test
//! binaries in `system-tests/tests`. The binaries only build with the
//! `system-tests` feature because they need Docker or an external Postgres.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
