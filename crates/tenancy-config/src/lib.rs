// crates/tenancy-config/src/lib.rs
// ============================================================================
// Module: Tenancy Config Library
// Description: Canonical config model and validation.
// Purpose: Single source of truth for tenancy.toml semantics.
// Dependencies: serde, tenancy-core, tenancy-store-postgres, toml
// ============================================================================

//! ## Overview
//! `tenancy-config` defines the configuration model for the tenancy engine
//! and the CLI. Validation is strict and fails closed.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
