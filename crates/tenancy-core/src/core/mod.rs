// crates/tenancy-core/src/core/mod.rs
// ============================================================================
// Module: Tenancy Core Types
// Description: Identifiers, tenant records and time values.
// Purpose: Group the data model shared by every tenancy component.
// Dependencies: serde, time, uuid
// ============================================================================

//! ## Overview
//! Data model for the tenancy engine. Everything here is plain data with
//! validation at construction; no I/O happens in this module.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod identifiers;
pub mod tenant;
pub mod time;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use self::identifiers::ChangeId;
pub use self::identifiers::IdentifierError;
pub use self::identifiers::NamespaceName;
pub use self::identifiers::Subdomain;
pub use self::identifiers::TemplateNamespace;
pub use self::identifiers::TenantId;
pub use self::identifiers::TenantIdentifier;
pub use self::identifiers::TenantName;
pub use self::identifiers::quote_ident;
pub use self::identifiers::quote_literal;
pub use self::identifiers::validate_schema_identifier;
pub use self::tenant::TenantContext;
pub use self::tenant::TenantRecord;
pub use self::tenant::TenantStatus;
pub use self::time::Timestamp;
