// crates/tenancy-core/src/lib.rs
// ============================================================================
// Module: Tenancy Core Library
// Description: Public API surface for the schema-per-tenant isolation engine.
// Purpose: Expose identifiers, interfaces, runtime services and audit sinks.
// Dependencies: crate::{core, interfaces, runtime, audit, error}
// ============================================================================

//! ## Overview
//! Tenancy core routes every request to exactly one tenant namespace inside
//! a shared database and keeps pooled connections from carrying one
//! tenant's namespace into another tenant's request. It is backend-agnostic:
//! storage plugs in through [`TenantRegistry`], [`NamespaceSession`] and
//! [`SchemaCatalog`].
//!
//! Request path: [`TenantResolver::resolve`] turns an untrusted identifier
//! into a [`TenantContext`]; [`NamespaceCoordinator::with_tenant`] runs a unit
//! of work on a pooled connection bound to that namespace and resets it
//! before release. Administrative path: [`ProvisioningService`] and
//! [`TemplatePropagator`].

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod audit;
pub mod core;
pub mod error;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use crate::audit::AuditOutcome;
pub use crate::audit::FileAuditSink;
pub use crate::audit::InMemoryAuditSink;
pub use crate::audit::NoopAuditSink;
pub use crate::audit::SharedAuditSink;
pub use crate::audit::StderrAuditSink;
pub use crate::audit::TenancyAuditEvent;
pub use crate::audit::TenancyAuditSink;
pub use crate::core::ChangeId;
pub use crate::core::IdentifierError;
pub use crate::core::NamespaceName;
pub use crate::core::Subdomain;
pub use crate::core::TemplateNamespace;
pub use crate::core::TenantContext;
pub use crate::core::TenantId;
pub use crate::core::TenantIdentifier;
pub use crate::core::TenantName;
pub use crate::core::TenantRecord;
pub use crate::core::TenantStatus;
pub use crate::core::Timestamp;
pub use crate::core::quote_ident;
pub use crate::core::quote_literal;
pub use crate::core::validate_schema_identifier;
pub use crate::error::TenancyError;
pub use crate::error::TenancyErrorKind;
pub use crate::interfaces::BindOptions;
pub use crate::interfaces::ChangeOutcome;
pub use crate::interfaces::NamespaceSession;
pub use crate::interfaces::RegistryError;
pub use crate::interfaces::SchemaCatalog;
pub use crate::interfaces::SchemaChange;
pub use crate::interfaces::SessionError;
pub use crate::interfaces::TenantRegistry;
pub use crate::runtime::BindingFailure;
pub use crate::runtime::CancelHandle;
pub use crate::runtime::CoordinatorBuildError;
pub use crate::runtime::CoordinatorError;
pub use crate::runtime::DeferReason;
pub use crate::runtime::DeferredNamespace;
pub use crate::runtime::FailedNamespace;
pub use crate::runtime::InMemoryTenantRegistry;
pub use crate::runtime::MemoryConnectionManager;
pub use crate::runtime::MemoryDatabase;
pub use crate::runtime::MemorySession;
pub use crate::runtime::NamespaceClaims;
pub use crate::runtime::NamespaceCoordinator;
pub use crate::runtime::NamespaceState;
pub use crate::runtime::PROVISIONED_MARKER;
pub use crate::runtime::PoolSettings;
pub use crate::runtime::PoolStatus;
pub use crate::runtime::PropagationError;
pub use crate::runtime::PropagationReport;
pub use crate::runtime::ProvisionError;
pub use crate::runtime::ProvisionOutcome;
pub use crate::runtime::ProvisionReport;
pub use crate::runtime::ProvisioningService;
pub use crate::runtime::RequestScope;
pub use crate::runtime::ResolveError;
pub use crate::runtime::ScopeInterrupt;
pub use crate::runtime::TemplatePropagator;
pub use crate::runtime::TenantResolver;
