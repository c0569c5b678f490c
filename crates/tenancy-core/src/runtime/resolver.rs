// crates/tenancy-core/src/runtime/resolver.rs
// ============================================================================
// Module: Tenant Context Resolver
// Description: Turns an untrusted request identifier into a tenant context.
// Purpose: Ensure namespaces are only ever derived, never accepted as input.
// Dependencies: thiserror, crate::interfaces
// ============================================================================

//! ## Overview
//! The resolver validates the raw identifier, looks the tenant up in the
//! registry and returns an immutable [`TenantContext`] for active tenants.
//! The namespace in the context is re-derived from the tenant id; a
//! namespace string supplied by the caller is rejected as malformed input
//! because it never matches the identifier grammar.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use thiserror::Error;

use crate::audit::AuditOutcome;
use crate::audit::SharedAuditSink;
use crate::audit::TenancyAuditEvent;
use crate::core::IdentifierError;
use crate::core::TenantContext;
use crate::core::TenantId;
use crate::core::TenantIdentifier;
use crate::core::TenantRecord;
use crate::core::TenantStatus;
use crate::interfaces::RegistryError;
use crate::interfaces::TenantRegistry;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Audit event emitted for rejected resolutions.
pub const EVENT_RESOLVE: &str = "tenant.resolve";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Resolution failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// Identifier did not match the accepted grammar.
    #[error("invalid tenant identifier: {0}")]
    InvalidIdentifier(#[from] IdentifierError),
    /// No tenant is registered under the identifier.
    #[error("unknown tenant: {0}")]
    UnknownTenant(String),
    /// Tenant exists but is not active.
    #[error("tenant {tenant_id} is {status}")]
    TenantSuspended {
        /// Tenant identifier.
        tenant_id: TenantId,
        /// Current status.
        status: TenantStatus,
    },
    /// Registry storage failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

// ============================================================================
// SECTION: Resolver
// ============================================================================

/// Resolves request identifiers to tenant contexts.
#[derive(Clone)]
pub struct TenantResolver {
    /// Registry used for lookups.
    registry: Arc<dyn TenantRegistry>,
    /// Audit sink.
    audit: SharedAuditSink,
}

impl TenantResolver {
    /// Creates a resolver over `registry`.
    #[must_use]
    pub fn new(registry: Arc<dyn TenantRegistry>, audit: SharedAuditSink) -> Self {
        Self {
            registry,
            audit,
        }
    }

    /// Resolves `raw` to a context for an active tenant.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::InvalidIdentifier`] for malformed input,
    /// [`ResolveError::UnknownTenant`] when no tenant matches, and
    /// [`ResolveError::TenantSuspended`] for any non-active status.
    pub fn resolve(&self, raw: &str) -> Result<TenantContext, ResolveError> {
        let result = self.find(raw).and_then(|record| {
            if record.status == TenantStatus::Active {
                Ok(TenantContext::for_tenant(record.id))
            } else {
                Err(ResolveError::TenantSuspended {
                    tenant_id: record.id,
                    status: record.status,
                })
            }
        });
        if let Err(err) = &result {
            let mut event = TenancyAuditEvent::new(EVENT_RESOLVE, AuditOutcome::Rejected)
                .with_detail(err);
            if let ResolveError::TenantSuspended {
                tenant_id, ..
            } = err
            {
                event = event.with_tenant(tenant_id);
            }
            self.audit.record(&event);
        }
        result
    }

    /// Finds the registry record for `raw` regardless of status.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] for malformed, unknown or corrupt entries.
    pub fn find(&self, raw: &str) -> Result<TenantRecord, ResolveError> {
        let identifier = TenantIdentifier::parse(raw)?;
        let record = match &identifier {
            TenantIdentifier::Id(id) => self.registry.lookup_by_id(id)?,
            TenantIdentifier::Subdomain(subdomain) => self.registry.lookup(subdomain)?,
        }
        .ok_or_else(|| ResolveError::UnknownTenant(identifier.to_string()))?;
        if !record.namespace_is_derived() {
            return Err(ResolveError::Registry(RegistryError::Corrupt(format!(
                "namespace of tenant {} does not match its id",
                record.id
            ))));
        }
        Ok(record)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
