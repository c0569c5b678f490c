// crates/tenancy-core/src/core/tenant.rs
// ============================================================================
// Module: Tenant Model
// Description: Tenant records, lifecycle status and the request-scoped context.
// Purpose: Describe who a tenant is and which namespace a request may touch.
// Dependencies: crate::core::{identifiers, time}, serde
// ============================================================================

//! ## Overview
//! A [`TenantRecord`] is the registry's row for one customer organization. A
//! [`TenantContext`] is built once per request by the resolver and is the only
//! value the coordinator accepts for tenant traffic.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::IdentifierError;
use crate::core::identifiers::NamespaceName;
use crate::core::identifiers::Subdomain;
use crate::core::identifiers::TenantId;
use crate::core::identifiers::TenantName;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Status
// ============================================================================

/// Tenant lifecycle status.
///
/// # Invariants
/// - Only [`TenantStatus::Active`] tenants may have connections bound to their
///   namespace for request traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    /// Serving traffic.
    Active,
    /// Administratively blocked.
    Suspended,
    /// Created but not yet provisioned.
    Pending,
}

impl TenantStatus {
    /// Returns the persisted label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Pending => "pending",
        }
    }

    /// Parses a persisted label.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError`] for unknown labels.
    pub fn from_label(label: &str) -> Result<Self, IdentifierError> {
        match label {
            "active" => Ok(Self::Active),
            "suspended" => Ok(Self::Suspended),
            "pending" => Ok(Self::Pending),
            _ => Err(IdentifierError::Malformed {
                kind: "tenant status",
                reason: "expected active, suspended or pending",
            }),
        }
    }
}

impl fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Records
// ============================================================================

/// Registry record for one tenant.
///
/// # Invariants
/// - `namespace == NamespaceName::for_tenant(&id)`; the constructor derives
///   it and storage backends re-check it on every read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantRecord {
    /// Tenant identifier.
    pub id: TenantId,
    /// Display name.
    pub name: TenantName,
    /// Public subdomain handle.
    pub subdomain: Subdomain,
    /// Namespace derived from `id`.
    pub namespace: NamespaceName,
    /// Lifecycle status.
    pub status: TenantStatus,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last mutation time.
    pub updated_at: Timestamp,
}

impl TenantRecord {
    /// Builds a new pending record with a freshly derived namespace.
    #[must_use]
    pub fn new(id: TenantId, name: TenantName, subdomain: Subdomain, now: Timestamp) -> Self {
        Self {
            id,
            name,
            namespace: NamespaceName::for_tenant(&id),
            subdomain,
            status: TenantStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns true when the stored namespace matches the derivation.
    #[must_use]
    pub fn namespace_is_derived(&self) -> bool {
        self.namespace == NamespaceName::for_tenant(&self.id)
    }
}

// ============================================================================
// SECTION: Context
// ============================================================================

/// Immutable request-scoped description of the namespace a request targets.
///
/// # Invariants
/// - Only constructed by the resolver, from a validated identifier of an
///   active tenant.
/// - The namespace is re-derived from the tenant id, never copied from input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantContext {
    /// Validated tenant identifier.
    tenant_id: TenantId,
    /// Namespace derived from `tenant_id`.
    namespace: NamespaceName,
}

impl TenantContext {
    /// Builds a context for `tenant_id`.
    pub(crate) fn for_tenant(tenant_id: TenantId) -> Self {
        Self {
            namespace: NamespaceName::for_tenant(&tenant_id),
            tenant_id,
        }
    }

    /// Returns the tenant identifier.
    #[must_use]
    pub const fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    /// Returns the namespace this request must execute in.
    #[must_use]
    pub const fn namespace(&self) -> &NamespaceName {
        &self.namespace
    }
}
