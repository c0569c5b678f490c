// crates/tenancy-core/src/interfaces/mod.rs
// ============================================================================
// Module: Tenancy Interfaces
// Description: Backend-agnostic contracts for the registry and pooled sessions.
// Purpose: Define the seams storage backends implement.
// Dependencies: crate::core, thiserror
// ============================================================================

//! ## Overview
//! Three contracts separate the engine from storage:
//! - [`TenantRegistry`]: the authoritative subdomain/id to tenant mapping.
//! - [`NamespaceSession`]: a pooled connection whose active namespace can be
//!   set and reset. The coordinator is the only caller of bind and reset.
//! - [`SchemaCatalog`]: structural catalog operations used by provisioning
//!   and propagation.
//!
//! Implementations must fail closed: an unbound session never falls back to
//! an unscoped namespace.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::core::ChangeId;
use crate::core::NamespaceName;
use crate::core::Subdomain;
use crate::core::TemplateNamespace;
use crate::core::TenantId;
use crate::core::TenantName;
use crate::core::TenantRecord;
use crate::core::TenantStatus;

// ============================================================================
// SECTION: Tenant Registry
// ============================================================================

/// Tenant registry errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Subdomain or namespace already registered.
    #[error("registry conflict: {0}")]
    Conflict(String),
    /// Record addressed by an update does not exist.
    #[error("tenant not found: {0}")]
    NotFound(String),
    /// Storage I/O failure.
    #[error("registry storage error: {0}")]
    Io(String),
    /// Stored record failed validation.
    #[error("registry record corrupt: {0}")]
    Corrupt(String),
}

/// Authoritative mapping from public handles to tenant records.
///
/// Reads may run concurrently. `create` relies on storage-level uniqueness
/// for `subdomain` and `namespace`, not on application locks.
pub trait TenantRegistry: Send + Sync {
    /// Looks up a tenant by subdomain.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when storage fails or the row is corrupt.
    fn lookup(&self, subdomain: &Subdomain) -> Result<Option<TenantRecord>, RegistryError>;

    /// Looks up a tenant by id.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when storage fails or the row is corrupt.
    fn lookup_by_id(&self, id: &TenantId) -> Result<Option<TenantRecord>, RegistryError>;

    /// Registers a new pending tenant, generating its id and namespace.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Conflict`] when the subdomain or derived
    /// namespace is taken; the registry is left unchanged.
    fn create(&self, name: &TenantName, subdomain: &Subdomain)
    -> Result<TenantRecord, RegistryError>;

    /// Returns true when the subdomain is registered.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when storage fails.
    fn exists(&self, subdomain: &Subdomain) -> Result<bool, RegistryError> {
        Ok(self.lookup(subdomain)?.is_some())
    }

    /// Updates a tenant's status and returns the updated record.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for unknown tenants.
    fn set_status(&self, id: &TenantId, status: TenantStatus)
    -> Result<TenantRecord, RegistryError>;

    /// Returns every record ordered by tenant id.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when storage fails.
    fn list(&self) -> Result<Vec<TenantRecord>, RegistryError>;
}

// ============================================================================
// SECTION: Namespace Sessions
// ============================================================================

/// Session-level errors raised by backends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Backend reported an error.
    #[error("session backend error: {0}")]
    Backend(String),
    /// Operation requires a bound namespace.
    #[error("session is not bound to a namespace")]
    Unbound,
    /// Request was rejected before reaching the backend.
    #[error("invalid session request: {0}")]
    Invalid(String),
}

/// Settings applied together with a namespace bind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BindOptions {
    /// Server-side statement timeout for the bound operation.
    pub statement_timeout: Option<Duration>,
}

/// Pooled connection whose active namespace is switchable.
///
/// # Invariants
/// - After `reset_namespace` succeeds, no unqualified object reference
///   resolves to a tenant namespace and no per-session state of the previous
///   operation survives.
pub trait NamespaceSession: Send + 'static {
    /// Makes `namespace` the only namespace unqualified names resolve in.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when the backend rejects the bind.
    fn bind_namespace(
        &mut self,
        namespace: &NamespaceName,
        options: &BindOptions,
    ) -> Result<(), SessionError>;

    /// Returns the session to the neutral default state.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when the reset cannot be confirmed; callers
    /// must then discard the connection.
    fn reset_namespace(&mut self) -> Result<(), SessionError>;

    /// Checks liveness without touching any namespace.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when the backend is unreachable.
    fn ping(&mut self) -> Result<(), SessionError>;
}

// ============================================================================
// SECTION: Schema Catalog
// ============================================================================

/// One structural change, already applied to the template namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaChange {
    /// Stable change identifier used by the per-namespace ledger.
    pub id: ChangeId,
    /// Script executed with the target namespace bound.
    pub script: String,
}

impl SchemaChange {
    /// Builds a change from an id and script text.
    #[must_use]
    pub fn new(id: ChangeId, script: impl Into<String>) -> Self {
        Self {
            id,
            script: script.into(),
        }
    }
}

/// Result of applying a change to one namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOutcome {
    /// Script ran and the ledger recorded it.
    Applied,
    /// Ledger already held the change; nothing ran.
    AlreadyApplied,
}

impl ChangeOutcome {
    /// Returns the snake-case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::AlreadyApplied => "already_applied",
        }
    }
}

/// Structural catalog operations over namespaces.
///
/// Every operation except [`SchemaCatalog::apply_change`] addresses objects
/// with fully qualified names and works on a namespace-neutral session.
pub trait SchemaCatalog: NamespaceSession {
    /// Returns true when a namespace with this exact name exists.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] on backend failure.
    fn namespace_exists(&mut self, namespace: &str) -> Result<bool, SessionError>;

    /// Creates an empty namespace if absent and, in the same step, copies
    /// the template's change ledger entries to it. The copy is the set of
    /// changes every table cloned afterwards already carries. Returns false
    /// when the namespace already existed; its ledger is then left alone.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] on backend failure.
    fn create_namespace(
        &mut self,
        template: &TemplateNamespace,
        namespace: &NamespaceName,
    ) -> Result<bool, SessionError>;

    /// Drops a namespace, its objects and its change ledger entries.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] on backend failure.
    fn drop_namespace(&mut self, namespace: &NamespaceName) -> Result<(), SessionError>;

    /// Lists base table names in a namespace.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] on backend failure.
    fn table_names(&mut self, namespace: &str) -> Result<BTreeSet<String>, SessionError>;

    /// Recreates one template table (columns, defaults, constraints, indexes,
    /// owned sequences) inside `target`, without rows. No-op when present.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] on backend failure; the table is either fully
    /// created or absent.
    fn clone_table(
        &mut self,
        template: &TemplateNamespace,
        target: &NamespaceName,
        table: &str,
    ) -> Result<(), SessionError>;

    /// Adds every template foreign key missing from `target`, pointing
    /// template-internal references at `target`. Returns the number added.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] on backend failure.
    fn clone_foreign_keys(
        &mut self,
        template: &TemplateNamespace,
        target: &NamespaceName,
    ) -> Result<usize, SessionError>;

    /// Returns true when `namespace` carries the provisioned marker.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] on backend failure.
    fn is_marked_provisioned(&mut self, namespace: &NamespaceName) -> Result<bool, SessionError>;

    /// Writes the provisioned marker on `target`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] on backend failure.
    fn mark_provisioned(&mut self, target: &NamespaceName) -> Result<(), SessionError>;

    /// Lists change ids in the template's ledger that `target`'s ledger does
    /// not hold, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] on backend failure.
    fn unrecorded_changes(
        &mut self,
        template: &TemplateNamespace,
        target: &NamespaceName,
    ) -> Result<Vec<String>, SessionError>;

    /// Records `change` in the template's ledger without executing it.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] on backend failure.
    fn record_template_change(
        &mut self,
        template: &TemplateNamespace,
        change: &ChangeId,
    ) -> Result<(), SessionError>;

    /// Applies `change` to the bound `namespace` and records it in the
    /// ledger in one transaction. Skips changes the ledger already holds.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when the script fails; nothing is recorded.
    fn apply_change(
        &mut self,
        namespace: &NamespaceName,
        change: &SchemaChange,
    ) -> Result<ChangeOutcome, SessionError>;
}
