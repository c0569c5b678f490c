// crates/tenancy-core/src/error.rs
// ============================================================================
// Module: Tenancy Error Taxonomy
// Description: Unified error type and retry/status classification.
// Purpose: Let callers tell retryable from non-retryable failures.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! Each component returns its own error enum. [`TenancyError`] wraps them for
//! callers that handle every tenancy failure in one place, and
//! [`TenancyErrorKind`] maps each to the shared taxonomy with a retry hint
//! and an HTTP-equivalent status for the request-routing layer.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Serialize;
use thiserror::Error;

use crate::core::IdentifierError;
use crate::interfaces::RegistryError;
use crate::interfaces::SessionError;
use crate::runtime::BindingFailure;
use crate::runtime::ProvisionError;
use crate::runtime::PropagationError;
use crate::runtime::ResolveError;

// ============================================================================
// SECTION: Kinds
// ============================================================================

/// Classification shared by every tenancy error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TenancyErrorKind {
    /// Malformed identifier.
    InvalidIdentifier,
    /// No tenant matched.
    UnknownTenant,
    /// Tenant is not active.
    TenantSuspended,
    /// Uniqueness or exclusivity conflict.
    Conflict,
    /// Namespace is not completely provisioned.
    NamespaceIncomplete,
    /// No connection could be bound.
    BindingFailure,
    /// Some namespaces failed a structural change.
    PropagationPartialFailure,
    /// Storage or catalog failure.
    Storage,
    /// Caller cancelled or the deadline passed.
    Cancelled,
}

impl TenancyErrorKind {
    /// Returns the stable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidIdentifier => "invalid_identifier",
            Self::UnknownTenant => "unknown_tenant",
            Self::TenantSuspended => "tenant_suspended",
            Self::Conflict => "conflict",
            Self::NamespaceIncomplete => "namespace_incomplete",
            Self::BindingFailure => "binding_failure",
            Self::PropagationPartialFailure => "propagation_partial_failure",
            Self::Storage => "storage",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns true when retrying the same request may succeed.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::NamespaceIncomplete
                | Self::BindingFailure
                | Self::PropagationPartialFailure
                | Self::Storage
        )
    }

    /// Returns the HTTP-equivalent status for client-facing translation.
    #[must_use]
    pub const fn status_hint(self) -> u16 {
        match self {
            Self::InvalidIdentifier => 400,
            Self::UnknownTenant => 401,
            Self::TenantSuspended => 403,
            Self::Conflict => 409,
            Self::NamespaceIncomplete
            | Self::BindingFailure
            | Self::PropagationPartialFailure
            | Self::Storage
            | Self::Cancelled => 503,
        }
    }
}

// ============================================================================
// SECTION: Unified Error
// ============================================================================

/// Any tenancy failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TenancyError {
    /// Identifier validation failed.
    #[error(transparent)]
    Identifier(#[from] IdentifierError),
    /// Registry failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// Resolution failed.
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    /// Binding failed.
    #[error(transparent)]
    Binding(#[from] BindingFailure),
    /// Session operation failed.
    #[error(transparent)]
    Session(#[from] SessionError),
    /// Provisioning failed.
    #[error(transparent)]
    Provision(#[from] ProvisionError),
    /// Propagation failed.
    #[error(transparent)]
    Propagation(#[from] PropagationError),
}

impl TenancyError {
    /// Returns the taxonomy kind.
    #[must_use]
    pub fn kind(&self) -> TenancyErrorKind {
        match self {
            Self::Identifier(_) => TenancyErrorKind::InvalidIdentifier,
            Self::Registry(err) => registry_kind(err),
            Self::Resolve(err) => match err {
                ResolveError::InvalidIdentifier(_) => TenancyErrorKind::InvalidIdentifier,
                ResolveError::UnknownTenant(_) => TenancyErrorKind::UnknownTenant,
                ResolveError::TenantSuspended {
                    ..
                } => TenancyErrorKind::TenantSuspended,
                ResolveError::Registry(err) => registry_kind(err),
            },
            Self::Binding(err) => binding_kind(err),
            Self::Session(_) => TenancyErrorKind::Storage,
            Self::Provision(err) => match err {
                ProvisionError::UnknownTenant(_) => TenancyErrorKind::UnknownTenant,
                ProvisionError::NotActive {
                    ..
                } => TenancyErrorKind::TenantSuspended,
                ProvisionError::InProgress(_) | ProvisionError::NotSuspended {
                    ..
                } => TenancyErrorKind::Conflict,
                ProvisionError::Incomplete {
                    ..
                } => TenancyErrorKind::NamespaceIncomplete,
                ProvisionError::TemplateMissing(_)
                | ProvisionError::EmptyTemplate(_)
                | ProvisionError::Step {
                    ..
                }
                | ProvisionError::Seed(_) => TenancyErrorKind::Storage,
                ProvisionError::Interrupted(_) => TenancyErrorKind::Cancelled,
                ProvisionError::Binding(err) => binding_kind(err),
                ProvisionError::Registry(err) => registry_kind(err),
            },
            Self::Propagation(err) => match err {
                PropagationError::PartialFailure {
                    ..
                } => TenancyErrorKind::PropagationPartialFailure,
                PropagationError::ChangeMismatch {
                    ..
                } => TenancyErrorKind::Conflict,
                PropagationError::TemplateLedger(_) => TenancyErrorKind::Storage,
                PropagationError::Binding(err) => binding_kind(err),
                PropagationError::Registry(err) => registry_kind(err),
            },
        }
    }

    /// Returns true when retrying may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

const fn registry_kind(err: &RegistryError) -> TenancyErrorKind {
    match err {
        RegistryError::Conflict(_) => TenancyErrorKind::Conflict,
        RegistryError::NotFound(_) => TenancyErrorKind::UnknownTenant,
        RegistryError::Io(_) | RegistryError::Corrupt(_) => TenancyErrorKind::Storage,
    }
}

const fn binding_kind(err: &BindingFailure) -> TenancyErrorKind {
    match err {
        BindingFailure::Cancelled | BindingFailure::DeadlineExceeded => TenancyErrorKind::Cancelled,
        BindingFailure::PoolExhausted {
            ..
        }
        | BindingFailure::Bind {
            ..
        }
        | BindingFailure::Session(_) => TenancyErrorKind::BindingFailure,
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
