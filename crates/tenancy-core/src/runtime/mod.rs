// crates/tenancy-core/src/runtime/mod.rs
// ============================================================================
// Module: Tenancy Runtime
// Description: Resolver, coordinator, provisioning and propagation services.
// Purpose: Compose the interfaces into the tenant isolation engine.
// Dependencies: crate::{core, interfaces}, r2d2
// ============================================================================

//! ## Overview
//! Runtime services built on the interfaces module. Request traffic flows
//! through [`TenantResolver`] and [`NamespaceCoordinator`]; administrative
//! work flows through [`ProvisioningService`] and [`TemplatePropagator`].
//! The in-memory backend lives here for tests and examples.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod coordinator;
pub mod memory;
pub mod propagation;
pub mod provisioning;
pub mod resolver;
pub mod scope;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use self::coordinator::BindingFailure;
pub use self::coordinator::CoordinatorBuildError;
pub use self::coordinator::CoordinatorError;
pub use self::coordinator::NamespaceCoordinator;
pub use self::coordinator::NamespaceManager;
pub use self::coordinator::NamespaceManagerError;
pub use self::coordinator::PoolSettings;
pub use self::coordinator::PoolStatus;
pub use self::coordinator::ScopedConnection;
pub use self::memory::InMemoryTenantRegistry;
pub use self::memory::MemoryConnectionManager;
pub use self::memory::MemoryDatabase;
pub use self::memory::MemorySession;
pub use self::propagation::DeferReason;
pub use self::propagation::DeferredNamespace;
pub use self::propagation::FailedNamespace;
pub use self::propagation::NamespaceTarget;
pub use self::propagation::PropagationError;
pub use self::propagation::PropagationReport;
pub use self::propagation::TemplatePropagator;
pub use self::provisioning::NamespaceClaim;
pub use self::provisioning::NamespaceClaims;
pub use self::provisioning::NamespaceState;
pub use self::provisioning::PROVISIONED_MARKER;
pub use self::provisioning::ProvisionError;
pub use self::provisioning::ProvisionOutcome;
pub use self::provisioning::ProvisionReport;
pub use self::provisioning::ProvisioningService;
pub use self::resolver::ResolveError;
pub use self::resolver::TenantResolver;
pub use self::scope::CancelHandle;
pub use self::scope::RequestScope;
pub use self::scope::ScopeInterrupt;
