// crates/tenancy-store-postgres/src/lib.rs
// ============================================================================
// Module: Postgres Tenancy Backend
// Description: Postgres implementation of the tenancy storage contracts.
// Purpose: Schema-per-tenant isolation over one shared Postgres database.
// Dependencies: postgres, r2d2, r2d2_postgres, serde, thiserror, tenancy-core
// ============================================================================

//! ## Overview
//! Each tenant owns one Postgres schema. Pooled connections are bound by
//! setting `search_path` to that schema and reset with `RESET ALL` before
//! they return to the pool. The registry table and change ledger live in a
//! separate registry schema and are always addressed by qualified name.
//!
//! [`PostgresTenancy::connect`] builds the pool, runs the idempotent startup
//! migration and wires the core services over it.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
pub mod registry;
pub mod session;
pub mod sql;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use tenancy_core::CoordinatorBuildError;
use tenancy_core::CoordinatorError;
use tenancy_core::NamespaceClaims;
use tenancy_core::NamespaceCoordinator;
use tenancy_core::ProvisioningService;
use tenancy_core::RequestScope;
use tenancy_core::SharedAuditSink;
use tenancy_core::TemplateNamespace;
use tenancy_core::TemplatePropagator;
use tenancy_core::TenantRegistry;
use tenancy_core::TenantResolver;
use thiserror::Error;

pub use crate::config::PostgresTenancyConfig;
pub use crate::registry::PostgresTenantRegistry;
pub use crate::session::PgSession;
pub use crate::session::PgSessionManager;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Postgres backend setup errors.
#[derive(Debug, Error)]
pub enum PostgresTenancyError {
    /// Configuration rejected before connecting.
    #[error("postgres config error: {0}")]
    Config(String),
    /// Pool construction failed.
    #[error(transparent)]
    Coordinator(#[from] CoordinatorBuildError),
    /// Startup migration failed.
    #[error("postgres migration failed: {0}")]
    Migration(String),
}

// ============================================================================
// SECTION: Facade
// ============================================================================

/// Coordinator type used by the Postgres backend.
pub type PgCoordinator = NamespaceCoordinator<PgSessionManager>;

/// Fully wired Postgres tenancy services sharing one pool.
pub struct PostgresTenancy {
    /// Shared coordinator.
    coordinator: PgCoordinator,
    /// Registry handle shared by the services.
    registry: Arc<PostgresTenantRegistry>,
    /// Identifier resolution.
    resolver: TenantResolver,
    /// Namespace provisioning.
    provisioning: ProvisioningService<PgSessionManager>,
    /// Template change propagation.
    propagator: TemplatePropagator<PgSessionManager>,
    /// Template namespace.
    template: TemplateNamespace,
}

impl PostgresTenancy {
    /// Connects, migrates and wires the services.
    ///
    /// # Errors
    ///
    /// Returns [`PostgresTenancyError`] when the configuration is invalid,
    /// the pool cannot be built or the migration fails.
    pub fn connect(
        config: &PostgresTenancyConfig,
        audit: SharedAuditSink,
    ) -> Result<Self, PostgresTenancyError> {
        let template = config.template()?;
        let manager = PgSessionManager::new(config.postgres_config()?, &config.registry_schema);
        let coordinator = NamespaceCoordinator::new(manager, config.pool_settings(), audit)?;

        let migration = sql::migration(&config.registry_schema, &template);
        coordinator
            .with_admin_session(&RequestScope::new(), |session: &mut PgSession| {
                session.client().batch_execute(&migration)
            })
            .map_err(|err| match err {
                CoordinatorError::Binding(failure) => {
                    PostgresTenancyError::Migration(failure.to_string())
                }
                CoordinatorError::Work(error) => PostgresTenancyError::Migration(error.to_string()),
            })?;

        let registry =
            Arc::new(PostgresTenantRegistry::new(coordinator.clone(), &config.registry_schema));
        let shared: Arc<dyn TenantRegistry> = registry.clone();
        let claims = Arc::new(NamespaceClaims::new());
        let resolver = TenantResolver::new(Arc::clone(&shared), coordinator.audit());
        let provisioning = ProvisioningService::new(
            coordinator.clone(),
            Arc::clone(&shared),
            template.clone(),
            Arc::clone(&claims),
        );
        let propagator =
            TemplatePropagator::new(coordinator.clone(), shared, template.clone(), claims);
        Ok(Self {
            coordinator,
            registry,
            resolver,
            provisioning,
            propagator,
            template,
        })
    }

    /// Returns the shared coordinator.
    #[must_use]
    pub const fn coordinator(&self) -> &PgCoordinator {
        &self.coordinator
    }

    /// Returns the tenant registry.
    #[must_use]
    pub fn registry(&self) -> &PostgresTenantRegistry {
        &self.registry
    }

    /// Returns the tenant resolver.
    #[must_use]
    pub const fn resolver(&self) -> &TenantResolver {
        &self.resolver
    }

    /// Returns the provisioning service.
    #[must_use]
    pub const fn provisioning(&self) -> &ProvisioningService<PgSessionManager> {
        &self.provisioning
    }

    /// Returns the template propagator.
    #[must_use]
    pub const fn propagator(&self) -> &TemplatePropagator<PgSessionManager> {
        &self.propagator
    }

    /// Returns the template namespace.
    #[must_use]
    pub const fn template(&self) -> &TemplateNamespace {
        &self.template
    }
}
