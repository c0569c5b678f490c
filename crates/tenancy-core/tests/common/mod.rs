// crates/tenancy-core/tests/common/mod.rs
// ============================================================================
// Module: Tenancy Test Harness
// Description: Shared wiring of the in-memory backend for integration tests.
// ============================================================================

#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::sync::Arc;
use std::time::Duration;

use tenancy_core::InMemoryAuditSink;
use tenancy_core::InMemoryTenantRegistry;
use tenancy_core::MemoryConnectionManager;
use tenancy_core::MemoryDatabase;
use tenancy_core::NamespaceClaims;
use tenancy_core::NamespaceCoordinator;
use tenancy_core::PoolSettings;
use tenancy_core::ProvisioningService;
use tenancy_core::RequestScope;
use tenancy_core::Subdomain;
use tenancy_core::TemplateNamespace;
use tenancy_core::TemplatePropagator;
use tenancy_core::TenantName;
use tenancy_core::TenantRecord;
use tenancy_core::TenantRegistry;
use tenancy_core::TenantResolver;

pub const TEMPLATE: &str = "tenant_template";

pub const TEMPLATE_SCRIPT: &str = "CREATE TABLE companies (id, name); CREATE TABLE contacts \
                                   (id, company_id REFERENCES companies, email); CREATE TABLE \
                                   deals (id, contact_id REFERENCES contacts, amount)";

pub struct Harness {
    pub db: MemoryDatabase,
    pub registry: Arc<InMemoryTenantRegistry>,
    pub audit: Arc<InMemoryAuditSink>,
    pub coordinator: NamespaceCoordinator<MemoryConnectionManager>,
    pub resolver: TenantResolver,
    pub provisioning: ProvisioningService<MemoryConnectionManager>,
    pub propagator: TemplatePropagator<MemoryConnectionManager>,
    pub claims: Arc<NamespaceClaims>,
}

pub fn settings(max_connections: u32) -> PoolSettings {
    PoolSettings {
        max_connections,
        min_idle: Some(0),
        connect_timeout: Duration::from_secs(1),
        acquire_timeout: Duration::from_secs(2),
        statement_timeout: Some(Duration::from_secs(5)),
    }
}

pub fn harness(max_connections: u32) -> Harness {
    harness_with(max_connections, TEMPLATE_SCRIPT)
}

pub fn harness_with(max_connections: u32, template_script: &str) -> Harness {
    let db = MemoryDatabase::new();
    if !template_script.is_empty() {
        db.execute_in(TEMPLATE, template_script).unwrap();
    }
    let registry = Arc::new(InMemoryTenantRegistry::new());
    let audit = Arc::new(InMemoryAuditSink::new());
    let coordinator =
        NamespaceCoordinator::new(db.manager(), settings(max_connections), audit.clone()).unwrap();
    let template = TemplateNamespace::parse(TEMPLATE).unwrap();
    let claims = Arc::new(NamespaceClaims::new());
    let provisioning = ProvisioningService::new(
        coordinator.clone(),
        registry.clone(),
        template.clone(),
        Arc::clone(&claims),
    );
    let propagator = TemplatePropagator::new(
        coordinator.clone(),
        registry.clone(),
        template,
        Arc::clone(&claims),
    );
    let resolver = TenantResolver::new(registry.clone(), audit.clone());
    Harness {
        db,
        registry,
        audit,
        coordinator,
        resolver,
        provisioning,
        propagator,
        claims,
    }
}

impl Harness {
    pub fn register(&self, subdomain: &str) -> TenantRecord {
        self.registry
            .create(&TenantName::parse(subdomain).unwrap(), &Subdomain::parse(subdomain).unwrap())
            .unwrap()
    }

    pub fn onboard(&self, subdomain: &str) -> TenantRecord {
        let record = self.register(subdomain);
        self.provisioning.provision(&RequestScope::new(), &record.id).unwrap();
        self.registry.lookup_by_id(&record.id).unwrap().unwrap()
    }
}
