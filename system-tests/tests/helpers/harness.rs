// system-tests/tests/helpers/harness.rs
// ============================================================================
// Module: Tenancy Harness
// Description: Postgres tenancy services wired for one system test.
// Purpose: Provide isolated registry and template schemas per test.
// Dependencies: tenancy-core, tenancy-store-postgres, postgres, uuid
// ============================================================================

use std::sync::Arc;

use postgres::Client;
use tenancy_core::InMemoryAuditSink;
use tenancy_core::RequestScope;
use tenancy_core::Subdomain;
use tenancy_core::TenantContext;
use tenancy_core::TenantName;
use tenancy_core::TenantRecord;
use tenancy_core::TenantRegistry;
use tenancy_core::quote_ident;
use tenancy_store_postgres::PgSession;
use tenancy_store_postgres::PostgresTenancy;
use tenancy_store_postgres::PostgresTenancyConfig;
use uuid::Uuid;

use super::infra::PostgresFixture;

/// Template used by most suites: three tables, two foreign keys, serial keys.
pub const TEMPLATE_SCRIPT: &str = "CREATE TABLE companies (id BIGSERIAL PRIMARY KEY, name TEXT \
                                   NOT NULL); CREATE TABLE contacts (id BIGSERIAL PRIMARY KEY, \
                                   company_id BIGINT NOT NULL REFERENCES companies (id) ON DELETE \
                                   CASCADE, email TEXT NOT NULL UNIQUE); CREATE TABLE deals (id \
                                   BIGSERIAL PRIMARY KEY, contact_id BIGINT NOT NULL REFERENCES \
                                   contacts (id), amount NUMERIC(12, 2) NOT NULL DEFAULT 0)";

/// Tables created by [`TEMPLATE_SCRIPT`], in catalog order.
pub const TEMPLATE_TABLES: [&str; 3] = ["companies", "contacts", "deals"];

/// Wired tenancy services over a live server. Schemas are dropped on drop
/// unless `TENANCY_TEST_KEEP_SCHEMAS` is set.
pub struct PgHarness {
    pub tenancy: PostgresTenancy,
    pub audit: Arc<InMemoryAuditSink>,
    pub config: PostgresTenancyConfig,
    pub fixture: PostgresFixture,
}

impl PgHarness {
    pub fn start() -> Result<Self, String> {
        Self::start_with(TEMPLATE_SCRIPT, |_| {})
    }

    pub fn start_with<F>(template_script: &str, customize: F) -> Result<Self, String>
    where
        F: FnOnce(&mut PostgresTenancyConfig),
    {
        let fixture = PostgresFixture::start()?;
        let suffix = Uuid::new_v4().simple().to_string();
        let mut config = PostgresTenancyConfig {
            connection: fixture.url().to_string(),
            registry_schema: format!("reg_{suffix}"),
            template_namespace: format!("tpl_{suffix}"),
            max_connections: 4,
            min_idle: Some(0),
            connect_timeout_ms: 5_000,
            acquire_timeout_ms: 5_000,
            statement_timeout_ms: Some(30_000),
        };
        customize(&mut config);
        let audit = Arc::new(InMemoryAuditSink::new());
        let tenancy =
            PostgresTenancy::connect(&config, audit.clone()).map_err(|err| err.to_string())?;
        let harness = Self {
            tenancy,
            audit,
            config,
            fixture,
        };
        if !template_script.is_empty() {
            harness.execute_in_template(template_script)?;
        }
        Ok(harness)
    }

    /// Opens a client outside the tenancy pool.
    pub fn client(&self) -> Result<Client, String> {
        self.fixture.client()
    }

    /// Runs `script` inside the template namespace in one transaction.
    pub fn execute_in_template(&self, script: &str) -> Result<(), String> {
        let mut client = self.client()?;
        let batch = format!(
            "BEGIN; SET LOCAL search_path TO {}; {script}; COMMIT",
            quote_ident(&self.config.template_namespace)
        );
        client.batch_execute(&batch).map_err(|err| format!("template script failed: {err}"))
    }

    pub fn register(&self, subdomain: &str) -> Result<TenantRecord, String> {
        let name = TenantName::parse(subdomain).map_err(|err| err.to_string())?;
        let subdomain = Subdomain::parse(subdomain).map_err(|err| err.to_string())?;
        self.tenancy.registry().create(&name, &subdomain).map_err(|err| err.to_string())
    }

    /// Registers and provisions a tenant, returning its active record.
    pub fn onboard(&self, subdomain: &str) -> Result<TenantRecord, String> {
        let record = self.register(subdomain)?;
        self.tenancy
            .provisioning()
            .provision(&RequestScope::new(), &record.id)
            .map_err(|err| err.to_string())?;
        self.tenancy
            .registry()
            .lookup_by_id(&record.id)
            .map_err(|err| err.to_string())?
            .ok_or_else(|| format!("tenant {} vanished after provisioning", record.id))
    }

    pub fn context(&self, record: &TenantRecord) -> Result<TenantContext, String> {
        self.tenancy.resolver().resolve(record.subdomain.as_str()).map_err(|err| err.to_string())
    }

    /// Runs one statement bound to the tenant and returns the affected rows.
    pub fn execute_as(&self, context: &TenantContext, statement: &str) -> Result<u64, String> {
        self.tenancy
            .coordinator()
            .with_tenant(&RequestScope::new(), context, |session: &mut PgSession| {
                session.client().execute(statement, &[])
            })
            .map_err(|err| err.to_string())
    }

    /// Counts rows of an unqualified table as seen by the tenant.
    pub fn count_as(&self, context: &TenantContext, table: &str) -> Result<i64, String> {
        let query = format!("SELECT count(*) FROM {}", quote_ident(table));
        self.tenancy
            .coordinator()
            .with_tenant(&RequestScope::new(), context, |session: &mut PgSession| {
                session.client().query_one(query.as_str(), &[]).map(|row| row.get::<_, i64>(0))
            })
            .map_err(|err| err.to_string())
    }

    /// Lists ordinary tables of `schema`.
    pub fn tables_in(&self, schema: &str) -> Result<Vec<String>, String> {
        let mut client = self.client()?;
        let rows = client
            .query(
                "SELECT tablename::text FROM pg_tables WHERE schemaname = $1 ORDER BY tablename",
                &[&schema],
            )
            .map_err(|err| err.to_string())?;
        Ok(rows.into_iter().map(|row| row.get(0)).collect())
    }

    /// Lists ledger change ids recorded for `namespace`.
    pub fn ledger(&self, namespace: &str) -> Result<Vec<String>, String> {
        let mut client = self.client()?;
        let query = format!(
            "SELECT change_id FROM {}.tenant_schema_changes WHERE namespace_name = $1 ORDER BY \
             change_id",
            quote_ident(&self.config.registry_schema)
        );
        let rows = client.query(query.as_str(), &[&namespace]).map_err(|err| err.to_string())?;
        Ok(rows.into_iter().map(|row| row.get(0)).collect())
    }

    fn drop_schemas(&self) -> Result<(), String> {
        let mut client = self.client()?;
        let registry = quote_ident(&self.config.registry_schema);
        let query = format!("SELECT namespace_name FROM {registry}.tenants");
        let namespaces: Vec<String> = client
            .query(query.as_str(), &[])
            .map_err(|err| err.to_string())?
            .into_iter()
            .map(|row| row.get(0))
            .collect();
        for namespace in namespaces {
            let drop = format!("DROP SCHEMA IF EXISTS {} CASCADE", quote_ident(&namespace));
            client.batch_execute(&drop).map_err(|err| err.to_string())?;
        }
        let drop = format!(
            "DROP SCHEMA IF EXISTS {registry} CASCADE; DROP SCHEMA IF EXISTS {} CASCADE",
            quote_ident(&self.config.template_namespace)
        );
        client.batch_execute(&drop).map_err(|err| err.to_string())
    }
}

impl Drop for PgHarness {
    fn drop(&mut self) {
        if !self.fixture.keep_schemas() {
            let _ = self.drop_schemas();
        }
    }
}
