// crates/tenancy-store-postgres/src/registry.rs
// ============================================================================
// Module: Postgres Tenant Registry
// Description: Tenant records stored in the registry schema.
// Purpose: Durable registry sharing the coordinator's pool.
// Dependencies: postgres, tenancy-core
// ============================================================================

//! ## Overview
//! Registry rows live in `<registry_schema>.tenants`. Every query runs on a
//! namespace-neutral admin session from the shared coordinator and names
//! the table with its schema. Stored namespace names are compared with the
//! derivation on every read; a mismatch is reported as corruption.

// ============================================================================
// SECTION: Imports
// ============================================================================

use postgres::Row;
use postgres::error::SqlState;
use tenancy_core::AuditOutcome;
use tenancy_core::CoordinatorError;
use tenancy_core::NamespaceCoordinator;
use tenancy_core::NamespaceName;
use tenancy_core::RegistryError;
use tenancy_core::RequestScope;
use tenancy_core::Subdomain;
use tenancy_core::TenancyAuditEvent;
use tenancy_core::TenantId;
use tenancy_core::TenantName;
use tenancy_core::TenantRecord;
use tenancy_core::TenantRegistry;
use tenancy_core::TenantStatus;
use tenancy_core::Timestamp;

use crate::session::PgSession;
use crate::session::PgSessionManager;
use crate::sql;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Audit event for tenant registration.
pub const EVENT_TENANT_CREATE: &str = "tenant.create";
/// Audit event for tenant status changes.
pub const EVENT_TENANT_STATUS: &str = "tenant.status";

/// Registry columns in the order [`record_from_row`] reads them.
const COLUMNS: &str = "tenant_id, name, subdomain, namespace_name, status, created_at, updated_at";

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Postgres-backed tenant registry.
pub struct PostgresTenantRegistry {
    /// Shared coordinator.
    coordinator: NamespaceCoordinator<PgSessionManager>,
    /// Qualified registry table.
    table: String,
}

impl PostgresTenantRegistry {
    /// Creates a registry over `registry_schema`.
    #[must_use]
    pub fn new(coordinator: NamespaceCoordinator<PgSessionManager>, registry_schema: &str) -> Self {
        Self {
            coordinator,
            table: sql::tenants_table(registry_schema),
        }
    }

    fn run<T, F>(&self, work: F) -> Result<T, RegistryError>
    where
        F: FnOnce(&mut PgSession) -> Result<T, RegistryError>,
    {
        self.coordinator.with_admin_session(&RequestScope::new(), work).map_err(|err| match err {
            CoordinatorError::Binding(failure) => RegistryError::Io(failure.to_string()),
            CoordinatorError::Work(error) => error,
        })
    }

    fn query_one_record(
        &self,
        filter: &str,
        value: &str,
    ) -> Result<Option<TenantRecord>, RegistryError> {
        let query = format!("SELECT {COLUMNS} FROM {} WHERE {filter} = $1", self.table);
        self.run(|session| {
            let row = session.client().query_opt(query.as_str(), &[&value]).map_err(io)?;
            row.as_ref().map(record_from_row).transpose()
        })
    }
}

fn io(err: postgres::Error) -> RegistryError {
    RegistryError::Io(err.to_string())
}

/// Names the registry column behind a unique violation on insert.
fn conflict_detail(constraint: Option<&str>, record: &TenantRecord) -> String {
    match constraint {
        Some(name) if name.contains("namespace_name") => {
            format!("namespace '{}' already registered", record.namespace)
        }
        Some(name) if name.ends_with("_pkey") => {
            format!("tenant id '{}' already registered", record.id)
        }
        _ => format!("subdomain '{}' already registered", record.subdomain),
    }
}

fn corrupt(err: impl ToString) -> RegistryError {
    RegistryError::Corrupt(err.to_string())
}

/// Decodes one registry row, re-deriving and checking the namespace.
fn record_from_row(row: &Row) -> Result<TenantRecord, RegistryError> {
    let id = TenantId::parse(row.get::<_, &str>(0)).map_err(corrupt)?;
    let name = TenantName::parse(row.get::<_, &str>(1)).map_err(corrupt)?;
    let subdomain = Subdomain::parse(row.get::<_, &str>(2)).map_err(corrupt)?;
    let namespace = NamespaceName::for_tenant(&id);
    let stored: &str = row.get(3);
    if stored != namespace.as_str() {
        return Err(RegistryError::Corrupt(format!(
            "namespace of tenant {id} does not match its id"
        )));
    }
    let status = TenantStatus::from_label(row.get::<_, &str>(4)).map_err(corrupt)?;
    Ok(TenantRecord {
        id,
        name,
        subdomain,
        namespace,
        status,
        created_at: Timestamp::from_unix_millis(row.get(5)),
        updated_at: Timestamp::from_unix_millis(row.get(6)),
    })
}

impl TenantRegistry for PostgresTenantRegistry {
    fn lookup(&self, subdomain: &Subdomain) -> Result<Option<TenantRecord>, RegistryError> {
        self.query_one_record("subdomain", subdomain.as_str())
    }

    fn lookup_by_id(&self, id: &TenantId) -> Result<Option<TenantRecord>, RegistryError> {
        self.query_one_record("tenant_id", &id.to_string())
    }

    fn create(
        &self,
        name: &TenantName,
        subdomain: &Subdomain,
    ) -> Result<TenantRecord, RegistryError> {
        let now = Timestamp::now();
        let record = TenantRecord::new(TenantId::generate(), name.clone(), subdomain.clone(), now);
        let insert =
            format!("INSERT INTO {} ({COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)", self.table);
        let result = self.run(|session| {
            session
                .client()
                .execute(
                    insert.as_str(),
                    &[
                        &record.id.to_string(),
                        &record.name.as_str(),
                        &record.subdomain.as_str(),
                        &record.namespace.as_str(),
                        &record.status.as_str(),
                        &record.created_at.as_unix_millis(),
                        &record.updated_at.as_unix_millis(),
                    ],
                )
                .map_err(|err| {
                    if err.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                        let constraint = err.as_db_error().and_then(|db| db.constraint());
                        RegistryError::Conflict(conflict_detail(constraint, &record))
                    } else {
                        io(err)
                    }
                })
        });
        let audit = self.coordinator.audit();
        match result {
            Ok(_) => {
                audit.record(
                    &TenancyAuditEvent::new(EVENT_TENANT_CREATE, AuditOutcome::Ok)
                        .with_tenant(record.id)
                        .with_namespace(&record.namespace),
                );
                Ok(record)
            }
            Err(err) => {
                audit.record(
                    &TenancyAuditEvent::new(EVENT_TENANT_CREATE, AuditOutcome::Rejected)
                        .with_detail(&err),
                );
                Err(err)
            }
        }
    }

    fn set_status(
        &self,
        id: &TenantId,
        status: TenantStatus,
    ) -> Result<TenantRecord, RegistryError> {
        let update = format!(
            "UPDATE {} SET status = $2, updated_at = $3 WHERE tenant_id = $1 RETURNING {COLUMNS}",
            self.table
        );
        let record = self.run(|session| {
            let row = session
                .client()
                .query_opt(
                    update.as_str(),
                    &[&id.to_string(), &status.as_str(), &Timestamp::now().as_unix_millis()],
                )
                .map_err(io)?
                .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
            record_from_row(&row)
        })?;
        self.coordinator.audit().record(
            &TenancyAuditEvent::new(EVENT_TENANT_STATUS, AuditOutcome::Ok)
                .with_tenant(record.id)
                .with_detail(status),
        );
        Ok(record)
    }

    fn list(&self) -> Result<Vec<TenantRecord>, RegistryError> {
        let query = format!("SELECT {COLUMNS} FROM {} ORDER BY tenant_id", self.table);
        self.run(|session| {
            let rows = session.client().query(query.as_str(), &[]).map_err(io)?;
            rows.iter().map(record_from_row).collect()
        })
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
