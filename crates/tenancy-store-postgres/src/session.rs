// crates/tenancy-store-postgres/src/session.rs
// ============================================================================
// Module: Postgres Namespace Session
// Description: Pooled Postgres client implementing the namespace contracts.
// Purpose: Bind, reset, introspect and clone schemas over one connection.
// Dependencies: postgres, r2d2, r2d2_postgres, tenancy-core
// ============================================================================

//! ## Overview
//! [`PgSessionManager`] wraps the `r2d2_postgres` manager and hands out
//! [`PgSession`]s. Binding sets `search_path` to the tenant schema alone;
//! resetting rolls back any open transaction, restores every session
//! setting to its startup value and then confirms the search path no longer
//! names the bound schema. A reset that cannot be confirmed is an error and
//! the coordinator discards the connection.
//!
//! Catalog operations run on namespace-neutral sessions and qualify every
//! object with its schema.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use postgres::Client;
use postgres::NoTls;
use r2d2::ManageConnection;
use r2d2_postgres::PostgresConnectionManager;
use tenancy_core::BindOptions;
use tenancy_core::ChangeId;
use tenancy_core::ChangeOutcome;
use tenancy_core::NamespaceName;
use tenancy_core::NamespaceSession;
use tenancy_core::PROVISIONED_MARKER;
use tenancy_core::SchemaCatalog;
use tenancy_core::SchemaChange;
use tenancy_core::SessionError;
use tenancy_core::TemplateNamespace;
use tenancy_core::Timestamp;

use crate::sql;
use crate::sql::ForeignKeyDef;

// ============================================================================
// SECTION: Manager
// ============================================================================

/// `r2d2` manager producing [`PgSession`]s.
#[derive(Debug)]
pub struct PgSessionManager {
    /// Underlying client manager.
    inner: PostgresConnectionManager<NoTls>,
    /// Schema holding the registry and change ledger.
    registry_schema: String,
}

impl PgSessionManager {
    /// Creates a manager from a parsed client configuration.
    #[must_use]
    pub fn new(config: postgres::Config, registry_schema: impl Into<String>) -> Self {
        Self {
            inner: PostgresConnectionManager::new(config, NoTls),
            registry_schema: registry_schema.into(),
        }
    }
}

impl ManageConnection for PgSessionManager {
    type Connection = PgSession;
    type Error = postgres::Error;

    fn connect(&self) -> Result<Self::Connection, Self::Error> {
        Ok(PgSession {
            client: self.inner.connect()?,
            registry_schema: self.registry_schema.clone(),
            bound: None,
        })
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        self.inner.is_valid(&mut conn.client)
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        self.inner.has_broken(&mut conn.client)
    }
}

// ============================================================================
// SECTION: Session
// ============================================================================

/// One pooled Postgres connection.
pub struct PgSession {
    /// Client connection.
    client: Client,
    /// Schema holding the registry and change ledger.
    registry_schema: String,
    /// Namespace set by the last successful bind.
    bound: Option<NamespaceName>,
}

impl PgSession {
    /// Returns the client for the current unit of work.
    pub fn client(&mut self) -> &mut Client {
        &mut self.client
    }

    /// Returns the namespace this session is bound to.
    #[must_use]
    pub const fn bound_namespace(&self) -> Option<&NamespaceName> {
        self.bound.as_ref()
    }

    /// Returns the registry schema.
    #[must_use]
    pub fn registry_schema(&self) -> &str {
        &self.registry_schema
    }

    /// Returns the server's current search path.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Backend`] when the query fails.
    pub fn search_path(&mut self) -> Result<String, SessionError> {
        let row = self
            .client
            .query_one("SELECT current_setting('search_path')", &[])
            .map_err(backend)?;
        Ok(row.get(0))
    }

    fn foreign_keys(&mut self, schema: &str) -> Result<Vec<ForeignKeyDef>, SessionError> {
        let rows = self.client.query(sql::SELECT_FOREIGN_KEYS, &[&schema]).map_err(backend)?;
        Ok(rows
            .into_iter()
            .map(|row| ForeignKeyDef {
                name: row.get(0),
                table: row.get(1),
                referenced_schema: row.get(2),
                referenced_table: row.get(3),
                columns: row.get(4),
                referenced_columns: row.get(5),
                on_update: row.get(6),
                on_delete: row.get(7),
            })
            .collect())
    }
}

fn backend(err: postgres::Error) -> SessionError {
    SessionError::Backend(err.to_string())
}

fn insert_ledger_row(registry_schema: &str) -> String {
    format!(
        "INSERT INTO {} (namespace_name, change_id, applied_at) VALUES ($1, $2, $3) ON CONFLICT \
         DO NOTHING",
        sql::ledger_table(registry_schema)
    )
}

impl NamespaceSession for PgSession {
    fn bind_namespace(
        &mut self,
        namespace: &NamespaceName,
        options: &BindOptions,
    ) -> Result<(), SessionError> {
        if !self.namespace_exists(namespace.as_str())? {
            return Err(SessionError::Backend(format!("schema {namespace} does not exist")));
        }
        self.client
            .batch_execute(&sql::bind(namespace, options.statement_timeout))
            .map_err(backend)?;
        self.bound = Some(namespace.clone());
        Ok(())
    }

    fn reset_namespace(&mut self) -> Result<(), SessionError> {
        if self.client.is_closed() {
            return Err(SessionError::Backend("connection closed".to_string()));
        }
        self.client.batch_execute("ROLLBACK").map_err(backend)?;
        self.client.batch_execute(sql::RESET_SESSION).map_err(backend)?;
        if let Some(namespace) = self.bound.take() {
            let path = self.search_path()?;
            if path.contains(namespace.as_str()) {
                return Err(SessionError::Backend(format!(
                    "search_path still names {namespace} after reset"
                )));
            }
        }
        Ok(())
    }

    fn ping(&mut self) -> Result<(), SessionError> {
        self.client.simple_query("SELECT 1").map(|_| ()).map_err(backend)
    }
}

impl SchemaCatalog for PgSession {
    fn namespace_exists(&mut self, namespace: &str) -> Result<bool, SessionError> {
        let row =
            self.client.query_one(sql::SELECT_NAMESPACE_EXISTS, &[&namespace]).map_err(backend)?;
        Ok(row.get(0))
    }

    fn create_namespace(
        &mut self,
        template: &TemplateNamespace,
        namespace: &NamespaceName,
    ) -> Result<bool, SessionError> {
        let ledger = sql::ledger_table(&self.registry_schema);
        let now = Timestamp::now().as_unix_millis();
        let inherit = format!(
            "INSERT INTO {ledger} (namespace_name, change_id, applied_at) SELECT $1, change_id, \
             $2 FROM {ledger} WHERE namespace_name = $3 ON CONFLICT DO NOTHING"
        );
        let mut tx = self.client.transaction().map_err(backend)?;
        let exists: bool = tx
            .query_one(sql::SELECT_NAMESPACE_EXISTS, &[&namespace.as_str()])
            .map_err(backend)?
            .get(0);
        if exists {
            tx.commit().map_err(backend)?;
            return Ok(false);
        }
        tx.batch_execute(&sql::create_namespace(namespace)).map_err(backend)?;
        tx.execute(inherit.as_str(), &[&namespace.as_str(), &now, &template.as_str()])
            .map_err(backend)?;
        tx.commit().map_err(backend)?;
        Ok(true)
    }

    fn drop_namespace(&mut self, namespace: &NamespaceName) -> Result<(), SessionError> {
        let ledger = sql::ledger_table(&self.registry_schema);
        let mut tx = self.client.transaction().map_err(backend)?;
        tx.batch_execute(&sql::drop_namespace(namespace)).map_err(backend)?;
        let delete = format!("DELETE FROM {ledger} WHERE namespace_name = $1");
        tx.execute(delete.as_str(), &[&namespace.as_str()]).map_err(backend)?;
        tx.commit().map_err(backend)
    }

    fn table_names(&mut self, namespace: &str) -> Result<BTreeSet<String>, SessionError> {
        let rows = self.client.query(sql::SELECT_TABLE_NAMES, &[&namespace]).map_err(backend)?;
        Ok(rows.into_iter().map(|row| row.get(0)).collect())
    }

    fn clone_table(
        &mut self,
        template: &TemplateNamespace,
        target: &NamespaceName,
        table: &str,
    ) -> Result<(), SessionError> {
        let sequences = self
            .client
            .query(sql::SELECT_OWNED_SEQUENCES, &[&template.as_str(), &table])
            .map_err(backend)?;
        let mut tx = self.client.transaction().map_err(backend)?;
        tx.batch_execute(&sql::clone_table(template, target, table)).map_err(backend)?;
        for row in sequences {
            let column: String = row.get(0);
            let sequence: String = row.get(1);
            tx.batch_execute(&sql::own_sequence(target, table, &column, &sequence))
                .map_err(backend)?;
        }
        tx.commit().map_err(backend)
    }

    fn clone_foreign_keys(
        &mut self,
        template: &TemplateNamespace,
        target: &NamespaceName,
    ) -> Result<usize, SessionError> {
        let keys = self.foreign_keys(template.as_str())?;
        let existing: BTreeSet<String> = self
            .client
            .query(sql::SELECT_FOREIGN_KEY_NAMES, &[&target.as_str()])
            .map_err(backend)?
            .into_iter()
            .map(|row| row.get(0))
            .collect();
        let mut tx = self.client.transaction().map_err(backend)?;
        let mut added = 0;
        for key in keys.iter().filter(|key| !existing.contains(&key.name)) {
            tx.batch_execute(&sql::add_foreign_key(template, target, key)).map_err(backend)?;
            added += 1;
        }
        tx.commit().map_err(backend)?;
        Ok(added)
    }

    fn is_marked_provisioned(&mut self, namespace: &NamespaceName) -> Result<bool, SessionError> {
        let row = self
            .client
            .query_opt(sql::SELECT_NAMESPACE_COMMENT, &[&namespace.as_str()])
            .map_err(backend)?;
        let comment: Option<String> = row.and_then(|row| row.get(0));
        Ok(comment.as_deref() == Some(PROVISIONED_MARKER))
    }

    fn mark_provisioned(&mut self, target: &NamespaceName) -> Result<(), SessionError> {
        self.client
            .batch_execute(&sql::mark_provisioned(target, PROVISIONED_MARKER))
            .map_err(backend)
    }

    fn unrecorded_changes(
        &mut self,
        template: &TemplateNamespace,
        target: &NamespaceName,
    ) -> Result<Vec<String>, SessionError> {
        let ledger = sql::ledger_table(&self.registry_schema);
        let query = format!(
            "SELECT t.change_id FROM {ledger} t WHERE t.namespace_name = $1 AND NOT EXISTS \
             (SELECT 1 FROM {ledger} n WHERE n.namespace_name = $2 AND n.change_id = \
             t.change_id) ORDER BY t.change_id"
        );
        let rows = self
            .client
            .query(query.as_str(), &[&template.as_str(), &target.as_str()])
            .map_err(backend)?;
        Ok(rows.into_iter().map(|row| row.get(0)).collect())
    }

    fn record_template_change(
        &mut self,
        template: &TemplateNamespace,
        change: &ChangeId,
    ) -> Result<(), SessionError> {
        let insert = insert_ledger_row(&self.registry_schema);
        self.client
            .execute(
                insert.as_str(),
                &[&template.as_str(), &change.as_str(), &Timestamp::now().as_unix_millis()],
            )
            .map(|_| ())
            .map_err(backend)
    }

    fn apply_change(
        &mut self,
        namespace: &NamespaceName,
        change: &SchemaChange,
    ) -> Result<ChangeOutcome, SessionError> {
        if self.bound.as_ref() != Some(namespace) {
            return Err(SessionError::Unbound);
        }
        let insert = insert_ledger_row(&self.registry_schema);
        let mut tx = self.client.transaction().map_err(backend)?;
        // The ledger row is written first so a concurrent application of the
        // same change blocks on it and then sees the conflict.
        let inserted = tx
            .execute(
                insert.as_str(),
                &[&namespace.as_str(), &change.id.as_str(), &Timestamp::now().as_unix_millis()],
            )
            .map_err(backend)?;
        if inserted == 0 {
            tx.rollback().map_err(backend)?;
            return Ok(ChangeOutcome::AlreadyApplied);
        }
        tx.batch_execute(&change.script).map_err(backend)?;
        tx.commit().map_err(backend)?;
        Ok(ChangeOutcome::Applied)
    }
}
