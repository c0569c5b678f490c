// crates/tenancy-store-postgres/src/sql.rs
// ============================================================================
// Module: Postgres Statements
// Description: SQL text for migrations, binding, reset, cloning and the ledger.
// Purpose: Keep every interpolated identifier quoted in one place.
// Dependencies: tenancy-core
// ============================================================================

//! ## Overview
//! Statement builders used by the session and registry. Identifiers that
//! reach SQL text are either derived namespace names, the validated
//! registry schema or template namespace, or names read back from the
//! system catalog; all of them pass through [`quote_ident`]. Values travel
//! as bind parameters wherever Postgres allows one.

use std::time::Duration;

use tenancy_core::NamespaceName;
use tenancy_core::TemplateNamespace;
use tenancy_core::quote_ident;
use tenancy_core::quote_literal;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Registry table name inside the registry schema.
pub const TENANTS_TABLE: &str = "tenants";
/// Change ledger table name inside the registry schema.
pub const LEDGER_TABLE: &str = "tenant_schema_changes";

/// Returns a session to its startup state. Runs after `ROLLBACK`.
///
/// `DISCARD ALL` is avoided because it cannot run inside the implicit
/// transaction of a multi-statement query.
pub const RESET_SESSION: &str = "CLOSE ALL; RESET ALL; RESET ROLE; RESET SESSION AUTHORIZATION; \
                                 UNLISTEN *; SELECT pg_advisory_unlock_all(); DISCARD TEMP; \
                                 DISCARD SEQUENCES";

/// Lists ordinary and partitioned tables of one schema.
pub const SELECT_TABLE_NAMES: &str = "SELECT c.relname::text FROM pg_class c JOIN pg_namespace \
                                      n ON n.oid = c.relnamespace WHERE n.nspname = $1 AND \
                                      c.relkind IN ('r', 'p') AND NOT c.relispartition ORDER BY \
                                      c.relname";

/// Checks whether a schema exists.
pub const SELECT_NAMESPACE_EXISTS: &str =
    "SELECT EXISTS (SELECT 1 FROM pg_namespace WHERE nspname = $1)";

/// Reads the comment on a schema.
pub const SELECT_NAMESPACE_COMMENT: &str =
    "SELECT obj_description(oid, 'pg_namespace') FROM pg_namespace WHERE nspname = $1";

/// Lists serial sequences owned by the columns of one table.
pub const SELECT_OWNED_SEQUENCES: &str = "SELECT a.attname::text, s.relname::text FROM pg_class \
                                          t JOIN pg_namespace n ON n.oid = t.relnamespace JOIN \
                                          pg_depend d ON d.refobjid = t.oid AND d.deptype = 'a' \
                                          JOIN pg_class s ON s.oid = d.objid AND s.relkind = 'S' \
                                          JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum \
                                          = d.refobjsubid WHERE n.nspname = $1 AND t.relname = \
                                          $2 ORDER BY a.attnum";

/// Lists foreign keys declared on tables of one schema, with column lists,
/// referenced schema and table, and referential actions.
pub const SELECT_FOREIGN_KEYS: &str = "SELECT c.conname::text, t.relname::text, \
                                       rn.nspname::text, r.relname::text, ARRAY(SELECT \
                                       a.attname::text FROM unnest(c.conkey) WITH ORDINALITY \
                                       k(attnum, ord) JOIN pg_attribute a ON a.attrelid = \
                                       c.conrelid AND a.attnum = k.attnum ORDER BY k.ord), \
                                       ARRAY(SELECT a.attname::text FROM unnest(c.confkey) WITH \
                                       ORDINALITY k(attnum, ord) JOIN pg_attribute a ON \
                                       a.attrelid = c.confrelid AND a.attnum = k.attnum ORDER BY \
                                       k.ord), c.confupdtype::text, c.confdeltype::text FROM \
                                       pg_constraint c JOIN pg_class t ON t.oid = c.conrelid \
                                       JOIN pg_namespace n ON n.oid = t.relnamespace JOIN \
                                       pg_class r ON r.oid = c.confrelid JOIN pg_namespace rn ON \
                                       rn.oid = r.relnamespace WHERE c.contype = 'f' AND \
                                       n.nspname = $1 ORDER BY t.relname, c.conname";

/// Lists foreign key constraint names already present in one schema.
pub const SELECT_FOREIGN_KEY_NAMES: &str = "SELECT c.conname::text FROM pg_constraint c JOIN \
                                            pg_namespace n ON n.oid = c.connamespace WHERE \
                                            c.contype = 'f' AND n.nspname = $1";

// ============================================================================
// SECTION: Migration
// ============================================================================

/// Returns the startup migration: registry table, change ledger and the
/// template schema, each created only when absent.
#[must_use]
pub fn migration(registry_schema: &str, template: &TemplateNamespace) -> String {
    let schema = quote_ident(registry_schema);
    format!(
        "CREATE SCHEMA IF NOT EXISTS {schema};CREATE TABLE IF NOT EXISTS {schema}.{tenants} \
         (tenant_id TEXT PRIMARY KEY,name TEXT NOT NULL,subdomain TEXT NOT NULL \
         UNIQUE,namespace_name TEXT NOT NULL UNIQUE,status TEXT NOT NULL CHECK (status IN \
         ('pending', 'active', 'suspended')),created_at BIGINT NOT NULL,updated_at BIGINT NOT \
         NULL);CREATE TABLE IF NOT EXISTS {schema}.{ledger} (namespace_name TEXT NOT \
         NULL,change_id TEXT NOT NULL,applied_at BIGINT NOT NULL,PRIMARY KEY (namespace_name, \
         change_id));CREATE SCHEMA IF NOT EXISTS {template};",
        tenants = quote_ident(TENANTS_TABLE),
        ledger = quote_ident(LEDGER_TABLE),
        template = template.quoted(),
    )
}

/// Returns the qualified registry table.
#[must_use]
pub fn tenants_table(registry_schema: &str) -> String {
    format!("{}.{}", quote_ident(registry_schema), quote_ident(TENANTS_TABLE))
}

/// Returns the qualified change ledger table.
#[must_use]
pub fn ledger_table(registry_schema: &str) -> String {
    format!("{}.{}", quote_ident(registry_schema), quote_ident(LEDGER_TABLE))
}

// ============================================================================
// SECTION: Binding
// ============================================================================

/// Returns the statements that bind a session to `namespace`.
///
/// The search path lists only the tenant namespace; `pg_catalog` stays
/// implicitly first.
#[must_use]
pub fn bind(namespace: &NamespaceName, statement_timeout: Option<Duration>) -> String {
    let mut sql = format!("SET search_path TO {}", namespace.quoted());
    if let Some(timeout) = statement_timeout {
        let millis = timeout.as_millis().max(1);
        sql.push_str(&format!("; SET statement_timeout = {millis}"));
    }
    sql
}

// ============================================================================
// SECTION: Cloning
// ============================================================================

/// Returns the statement creating one tenant table from its template twin.
#[must_use]
pub fn clone_table(template: &TemplateNamespace, target: &NamespaceName, table: &str) -> String {
    let table = quote_ident(table);
    format!(
        "CREATE TABLE IF NOT EXISTS {target}.{table} (LIKE {template}.{table} INCLUDING ALL)",
        target = target.quoted(),
        template = template.quoted(),
    )
}

/// Returns the statements re-homing one serial column onto a sequence
/// inside the tenant namespace.
#[must_use]
pub fn own_sequence(target: &NamespaceName, table: &str, column: &str, sequence: &str) -> String {
    let qualified_sequence = format!("{}.{}", target.quoted(), quote_ident(sequence));
    let qualified_table = format!("{}.{}", target.quoted(), quote_ident(table));
    let column = quote_ident(column);
    format!(
        "CREATE SEQUENCE IF NOT EXISTS {qualified_sequence}; ALTER TABLE {qualified_table} ALTER \
         COLUMN {column} SET DEFAULT nextval({literal}::regclass); ALTER SEQUENCE \
         {qualified_sequence} OWNED BY {qualified_table}.{column}",
        literal = quote_literal(&qualified_sequence),
    )
}

/// One foreign key read from the template catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyDef {
    /// Constraint name.
    pub name: String,
    /// Table declaring the key.
    pub table: String,
    /// Schema of the referenced table.
    pub referenced_schema: String,
    /// Referenced table.
    pub referenced_table: String,
    /// Referencing columns in key order.
    pub columns: Vec<String>,
    /// Referenced columns in key order.
    pub referenced_columns: Vec<String>,
    /// `pg_constraint.confupdtype` code.
    pub on_update: String,
    /// `pg_constraint.confdeltype` code.
    pub on_delete: String,
}

/// Returns the statement adding `key` to the tenant namespace. References to
/// template tables are redirected into the tenant namespace; references to
/// any other schema are kept.
#[must_use]
pub fn add_foreign_key(
    template: &TemplateNamespace,
    target: &NamespaceName,
    key: &ForeignKeyDef,
) -> String {
    let referenced_schema = if key.referenced_schema == template.as_str() {
        target.quoted()
    } else {
        quote_ident(&key.referenced_schema)
    };
    format!(
        "ALTER TABLE {target}.{table} ADD CONSTRAINT {name} FOREIGN KEY ({columns}) REFERENCES \
         {referenced_schema}.{referenced_table} ({referenced_columns}) ON UPDATE {on_update} ON \
         DELETE {on_delete}",
        target = target.quoted(),
        table = quote_ident(&key.table),
        name = quote_ident(&key.name),
        columns = column_list(&key.columns),
        referenced_table = quote_ident(&key.referenced_table),
        referenced_columns = column_list(&key.referenced_columns),
        on_update = referential_action(&key.on_update),
        on_delete = referential_action(&key.on_delete),
    )
}

fn column_list(columns: &[String]) -> String {
    columns.iter().map(|column| quote_ident(column)).collect::<Vec<_>>().join(", ")
}

/// Maps a `pg_constraint` action code to its SQL keyword.
#[must_use]
pub fn referential_action(code: &str) -> &'static str {
    match code {
        "r" => "RESTRICT",
        "c" => "CASCADE",
        "n" => "SET NULL",
        "d" => "SET DEFAULT",
        _ => "NO ACTION",
    }
}

// ============================================================================
// SECTION: Marker
// ============================================================================

/// Returns the statement writing the provisioned marker on `target`.
#[must_use]
pub fn mark_provisioned(target: &NamespaceName, marker: &str) -> String {
    format!("COMMENT ON SCHEMA {} IS {}", target.quoted(), quote_literal(marker))
}

/// Returns the statement dropping a tenant namespace and its objects.
#[must_use]
pub fn drop_namespace(target: &NamespaceName) -> String {
    format!("DROP SCHEMA IF EXISTS {} CASCADE", target.quoted())
}

/// Returns the statement creating a tenant namespace.
#[must_use]
pub fn create_namespace(target: &NamespaceName) -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {}", target.quoted())
}

// ============================================================================
// SECTION: Tests
// ============================================================================
