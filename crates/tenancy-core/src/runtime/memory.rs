// crates/tenancy-core/src/runtime/memory.rs
// ============================================================================
// Module: In-Memory Tenancy Backend
// Description: Registry and namespace sessions backed by process memory.
// Purpose: Drive the real pool and runtime paths in tests and examples.
// Dependencies: r2d2, serde_json, crate::interfaces
// ============================================================================

//! ## Overview
//! [`InMemoryTenantRegistry`] and [`MemoryDatabase`] implement the tenancy
//! interfaces without a database server. Sessions follow the same rules as
//! the Postgres backend: unqualified table access requires a bound
//! namespace and fails closed otherwise.
//!
//! Structural scripts accept a small statement set:
//! `CREATE TABLE [IF NOT EXISTS] t (col [REFERENCES other], ...)`,
//! `ALTER TABLE t ADD [COLUMN] col`, `ALTER TABLE t DROP [COLUMN] col` and
//! `DROP TABLE [IF EXISTS] t`, separated by `;`.
//!
//! The database also exposes failure injection (bind, reset, per-namespace
//! change failures, offline) so recovery paths can be exercised.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;

use r2d2::ManageConnection;
use serde_json::Value;

use crate::core::ChangeId;
use crate::core::NamespaceName;
use crate::core::Subdomain;
use crate::core::TemplateNamespace;
use crate::core::TenantId;
use crate::core::TenantName;
use crate::core::TenantRecord;
use crate::core::TenantStatus;
use crate::core::Timestamp;
use crate::interfaces::BindOptions;
use crate::interfaces::ChangeOutcome;
use crate::interfaces::NamespaceSession;
use crate::interfaces::RegistryError;
use crate::interfaces::SchemaCatalog;
use crate::interfaces::SchemaChange;
use crate::interfaces::SessionError;
use crate::interfaces::TenantRegistry;

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Registry contents guarded by one lock.
#[derive(Default)]
struct RegistryState {
    /// Records by id.
    records: BTreeMap<TenantId, TenantRecord>,
    /// Subdomain uniqueness index.
    subdomains: BTreeMap<String, TenantId>,
}

/// In-memory tenant registry for tests and examples.
#[derive(Default)]
pub struct InMemoryTenantRegistry {
    /// Registry state.
    state: Mutex<RegistryState>,
}

impl InMemoryTenantRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, RegistryState>, RegistryError> {
        self.state.lock().map_err(|_| RegistryError::Io("registry lock poisoned".to_string()))
    }
}

impl TenantRegistry for InMemoryTenantRegistry {
    fn lookup(&self, subdomain: &Subdomain) -> Result<Option<TenantRecord>, RegistryError> {
        let state = self.lock()?;
        Ok(state
            .subdomains
            .get(subdomain.as_str())
            .and_then(|id| state.records.get(id))
            .cloned())
    }

    fn lookup_by_id(&self, id: &TenantId) -> Result<Option<TenantRecord>, RegistryError> {
        Ok(self.lock()?.records.get(id).cloned())
    }

    fn create(
        &self,
        name: &TenantName,
        subdomain: &Subdomain,
    ) -> Result<TenantRecord, RegistryError> {
        let mut state = self.lock()?;
        if state.subdomains.contains_key(subdomain.as_str()) {
            return Err(RegistryError::Conflict(format!(
                "subdomain '{subdomain}' already registered"
            )));
        }
        let now = Timestamp::now();
        let record = TenantRecord::new(TenantId::generate(), name.clone(), subdomain.clone(), now);
        if state.records.values().any(|existing| existing.namespace == record.namespace) {
            return Err(RegistryError::Conflict(format!(
                "namespace '{}' already registered",
                record.namespace
            )));
        }
        state.subdomains.insert(subdomain.as_str().to_string(), record.id);
        state.records.insert(record.id, record.clone());
        Ok(record)
    }

    fn set_status(
        &self,
        id: &TenantId,
        status: TenantStatus,
    ) -> Result<TenantRecord, RegistryError> {
        let mut state = self.lock()?;
        let record = state
            .records
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        record.status = status;
        record.updated_at = Timestamp::now();
        Ok(record.clone())
    }

    fn list(&self) -> Result<Vec<TenantRecord>, RegistryError> {
        Ok(self.lock()?.records.values().cloned().collect())
    }
}

// ============================================================================
// SECTION: Database State
// ============================================================================

/// One table: column names, foreign keys and rows.
#[derive(Debug, Clone, Default)]
struct MemoryTable {
    /// Column names in declaration order.
    columns: Vec<String>,
    /// Foreign keys as column to referenced table.
    foreign_keys: BTreeMap<String, String>,
    /// Stored rows.
    rows: Vec<Value>,
}

/// One namespace and its provisioned marker.
#[derive(Debug, Clone, Default)]
struct MemoryNamespace {
    /// Tables by name.
    tables: BTreeMap<String, MemoryTable>,
    /// Provisioned marker.
    provisioned: bool,
}

/// Whole-database state.
#[derive(Debug, Default)]
struct MemoryState {
    /// Namespaces by name.
    namespaces: BTreeMap<String, MemoryNamespace>,
    /// Change ledger as (namespace, change id).
    ledger: BTreeSet<(String, String)>,
    /// Number of times each change script actually ran per namespace.
    applications: BTreeMap<(String, String), usize>,
    /// Namespaces whose change applications fail.
    failing_changes: BTreeSet<String>,
    /// Pending injected reset failures.
    reset_failures: usize,
    /// Pending injected bind failures.
    bind_failures: usize,
    /// Rejects connects and pings when set.
    offline: bool,
    /// Sessions opened so far.
    sessions_opened: u64,
}

/// Shared in-memory database.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    /// Shared state.
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDatabase {
    /// Creates an empty database.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a pool manager opening sessions on this database.
    #[must_use]
    pub fn manager(&self) -> MemoryConnectionManager {
        MemoryConnectionManager {
            db: self.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs a structural script in `namespace`, creating it if absent.
    /// Used to define and migrate the template outside tenant traffic.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when a statement fails; nothing is applied.
    pub fn execute_in(&self, namespace: &str, script: &str) -> Result<(), SessionError> {
        let mut state = self.lock();
        let mut working = state.namespaces.get(namespace).cloned().unwrap_or_default();
        execute_script(&mut working, script)?;
        state.namespaces.insert(namespace.to_string(), working);
        Ok(())
    }

    /// Returns every namespace name.
    #[must_use]
    pub fn namespaces(&self) -> Vec<String> {
        self.lock().namespaces.keys().cloned().collect()
    }

    /// Returns table names in `namespace`.
    #[must_use]
    pub fn table_names(&self, namespace: &str) -> BTreeSet<String> {
        self.lock()
            .namespaces
            .get(namespace)
            .map(|ns| ns.tables.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the columns of one table.
    #[must_use]
    pub fn columns(&self, namespace: &str, table: &str) -> Option<Vec<String>> {
        self.lock()
            .namespaces
            .get(namespace)
            .and_then(|ns| ns.tables.get(table))
            .map(|table| table.columns.clone())
    }

    /// Returns the foreign keys of one table as column to referenced table.
    #[must_use]
    pub fn foreign_keys(&self, namespace: &str, table: &str) -> BTreeMap<String, String> {
        self.lock()
            .namespaces
            .get(namespace)
            .and_then(|ns| ns.tables.get(table))
            .map(|table| table.foreign_keys.clone())
            .unwrap_or_default()
    }

    /// Returns the number of rows in one table.
    #[must_use]
    pub fn row_count(&self, namespace: &str, table: &str) -> usize {
        self.lock()
            .namespaces
            .get(namespace)
            .and_then(|ns| ns.tables.get(table))
            .map_or(0, |table| table.rows.len())
    }

    /// Returns change ids recorded for `namespace`.
    #[must_use]
    pub fn ledger(&self, namespace: &str) -> Vec<String> {
        ledger_of(&self.lock(), namespace)
    }

    /// Returns how many times `change` actually ran in `namespace`.
    #[must_use]
    pub fn applications(&self, namespace: &str, change: &str) -> usize {
        self.lock()
            .applications
            .get(&(namespace.to_string(), change.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Removes a table, simulating an interrupted provisioning run.
    pub fn remove_table(&self, namespace: &str, table: &str) {
        if let Some(ns) = self.lock().namespaces.get_mut(namespace) {
            ns.tables.remove(table);
        }
    }

    /// Clears the provisioned marker, simulating a run that stopped before
    /// its last step.
    pub fn clear_marker(&self, namespace: &str) {
        if let Some(ns) = self.lock().namespaces.get_mut(namespace) {
            ns.provisioned = false;
        }
    }

    /// Makes every change application in `namespace` fail.
    pub fn fail_changes_for(&self, namespace: &str) {
        self.lock().failing_changes.insert(namespace.to_string());
    }

    /// Clears injected change failures.
    pub fn clear_change_failures(&self) {
        self.lock().failing_changes.clear();
    }

    /// Makes the next `count` resets fail.
    pub fn fail_next_resets(&self, count: usize) {
        self.lock().reset_failures = count;
    }

    /// Makes the next `count` binds fail.
    pub fn fail_next_binds(&self, count: usize) {
        self.lock().bind_failures = count;
    }

    /// Rejects new connections and pings while set.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Returns the number of sessions opened so far.
    #[must_use]
    pub fn sessions_opened(&self) -> u64 {
        self.lock().sessions_opened
    }
}

// ============================================================================
// SECTION: Pool Manager
// ============================================================================

/// `r2d2` manager for [`MemorySession`].
#[derive(Debug, Clone)]
pub struct MemoryConnectionManager {
    /// Database sessions connect to.
    db: MemoryDatabase,
}

impl ManageConnection for MemoryConnectionManager {
    type Connection = MemorySession;
    type Error = SessionError;

    fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let mut state = self.db.lock();
        if state.offline {
            return Err(SessionError::Backend("database offline".to_string()));
        }
        state.sessions_opened += 1;
        Ok(MemorySession {
            id: state.sessions_opened,
            db: self.db.clone(),
            search_path: None,
            statement_timeout: None,
        })
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.ping()
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

// ============================================================================
// SECTION: Session
// ============================================================================

/// One in-memory session.
#[derive(Debug)]
pub struct MemorySession {
    /// Session number, unique per database.
    id: u64,
    /// Backing database.
    db: MemoryDatabase,
    /// Bound namespace.
    search_path: Option<String>,
    /// Statement timeout set on bind.
    statement_timeout: Option<Duration>,
}

impl MemorySession {
    /// Returns the session number.
    #[must_use]
    pub const fn session_id(&self) -> u64 {
        self.id
    }

    /// Returns the bound namespace.
    #[must_use]
    pub fn active_namespace(&self) -> Option<&str> {
        self.search_path.as_deref()
    }

    /// Returns the statement timeout applied on bind.
    #[must_use]
    pub const fn statement_timeout(&self) -> Option<Duration> {
        self.statement_timeout
    }

    /// Inserts a row into `table` of the bound namespace.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Unbound`] without a bound namespace, or
    /// [`SessionError::Backend`] when the table does not exist.
    pub fn insert(&mut self, table: &str, row: Value) -> Result<(), SessionError> {
        let namespace = self.search_path.as_deref().ok_or(SessionError::Unbound)?;
        let mut state = self.db.lock();
        let table = bound_table(&mut state, namespace, table)?;
        table.rows.push(row);
        Ok(())
    }

    /// Returns all rows of `table` in the bound namespace.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Unbound`] without a bound namespace, or
    /// [`SessionError::Backend`] when the table does not exist.
    pub fn rows(&mut self, table: &str) -> Result<Vec<Value>, SessionError> {
        let namespace = self.search_path.as_deref().ok_or(SessionError::Unbound)?;
        let mut state = self.db.lock();
        Ok(bound_table(&mut state, namespace, table)?.rows.clone())
    }

    /// Runs a structural script in the bound namespace.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when unbound or a statement fails.
    pub fn execute(&mut self, script: &str) -> Result<(), SessionError> {
        let namespace = self.search_path.as_deref().ok_or(SessionError::Unbound)?;
        let mut state = self.db.lock();
        let ns = state
            .namespaces
            .get_mut(namespace)
            .ok_or_else(|| missing_schema(namespace))?;
        let mut working = ns.clone();
        execute_script(&mut working, script)?;
        *ns = working;
        Ok(())
    }
}

impl NamespaceSession for MemorySession {
    fn bind_namespace(
        &mut self,
        namespace: &NamespaceName,
        options: &BindOptions,
    ) -> Result<(), SessionError> {
        let mut state = self.db.lock();
        if state.bind_failures > 0 {
            state.bind_failures -= 1;
            return Err(SessionError::Backend("injected bind failure".to_string()));
        }
        if !state.namespaces.contains_key(namespace.as_str()) {
            return Err(missing_schema(namespace.as_str()));
        }
        self.search_path = Some(namespace.as_str().to_string());
        self.statement_timeout = options.statement_timeout;
        Ok(())
    }

    fn reset_namespace(&mut self) -> Result<(), SessionError> {
        let mut state = self.db.lock();
        if state.reset_failures > 0 {
            state.reset_failures -= 1;
            return Err(SessionError::Backend("injected reset failure".to_string()));
        }
        self.search_path = None;
        self.statement_timeout = None;
        Ok(())
    }

    fn ping(&mut self) -> Result<(), SessionError> {
        if self.db.lock().offline {
            return Err(SessionError::Backend("database offline".to_string()));
        }
        Ok(())
    }
}

impl SchemaCatalog for MemorySession {
    fn namespace_exists(&mut self, namespace: &str) -> Result<bool, SessionError> {
        Ok(self.db.lock().namespaces.contains_key(namespace))
    }

    fn create_namespace(
        &mut self,
        template: &TemplateNamespace,
        namespace: &NamespaceName,
    ) -> Result<bool, SessionError> {
        let mut state = self.db.lock();
        if state.namespaces.contains_key(namespace.as_str()) {
            return Ok(false);
        }
        state.namespaces.insert(namespace.as_str().to_string(), MemoryNamespace::default());
        let inherited = ledger_of(&state, template.as_str());
        for change in inherited {
            state.ledger.insert((namespace.as_str().to_string(), change));
        }
        Ok(true)
    }

    fn drop_namespace(&mut self, namespace: &NamespaceName) -> Result<(), SessionError> {
        let mut state = self.db.lock();
        state.namespaces.remove(namespace.as_str());
        state.ledger.retain(|(entry_ns, _)| entry_ns != namespace.as_str());
        Ok(())
    }

    fn table_names(&mut self, namespace: &str) -> Result<BTreeSet<String>, SessionError> {
        Ok(self.db.table_names(namespace))
    }

    fn clone_table(
        &mut self,
        template: &TemplateNamespace,
        target: &NamespaceName,
        table: &str,
    ) -> Result<(), SessionError> {
        let mut state = self.db.lock();
        let source = state
            .namespaces
            .get(template.as_str())
            .and_then(|ns| ns.tables.get(table))
            .ok_or_else(|| missing_relation(template.as_str(), table))?;
        let structure = MemoryTable {
            columns: source.columns.clone(),
            foreign_keys: BTreeMap::new(),
            rows: Vec::new(),
        };
        let target_ns = state
            .namespaces
            .get_mut(target.as_str())
            .ok_or_else(|| missing_schema(target.as_str()))?;
        target_ns.tables.entry(table.to_string()).or_insert(structure);
        Ok(())
    }

    fn clone_foreign_keys(
        &mut self,
        template: &TemplateNamespace,
        target: &NamespaceName,
    ) -> Result<usize, SessionError> {
        let mut state = self.db.lock();
        let template_keys: Vec<(String, String, String)> = state
            .namespaces
            .get(template.as_str())
            .map(|ns| {
                ns.tables
                    .iter()
                    .flat_map(|(table, def)| {
                        def.foreign_keys.iter().map(move |(column, referenced)| {
                            (table.clone(), column.clone(), referenced.clone())
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        let target_ns = state
            .namespaces
            .get_mut(target.as_str())
            .ok_or_else(|| missing_schema(target.as_str()))?;
        let mut added = 0;
        for (table, column, referenced) in template_keys {
            if !target_ns.tables.contains_key(&referenced) {
                return Err(missing_relation(target.as_str(), &referenced));
            }
            let def = target_ns
                .tables
                .get_mut(&table)
                .ok_or_else(|| missing_relation(target.as_str(), &table))?;
            if !def.foreign_keys.contains_key(&column) {
                def.foreign_keys.insert(column, referenced);
                added += 1;
            }
        }
        Ok(added)
    }

    fn is_marked_provisioned(&mut self, namespace: &NamespaceName) -> Result<bool, SessionError> {
        Ok(self.db.lock().namespaces.get(namespace.as_str()).is_some_and(|ns| ns.provisioned))
    }

    fn mark_provisioned(&mut self, target: &NamespaceName) -> Result<(), SessionError> {
        let mut state = self.db.lock();
        let target_ns = state
            .namespaces
            .get_mut(target.as_str())
            .ok_or_else(|| missing_schema(target.as_str()))?;
        target_ns.provisioned = true;
        Ok(())
    }

    fn unrecorded_changes(
        &mut self,
        template: &TemplateNamespace,
        target: &NamespaceName,
    ) -> Result<Vec<String>, SessionError> {
        let state = self.db.lock();
        let recorded = ledger_of(&state, target.as_str());
        Ok(ledger_of(&state, template.as_str())
            .into_iter()
            .filter(|change| !recorded.contains(change))
            .collect())
    }

    fn record_template_change(
        &mut self,
        template: &TemplateNamespace,
        change: &ChangeId,
    ) -> Result<(), SessionError> {
        self.db
            .lock()
            .ledger
            .insert((template.as_str().to_string(), change.as_str().to_string()));
        Ok(())
    }

    fn apply_change(
        &mut self,
        namespace: &NamespaceName,
        change: &SchemaChange,
    ) -> Result<ChangeOutcome, SessionError> {
        if self.search_path.as_deref() != Some(namespace.as_str()) {
            return Err(SessionError::Unbound);
        }
        let mut state = self.db.lock();
        let key = (namespace.as_str().to_string(), change.id.as_str().to_string());
        if state.ledger.contains(&key) {
            return Ok(ChangeOutcome::AlreadyApplied);
        }
        if state.failing_changes.contains(namespace.as_str()) {
            return Err(SessionError::Backend("injected change failure".to_string()));
        }
        let ns = state
            .namespaces
            .get_mut(namespace.as_str())
            .ok_or_else(|| missing_schema(namespace.as_str()))?;
        let mut working = ns.clone();
        execute_script(&mut working, &change.script)?;
        *ns = working;
        *state.applications.entry(key.clone()).or_insert(0) += 1;
        state.ledger.insert(key);
        Ok(ChangeOutcome::Applied)
    }
}

// ============================================================================
// SECTION: Script Interpreter
// ============================================================================

fn bound_table<'a>(
    state: &'a mut MemoryState,
    namespace: &str,
    table: &str,
) -> Result<&'a mut MemoryTable, SessionError> {
    state
        .namespaces
        .get_mut(namespace)
        .and_then(|ns| ns.tables.get_mut(table))
        .ok_or_else(|| missing_relation(namespace, table))
}

fn ledger_of(state: &MemoryState, namespace: &str) -> Vec<String> {
    state
        .ledger
        .iter()
        .filter(|(entry_ns, _)| entry_ns == namespace)
        .map(|(_, change)| change.clone())
        .collect()
}

fn missing_schema(namespace: &str) -> SessionError {
    SessionError::Backend(format!("schema \"{namespace}\" does not exist"))
}

fn missing_relation(namespace: &str, table: &str) -> SessionError {
    SessionError::Backend(format!("relation \"{namespace}.{table}\" does not exist"))
}

fn execute_script(namespace: &mut MemoryNamespace, script: &str) -> Result<(), SessionError> {
    for statement in script.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        execute_statement(namespace, statement)?;
    }
    Ok(())
}

fn execute_statement(namespace: &mut MemoryNamespace, statement: &str) -> Result<(), SessionError> {
    let tokens: Vec<&str> = statement.split_whitespace().collect();
    let head: Vec<String> = tokens.iter().take(2).map(|token| token.to_ascii_uppercase()).collect();
    match (head.first().map(String::as_str), head.get(1).map(String::as_str)) {
        (Some("CREATE"), Some("TABLE")) => create_table(namespace, statement),
        (Some("ALTER"), Some("TABLE")) => alter_table(namespace, &tokens),
        (Some("DROP"), Some("TABLE")) => drop_table(namespace, &tokens),
        _ => Err(SessionError::Invalid("unsupported statement".to_string())),
    }
}

fn normalize(name: &str) -> String {
    name.trim_matches(|c: char| c == '"' || c == '(' || c == ')' || c == ',')
        .to_ascii_lowercase()
}

fn create_table(namespace: &mut MemoryNamespace, statement: &str) -> Result<(), SessionError> {
    let open = statement
        .find('(')
        .ok_or_else(|| SessionError::Invalid("CREATE TABLE needs a column list".to_string()))?;
    let close = statement
        .rfind(')')
        .filter(|close| *close > open)
        .ok_or_else(|| SessionError::Invalid("unterminated column list".to_string()))?;
    let header: Vec<&str> = statement[.. open].split_whitespace().collect();
    let if_not_exists = header.iter().any(|token| token.eq_ignore_ascii_case("EXISTS"));
    let name = header
        .last()
        .map(|token| normalize(token))
        .filter(|name| !name.is_empty() && name != "table")
        .ok_or_else(|| SessionError::Invalid("CREATE TABLE needs a name".to_string()))?;
    if namespace.tables.contains_key(&name) {
        if if_not_exists {
            return Ok(());
        }
        return Err(SessionError::Backend(format!("relation \"{name}\" already exists")));
    }
    let mut table = MemoryTable::default();
    for definition in statement[open + 1 .. close].split(',') {
        let parts: Vec<&str> = definition.split_whitespace().collect();
        let Some(column) = parts.first().map(|part| normalize(part)) else {
            continue;
        };
        if table.columns.contains(&column) {
            return Err(SessionError::Backend(format!(
                "column \"{column}\" specified more than once"
            )));
        }
        if let Some(position) =
            parts.iter().position(|part| part.eq_ignore_ascii_case("REFERENCES"))
        {
            let referenced = parts
                .get(position + 1)
                .map(|part| normalize(part))
                .ok_or_else(|| SessionError::Invalid("REFERENCES needs a table".to_string()))?;
            table.foreign_keys.insert(column.clone(), referenced);
        }
        table.columns.push(column);
    }
    namespace.tables.insert(name, table);
    Ok(())
}

fn alter_table(namespace: &mut MemoryNamespace, tokens: &[&str]) -> Result<(), SessionError> {
    let name = tokens
        .get(2)
        .map(|token| normalize(token))
        .ok_or_else(|| SessionError::Invalid("ALTER TABLE needs a name".to_string()))?;
    let action = tokens.get(3).map(|token| token.to_ascii_uppercase());
    let mut rest = tokens.iter().skip(4).copied().peekable();
    if rest.peek().is_some_and(|token| token.eq_ignore_ascii_case("COLUMN")) {
        rest.next();
    }
    let column = rest
        .next()
        .map(normalize)
        .ok_or_else(|| SessionError::Invalid("ALTER TABLE needs a column".to_string()))?;
    let table = namespace
        .tables
        .get_mut(&name)
        .ok_or_else(|| SessionError::Backend(format!("relation \"{name}\" does not exist")))?;
    match action.as_deref() {
        Some("ADD") => {
            if table.columns.contains(&column) {
                return Err(SessionError::Backend(format!(
                    "column \"{column}\" of relation \"{name}\" already exists"
                )));
            }
            table.columns.push(column);
            Ok(())
        }
        Some("DROP") => {
            let before = table.columns.len();
            table.columns.retain(|existing| existing != &column);
            if table.columns.len() == before {
                return Err(SessionError::Backend(format!(
                    "column \"{column}\" of relation \"{name}\" does not exist"
                )));
            }
            table.foreign_keys.remove(&column);
            Ok(())
        }
        _ => Err(SessionError::Invalid("unsupported ALTER TABLE action".to_string())),
    }
}

fn drop_table(namespace: &mut MemoryNamespace, tokens: &[&str]) -> Result<(), SessionError> {
    let if_exists = tokens.get(2).is_some_and(|token| token.eq_ignore_ascii_case("IF"));
    let name_index = if if_exists { 4 } else { 2 };
    let name = tokens
        .get(name_index)
        .map(|token| normalize(token))
        .ok_or_else(|| SessionError::Invalid("DROP TABLE needs a name".to_string()))?;
    if namespace.tables.remove(&name).is_none() && !if_exists {
        return Err(SessionError::Backend(format!("relation \"{name}\" does not exist")));
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================
