// crates/tenancy-core/src/runtime/provisioning.rs
// ============================================================================
// Module: Schema Provisioning Service
// Description: Creates, verifies, seeds and tears down tenant namespaces.
// Purpose: Clone the template structure into tenant namespaces idempotently.
// Dependencies: r2d2, serde, thiserror, crate::interfaces
// ============================================================================

//! ## Overview
//! Provisioning runs as a sequence of observable steps on one
//! namespace-neutral session: create the namespace, clone each missing
//! template table, add foreign keys, then write the provisioned marker.
//! Every step is idempotent, so an interrupted run leaves an `incomplete`
//! namespace that the next [`ProvisioningService::provision`] call finishes.
//!
//! A new namespace starts with the template's change ledger as it stood at
//! creation. Changes recorded on the template while a run was interrupted
//! stay out of the namespace ledger: a pending tenant's namespace is then
//! rebuilt once, any other namespace is left for propagation to catch up.
//!
//! Seeding bootstrap rows is a separate operation that requires a
//! `complete` namespace. The template namespace is only ever read.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use r2d2::ManageConnection;
use serde::Serialize;
use thiserror::Error;

use crate::audit::AuditOutcome;
use crate::audit::SharedAuditSink;
use crate::audit::TenancyAuditEvent;
use crate::core::NamespaceName;
use crate::core::TemplateNamespace;
use crate::core::TenantId;
use crate::core::TenantRecord;
use crate::core::TenantStatus;
use crate::interfaces::RegistryError;
use crate::interfaces::SchemaCatalog;
use crate::interfaces::SessionError;
use crate::interfaces::TenantRegistry;
use crate::runtime::coordinator::BindingFailure;
use crate::runtime::coordinator::CoordinatorError;
use crate::runtime::coordinator::NamespaceCoordinator;
use crate::runtime::scope::RequestScope;
use crate::runtime::scope::ScopeInterrupt;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Audit event for a whole provisioning run.
pub const EVENT_PROVISION: &str = "namespace.provision";
/// Audit event for one provisioning step.
pub const EVENT_PROVISION_STEP: &str = "namespace.provision.step";
/// Audit event for verification results.
pub const EVENT_VERIFY: &str = "namespace.verify";
/// Audit event for bootstrap seeding.
pub const EVENT_SEED: &str = "namespace.seed";
/// Audit event for namespace teardown.
pub const EVENT_TEARDOWN: &str = "namespace.teardown";
/// Comment written on a namespace once every provisioning step completed.
pub const PROVISIONED_MARKER: &str = "tenancy:provisioned";

// ============================================================================
// SECTION: Types
// ============================================================================

/// Structural state of a tenant namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum NamespaceState {
    /// Every template table exists and the marker is written.
    Complete,
    /// Namespace exists but provisioning did not finish.
    Incomplete {
        /// Template tables absent from the namespace.
        missing_tables: Vec<String>,
        /// Whether the provisioned marker is present.
        marked: bool,
    },
    /// Namespace does not exist.
    Missing,
}

impl NamespaceState {
    /// Returns the state label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Incomplete {
                ..
            } => "incomplete",
            Self::Missing => "missing",
        }
    }
}

impl fmt::Display for NamespaceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incomplete {
                missing_tables,
                marked,
            } => write!(
                f,
                "incomplete (missing tables: [{}], marked: {marked})",
                missing_tables.join(", ")
            ),
            other => f.write_str(other.label()),
        }
    }
}

/// How a provisioning call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionOutcome {
    /// Namespace was created from scratch.
    Created,
    /// An incomplete namespace was finished.
    Resumed,
    /// Namespace was already complete; nothing changed.
    AlreadyComplete,
}

/// Result of a provisioning call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionReport {
    /// Tenant provisioned.
    pub tenant_id: TenantId,
    /// Namespace provisioned.
    pub namespace: NamespaceName,
    /// Outcome.
    pub outcome: ProvisionOutcome,
    /// Tables created by this call.
    pub tables_created: Vec<String>,
    /// Foreign keys added by this call.
    pub foreign_keys_added: usize,
    /// Tenant status after the call.
    pub status: TenantStatus,
}

/// Provisioning errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProvisionError {
    /// Tenant id is not registered.
    #[error("unknown tenant: {0}")]
    UnknownTenant(String),
    /// Another provisioning or teardown holds the namespace.
    #[error("namespace {0} is claimed by another structural operation")]
    InProgress(String),
    /// Template namespace does not exist.
    #[error("template namespace {0} does not exist")]
    TemplateMissing(String),
    /// Template namespace has no tables.
    #[error("template namespace {0} has no tables")]
    EmptyTemplate(String),
    /// Namespace is not complete after provisioning, or not complete enough
    /// for the requested operation.
    #[error("namespace {namespace} is {state}")]
    Incomplete {
        /// Namespace checked.
        namespace: String,
        /// Observed state.
        state: NamespaceState,
    },
    /// Teardown requires a suspended tenant.
    #[error("tenant {tenant_id} is {status}; only suspended tenants can be torn down")]
    NotSuspended {
        /// Tenant identifier.
        tenant_id: TenantId,
        /// Current status.
        status: TenantStatus,
    },
    /// Seeding requires an active tenant.
    #[error("tenant {tenant_id} is {status}; only active tenants can be seeded")]
    NotActive {
        /// Tenant identifier.
        tenant_id: TenantId,
        /// Current status.
        status: TenantStatus,
    },
    /// One provisioning step failed.
    #[error("provisioning step {step} failed for {namespace}: {error}")]
    Step {
        /// Step label.
        step: &'static str,
        /// Namespace targeted.
        namespace: String,
        /// Backend error.
        error: SessionError,
    },
    /// Request scope ended between steps.
    #[error("provisioning interrupted: {0}")]
    Interrupted(#[from] ScopeInterrupt),
    /// Seed function failed.
    #[error("bootstrap seed failed: {0}")]
    Seed(String),
    /// No connection could be obtained.
    #[error(transparent)]
    Binding(#[from] BindingFailure),
    /// Registry storage failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl From<CoordinatorError<Self>> for ProvisionError {
    fn from(err: CoordinatorError<Self>) -> Self {
        match err {
            CoordinatorError::Binding(failure) => Self::Binding(failure),
            CoordinatorError::Work(error) => error,
        }
    }
}

fn step_error(step: &'static str, namespace: &str) -> impl FnOnce(SessionError) -> ProvisionError {
    let namespace = namespace.to_string();
    move |error| ProvisionError::Step {
        step,
        namespace,
        error,
    }
}

// ============================================================================
// SECTION: Claims
// ============================================================================

/// In-process set of namespaces currently being provisioned or torn down.
///
/// Propagation skips claimed namespaces and reports them deferred.
#[derive(Debug, Default)]
pub struct NamespaceClaims {
    /// Claimed namespaces.
    claimed: Mutex<BTreeSet<NamespaceName>>,
}

impl NamespaceClaims {
    /// Creates an empty claim set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `namespace`; returns `None` when already claimed.
    #[must_use]
    pub fn try_claim(self: &Arc<Self>, namespace: &NamespaceName) -> Option<NamespaceClaim> {
        let mut claimed = self.claimed.lock().ok()?;
        if !claimed.insert(namespace.clone()) {
            return None;
        }
        Some(NamespaceClaim {
            claims: Arc::clone(self),
            namespace: namespace.clone(),
        })
    }

    /// Returns true while `namespace` is claimed.
    #[must_use]
    pub fn is_claimed(&self, namespace: &NamespaceName) -> bool {
        self.claimed.lock().map_or(true, |claimed| claimed.contains(namespace))
    }
}

/// Releases its namespace claim when dropped.
#[derive(Debug)]
pub struct NamespaceClaim {
    /// Owning claim set.
    claims: Arc<NamespaceClaims>,
    /// Claimed namespace.
    namespace: NamespaceName,
}

impl Drop for NamespaceClaim {
    fn drop(&mut self) {
        self.claims
            .claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.namespace);
    }
}

// ============================================================================
// SECTION: Service
// ============================================================================

/// Provisions tenant namespaces from the template namespace.
pub struct ProvisioningService<M>
where
    M: ManageConnection,
    M::Connection: SchemaCatalog,
{
    /// Shared coordinator.
    coordinator: NamespaceCoordinator<M>,
    /// Tenant registry.
    registry: Arc<dyn TenantRegistry>,
    /// Template namespace.
    template: TemplateNamespace,
    /// Claims shared with propagation.
    claims: Arc<NamespaceClaims>,
    /// Audit sink.
    audit: SharedAuditSink,
}

impl<M> ProvisioningService<M>
where
    M: ManageConnection,
    M::Connection: SchemaCatalog,
{
    /// Creates a provisioning service.
    #[must_use]
    pub fn new(
        coordinator: NamespaceCoordinator<M>,
        registry: Arc<dyn TenantRegistry>,
        template: TemplateNamespace,
        claims: Arc<NamespaceClaims>,
    ) -> Self {
        let audit = coordinator.audit();
        Self {
            coordinator,
            registry,
            template,
            claims,
            audit,
        }
    }

    /// Returns the template namespace.
    #[must_use]
    pub const fn template(&self) -> &TemplateNamespace {
        &self.template
    }

    /// Provisions the tenant's namespace, resuming partial runs. Promotes a
    /// pending tenant to active once the namespace is complete.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] when a step fails; the namespace is then
    /// reported `incomplete` by [`Self::verify`] and a retry resumes it.
    pub fn provision(
        &self,
        scope: &RequestScope,
        tenant_id: &TenantId,
    ) -> Result<ProvisionReport, ProvisionError> {
        let record = self.record(tenant_id)?;
        let namespace = record.namespace.clone();
        let Some(_claim) = self.claims.try_claim(&namespace) else {
            let event = self.event(EVENT_PROVISION, AuditOutcome::Deferred, &record);
            self.audit.record(&event.with_detail("claimed"));
            return Err(ProvisionError::InProgress(namespace.to_string()));
        };

        let built = self
            .coordinator
            .with_admin_session(scope, |session| self.build(session, scope, &record))
            .map_err(ProvisionError::from);
        let (outcome, tables_created, foreign_keys_added) = match built {
            Ok(built) => built,
            Err(err) => {
                let event = self.event(EVENT_PROVISION, AuditOutcome::Error, &record);
                self.audit.record(&event.with_detail(&err));
                return Err(err);
            }
        };

        let status = if record.status == TenantStatus::Pending {
            self.registry.set_status(&record.id, TenantStatus::Active)?.status
        } else {
            record.status
        };
        let audit_outcome = if outcome == ProvisionOutcome::AlreadyComplete {
            AuditOutcome::Noop
        } else {
            AuditOutcome::Ok
        };
        self.audit.record(&self.event(EVENT_PROVISION, audit_outcome, &record).with_detail(
            match outcome {
                ProvisionOutcome::Created => "created",
                ProvisionOutcome::Resumed => "resumed",
                ProvisionOutcome::AlreadyComplete => "already complete",
            },
        ));
        Ok(ProvisionReport {
            tenant_id: record.id,
            namespace,
            outcome,
            tables_created,
            foreign_keys_added,
            status,
        })
    }

    /// Reports whether the tenant's namespace is complete, incomplete or
    /// missing.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] when the tenant is unknown, the template is
    /// unusable or the catalog cannot be read.
    pub fn verify(
        &self,
        scope: &RequestScope,
        tenant_id: &TenantId,
    ) -> Result<NamespaceState, ProvisionError> {
        let record = self.record(tenant_id)?;
        let state = self
            .coordinator
            .with_admin_session(scope, |session| self.inspect(session, &record.namespace))?;
        let outcome = if state == NamespaceState::Complete {
            AuditOutcome::Ok
        } else {
            AuditOutcome::Rejected
        };
        self.audit.record(&self.event(EVENT_VERIFY, outcome, &record).with_detail(&state));
        Ok(state)
    }

    /// Runs `seed` bound to the tenant's namespace. The tenant must be active
    /// and its namespace complete; structural provisioning never runs here.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::NotActive`] for pending or suspended tenants,
    /// [`ProvisionError::Incomplete`] when the namespace is not complete, or
    /// [`ProvisionError::Seed`] with the seed's error.
    pub fn seed_bootstrap<T, E, F>(
        &self,
        scope: &RequestScope,
        tenant_id: &TenantId,
        seed: F,
    ) -> Result<T, ProvisionError>
    where
        E: fmt::Display,
        F: FnOnce(&mut M::Connection) -> Result<T, E>,
    {
        let record = self.record(tenant_id)?;
        if record.status != TenantStatus::Active {
            self.audit.record(
                &self
                    .event(EVENT_SEED, AuditOutcome::Rejected, &record)
                    .with_detail(record.status),
            );
            return Err(ProvisionError::NotActive {
                tenant_id: record.id,
                status: record.status,
            });
        }
        let state = self
            .coordinator
            .with_admin_session(scope, |session| self.inspect(session, &record.namespace))?;
        if state != NamespaceState::Complete {
            self.audit.record(
                &self.event(EVENT_SEED, AuditOutcome::Rejected, &record).with_detail(&state),
            );
            return Err(ProvisionError::Incomplete {
                namespace: record.namespace.to_string(),
                state,
            });
        }
        let seeded = self
            .coordinator
            .with_namespace(scope, &record.namespace, seed)
            .map_err(|err| match err {
                CoordinatorError::Binding(failure) => ProvisionError::Binding(failure),
                CoordinatorError::Work(error) => ProvisionError::Seed(error.to_string()),
            });
        match &seeded {
            Ok(_) => self.audit.record(&self.event(EVENT_SEED, AuditOutcome::Ok, &record)),
            Err(err) => self
                .audit
                .record(&self.event(EVENT_SEED, AuditOutcome::Error, &record).with_detail(err)),
        }
        seeded
    }

    /// Drops the namespace of a suspended tenant. The registry record stays.
    /// Returns false when there was no namespace to drop.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::NotSuspended`] unless the tenant is
    /// suspended, or [`ProvisionError::InProgress`] while provisioning runs.
    pub fn teardown(
        &self,
        scope: &RequestScope,
        tenant_id: &TenantId,
    ) -> Result<bool, ProvisionError> {
        let record = self.record(tenant_id)?;
        if record.status != TenantStatus::Suspended {
            return Err(ProvisionError::NotSuspended {
                tenant_id: record.id,
                status: record.status,
            });
        }
        let Some(_claim) = self.claims.try_claim(&record.namespace) else {
            return Err(ProvisionError::InProgress(record.namespace.to_string()));
        };
        let dropped = self.coordinator.with_admin_session(scope, |session| {
            let namespace = record.namespace.as_str();
            if !session.namespace_exists(namespace).map_err(step_error("inspect", namespace))? {
                return Ok(false);
            }
            session
                .drop_namespace(&record.namespace)
                .map_err(step_error("drop_namespace", namespace))?;
            Ok::<bool, ProvisionError>(true)
        })?;
        let outcome = if dropped { AuditOutcome::Ok } else { AuditOutcome::Noop };
        self.audit.record(&self.event(EVENT_TEARDOWN, outcome, &record));
        Ok(dropped)
    }

    fn record(&self, tenant_id: &TenantId) -> Result<TenantRecord, ProvisionError> {
        let record = self
            .registry
            .lookup_by_id(tenant_id)?
            .ok_or_else(|| ProvisionError::UnknownTenant(tenant_id.to_string()))?;
        if !record.namespace_is_derived() {
            return Err(ProvisionError::Registry(RegistryError::Corrupt(format!(
                "namespace of tenant {} does not match its id",
                record.id
            ))));
        }
        Ok(record)
    }

    fn template_tables(
        &self,
        session: &mut M::Connection,
    ) -> Result<BTreeSet<String>, ProvisionError> {
        let template = self.template.as_str();
        if !session.namespace_exists(template).map_err(step_error("inspect_template", template))? {
            return Err(ProvisionError::TemplateMissing(template.to_string()));
        }
        let tables =
            session.table_names(template).map_err(step_error("inspect_template", template))?;
        if tables.is_empty() {
            return Err(ProvisionError::EmptyTemplate(template.to_string()));
        }
        Ok(tables)
    }

    fn inspect(
        &self,
        session: &mut M::Connection,
        namespace: &NamespaceName,
    ) -> Result<NamespaceState, ProvisionError> {
        let expected = self.template_tables(session)?;
        let name = namespace.as_str();
        if !session.namespace_exists(name).map_err(step_error("inspect", name))? {
            return Ok(NamespaceState::Missing);
        }
        let present = session.table_names(name).map_err(step_error("inspect", name))?;
        let missing_tables: Vec<String> = expected.difference(&present).cloned().collect();
        let marked =
            session.is_marked_provisioned(namespace).map_err(step_error("inspect", name))?;
        if missing_tables.is_empty() && marked {
            Ok(NamespaceState::Complete)
        } else {
            Ok(NamespaceState::Incomplete {
                missing_tables,
                marked,
            })
        }
    }

    fn build(
        &self,
        session: &mut M::Connection,
        scope: &RequestScope,
        record: &TenantRecord,
    ) -> Result<(ProvisionOutcome, Vec<String>, usize), ProvisionError> {
        let namespace = &record.namespace;
        let name = namespace.as_str();
        let outcome = match self.inspect(session, namespace)? {
            NamespaceState::Complete => {
                return Ok((ProvisionOutcome::AlreadyComplete, Vec::new(), 0));
            }
            NamespaceState::Incomplete {
                ..
            } => ProvisionOutcome::Resumed,
            NamespaceState::Missing => ProvisionOutcome::Created,
        };

        let mut rebuilt = false;
        let (tables_created, foreign_keys_added) = loop {
            let (tables_created, foreign_keys_added) =
                self.clone_structure(session, scope, record)?;
            let unrecorded = session
                .unrecorded_changes(&self.template, namespace)
                .map_err(step_error("unrecorded_changes", name))?;
            if unrecorded.is_empty() {
                break (tables_created, foreign_keys_added);
            }
            // Tables cloned before these changes lack them; pending tenants hold no data.
            if record.status == TenantStatus::Pending && !rebuilt {
                session.drop_namespace(namespace).map_err(step_error("rebuild_namespace", name))?;
                self.step(record, "rebuild_namespace", Some(&unrecorded.join(", ")));
                rebuilt = true;
                continue;
            }
            self.step(record, "unrecorded_changes", Some(&unrecorded.join(", ")));
            break (tables_created, foreign_keys_added);
        };

        session.mark_provisioned(namespace).map_err(step_error("mark_provisioned", name))?;
        self.step(record, "mark_provisioned", None);

        match self.inspect(session, namespace)? {
            NamespaceState::Complete => Ok((outcome, tables_created, foreign_keys_added)),
            state => Err(ProvisionError::Incomplete {
                namespace: name.to_string(),
                state,
            }),
        }
    }

    fn clone_structure(
        &self,
        session: &mut M::Connection,
        scope: &RequestScope,
        record: &TenantRecord,
    ) -> Result<(Vec<String>, usize), ProvisionError> {
        let namespace = &record.namespace;
        let name = namespace.as_str();
        session
            .create_namespace(&self.template, namespace)
            .map_err(step_error("create_namespace", name))?;
        self.step(record, "create_namespace", None);

        let expected = self.template_tables(session)?;
        let present = session.table_names(name).map_err(step_error("inspect", name))?;
        let mut tables_created = Vec::new();
        for table in expected.difference(&present) {
            scope.check()?;
            session
                .clone_table(&self.template, namespace, table)
                .map_err(step_error("clone_table", name))?;
            self.step(record, "clone_table", Some(table.as_str()));
            tables_created.push(table.clone());
        }

        scope.check()?;
        let foreign_keys_added = session
            .clone_foreign_keys(&self.template, namespace)
            .map_err(step_error("clone_foreign_keys", name))?;
        self.step(record, "clone_foreign_keys", Some(&foreign_keys_added.to_string()));
        Ok((tables_created, foreign_keys_added))
    }

    fn step(&self, record: &TenantRecord, step: &str, detail: Option<&str>) {
        let detail = detail.map_or_else(|| step.to_string(), |detail| format!("{step}: {detail}"));
        let event = self.event(EVENT_PROVISION_STEP, AuditOutcome::Ok, record);
        self.audit.record(&event.with_detail(detail));
    }

    fn event(
        &self,
        name: &'static str,
        outcome: AuditOutcome,
        record: &TenantRecord,
    ) -> TenancyAuditEvent {
        TenancyAuditEvent::new(name, outcome)
            .with_tenant(record.id)
            .with_namespace(&record.namespace)
    }
}
