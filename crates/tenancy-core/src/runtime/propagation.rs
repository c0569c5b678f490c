// crates/tenancy-core/src/runtime/propagation.rs
// ============================================================================
// Module: Template Propagation
// Description: Applies template schema changes to every tenant namespace.
// Purpose: Keep tenant namespaces structurally in sync, resumably.
// Dependencies: r2d2, serde, thiserror, crate::interfaces
// ============================================================================

//! ## Overview
//! A [`SchemaChange`] is assumed to be applied to the template already.
//! Propagation records it in the template's ledger (so namespaces
//! provisioned afterwards inherit it) and then applies it to each tenant
//! namespace through an ordinary bound connection. Namespaces are
//! independent: failures are collected in the [`PropagationReport`] and the
//! pass continues.
//!
//! Each namespace is claimed for the duration of its application, so
//! provisioning and propagation never touch the same namespace at once.
//! Namespaces that are claimed, not yet complete or reached after the
//! scope ended are reported as deferred for the next pass.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use r2d2::ManageConnection;
use serde::Serialize;
use thiserror::Error;

use crate::audit::AuditOutcome;
use crate::audit::SharedAuditSink;
use crate::audit::TenancyAuditEvent;
use crate::core::ChangeId;
use crate::core::NamespaceName;
use crate::core::TemplateNamespace;
use crate::core::TenantId;
use crate::interfaces::ChangeOutcome;
use crate::interfaces::RegistryError;
use crate::interfaces::SchemaCatalog;
use crate::interfaces::SchemaChange;
use crate::interfaces::SessionError;
use crate::interfaces::TenantRegistry;
use crate::runtime::coordinator::BindingFailure;
use crate::runtime::coordinator::CoordinatorError;
use crate::runtime::coordinator::NamespaceCoordinator;
use crate::runtime::provisioning::NamespaceClaims;
use crate::runtime::scope::RequestScope;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Audit event for a propagation pass.
pub const EVENT_PROPAGATE: &str = "schema.propagate";
/// Audit event for one namespace within a pass.
pub const EVENT_PROPAGATE_NAMESPACE: &str = "schema.propagate.namespace";

// ============================================================================
// SECTION: Report
// ============================================================================

/// Namespace a change was applied to, or found already applied in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamespaceTarget {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Tenant namespace.
    pub namespace: NamespaceName,
}

/// Why a namespace was skipped in this pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferReason {
    /// Provisioning or teardown held the namespace.
    Claimed,
    /// Namespace is missing or not completely provisioned.
    NotProvisioned,
    /// Request scope was cancelled or expired.
    Cancelled,
}

impl DeferReason {
    /// Returns the snake-case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Claimed => "claimed",
            Self::NotProvisioned => "not_provisioned",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Namespace skipped in this pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeferredNamespace {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Tenant namespace.
    pub namespace: NamespaceName,
    /// Skip reason.
    pub reason: DeferReason,
}

/// Namespace where the change failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedNamespace {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Tenant namespace.
    pub namespace: NamespaceName,
    /// Error message.
    pub error: String,
}

/// Per-namespace outcome of one propagation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropagationReport {
    /// Change propagated.
    pub change_id: ChangeId,
    /// Namespaces where the change ran.
    pub applied: Vec<NamespaceTarget>,
    /// Namespaces whose ledger already held the change.
    pub already_applied: Vec<NamespaceTarget>,
    /// Namespaces skipped for a later pass.
    pub deferred: Vec<DeferredNamespace>,
    /// Namespaces where the change failed.
    pub failed: Vec<FailedNamespace>,
}

impl PropagationReport {
    fn new(change_id: ChangeId) -> Self {
        Self {
            change_id,
            applied: Vec::new(),
            already_applied: Vec::new(),
            deferred: Vec::new(),
            failed: Vec::new(),
        }
    }

    /// Returns true when no namespace failed or was deferred.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.deferred.is_empty()
    }

    /// Converts a report with failures into
    /// [`PropagationError::PartialFailure`].
    ///
    /// # Errors
    ///
    /// Returns [`PropagationError::PartialFailure`] when any namespace failed.
    pub fn into_result(self) -> Result<Self, PropagationError> {
        if self.failed.is_empty() {
            Ok(self)
        } else {
            Err(PropagationError::PartialFailure {
                change_id: self.change_id,
                failed: self.failed,
            })
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Propagation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PropagationError {
    /// One or more namespaces failed; the rest were processed.
    #[error("change {change_id} failed in {} namespace(s)", .failed.len())]
    PartialFailure {
        /// Change propagated.
        change_id: ChangeId,
        /// Failed namespaces.
        failed: Vec<FailedNamespace>,
    },
    /// Retry requested with a report for a different change.
    #[error("report is for change {report}, not {requested}")]
    ChangeMismatch {
        /// Change in the report.
        report: ChangeId,
        /// Change requested.
        requested: ChangeId,
    },
    /// Template ledger could not be updated.
    #[error("failed to record change in template ledger: {0}")]
    TemplateLedger(SessionError),
    /// No connection could be obtained for the template ledger.
    #[error(transparent)]
    Binding(#[from] BindingFailure),
    /// Registry storage failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

// ============================================================================
// SECTION: Propagator
// ============================================================================

/// Applies template changes to tenant namespaces.
pub struct TemplatePropagator<M>
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
    /// Claims shared with provisioning.
    claims: Arc<NamespaceClaims>,
    /// Audit sink.
    audit: SharedAuditSink,
}

impl<M> TemplatePropagator<M>
where
    M: ManageConnection,
    M::Connection: SchemaCatalog,
{
    /// Creates a propagator.
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

    /// Applies `change` to every registered tenant namespace.
    ///
    /// # Errors
    ///
    /// Returns [`PropagationError`] only when the pass cannot start (template
    /// ledger or registry unavailable). Per-namespace failures are in the
    /// returned report.
    pub fn propagate(
        &self,
        scope: &RequestScope,
        change: &SchemaChange,
    ) -> Result<PropagationReport, PropagationError> {
        self.coordinator
            .with_admin_session(scope, |session: &mut M::Connection| {
                session.record_template_change(&self.template, &change.id)
            })
            .map_err(|err| match err {
                CoordinatorError::Binding(failure) => PropagationError::Binding(failure),
                CoordinatorError::Work(error) => PropagationError::TemplateLedger(error),
            })?;
        let targets = self
            .registry
            .list()?
            .into_iter()
            .filter(|record| record.namespace_is_derived())
            .map(|record| NamespaceTarget {
                tenant_id: record.id,
                namespace: record.namespace,
            })
            .collect();
        Ok(self.apply_all(scope, change, targets))
    }

    /// Re-runs `change` against only the namespaces `previous` reports as
    /// failed. Namespaces that already applied it are not touched.
    ///
    /// # Errors
    ///
    /// Returns [`PropagationError::ChangeMismatch`] when `previous` belongs
    /// to a different change.
    pub fn retry_failed(
        &self,
        scope: &RequestScope,
        change: &SchemaChange,
        previous: &PropagationReport,
    ) -> Result<PropagationReport, PropagationError> {
        if previous.change_id != change.id {
            return Err(PropagationError::ChangeMismatch {
                report: previous.change_id.clone(),
                requested: change.id.clone(),
            });
        }
        let targets = previous
            .failed
            .iter()
            .map(|failed| NamespaceTarget {
                tenant_id: failed.tenant_id,
                namespace: failed.namespace.clone(),
            })
            .collect();
        Ok(self.apply_all(scope, change, targets))
    }

    fn apply_all(
        &self,
        scope: &RequestScope,
        change: &SchemaChange,
        targets: Vec<NamespaceTarget>,
    ) -> PropagationReport {
        let mut report = PropagationReport::new(change.id.clone());
        for target in targets {
            if target.namespace.as_str() == self.template.as_str() {
                continue;
            }
            if scope.check().is_err() {
                self.defer(&mut report, target, DeferReason::Cancelled);
                continue;
            }
            let Some(_claim) = self.claims.try_claim(&target.namespace) else {
                self.defer(&mut report, target, DeferReason::Claimed);
                continue;
            };
            match self.apply_one(scope, change, &target.namespace) {
                Ok(Some(outcome)) => {
                    self.audit.record(
                        &self
                            .event(&target, AuditOutcome::Ok)
                            .with_detail(format!("{}: {}", change.id, outcome.as_str())),
                    );
                    match outcome {
                        ChangeOutcome::Applied => report.applied.push(target),
                        ChangeOutcome::AlreadyApplied => report.already_applied.push(target),
                    }
                }
                Ok(None) => self.defer(&mut report, target, DeferReason::NotProvisioned),
                Err(CoordinatorError::Binding(
                    BindingFailure::Cancelled | BindingFailure::DeadlineExceeded,
                )) => self.defer(&mut report, target, DeferReason::Cancelled),
                Err(err) => {
                    let error = err.to_string();
                    self.audit
                        .record(&self.event(&target, AuditOutcome::Error).with_detail(&error));
                    report.failed.push(FailedNamespace {
                        tenant_id: target.tenant_id,
                        namespace: target.namespace,
                        error,
                    });
                }
            }
        }
        let outcome = if report.failed.is_empty() { AuditOutcome::Ok } else { AuditOutcome::Error };
        self.audit.record(&TenancyAuditEvent::new(EVENT_PROPAGATE, outcome).with_detail(format!(
            "{}: applied={} already_applied={} deferred={} failed={}",
            report.change_id,
            report.applied.len(),
            report.already_applied.len(),
            report.deferred.len(),
            report.failed.len()
        )));
        report
    }

    /// Applies the change to one complete namespace; `None` when the
    /// namespace is missing or not completely provisioned.
    fn apply_one(
        &self,
        scope: &RequestScope,
        change: &SchemaChange,
        namespace: &NamespaceName,
    ) -> Result<Option<ChangeOutcome>, CoordinatorError<SessionError>> {
        let ready = self.coordinator.with_admin_session(scope, |session: &mut M::Connection| {
            session.is_marked_provisioned(namespace)
        })?;
        if !ready {
            return Ok(None);
        }
        self.coordinator
            .with_namespace(scope, namespace, |session: &mut M::Connection| {
                session.apply_change(namespace, change)
            })
            .map(Some)
    }

    fn defer(&self, report: &mut PropagationReport, target: NamespaceTarget, reason: DeferReason) {
        self.audit.record(
            &self.event(&target, AuditOutcome::Deferred).with_detail(reason.as_str()),
        );
        report.deferred.push(DeferredNamespace {
            tenant_id: target.tenant_id,
            namespace: target.namespace,
            reason,
        });
    }

    fn event(&self, target: &NamespaceTarget, outcome: AuditOutcome) -> TenancyAuditEvent {
        TenancyAuditEvent::new(EVENT_PROPAGATE_NAMESPACE, outcome)
            .with_tenant(target.tenant_id)
            .with_namespace(&target.namespace)
    }
}
